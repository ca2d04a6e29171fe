use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{entitlement::Entitlement, iap_purchase_id::IapReceipt};

/// One completed checkout, as delivered by the platform store.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseTransaction {
    pub transaction_id: String,
    pub product_id: String,
    pub receipt: IapReceipt,
    pub transaction_date: DateTime<Utc>,
    pub auto_renewing: Option<bool>,
}

/// Lifecycle of a transaction inside the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Received,
    Validating,
    Confirmed,
    Rejected,
    Finished,
}

/// Terminal result of validating a transaction with the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum PurchaseOutcome {
    Confirmed {
        transaction_id: String,
        entitlement: Entitlement,
    },
    Rejected {
        transaction_id: String,
        reason: String,
    },
}

impl PurchaseOutcome {
    pub fn transaction_id(&self) -> &str {
        match self {
            PurchaseOutcome::Confirmed { transaction_id, .. }
            | PurchaseOutcome::Rejected { transaction_id, .. } => transaction_id,
        }
    }

    pub fn state(&self) -> TransactionState {
        match self {
            PurchaseOutcome::Confirmed { .. } => TransactionState::Confirmed,
            PurchaseOutcome::Rejected { .. } => TransactionState::Rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordedOutcome {
    Confirmed,
    Rejected,
}

/// Entry of the append-only local purchase history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseHistoryEntry {
    pub transaction_id: String,
    pub product_id: String,
    pub transaction_date: DateTime<Utc>,
    pub outcome: RecordedOutcome,
    pub recorded_at: DateTime<Utc>,
}
