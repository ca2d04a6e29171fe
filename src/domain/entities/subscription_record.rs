use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entitlement::PlanTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Cancelled,
    Expired,
    Unpaid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionProvider {
    Apple,
    Google,
}

/// Server-owned subscription row. The client never mutates it directly.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRecord {
    pub id: String,
    pub plan: PlanTier,
    pub status: SubscriptionStatus,
    pub provider: Option<SubscriptionProvider>,
    pub product_id: Option<String>,
    pub external_transaction_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub auto_renewing: Option<bool>,
    /// Cancellation takes effect at the end of the current period.
    pub cancel_at_period_end: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Answer of the backend status endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionStatusSnapshot {
    pub subscription: Option<SubscriptionRecord>,
    pub is_active: bool,
    pub plan: PlanTier,
}

/// Answer of the backend bulk-restore endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreSummary {
    pub restored: u32,
    pub current_subscription: Option<SubscriptionRecord>,
    pub is_active: bool,
    pub plan: PlanTier,
}
