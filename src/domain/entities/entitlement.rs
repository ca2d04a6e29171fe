use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    iap_product_id::billing_period_for_sku,
    subscription_record::{SubscriptionRecord, SubscriptionStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingPeriod {
    Monthly,
    Yearly,
}

/// Plan tier as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
}

/// The user's right to access paid features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub is_active: bool,
    pub product_id: Option<String>,
    pub billing_period: Option<BillingPeriod>,
    #[serde(default)]
    pub plan: PlanTier,
    /// Absence means the expiry is not tracked, not that it never expires.
    pub expiry_date: Option<DateTime<Utc>>,
    pub auto_renewing: Option<bool>,
}

impl Entitlement {
    pub fn inactive() -> Self {
        Self {
            is_active: false,
            product_id: None,
            billing_period: None,
            plan: PlanTier::Free,
            expiry_date: None,
            auto_renewing: None,
        }
    }

    /// Builds the entitlement confirmed by a backend subscription record. The
    /// product id is the one the device purchased, when known, since the
    /// backend does not always echo it.
    pub(crate) fn from_record(record: &SubscriptionRecord, product_id: Option<&str>) -> Self {
        let product_id = product_id
            .map(str::to_string)
            .or_else(|| record.product_id.clone());
        let is_active = record.status.grants_access();
        Self {
            is_active,
            billing_period: product_id.as_deref().and_then(billing_period_for_sku),
            product_id,
            plan: if is_active { record.plan } else { PlanTier::Free },
            expiry_date: record.current_period_end,
            auto_renewing: record.auto_renewing,
        }
    }

    pub(crate) fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date.is_some_and(|expiry| expiry <= now)
    }
}

/// Cached entitlement read before the backend has been consulted.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticEntitlement {
    pub entitlement: Entitlement,
    /// Whether the backend confirmed an active subscription during the
    /// current session. Only confirmed entitlements may unlock features.
    pub confirmed_this_session: bool,
}

/// Outcome of a restore-purchases request.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreResult {
    pub is_active: bool,
    pub product_id: Option<String>,
    pub billing_period: Option<BillingPeriod>,
    pub entitlement: Entitlement,
}

impl RestoreResult {
    pub(crate) fn nothing_restored() -> Self {
        Self {
            is_active: false,
            product_id: None,
            billing_period: None,
            entitlement: Entitlement::inactive(),
        }
    }

    pub(crate) fn from_entitlement(entitlement: Entitlement) -> Self {
        Self {
            is_active: entitlement.is_active,
            product_id: entitlement.product_id.clone(),
            billing_period: entitlement.billing_period,
            entitlement,
        }
    }
}

impl SubscriptionStatus {
    /// Statuses that unlock paid features.
    pub fn grants_access(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}
