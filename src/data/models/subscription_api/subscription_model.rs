use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Subscription row as serialized by the backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubscriptionModel {
    pub(crate) id: String,
    pub(crate) plan: PlanModel,
    pub(crate) status: StatusModel,
    #[serde(default)]
    pub(crate) provider: Option<ProviderModel>,
    /// Store SKU of the subscription. Older backend versions omit it.
    #[serde(default)]
    pub(crate) product_id: Option<String>,
    /// Apple original transaction id or Google order id.
    #[serde(default)]
    pub(crate) external_transaction_id: Option<String>,
    #[serde(default)]
    pub(crate) start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) current_period_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) auto_renewing: Option<bool>,
    #[serde(default)]
    pub(crate) cancel_at_period_end: bool,
    #[serde(default)]
    pub(crate) cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum PlanModel {
    Free,
    Pro,

    #[serde(untagged)]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum StatusModel {
    Active,
    Trialing,
    PastDue,
    Cancelled,
    Expired,
    Unpaid,

    #[serde(untagged)]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum ProviderModel {
    Apple,
    Google,

    #[serde(untagged)]
    Unknown(String),
}
