use serde::{Deserialize, Serialize};

use super::subscription_model::{PlanModel, SubscriptionModel};

/// Body of `POST /api/v1/subscriptions/restore`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RestoreRequestModel<'a> {
    pub(crate) platform: &'a str,
    pub(crate) receipts: Vec<RestoreReceiptModel<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RestoreReceiptModel<'a> {
    pub(crate) product_id: &'a str,
    pub(crate) receipt: &'a str,
    pub(crate) transaction_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RestoreDataModel {
    pub(crate) restored: u32,
    pub(crate) current_subscription: Option<SubscriptionModel>,
    pub(crate) is_active: bool,
    pub(crate) plan: PlanModel,
}
