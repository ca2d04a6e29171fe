use serde::{Deserialize, Serialize};

use super::subscription_model::SubscriptionModel;

/// Body of `POST /api/v1/subscriptions/validate-receipt`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ValidateReceiptRequestModel<'a> {
    /// `ios` or `android`.
    pub(crate) platform: &'a str,
    pub(crate) product_id: &'a str,
    /// Signed receipt blob (iOS) or purchase token (Android).
    pub(crate) receipt: &'a str,
    pub(crate) transaction_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ValidateReceiptDataModel {
    pub(crate) subscription: SubscriptionModel,
}
