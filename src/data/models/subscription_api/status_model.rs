use serde::Deserialize;

use super::subscription_model::{PlanModel, SubscriptionModel};

/// Data of `GET /api/v1/subscriptions/status`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatusDataModel {
    pub(crate) subscription: Option<SubscriptionModel>,
    pub(crate) is_active: bool,
    pub(crate) plan: PlanModel,
}

/// Data of `POST /api/v1/subscriptions/:id/cancel`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CancelDataModel {
    pub(crate) subscription: SubscriptionModel,
}
