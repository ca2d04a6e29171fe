use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    config::IapConfig,
    data::{
        datasources::{
            access_token_provider::AccessTokenProvider,
            subscription_api_datasource::{
                SubscriptionApiDatasource, SubscriptionApiDatasourceImpl,
            },
        },
        models::subscription_api::{
            restore_model::{RestoreReceiptModel, RestoreRequestModel},
            subscription_model as sm,
            validate_receipt_model::ValidateReceiptRequestModel,
        },
    },
    domain::{
        entities::{
            entitlement::PlanTier,
            purchase_transaction::PurchaseTransaction,
            subscription_record::{
                RestoreSummary, SubscriptionProvider, SubscriptionRecord, SubscriptionStatus,
                SubscriptionStatusSnapshot,
            },
        },
        repositories::subscription_repository::SubscriptionRepository,
    },
    errors::SubscriptionApiError,
};

pub(crate) struct SubscriptionRepositoryImpl<A: SubscriptionApiDatasource> {
    subscription_api_datasource: A,
}

#[async_trait]
impl<A: SubscriptionApiDatasource> SubscriptionRepository for SubscriptionRepositoryImpl<A> {
    async fn validate_receipt(
        &self,
        transaction: &PurchaseTransaction,
    ) -> Result<SubscriptionRecord, SubscriptionApiError> {
        let m = self
            .subscription_api_datasource
            .validate_receipt(ValidateReceiptRequestModel {
                platform: transaction.receipt.platform().as_str(),
                product_id: &transaction.product_id,
                receipt: transaction.receipt.payload(),
                transaction_id: &transaction.transaction_id,
            })
            .await?;
        SubscriptionRecord::from_model(m.subscription)
    }

    async fn status(&self) -> Result<SubscriptionStatusSnapshot, SubscriptionApiError> {
        let m = self.subscription_api_datasource.get_status().await?;
        Ok(SubscriptionStatusSnapshot {
            subscription: m.subscription.map(SubscriptionRecord::from_model).transpose()?,
            is_active: m.is_active,
            plan: PlanTier::from_model(&m.plan),
        })
    }

    async fn history(&self) -> Result<Vec<SubscriptionRecord>, SubscriptionApiError> {
        self.subscription_api_datasource
            .get_history()
            .await?
            .into_iter()
            .map(SubscriptionRecord::from_model)
            .collect()
    }

    async fn cancel(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionRecord, SubscriptionApiError> {
        let m = self.subscription_api_datasource.cancel(subscription_id).await?;
        SubscriptionRecord::from_model(m.subscription)
    }

    async fn restore_receipts(
        &self,
        transactions: &[PurchaseTransaction],
    ) -> Result<RestoreSummary, SubscriptionApiError> {
        let Some(first) = transactions.first() else {
            return Ok(RestoreSummary {
                restored: 0,
                current_subscription: None,
                is_active: false,
                plan: PlanTier::Free,
            });
        };
        let m = self
            .subscription_api_datasource
            .restore(RestoreRequestModel {
                platform: first.receipt.platform().as_str(),
                receipts: transactions
                    .iter()
                    .map(|t| RestoreReceiptModel {
                        product_id: &t.product_id,
                        receipt: t.receipt.payload(),
                        transaction_id: &t.transaction_id,
                    })
                    .collect(),
            })
            .await?;
        Ok(RestoreSummary {
            restored: m.restored,
            current_subscription: m
                .current_subscription
                .map(SubscriptionRecord::from_model)
                .transpose()?,
            is_active: m.is_active,
            plan: PlanTier::from_model(&m.plan),
        })
    }
}

impl SubscriptionRepositoryImpl<SubscriptionApiDatasourceImpl> {
    pub(crate) fn new(
        config: &IapConfig,
        token_provider: Arc<dyn AccessTokenProvider>,
    ) -> Result<Self, SubscriptionApiError> {
        Ok(Self {
            subscription_api_datasource: SubscriptionApiDatasourceImpl::new(
                config,
                token_provider,
            )?,
        })
    }
}

impl SubscriptionRecord {
    fn from_model(m: sm::SubscriptionModel) -> Result<Self, SubscriptionApiError> {
        Ok(SubscriptionRecord {
            status: match m.status {
                sm::StatusModel::Active => SubscriptionStatus::Active,
                sm::StatusModel::Trialing => SubscriptionStatus::Trialing,
                sm::StatusModel::PastDue => SubscriptionStatus::PastDue,
                sm::StatusModel::Cancelled => SubscriptionStatus::Cancelled,
                sm::StatusModel::Expired => SubscriptionStatus::Expired,
                sm::StatusModel::Unpaid => SubscriptionStatus::Unpaid,
                sm::StatusModel::Unknown(other) => {
                    return Err(SubscriptionApiError::Serde(format!(
                        "unknown subscription status '{other}'"
                    )))
                }
            },
            plan: PlanTier::from_model(&m.plan),
            provider: match m.provider {
                Some(sm::ProviderModel::Apple) => Some(SubscriptionProvider::Apple),
                Some(sm::ProviderModel::Google) => Some(SubscriptionProvider::Google),
                Some(sm::ProviderModel::Unknown(_)) | None => None,
            },
            id: m.id,
            product_id: m.product_id,
            external_transaction_id: m.external_transaction_id,
            start_date: m.start_date,
            current_period_end: m.current_period_end,
            auto_renewing: m.auto_renewing,
            cancel_at_period_end: m.cancel_at_period_end,
            cancelled_at: m.cancelled_at,
        })
    }
}

impl PlanTier {
    /// Unknown plans grant nothing.
    fn from_model(m: &sm::PlanModel) -> Self {
        match m {
            sm::PlanModel::Pro => PlanTier::Pro,
            sm::PlanModel::Free | sm::PlanModel::Unknown(_) => PlanTier::Free,
        }
    }
}
