use async_trait::async_trait;

use crate::{
    domain::entities::{
        purchase_transaction::PurchaseTransaction,
        subscription_record::{RestoreSummary, SubscriptionRecord, SubscriptionStatusSnapshot},
    },
    errors::SubscriptionApiError,
};

/// Backend subscription API, the authoritative source of entitlement.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Submits the transaction's receipt for server-side validation and
    /// returns the subscription row it produced. Rejections come back as
    /// `SubscriptionApiError::Rejected`.
    async fn validate_receipt(
        &self,
        transaction: &PurchaseTransaction,
    ) -> Result<SubscriptionRecord, SubscriptionApiError>;

    async fn status(&self) -> Result<SubscriptionStatusSnapshot, SubscriptionApiError>;

    async fn history(&self) -> Result<Vec<SubscriptionRecord>, SubscriptionApiError>;

    /// Cancels at the end of the current period, not immediately.
    async fn cancel(&self, subscription_id: &str)
        -> Result<SubscriptionRecord, SubscriptionApiError>;

    /// Bulk-restores receipts in one backend call.
    async fn restore_receipts(
        &self,
        transactions: &[PurchaseTransaction],
    ) -> Result<RestoreSummary, SubscriptionApiError>;
}
