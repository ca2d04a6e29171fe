use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    domain::entities::{
        iap_product_id::Platform,
        purchase_transaction::PurchaseTransaction,
        store_event::StoreEvent,
        store_product::{StoreProduct, StoreSubscription},
    },
    errors::IapError,
};

/// Platform purchase store, one implementation per platform.
///
/// Apart from `connect` and `disconnect`, every operation fails with
/// `ConnectionFailed` while the store is not connected.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    fn platform(&self) -> Platform;

    fn is_connected(&self) -> bool;

    /// Establishes the store session. Calling it while connected is a no-op.
    async fn connect(&self) -> Result<(), IapError>;

    /// Tears down the store session. Calling it while disconnected is a
    /// no-op.
    async fn disconnect(&self) -> Result<(), IapError>;

    async fn list_products(&self, product_ids: &[String]) -> Result<Vec<StoreProduct>, IapError>;

    /// Fails with `ProductsNotFound` when the store knows none of the ids.
    async fn list_subscriptions(
        &self,
        product_ids: &[String],
    ) -> Result<Vec<StoreSubscription>, IapError>;

    /// Opens the platform checkout. The result arrives later as a
    /// `StoreEvent`, not through this call.
    async fn purchase(&self, product_id: &str, offer_token: Option<&str>) -> Result<(), IapError>;

    /// Every non-consumed entitlement owned by the store account. Empty when
    /// the account never purchased anything.
    async fn restore(&self) -> Result<Vec<PurchaseTransaction>, IapError>;

    /// Finishes (App Store) or acknowledges (Google Play) a transaction so the
    /// store stops redelivering it. Repeated calls are no-ops.
    async fn finish_transaction(&self, transaction: &PurchaseTransaction) -> Result<(), IapError>;

    /// Hands out the receiving end of the store's event channel. Only the
    /// first call gets it.
    fn take_events(&self) -> Option<mpsc::Receiver<StoreEvent>>;
}
