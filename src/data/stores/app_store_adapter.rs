use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    domain::{
        entities::{
            iap_product_id::Platform,
            iap_purchase_id::IapReceipt,
            purchase_transaction::PurchaseTransaction,
            store_event::{StoreError, StoreErrorCode, StoreEvent},
            store_product::{StoreProduct, StoreSubscription},
        },
        stores::entitlement_store::EntitlementStore,
    },
    errors::{IapError, IapErrorKind, StoreOperation},
};

use super::store_state::{emit, StoreState};

/// Native StoreKit binding.
#[async_trait]
pub trait AppStoreBridge: Send + Sync {
    async fn init_connection(&self) -> Result<(), StoreError>;
    async fn end_connection(&self) -> Result<(), StoreError>;
    async fn fetch_products(&self, skus: &[String]) -> Result<Vec<AppStoreProduct>, StoreError>;
    async fn request_purchase(&self, sku: &str) -> Result<(), StoreError>;
    async fn available_purchases(&self) -> Result<Vec<AppStoreTransaction>, StoreError>;
    async fn finish_transaction(&self, transaction_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppStoreProduct {
    pub product_id: String,
    pub display_name: String,
    pub display_price: String,
    pub currency: String,
    pub is_auto_renewable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppStoreTransaction {
    pub transaction_id: String,
    pub product_id: String,
    /// Raw app receipt bytes, as read from the app's receipt file.
    pub receipt: Vec<u8>,
    /// Milliseconds since the epoch.
    pub transaction_date_millis: i64,
}

pub struct AppStoreAdapter<B: AppStoreBridge> {
    bridge: Arc<B>,
    state: StoreState,
}

impl<B: AppStoreBridge> AppStoreAdapter<B> {
    pub fn new(bridge: Arc<B>) -> Self {
        Self {
            bridge,
            state: StoreState::new(),
        }
    }

    /// Entry points for the native transaction observer.
    pub fn listener(&self) -> AppStoreListener {
        AppStoreListener {
            sender: self.state.sender(),
        }
    }
}

#[async_trait]
impl<B: AppStoreBridge + 'static> EntitlementStore for AppStoreAdapter<B> {
    fn platform(&self) -> Platform {
        Platform::Ios
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    async fn connect(&self) -> Result<(), IapError> {
        self.state
            .connect_with(|| self.bridge.init_connection())
            .await?;
        info!("connected to App Store");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), IapError> {
        self.state
            .disconnect_with(|| self.bridge.end_connection())
            .await
    }

    async fn list_products(&self, product_ids: &[String]) -> Result<Vec<StoreProduct>, IapError> {
        self.state.require_connected()?;
        let products = self
            .bridge
            .fetch_products(product_ids)
            .await
            .map_err(|e| IapError::from_store_error(e, StoreOperation::Catalog))?;
        Ok(products
            .into_iter()
            .filter(|p| !p.is_auto_renewable)
            .map(|p| StoreProduct {
                product_id: p.product_id,
                title: p.display_name,
                localized_price: p.display_price,
                currency: p.currency,
            })
            .collect())
    }

    async fn list_subscriptions(
        &self,
        product_ids: &[String],
    ) -> Result<Vec<StoreSubscription>, IapError> {
        self.state.require_connected()?;
        let subscriptions: Vec<StoreSubscription> = self
            .bridge
            .fetch_products(product_ids)
            .await
            .map_err(|e| IapError::from_store_error(e, StoreOperation::Catalog))?
            .into_iter()
            .filter(|p| p.is_auto_renewable)
            .map(|p| StoreSubscription {
                product_id: p.product_id,
                title: p.display_name,
                localized_price: p.display_price,
                currency: p.currency,
                offers: Vec::new(),
            })
            .collect();
        if subscriptions.is_empty() {
            return Err(IapError::new(
                IapErrorKind::ProductsNotFound,
                format!("App Store returned no subscriptions for {product_ids:?}"),
            ));
        }
        Ok(subscriptions)
    }

    async fn purchase(&self, product_id: &str, _offer_token: Option<&str>) -> Result<(), IapError> {
        self.state.require_connected()?;
        debug!(product_id, "requesting App Store purchase");
        self.bridge
            .request_purchase(product_id)
            .await
            .map_err(|e| IapError::from_store_error(e, StoreOperation::Purchase))
    }

    async fn restore(&self) -> Result<Vec<PurchaseTransaction>, IapError> {
        self.state.require_connected()?;
        let purchases = self
            .bridge
            .available_purchases()
            .await
            .map_err(|e| IapError::from_store_error(e, StoreOperation::Restore))?;
        purchases
            .into_iter()
            .map(|t| {
                t.into_transaction()
                    .map_err(|e| IapError::from_store_error(e, StoreOperation::Restore))
            })
            .collect()
    }

    async fn finish_transaction(&self, transaction: &PurchaseTransaction) -> Result<(), IapError> {
        self.state.require_connected()?;
        self.state
            .finish_once(&transaction.transaction_id, || {
                self.bridge.finish_transaction(&transaction.transaction_id)
            })
            .await
    }

    fn take_events(&self) -> Option<mpsc::Receiver<StoreEvent>> {
        self.state.take_events()
    }
}

impl AppStoreTransaction {
    fn into_transaction(self) -> Result<PurchaseTransaction, StoreError> {
        if self.receipt.is_empty() {
            return Err(StoreError::new(
                StoreErrorCode::Unknown("E_RECEIPT_MISSING".to_string()),
                format!("transaction {} has no receipt", self.transaction_id),
            )
            .for_product(self.product_id));
        }
        Ok(PurchaseTransaction {
            receipt: IapReceipt::AppStoreReceipt(STANDARD.encode(&self.receipt)),
            transaction_date: millis_to_datetime(self.transaction_date_millis)?,
            transaction_id: self.transaction_id,
            product_id: self.product_id,
            auto_renewing: None,
        })
    }
}

pub(crate) fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        StoreError::new(
            StoreErrorCode::Unknown("E_INVALID_DATE".to_string()),
            format!("invalid transaction date {millis}"),
        )
    })
}

/// Forwards StoreKit observer callbacks into the reconciler's channel.
#[derive(Clone)]
pub struct AppStoreListener {
    sender: mpsc::Sender<StoreEvent>,
}

impl AppStoreListener {
    pub async fn on_transaction_updated(&self, transaction: AppStoreTransaction) {
        let event = match transaction.into_transaction() {
            Ok(t) => StoreEvent::Update(t),
            Err(e) => StoreEvent::Error(e),
        };
        emit(&self.sender, event).await
    }

    pub async fn on_purchase_error(&self, code: &str, message: &str, product_id: Option<&str>) {
        let mut error = StoreError::new(StoreErrorCode::from_raw(code), message);
        if let Some(product_id) = product_id {
            error = error.for_product(product_id);
        }
        emit(&self.sender, StoreEvent::Error(error)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeAppStoreBridge;

    fn adapter() -> (AppStoreAdapter<FakeAppStoreBridge>, Arc<FakeAppStoreBridge>) {
        let bridge = Arc::new(FakeAppStoreBridge::with_default_catalog());
        (AppStoreAdapter::new(bridge.clone()), bridge)
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (adapter, bridge) = adapter();
        adapter.connect().await.unwrap();
        adapter.connect().await.unwrap();
        assert!(adapter.is_connected());
        assert_eq!(bridge.calls("init_connection"), 1);
        adapter.disconnect().await.unwrap();
        adapter.disconnect().await.unwrap();
        assert_eq!(bridge.calls("end_connection"), 1);
    }

    #[tokio::test]
    async fn operations_require_a_connection() {
        let (adapter, _) = adapter();
        let err = adapter.restore().await.unwrap_err();
        assert_eq!(err.kind(), IapErrorKind::ConnectionFailed);
    }

    #[tokio::test]
    async fn empty_subscription_catalog_is_products_not_found() {
        let (adapter, _) = adapter();
        adapter.connect().await.unwrap();
        let err = adapter
            .list_subscriptions(&["missing.sku".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), IapErrorKind::ProductsNotFound);
    }

    #[tokio::test]
    async fn finishing_twice_reaches_the_store_once() {
        let (adapter, bridge) = adapter();
        adapter.connect().await.unwrap();
        let transaction = AppStoreTransaction {
            transaction_id: "t1".to_string(),
            product_id: "com.ideaforge.pro.monthly".to_string(),
            receipt: b"receipt".to_vec(),
            transaction_date_millis: 1_790_000_000_000,
        }
        .into_transaction()
        .unwrap();
        adapter.finish_transaction(&transaction).await.unwrap();
        adapter.finish_transaction(&transaction).await.unwrap();
        assert_eq!(bridge.finished(), vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn listener_encodes_receipt_and_forwards_updates() {
        let (adapter, _) = adapter();
        let mut events = adapter.take_events().unwrap();
        assert!(adapter.take_events().is_none());
        adapter
            .listener()
            .on_transaction_updated(AppStoreTransaction {
                transaction_id: "t1".to_string(),
                product_id: "com.ideaforge.pro.yearly".to_string(),
                receipt: b"receipt".to_vec(),
                transaction_date_millis: 1_790_000_000_000,
            })
            .await;
        match events.recv().await.unwrap() {
            StoreEvent::Update(t) => {
                assert_eq!(t.transaction_id, "t1");
                assert_eq!(
                    t.receipt,
                    IapReceipt::AppStoreReceipt("cmVjZWlwdA==".to_string())
                );
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
