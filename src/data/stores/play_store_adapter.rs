use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::{
    domain::{
        entities::{
            iap_product_id::Platform,
            iap_purchase_id::IapReceipt,
            purchase_transaction::PurchaseTransaction,
            store_event::{StoreError, StoreErrorCode, StoreEvent},
            store_product::{StoreProduct, StoreSubscription, SubscriptionOffer},
        },
        stores::entitlement_store::EntitlementStore,
    },
    errors::{IapError, IapErrorKind, StoreOperation},
};

use super::{
    app_store_adapter::millis_to_datetime,
    store_state::{emit, StoreState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayProductType {
    InApp,
    Subs,
}

/// Native Google Play Billing binding.
#[async_trait]
pub trait PlayBillingBridge: Send + Sync {
    async fn start_connection(&self) -> Result<(), StoreError>;
    async fn end_connection(&self) -> Result<(), StoreError>;
    async fn query_product_details(
        &self,
        product_ids: &[String],
        product_type: PlayProductType,
    ) -> Result<Vec<PlayProductDetails>, StoreError>;
    async fn launch_billing_flow(
        &self,
        product_id: &str,
        offer_token: Option<&str>,
    ) -> Result<(), StoreError>;
    async fn query_purchases(
        &self,
        product_type: PlayProductType,
    ) -> Result<Vec<PlayPurchase>, StoreError>;
    async fn acknowledge_purchase(&self, purchase_token: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayProductDetails {
    pub product_id: String,
    pub title: String,
    pub formatted_price: String,
    pub price_currency_code: String,
    pub subscription_offers: Vec<PlayOfferDetails>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayOfferDetails {
    pub base_plan_id: String,
    pub offer_token: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayPurchase {
    /// Absent for test purchases.
    pub order_id: Option<String>,
    pub product_ids: Vec<String>,
    pub purchase_token: String,
    pub purchase_time_millis: i64,
    pub is_auto_renewing: bool,
    pub is_acknowledged: bool,
}

pub struct PlayStoreAdapter<B: PlayBillingBridge> {
    bridge: Arc<B>,
    state: StoreState,
    /// Offers seen in the last catalog query, per product id.
    offers: Mutex<HashMap<String, Vec<SubscriptionOffer>>>,
}

impl<B: PlayBillingBridge> PlayStoreAdapter<B> {
    pub fn new(bridge: Arc<B>) -> Self {
        Self {
            bridge,
            state: StoreState::new(),
            offers: Mutex::new(HashMap::new()),
        }
    }

    /// Entry points for the native `PurchasesUpdatedListener`.
    pub fn listener(&self) -> PlayStoreListener {
        PlayStoreListener {
            sender: self.state.sender(),
        }
    }

    /// Offer token to check out with. An explicit token wins; otherwise the
    /// first offer of the product is used.
    async fn resolve_offer_token(
        &self,
        product_id: &str,
        offer_token: Option<&str>,
    ) -> Result<Option<String>, IapError> {
        if let Some(token) = offer_token {
            return Ok(Some(token.to_string()));
        }
        if let Some(offers) = self.offers.lock().await.get(product_id) {
            return Ok(offers.first().map(|o| o.offer_token.clone()));
        }
        let details = self
            .bridge
            .query_product_details(&[product_id.to_string()], PlayProductType::Subs)
            .await
            .map_err(|e| IapError::from_store_error(e, StoreOperation::Purchase))?;
        let Some(product) = details.into_iter().find(|d| d.product_id == product_id) else {
            return Err(IapError::new(
                IapErrorKind::ProductsNotFound,
                format!("Google Play does not know product {product_id}"),
            ));
        };
        let offers = offers_of(&product);
        let first = offers.first().map(|o| o.offer_token.clone());
        self.offers
            .lock()
            .await
            .insert(product_id.to_string(), offers);
        Ok(first)
    }
}

#[async_trait]
impl<B: PlayBillingBridge + 'static> EntitlementStore for PlayStoreAdapter<B> {
    fn platform(&self) -> Platform {
        Platform::Android
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    async fn connect(&self) -> Result<(), IapError> {
        self.state
            .connect_with(|| self.bridge.start_connection())
            .await?;
        info!("connected to Google Play Billing");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), IapError> {
        self.state
            .disconnect_with(|| self.bridge.end_connection())
            .await
    }

    async fn list_products(&self, product_ids: &[String]) -> Result<Vec<StoreProduct>, IapError> {
        self.state.require_connected()?;
        let details = self
            .bridge
            .query_product_details(product_ids, PlayProductType::InApp)
            .await
            .map_err(|e| IapError::from_store_error(e, StoreOperation::Catalog))?;
        Ok(details
            .into_iter()
            .map(|d| StoreProduct {
                product_id: d.product_id,
                title: d.title,
                localized_price: d.formatted_price,
                currency: d.price_currency_code,
            })
            .collect())
    }

    async fn list_subscriptions(
        &self,
        product_ids: &[String],
    ) -> Result<Vec<StoreSubscription>, IapError> {
        self.state.require_connected()?;
        let details = self
            .bridge
            .query_product_details(product_ids, PlayProductType::Subs)
            .await
            .map_err(|e| IapError::from_store_error(e, StoreOperation::Catalog))?;
        if details.is_empty() {
            return Err(IapError::new(
                IapErrorKind::ProductsNotFound,
                format!("Google Play returned no subscriptions for {product_ids:?}"),
            ));
        }
        let mut cache = self.offers.lock().await;
        Ok(details
            .into_iter()
            .map(|d| {
                let offers = offers_of(&d);
                cache.insert(d.product_id.clone(), offers.clone());
                StoreSubscription {
                    product_id: d.product_id,
                    title: d.title,
                    localized_price: d.formatted_price,
                    currency: d.price_currency_code,
                    offers,
                }
            })
            .collect())
    }

    async fn purchase(&self, product_id: &str, offer_token: Option<&str>) -> Result<(), IapError> {
        self.state.require_connected()?;
        let offer_token = self.resolve_offer_token(product_id, offer_token).await?;
        debug!(product_id, has_offer = offer_token.is_some(), "launching billing flow");
        self.bridge
            .launch_billing_flow(product_id, offer_token.as_deref())
            .await
            .map_err(|e| IapError::from_store_error(e, StoreOperation::Purchase))
    }

    async fn restore(&self) -> Result<Vec<PurchaseTransaction>, IapError> {
        self.state.require_connected()?;
        let purchases = self
            .bridge
            .query_purchases(PlayProductType::Subs)
            .await
            .map_err(|e| IapError::from_store_error(e, StoreOperation::Restore))?;
        let mut transactions = Vec::new();
        for purchase in purchases {
            transactions.extend(
                purchase
                    .into_transactions()
                    .map_err(|e| IapError::from_store_error(e, StoreOperation::Restore))?,
            );
        }
        Ok(transactions)
    }

    async fn finish_transaction(&self, transaction: &PurchaseTransaction) -> Result<(), IapError> {
        self.state.require_connected()?;
        let IapReceipt::GooglePlayPurchaseToken(token) = &transaction.receipt else {
            return Err(IapError::new(
                IapErrorKind::Unknown,
                "cannot acknowledge a non-Google Play transaction",
            ));
        };
        self.state
            .finish_once(&transaction.transaction_id, || {
                self.bridge.acknowledge_purchase(token)
            })
            .await
    }

    fn take_events(&self) -> Option<mpsc::Receiver<StoreEvent>> {
        self.state.take_events()
    }
}

fn offers_of(details: &PlayProductDetails) -> Vec<SubscriptionOffer> {
    details
        .subscription_offers
        .iter()
        .map(|o| SubscriptionOffer {
            base_plan_id: o.base_plan_id.clone(),
            offer_token: o.offer_token.clone(),
        })
        .collect()
}

impl PlayPurchase {
    /// Id the reconciler tracks the purchase by. Test purchases have no order
    /// id, so the purchase token stands in.
    fn transaction_id(&self) -> &str {
        self.order_id.as_deref().unwrap_or(&self.purchase_token)
    }

    /// One transaction per product the purchase covers.
    fn into_transactions(self) -> Result<Vec<PurchaseTransaction>, StoreError> {
        let transaction_date = millis_to_datetime(self.purchase_time_millis)?;
        if self.product_ids.is_empty() {
            return Err(StoreError::new(
                StoreErrorCode::Unknown("E_PRODUCT_MISSING".to_string()),
                format!("purchase {} lists no products", self.transaction_id()),
            ));
        }
        let transaction_id = self.transaction_id().to_string();
        Ok(self
            .product_ids
            .iter()
            .map(|product_id| PurchaseTransaction {
                transaction_id: transaction_id.clone(),
                product_id: product_id.clone(),
                receipt: IapReceipt::GooglePlayPurchaseToken(self.purchase_token.clone()),
                transaction_date,
                auto_renewing: Some(self.is_auto_renewing),
            })
            .collect())
    }
}

/// Forwards Play Billing callbacks into the reconciler's channel.
#[derive(Clone)]
pub struct PlayStoreListener {
    sender: mpsc::Sender<StoreEvent>,
}

impl PlayStoreListener {
    pub async fn on_purchases_updated(&self, purchases: Vec<PlayPurchase>) {
        for purchase in purchases {
            match purchase.into_transactions() {
                Ok(transactions) => {
                    for t in transactions {
                        emit(&self.sender, StoreEvent::Update(t)).await;
                    }
                }
                Err(e) => emit(&self.sender, StoreEvent::Error(e)).await,
            }
        }
    }

    pub async fn on_billing_error(&self, code: &str, message: &str, product_id: Option<&str>) {
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
    use crate::test_support::FakePlayBillingBridge;

    fn adapter() -> (PlayStoreAdapter<FakePlayBillingBridge>, Arc<FakePlayBillingBridge>) {
        let bridge = Arc::new(FakePlayBillingBridge::with_default_catalog());
        (PlayStoreAdapter::new(bridge.clone()), bridge)
    }

    #[tokio::test]
    async fn purchase_without_offer_token_uses_first_offer() {
        let (adapter, bridge) = adapter();
        adapter.connect().await.unwrap();
        adapter.purchase("pro_yearly", None).await.unwrap();
        assert_eq!(
            bridge.launched(),
            vec![("pro_yearly".to_string(), Some("offer-pro_yearly-base".to_string()))]
        );
    }

    #[tokio::test]
    async fn explicit_offer_token_wins() {
        let (adapter, bridge) = adapter();
        adapter.connect().await.unwrap();
        adapter
            .list_subscriptions(&["pro_yearly".to_string()])
            .await
            .unwrap();
        adapter
            .purchase("pro_yearly", Some("offer-intro"))
            .await
            .unwrap();
        assert_eq!(
            bridge.launched(),
            vec![("pro_yearly".to_string(), Some("offer-intro".to_string()))]
        );
    }

    #[tokio::test]
    async fn purchase_of_unknown_product_fails_before_checkout() {
        let (adapter, bridge) = adapter();
        adapter.connect().await.unwrap();
        let err = adapter.purchase("nope", None).await.unwrap_err();
        assert_eq!(err.kind(), IapErrorKind::ProductsNotFound);
        assert!(bridge.launched().is_empty());
    }

    #[tokio::test]
    async fn empty_restore_is_not_an_error() {
        let (adapter, _) = adapter();
        adapter.connect().await.unwrap();
        assert!(adapter.restore().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purchase_without_order_id_is_tracked_by_token() {
        let (adapter, bridge) = adapter();
        bridge.set_purchases(vec![PlayPurchase {
            order_id: None,
            product_ids: vec!["pro_yearly".to_string()],
            purchase_token: "tok-test".to_string(),
            purchase_time_millis: 1_790_000_000_000,
            is_auto_renewing: true,
            is_acknowledged: true,
        }]);
        adapter.connect().await.unwrap();
        assert_eq!(bridge.calls("start_connection"), 1);

        let restored = adapter.restore().await.unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].transaction_id, "tok-test");
        assert_eq!(
            restored[0].receipt,
            IapReceipt::GooglePlayPurchaseToken("tok-test".to_string())
        );
    }

    #[tokio::test]
    async fn acknowledge_is_sent_once_per_purchase() {
        let (adapter, bridge) = adapter();
        adapter.connect().await.unwrap();
        let transaction = PlayPurchase {
            order_id: Some("GPA.1".to_string()),
            product_ids: vec!["pro_monthly".to_string()],
            purchase_token: "tok".to_string(),
            purchase_time_millis: 1_790_000_000_000,
            is_auto_renewing: true,
            is_acknowledged: false,
        }
        .into_transactions()
        .unwrap()
        .remove(0);
        assert_eq!(transaction.transaction_id, "GPA.1");
        adapter.finish_transaction(&transaction).await.unwrap();
        adapter.finish_transaction(&transaction).await.unwrap();
        assert_eq!(bridge.acknowledged(), vec!["tok".to_string()]);
    }
}
