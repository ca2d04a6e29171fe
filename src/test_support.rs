use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use crate::{
    data::stores::{
        app_store_adapter::{AppStoreBridge, AppStoreProduct, AppStoreTransaction},
        play_store_adapter::{
            PlayBillingBridge, PlayOfferDetails, PlayProductDetails, PlayProductType, PlayPurchase,
        },
    },
    domain::{
        entities::{
            entitlement::PlanTier,
            iap_product_id::{Platform, ProductTier},
            purchase_transaction::PurchaseTransaction,
            store_event::{StoreError, StoreErrorCode},
            subscription_record::{
                RestoreSummary, SubscriptionProvider, SubscriptionRecord, SubscriptionStatus,
                SubscriptionStatusSnapshot,
            },
        },
        repositories::subscription_repository::SubscriptionRepository,
    },
    errors::{Notifier, SubscriptionApiError, UserFeedback},
};

/// Polls `condition` until it holds, failing the test after two seconds.
pub(crate) async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[derive(Default)]
struct CallLog(Mutex<HashMap<&'static str, usize>>);

impl CallLog {
    fn record(&self, name: &'static str) {
        *self.0.lock().unwrap().entry(name).or_default() += 1;
    }

    fn count(&self, name: &str) -> usize {
        self.0.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

#[derive(Default)]
pub(crate) struct FakeAppStoreBridge {
    calls: CallLog,
    catalog: Vec<AppStoreProduct>,
    fail_connection: AtomicBool,
    available: Mutex<Vec<AppStoreTransaction>>,
    requested: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
}

impl FakeAppStoreBridge {
    /// Both Pro subscriptions plus one non-renewing product.
    pub(crate) fn with_default_catalog() -> Self {
        let mut catalog: Vec<AppStoreProduct> = ProductTier::ALL
            .iter()
            .map(|tier| AppStoreProduct {
                product_id: tier.sku(Platform::Ios).to_string(),
                display_name: format!("Pro {:?}", tier.billing_period()),
                display_price: "$9.99".to_string(),
                currency: "USD".to_string(),
                is_auto_renewable: true,
            })
            .collect();
        catalog.push(AppStoreProduct {
            product_id: "com.ideaforge.credits".to_string(),
            display_name: "Credits".to_string(),
            display_price: "$0.99".to_string(),
            currency: "USD".to_string(),
            is_auto_renewable: false,
        });
        Self {
            catalog,
            ..Default::default()
        }
    }

    pub(crate) fn calls(&self, name: &str) -> usize {
        self.calls.count(name)
    }

    pub(crate) fn fail_connection(&self) {
        self.fail_connection.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_available(&self, transactions: Vec<AppStoreTransaction>) {
        *self.available.lock().unwrap() = transactions;
    }

    pub(crate) fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    pub(crate) fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }
}

#[async_trait]
impl AppStoreBridge for FakeAppStoreBridge {
    async fn init_connection(&self) -> Result<(), StoreError> {
        self.calls.record("init_connection");
        if self.fail_connection.load(Ordering::SeqCst) {
            return Err(StoreError::new(
                StoreErrorCode::ServiceUnavailable,
                "StoreKit unavailable",
            ));
        }
        Ok(())
    }

    async fn end_connection(&self) -> Result<(), StoreError> {
        self.calls.record("end_connection");
        Ok(())
    }

    async fn fetch_products(&self, skus: &[String]) -> Result<Vec<AppStoreProduct>, StoreError> {
        self.calls.record("fetch_products");
        Ok(self
            .catalog
            .iter()
            .filter(|p| skus.contains(&p.product_id))
            .cloned()
            .collect())
    }

    async fn request_purchase(&self, sku: &str) -> Result<(), StoreError> {
        self.calls.record("request_purchase");
        self.requested.lock().unwrap().push(sku.to_string());
        Ok(())
    }

    async fn available_purchases(&self) -> Result<Vec<AppStoreTransaction>, StoreError> {
        self.calls.record("available_purchases");
        Ok(self.available.lock().unwrap().clone())
    }

    async fn finish_transaction(&self, transaction_id: &str) -> Result<(), StoreError> {
        self.calls.record("finish_transaction");
        self.finished.lock().unwrap().push(transaction_id.to_string());
        Ok(())
    }
}

pub(crate) fn app_store_transaction(
    transaction_id: &str,
    product_id: &str,
    date: DateTime<Utc>,
) -> AppStoreTransaction {
    AppStoreTransaction {
        transaction_id: transaction_id.to_string(),
        product_id: product_id.to_string(),
        receipt: format!("receipt-{transaction_id}").into_bytes(),
        transaction_date_millis: date.timestamp_millis(),
    }
}

#[derive(Default)]
pub(crate) struct FakePlayBillingBridge {
    calls: CallLog,
    catalog: Vec<PlayProductDetails>,
    purchases: Mutex<Vec<PlayPurchase>>,
    launched: Mutex<Vec<(String, Option<String>)>>,
    acknowledged: Mutex<Vec<String>>,
}

impl FakePlayBillingBridge {
    /// Both Pro subscriptions, each with a single base plan offer.
    pub(crate) fn with_default_catalog() -> Self {
        let catalog = ProductTier::ALL
            .iter()
            .map(|tier| {
                let product_id = tier.sku(Platform::Android);
                PlayProductDetails {
                    product_id: product_id.to_string(),
                    title: format!("Pro {:?}", tier.billing_period()),
                    formatted_price: "€9,99".to_string(),
                    price_currency_code: "EUR".to_string(),
                    subscription_offers: vec![PlayOfferDetails {
                        base_plan_id: "base".to_string(),
                        offer_token: format!("offer-{product_id}-base"),
                    }],
                }
            })
            .collect();
        Self {
            catalog,
            ..Default::default()
        }
    }

    pub(crate) fn calls(&self, name: &str) -> usize {
        self.calls.count(name)
    }

    pub(crate) fn set_purchases(&self, purchases: Vec<PlayPurchase>) {
        *self.purchases.lock().unwrap() = purchases;
    }

    pub(crate) fn launched(&self) -> Vec<(String, Option<String>)> {
        self.launched.lock().unwrap().clone()
    }

    pub(crate) fn acknowledged(&self) -> Vec<String> {
        self.acknowledged.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlayBillingBridge for FakePlayBillingBridge {
    async fn start_connection(&self) -> Result<(), StoreError> {
        self.calls.record("start_connection");
        Ok(())
    }

    async fn end_connection(&self) -> Result<(), StoreError> {
        self.calls.record("end_connection");
        Ok(())
    }

    async fn query_product_details(
        &self,
        product_ids: &[String],
        product_type: PlayProductType,
    ) -> Result<Vec<PlayProductDetails>, StoreError> {
        self.calls.record("query_product_details");
        if product_type == PlayProductType::InApp {
            return Ok(Vec::new());
        }
        Ok(self
            .catalog
            .iter()
            .filter(|d| product_ids.contains(&d.product_id))
            .cloned()
            .collect())
    }

    async fn launch_billing_flow(
        &self,
        product_id: &str,
        offer_token: Option<&str>,
    ) -> Result<(), StoreError> {
        self.calls.record("launch_billing_flow");
        self.launched
            .lock()
            .unwrap()
            .push((product_id.to_string(), offer_token.map(str::to_string)));
        Ok(())
    }

    async fn query_purchases(
        &self,
        _product_type: PlayProductType,
    ) -> Result<Vec<PlayPurchase>, StoreError> {
        self.calls.record("query_purchases");
        Ok(self.purchases.lock().unwrap().clone())
    }

    async fn acknowledge_purchase(&self, purchase_token: &str) -> Result<(), StoreError> {
        self.calls.record("acknowledge_purchase");
        self.acknowledged
            .lock()
            .unwrap()
            .push(purchase_token.to_string());
        Ok(())
    }
}

/// How the fake backend answers a validate-receipt call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Validation {
    Active,
    Expired,
    Rejected,
    Unavailable,
    /// Backend answer that does not decode.
    Malformed,
}

pub(crate) fn record(status: SubscriptionStatus, product_id: &str) -> SubscriptionRecord {
    SubscriptionRecord {
        id: format!("sub_{product_id}"),
        plan: PlanTier::Pro,
        status,
        provider: Some(SubscriptionProvider::Apple),
        product_id: Some(product_id.to_string()),
        external_transaction_id: None,
        start_date: Some(Utc::now()),
        current_period_end: Some(Utc::now() + chrono::Duration::days(30)),
        auto_renewing: Some(true),
        cancel_at_period_end: false,
        cancelled_at: None,
    }
}

pub(crate) fn active_status(product_id: &str) -> SubscriptionStatusSnapshot {
    SubscriptionStatusSnapshot {
        subscription: Some(record(SubscriptionStatus::Active, product_id)),
        is_active: true,
        plan: PlanTier::Pro,
    }
}

pub(crate) fn inactive_status() -> SubscriptionStatusSnapshot {
    SubscriptionStatusSnapshot {
        subscription: None,
        is_active: false,
        plan: PlanTier::Free,
    }
}

/// In-memory backend. Validations succeed unless configured otherwise per
/// transaction id.
pub(crate) struct FakeSubscriptionRepository {
    validations: Mutex<HashMap<String, Validation>>,
    validate_calls: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
    status: Mutex<Result<SubscriptionStatusSnapshot, SubscriptionApiError>>,
    history: Mutex<Vec<SubscriptionRecord>>,
    cancelled: Mutex<Vec<String>>,
    restored: Mutex<Vec<String>>,
}

impl Default for FakeSubscriptionRepository {
    fn default() -> Self {
        Self {
            validations: Mutex::new(HashMap::new()),
            validate_calls: AtomicUsize::new(0),
            gate: Mutex::new(None),
            status: Mutex::new(Ok(inactive_status())),
            history: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            restored: Mutex::new(Vec::new()),
        }
    }
}

impl FakeSubscriptionRepository {
    pub(crate) fn set_validation(&self, transaction_id: &str, validation: Validation) {
        self.validations
            .lock()
            .unwrap()
            .insert(transaction_id.to_string(), validation);
    }

    pub(crate) fn set_status(
        &self,
        status: Result<SubscriptionStatusSnapshot, SubscriptionApiError>,
    ) {
        *self.status.lock().unwrap() = status;
    }

    pub(crate) fn set_history(&self, history: Vec<SubscriptionRecord>) {
        *self.history.lock().unwrap() = history;
    }

    pub(crate) fn validate_calls(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }

    /// Blocks validations until `release_validations` is called.
    pub(crate) fn hold_validations(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub(crate) fn release_validations(&self) {
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.add_permits(1);
        }
    }

    pub(crate) fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub(crate) fn restored(&self) -> Vec<String> {
        self.restored.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubscriptionRepository for FakeSubscriptionRepository {
    async fn validate_receipt(
        &self,
        transaction: &PurchaseTransaction,
    ) -> Result<SubscriptionRecord, SubscriptionApiError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }
        let validation = self
            .validations
            .lock()
            .unwrap()
            .get(&transaction.transaction_id)
            .copied()
            .unwrap_or(Validation::Active);
        match validation {
            Validation::Active => Ok(record(SubscriptionStatus::Active, &transaction.product_id)),
            Validation::Expired => Ok(record(SubscriptionStatus::Expired, &transaction.product_id)),
            Validation::Rejected => Err(SubscriptionApiError::Rejected {
                code: "INVALID_RECEIPT".to_string(),
                message: "receipt could not be verified".to_string(),
            }),
            Validation::Unavailable => Err(SubscriptionApiError::Http {
                status: 503,
                body: "maintenance".to_string(),
            }),
            Validation::Malformed => Err(SubscriptionApiError::Serde(
                "unknown subscription status 'PAUSED'".to_string(),
            )),
        }
    }

    async fn status(&self) -> Result<SubscriptionStatusSnapshot, SubscriptionApiError> {
        self.status.lock().unwrap().clone()
    }

    async fn history(&self) -> Result<Vec<SubscriptionRecord>, SubscriptionApiError> {
        Ok(self.history.lock().unwrap().clone())
    }

    async fn cancel(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionRecord, SubscriptionApiError> {
        self.cancelled
            .lock()
            .unwrap()
            .push(subscription_id.to_string());
        let mut cancelled = record(SubscriptionStatus::Active, "com.ideaforge.pro.monthly");
        cancelled.id = subscription_id.to_string();
        cancelled.cancel_at_period_end = true;
        cancelled.cancelled_at = Some(Utc::now());
        Ok(cancelled)
    }

    async fn restore_receipts(
        &self,
        transactions: &[PurchaseTransaction],
    ) -> Result<RestoreSummary, SubscriptionApiError> {
        self.restored
            .lock()
            .unwrap()
            .extend(transactions.iter().map(|t| t.transaction_id.clone()));
        let current = transactions
            .iter()
            .max_by_key(|t| t.transaction_date)
            .map(|t| record(SubscriptionStatus::Active, &t.product_id));
        Ok(RestoreSummary {
            restored: transactions.len() as u32,
            is_active: current.is_some(),
            plan: if current.is_some() {
                PlanTier::Pro
            } else {
                PlanTier::Free
            },
            current_subscription: current,
        })
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    shown: Mutex<Vec<UserFeedback>>,
}

impl RecordingNotifier {
    pub(crate) fn shown(&self) -> Vec<UserFeedback> {
        self.shown.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, feedback: UserFeedback) {
        self.shown.lock().unwrap().push(feedback);
    }
}
