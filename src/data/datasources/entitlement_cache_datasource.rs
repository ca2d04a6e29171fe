use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::{
    constants::{ACTIVE_SUBSCRIPTION_KEY, PURCHASE_HISTORY_KEY, RECEIPT_DATA_KEY},
    domain::entities::{
        entitlement::Entitlement,
        iap_purchase_id::IapReceipt,
        purchase_transaction::{PurchaseHistoryEntry, RecordedOutcome},
    },
};

use super::key_value_storage::KeyValueStorage;

/// Persisted mirror of the last confirmed entitlement.
///
/// The cache is a performance hint: failures are logged and reads of missing
/// or corrupt entries return nothing.
pub struct EntitlementCache {
    storage: Arc<dyn KeyValueStorage>,
    history_lock: Mutex<()>,
}

impl EntitlementCache {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage,
            history_lock: Mutex::new(()),
        }
    }

    pub async fn load_active(&self) -> Option<Entitlement> {
        self.read_json(ACTIVE_SUBSCRIPTION_KEY).await
    }

    pub async fn store_active(&self, entitlement: &Entitlement) {
        self.write_json(ACTIVE_SUBSCRIPTION_KEY, entitlement).await
    }

    pub async fn clear_active(&self) {
        if let Err(e) = self.storage.remove(ACTIVE_SUBSCRIPTION_KEY).await {
            warn!(error = %e, "failed to clear cached entitlement");
        }
    }

    pub async fn history(&self) -> Vec<PurchaseHistoryEntry> {
        self.read_json(PURCHASE_HISTORY_KEY).await.unwrap_or_default()
    }

    /// Recorded outcome of a transaction processed by an earlier session.
    pub async fn recorded_outcome(&self, transaction_id: &str) -> Option<RecordedOutcome> {
        self.history()
            .await
            .into_iter()
            .rev()
            .find(|entry| entry.transaction_id == transaction_id)
            .map(|entry| entry.outcome)
    }

    pub async fn append_history(&self, entry: PurchaseHistoryEntry) {
        let _guard = self.history_lock.lock().await;
        let mut history = self.history().await;
        history.push(entry);
        self.write_json(PURCHASE_HISTORY_KEY, &history).await
    }

    pub async fn store_receipt(&self, receipt: &IapReceipt) {
        self.write_json(RECEIPT_DATA_KEY, &receipt.payload()).await
    }

    pub async fn last_receipt(&self) -> Option<String> {
        self.read_json(RECEIPT_DATA_KEY).await
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.storage.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "failed to read cache entry");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "ignoring corrupt cache entry");
                None
            }
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "failed to serialize cache entry");
                return;
            }
        };
        if let Err(e) = self.storage.set(key, raw).await {
            warn!(key, error = %e, "failed to write cache entry");
        }
    }
}
