use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex as StdMutex,
    },
};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::{
    constants::STORE_EVENT_CHANNEL_CAPACITY,
    domain::entities::store_event::{StoreError, StoreEvent},
    errors::{IapError, IapErrorKind, StoreOperation},
};

/// State shared by both store adapters: connection flag, finished
/// transactions and the event channel.
pub(crate) struct StoreState {
    connected: AtomicBool,
    connection_lock: Mutex<()>,
    finished: Mutex<HashSet<String>>,
    events_tx: mpsc::Sender<StoreEvent>,
    events_rx: StdMutex<Option<mpsc::Receiver<StoreEvent>>>,
}

impl StoreState {
    pub(crate) fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(STORE_EVENT_CHANNEL_CAPACITY);
        Self {
            connected: AtomicBool::new(false),
            connection_lock: Mutex::new(()),
            finished: Mutex::new(HashSet::new()),
            events_tx,
            events_rx: StdMutex::new(Some(events_rx)),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn require_connected(&self) -> Result<(), IapError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(IapError::new(
                IapErrorKind::ConnectionFailed,
                "store is not connected",
            ))
        }
    }

    /// Runs `open` unless already connected. Concurrent callers wait for the
    /// first attempt instead of opening a second session.
    pub(crate) async fn connect_with<F, Fut>(&self, open: F) -> Result<(), IapError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), StoreError>>,
    {
        let _guard = self.connection_lock.lock().await;
        if self.is_connected() {
            debug!("store already connected");
            return Ok(());
        }
        open()
            .await
            .map_err(|e| IapError::from_store_error(e, StoreOperation::Connect))?;
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) async fn disconnect_with<F, Fut>(&self, close: F) -> Result<(), IapError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), StoreError>>,
    {
        let _guard = self.connection_lock.lock().await;
        if !self.is_connected() {
            return Ok(());
        }
        // The session is gone from our side even if the store complains.
        self.connected.store(false, Ordering::Release);
        if let Err(e) = close().await {
            warn!(error = %e, "store reported an error while disconnecting");
        }
        Ok(())
    }

    /// Runs `finish` at most once per transaction id. The lock is held across
    /// the store call so concurrent duplicates wait and then no-op.
    pub(crate) async fn finish_once<F, Fut>(
        &self,
        transaction_id: &str,
        finish: F,
    ) -> Result<(), IapError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), StoreError>>,
    {
        let mut finished = self.finished.lock().await;
        if finished.contains(transaction_id) {
            debug!(transaction_id, "transaction already finished");
            return Ok(());
        }
        finish()
            .await
            .map_err(|e| IapError::from_store_error(e, StoreOperation::Finish))?;
        finished.insert(transaction_id.to_string());
        Ok(())
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<StoreEvent> {
        self.events_tx.clone()
    }

    pub(crate) fn take_events(&self) -> Option<mpsc::Receiver<StoreEvent>> {
        self.events_rx
            .lock()
            .map(|mut rx| rx.take())
            .unwrap_or_else(|poisoned| poisoned.into_inner().take())
    }
}

/// Delivers an event to the reconciler, logging when nobody listens.
pub(crate) async fn emit(sender: &mpsc::Sender<StoreEvent>, event: StoreEvent) {
    if sender.send(event).await.is_err() {
        warn!("store event dropped, no reconciler is listening");
    }
}
