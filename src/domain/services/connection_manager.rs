use std::{future::Future, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::{domain::stores::entitlement_store::EntitlementStore, errors::IapError};

/// Owns the lifecycle of the store connection.
///
/// Sessions are exclusive: a second `session()` waits until the first one is
/// released.
pub struct StoreConnectionManager {
    store: Arc<dyn EntitlementStore>,
    session_lock: Arc<Mutex<()>>,
}

impl StoreConnectionManager {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self {
            store,
            session_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &Arc<dyn EntitlementStore> {
        &self.store
    }

    /// Lazily connects. A no-op when already connected.
    pub async fn ensure_connected(&self) -> Result<(), IapError> {
        self.store.connect().await
    }

    /// Acquires the store for a screen's lifetime. Must be `release()`d;
    /// a dropped session disconnects in the background.
    pub async fn session(&self) -> Result<StoreSession, IapError> {
        let permit = self.session_lock.clone().lock_owned().await;
        self.store.connect().await?;
        debug!("store session acquired");
        Ok(StoreSession {
            store: self.store.clone(),
            permit: Some(permit),
        })
    }

    /// Runs `f` inside a session and disconnects afterwards, whatever `f`
    /// returned.
    pub async fn scoped<F, Fut, T>(&self, f: F) -> Result<T, IapError>
    where
        F: FnOnce(Arc<dyn EntitlementStore>) -> Fut,
        Fut: Future<Output = Result<T, IapError>>,
    {
        let session = self.session().await?;
        let result = f(session.store()).await;
        if let Err(e) = session.release().await {
            warn!(error = %e, "failed to disconnect store after scoped session");
        }
        result
    }
}

pub struct StoreSession {
    store: Arc<dyn EntitlementStore>,
    permit: Option<OwnedMutexGuard<()>>,
}

impl StoreSession {
    pub fn store(&self) -> Arc<dyn EntitlementStore> {
        self.store.clone()
    }

    /// Disconnects the store and frees the session slot.
    pub async fn release(mut self) -> Result<(), IapError> {
        let result = self.store.disconnect().await;
        self.permit.take();
        debug!("store session released");
        result
    }
}

impl Drop for StoreSession {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        warn!("store session dropped without release, disconnecting");
        let store = self.store.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.disconnect().await {
                        warn!(error = %e, "background disconnect failed");
                    }
                    drop(permit);
                });
            }
            Err(_) => warn!("no runtime available, store left connected"),
        }
    }
}
