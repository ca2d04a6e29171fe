use std::sync::RwLock;

use crate::domain::entities::entitlement::Entitlement;

/// Entitlement confirmed by the backend during the current session.
///
/// Nothing read from the local cache is ever stored here.
#[derive(Debug, Default)]
pub struct SessionEntitlement {
    confirmed: RwLock<Option<Entitlement>>,
}

impl SessionEntitlement {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn confirm(&self, entitlement: Entitlement) {
        *self.write() = Some(entitlement);
    }

    pub(crate) fn revoke(&self) {
        *self.write() = None;
    }

    /// The backend-confirmed entitlement, if any confirmation happened this
    /// session.
    pub fn current(&self) -> Option<Entitlement> {
        self.confirmed
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_confirmed(&self) -> bool {
        self.current().is_some()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<Entitlement>> {
        self.confirmed
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
