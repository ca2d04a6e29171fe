use std::fmt;

use super::purchase_transaction::PurchaseTransaction;

/// Event emitted by the platform store, replacing the native update and
/// error listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A completed or restored transaction. Fires again on later launches
    /// until the transaction is finished.
    Update(PurchaseTransaction),
    /// A checkout failure.
    Error(StoreError),
}

/// Store-reported error codes, normalized across platforms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreErrorCode {
    UserCancelled,
    ItemUnavailable,
    AlreadyOwned,
    NotPrepared,
    ServiceUnavailable,
    NetworkError,
    DeveloperError,
    Deferred,
    Unknown(String),
}

impl StoreErrorCode {
    /// Maps the raw error codes used by the native purchase bridges.
    pub fn from_raw(code: &str) -> Self {
        match code {
            "E_USER_CANCELLED" | "USER_CANCELED" | "SKErrorPaymentCancelled" => {
                StoreErrorCode::UserCancelled
            }
            "E_ITEM_UNAVAILABLE" | "ITEM_UNAVAILABLE" | "SKErrorStoreProductNotAvailable" => {
                StoreErrorCode::ItemUnavailable
            }
            "E_ALREADY_OWNED" | "ITEM_ALREADY_OWNED" => StoreErrorCode::AlreadyOwned,
            "E_NOT_PREPARED" | "SERVICE_DISCONNECTED" => StoreErrorCode::NotPrepared,
            "E_SERVICE_ERROR" | "SERVICE_UNAVAILABLE" | "BILLING_UNAVAILABLE" => {
                StoreErrorCode::ServiceUnavailable
            }
            "E_NETWORK_ERROR" | "NETWORK_ERROR" | "SKErrorCloudServiceNetworkConnectionFailed" => {
                StoreErrorCode::NetworkError
            }
            "E_DEVELOPER_ERROR" | "DEVELOPER_ERROR" => StoreErrorCode::DeveloperError,
            "E_DEFERRED_PAYMENT" => StoreErrorCode::Deferred,
            other => StoreErrorCode::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreError {
    pub code: StoreErrorCode,
    pub message: String,
    /// Product the failed checkout was for, when the store reports it.
    pub product_id: Option<String>,
}

impl StoreError {
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            product_id: None,
        }
    }

    pub fn for_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn is_cancellation(&self) -> bool {
        self.code == StoreErrorCode::UserCancelled
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for StoreError {}
