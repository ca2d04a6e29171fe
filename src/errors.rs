use std::fmt;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::domain::entities::store_event::{StoreError, StoreErrorCode};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure classes surfaced to callers of the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IapErrorKind {
    /// Store session could not be established.
    ConnectionFailed,
    /// Catalog query came back empty; a setup problem, not a transient one.
    ProductsNotFound,
    /// User dismissed checkout. Never shown to the user.
    PurchaseCancelled,
    PurchaseFailed,
    /// Backend rejected the receipt.
    ValidationFailed,
    RestoreFailed,
    /// Backend could not be reached after retries. The transaction stays
    /// unfinished so the store redelivers it.
    BackendUnavailable,
    Unknown,
}

impl IapErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IapErrorKind::ConnectionFailed => "CONNECTION_FAILED",
            IapErrorKind::ProductsNotFound => "PRODUCTS_NOT_FOUND",
            IapErrorKind::PurchaseCancelled => "PURCHASE_CANCELLED",
            IapErrorKind::PurchaseFailed => "PURCHASE_FAILED",
            IapErrorKind::ValidationFailed => "VALIDATION_FAILED",
            IapErrorKind::RestoreFailed => "RESTORE_FAILED",
            IapErrorKind::BackendUnavailable => "BACKEND_UNAVAILABLE",
            IapErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for IapErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct IapError {
    kind: IapErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

/// Store operation during which a store error occurred; the same store code
/// classifies differently depending on what the user was doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Connect,
    Catalog,
    Purchase,
    Restore,
    Finish,
}

impl IapError {
    pub fn new(kind: IapErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: IapErrorKind,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> IapErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == IapErrorKind::PurchaseCancelled
    }

    /// Classifies a store-reported error at the reconciler boundary.
    pub fn from_store_error(err: StoreError, operation: StoreOperation) -> Self {
        let kind = match (&err.code, operation) {
            (StoreErrorCode::UserCancelled, _) => IapErrorKind::PurchaseCancelled,
            (_, StoreOperation::Connect) => IapErrorKind::ConnectionFailed,
            (StoreErrorCode::NotPrepared, _) => IapErrorKind::ConnectionFailed,
            (StoreErrorCode::ItemUnavailable, StoreOperation::Catalog)
            | (StoreErrorCode::ItemUnavailable, StoreOperation::Purchase) => {
                IapErrorKind::ProductsNotFound
            }
            (_, StoreOperation::Restore) => IapErrorKind::RestoreFailed,
            (_, StoreOperation::Purchase) => IapErrorKind::PurchaseFailed,
            (_, StoreOperation::Catalog) => IapErrorKind::ConnectionFailed,
            (_, StoreOperation::Finish) => IapErrorKind::Unknown,
        };
        let message = err.message.clone();
        Self::with_source(kind, message, err)
    }

    /// Classifies a backend failure that happened while validating a receipt.
    pub fn from_validation_error(err: SubscriptionApiError) -> Self {
        let kind = match &err {
            SubscriptionApiError::Rejected { .. } => IapErrorKind::ValidationFailed,
            e if e.should_retry() => IapErrorKind::BackendUnavailable,
            _ => IapErrorKind::Unknown,
        };
        Self::with_source(kind, "receipt validation failed", err)
    }

    /// Classifies a backend failure outside of receipt validation.
    pub fn from_backend_error(err: SubscriptionApiError) -> Self {
        let kind = if err.should_retry() {
            IapErrorKind::BackendUnavailable
        } else {
            IapErrorKind::Unknown
        };
        Self::with_source(kind, "subscription backend request failed", err)
    }

    /// What the UI should tell the user, or `None` when the error must stay
    /// silent.
    pub fn user_feedback(&self) -> Option<UserFeedback> {
        match self.kind {
            IapErrorKind::PurchaseCancelled => None,
            IapErrorKind::ConnectionFailed => Some(UserFeedback::StoreUnavailable),
            IapErrorKind::ProductsNotFound => Some(UserFeedback::ProductsUnavailable),
            IapErrorKind::PurchaseFailed => Some(UserFeedback::RetryPurchase),
            IapErrorKind::ValidationFailed => Some(UserFeedback::ContactSupport),
            IapErrorKind::RestoreFailed => Some(UserFeedback::RetryRestore),
            IapErrorKind::BackendUnavailable => Some(UserFeedback::TryAgainLater),
            IapErrorKind::Unknown => Some(UserFeedback::Generic),
        }
    }
}

/// Errors of the backend subscription API client.
#[derive(Debug, Clone, Error)]
pub enum SubscriptionApiError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("unauthorized")]
    Unauthorized,
    #[error("rejected by backend ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("json error: {0}")]
    Serde(String),
    #[error("could not obtain access token: {0}")]
    AccessToken(String),
}

impl SubscriptionApiError {
    /// Returns true if the error is transient and should be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }

    /// Returns true if the backend judged the receipt and asking again
    /// cannot change the answer. Auth failures are not terminal: the
    /// receipt was never looked at.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Rejected { .. } | Self::Serde(_) => true,
            Self::Http { status, .. } => {
                (400..=499).contains(status) && !matches!(status, 401 | 403 | 429)
            }
            _ => false,
        }
    }
}

/// Copy the UI shows for a failed entitlement operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFeedback {
    StoreUnavailable,
    ProductsUnavailable,
    RetryPurchase,
    ContactSupport,
    RetryRestore,
    TryAgainLater,
    Generic,
}

impl UserFeedback {
    pub fn message(&self) -> &'static str {
        match self {
            UserFeedback::StoreUnavailable => {
                "Could not connect to the store. Check your connection and try again."
            }
            UserFeedback::ProductsUnavailable => "Subscriptions are not available right now.",
            UserFeedback::RetryPurchase => "The purchase could not be completed. Please try again.",
            UserFeedback::ContactSupport => {
                "We could not verify your purchase. Please contact support."
            }
            UserFeedback::RetryRestore => "Purchases could not be restored. Please try again.",
            UserFeedback::TryAgainLater => {
                "Your purchase is being processed. It will be applied shortly."
            }
            UserFeedback::Generic => "Something went wrong. Please try again.",
        }
    }
}

/// Sink for user-visible error messages (toasts).
pub trait Notifier: Send + Sync {
    fn notify(&self, feedback: UserFeedback);
}

/// Logs an entitlement error and forwards its user feedback to the notifier.
/// Cancellations are logged at debug level and never reach the notifier.
pub fn report_error(err: &IapError, notifier: &dyn Notifier) {
    match err.user_feedback() {
        None => debug!(kind = %err.kind(), "purchase cancelled by user"),
        Some(feedback) => {
            match err.kind() {
                IapErrorKind::Unknown => error!(error = %err, "unclassified entitlement error"),
                _ => warn!(kind = %err.kind(), error = %err, "entitlement operation failed"),
            }
            notifier.notify(feedback);
        }
    }
}
