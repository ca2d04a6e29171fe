use super::iap_product_id::Platform;

/// Proof of purchase presented to the backend for validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IapReceipt {
    /// Base64-encoded App Store receipt, signed by Apple.
    AppStoreReceipt(String),

    /// Purchase token received on the device when purchasing with the Google
    /// Play Store.
    ///
    /// In the case of subscriptions, this token does not change across
    /// renewals.
    GooglePlayPurchaseToken(String),
}

impl IapReceipt {
    pub fn platform(&self) -> Platform {
        match self {
            IapReceipt::AppStoreReceipt(_) => Platform::Ios,
            IapReceipt::GooglePlayPurchaseToken(_) => Platform::Android,
        }
    }

    /// Raw value submitted in the `receipt` field of backend requests.
    pub fn payload(&self) -> &str {
        match self {
            IapReceipt::AppStoreReceipt(r) => r,
            IapReceipt::GooglePlayPurchaseToken(t) => t,
        }
    }
}
