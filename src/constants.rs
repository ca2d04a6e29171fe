// Backend subscription API.
// ---------------------------------------------------------------------------

pub(crate) const API_PREFIX: &str = "/api/v1/subscriptions";
pub(crate) const VALIDATE_RECEIPT_PATH: &str = "/validate-receipt";
pub(crate) const STATUS_PATH: &str = "/status";
pub(crate) const HISTORY_PATH: &str = "/history";
pub(crate) const RESTORE_PATH: &str = "/restore";

pub(crate) const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";
pub(crate) const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

pub(crate) const DEFAULT_RETRY_MAX_TIMES: usize = 3;
pub(crate) const DEFAULT_RETRY_MIN_DELAY_MILLIS: u64 = 500;
pub(crate) const DEFAULT_RETRY_MAX_DELAY_MILLIS: u64 = 8_000;

// Local cache keys.
// ---------------------------------------------------------------------------

pub const ACTIVE_SUBSCRIPTION_KEY: &str = "iap_active_subscription";
pub const PURCHASE_HISTORY_KEY: &str = "iap_purchase_history";
pub const RECEIPT_DATA_KEY: &str = "iap_receipt_data";

// Product SKUs.
// ---------------------------------------------------------------------------

pub(crate) const IOS_PRO_MONTHLY_SKU: &str = "com.ideaforge.pro.monthly";
pub(crate) const IOS_PRO_YEARLY_SKU: &str = "com.ideaforge.pro.yearly";
pub(crate) const ANDROID_PRO_MONTHLY_SKU: &str = "pro_monthly";
pub(crate) const ANDROID_PRO_YEARLY_SKU: &str = "pro_yearly";

// Reconciliation.
// ---------------------------------------------------------------------------

/// Allowed difference between the device clock at purchase request time and
/// the store-reported transaction date when binding an update to a pending
/// purchase.
pub(crate) const DEFAULT_PURCHASE_CLOCK_SKEW_SECS: i64 = 120;

pub(crate) const STORE_EVENT_CHANNEL_CAPACITY: usize = 64;
pub(crate) const COMMAND_CHANNEL_CAPACITY: usize = 16;

// Quotas.
// ---------------------------------------------------------------------------

pub(crate) const DEFAULT_FREE_IDEA_LIMIT: u32 = 3;
pub(crate) const DEFAULT_FREE_MESSAGES_PER_IDEA: u32 = 20;
