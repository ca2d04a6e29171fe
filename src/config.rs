use std::time::Duration;

use backon::ExponentialBuilder;
use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};

use crate::{
    constants::{
        DEFAULT_API_BASE_URL, DEFAULT_FREE_IDEA_LIMIT, DEFAULT_FREE_MESSAGES_PER_IDEA,
        DEFAULT_PURCHASE_CLOCK_SKEW_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
        DEFAULT_RETRY_MAX_DELAY_MILLIS, DEFAULT_RETRY_MAX_TIMES, DEFAULT_RETRY_MIN_DELAY_MILLIS,
    },
    domain::entities::iap_product_id::Platform,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IapConfig {
    /// Base URL of the backend, without the `/api/v1` prefix.
    pub api_base_url: String,
    pub platform: Platform,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub quotas: QuotaConfig,
    /// Tolerance when binding a store update to a pending purchase request.
    #[serde_as(as = "DurationSeconds<i64>")]
    pub purchase_clock_skew: chrono::Duration,
}

impl Default for IapConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            platform: Platform::Ios,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            quotas: QuotaConfig::default(),
            purchase_clock_skew: chrono::Duration::seconds(DEFAULT_PURCHASE_CLOCK_SKEW_SECS),
        }
    }
}

impl IapConfig {
    /// Builds the configuration from `IAP_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("IAP_API_BASE_URL") {
            config.api_base_url = url;
        }
        if let Ok(platform) = std::env::var("IAP_PLATFORM") {
            config.platform = platform
                .parse()
                .map_err(|reason| ConfigError::InvalidValue {
                    key: "IAP_PLATFORM",
                    reason,
                })?;
        }
        if let Ok(secs) = std::env::var("IAP_REQUEST_TIMEOUT_SECS") {
            let secs = secs.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                key: "IAP_REQUEST_TIMEOUT_SECS",
                reason: e.to_string(),
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

/// Bounded exponential backoff applied to transient backend failures.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_times: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub min_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_times: DEFAULT_RETRY_MAX_TIMES,
            min_delay: Duration::from_millis(DEFAULT_RETRY_MIN_DELAY_MILLIS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MILLIS),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_times: 0,
            ..Self::default()
        }
    }

    pub(crate) fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_times);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}

/// Free-tier limits. Pro plans are unlimited.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QuotaConfig {
    pub free_idea_limit: u32,
    pub free_messages_per_idea: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_idea_limit: DEFAULT_FREE_IDEA_LIMIT,
            free_messages_per_idea: DEFAULT_FREE_MESSAGES_PER_IDEA,
        }
    }
}
