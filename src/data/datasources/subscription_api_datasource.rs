use std::sync::Arc;

use async_trait::async_trait;
use backon::Retryable;
use reqwest::{header::AUTHORIZATION, Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::{
    config::{IapConfig, RetryPolicy},
    constants::{API_PREFIX, HISTORY_PATH, RESTORE_PATH, STATUS_PATH, VALIDATE_RECEIPT_PATH},
    data::models::subscription_api::{
        envelope_model::EnvelopeModel,
        restore_model::{RestoreDataModel, RestoreRequestModel},
        status_model::{CancelDataModel, StatusDataModel},
        subscription_model::SubscriptionModel,
        validate_receipt_model::{ValidateReceiptDataModel, ValidateReceiptRequestModel},
    },
    errors::SubscriptionApiError,
};

use super::access_token_provider::AccessTokenProvider;

#[async_trait]
pub(crate) trait SubscriptionApiDatasource: Send + Sync {
    /// POST /api/v1/subscriptions/validate-receipt
    ///
    /// Server-side validation against the Apple / Google verification APIs.
    /// A `success: false` answer is a rejection of the receipt.
    async fn validate_receipt(
        &self,
        request: ValidateReceiptRequestModel<'_>,
    ) -> Result<ValidateReceiptDataModel, SubscriptionApiError>;

    /// GET /api/v1/subscriptions/status
    async fn get_status(&self) -> Result<StatusDataModel, SubscriptionApiError>;

    /// GET /api/v1/subscriptions/history
    async fn get_history(&self) -> Result<Vec<SubscriptionModel>, SubscriptionApiError>;

    /// POST /api/v1/subscriptions/:id/cancel
    ///
    /// Marks the subscription as cancelled at the end of the current period.
    async fn cancel(&self, subscription_id: &str) -> Result<CancelDataModel, SubscriptionApiError>;

    /// POST /api/v1/subscriptions/restore
    async fn restore(
        &self,
        request: RestoreRequestModel<'_>,
    ) -> Result<RestoreDataModel, SubscriptionApiError>;
}

pub(crate) struct SubscriptionApiDatasourceImpl {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
    token_provider: Arc<dyn AccessTokenProvider>,
}

#[async_trait]
impl SubscriptionApiDatasource for SubscriptionApiDatasourceImpl {
    async fn validate_receipt(
        &self,
        request: ValidateReceiptRequestModel<'_>,
    ) -> Result<ValidateReceiptDataModel, SubscriptionApiError> {
        let body = to_json(&request)?;
        self.callout(Method::POST, VALIDATE_RECEIPT_PATH, Some(&body), "validate-receipt")
            .await
    }

    async fn get_status(&self) -> Result<StatusDataModel, SubscriptionApiError> {
        self.callout(Method::GET, STATUS_PATH, None, "status").await
    }

    async fn get_history(&self) -> Result<Vec<SubscriptionModel>, SubscriptionApiError> {
        self.callout(Method::GET, HISTORY_PATH, None, "history").await
    }

    async fn cancel(&self, subscription_id: &str) -> Result<CancelDataModel, SubscriptionApiError> {
        let path = format!("/{subscription_id}/cancel");
        self.callout(Method::POST, &path, None, "cancel").await
    }

    async fn restore(
        &self,
        request: RestoreRequestModel<'_>,
    ) -> Result<RestoreDataModel, SubscriptionApiError> {
        let body = to_json(&request)?;
        self.callout(Method::POST, RESTORE_PATH, Some(&body), "restore")
            .await
    }
}

impl SubscriptionApiDatasourceImpl {
    pub(crate) fn new(
        config: &IapConfig,
        token_provider: Arc<dyn AccessTokenProvider>,
    ) -> Result<Self, SubscriptionApiError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("iap-entitlement/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SubscriptionApiError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            retry: config.retry.clone(),
            token_provider,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    async fn callout<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        function_name: &str,
    ) -> Result<T, SubscriptionApiError> {
        let url = self.url(path);
        (|| async { self.send_once(method.clone(), &url, body).await })
            .retry(self.retry.backoff())
            .when(|e: &SubscriptionApiError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    "Subscription API call '{}' failed, retrying after {:.2}s: {}",
                    function_name,
                    dur.as_secs_f64(),
                    e
                )
            })
            .await
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, SubscriptionApiError> {
        let token = self.token_provider.access_token().await?;
        let mut request = self
            .http
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {token}"));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_reqwest_error)?;
        debug!(%url, status = status.as_u16(), "subscription API responded");
        parse_response(status, &text)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, SubscriptionApiError> {
    serde_json::to_value(value).map_err(|e| SubscriptionApiError::Serde(e.to_string()))
}

fn map_reqwest_error(e: reqwest::Error) -> SubscriptionApiError {
    if e.is_timeout() {
        SubscriptionApiError::Timeout
    } else {
        SubscriptionApiError::Transport(e.to_string())
    }
}

/// Maps an HTTP answer of the backend onto its payload or a typed error.
fn parse_response<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
) -> Result<T, SubscriptionApiError> {
    match status {
        s if s.is_success() => {
            let envelope: EnvelopeModel<T> = serde_json::from_str(body)
                .map_err(|e| SubscriptionApiError::Serde(e.to_string()))?;
            if !envelope.success {
                return Err(rejection(envelope.error));
            }
            envelope
                .data
                .ok_or_else(|| SubscriptionApiError::Serde("response is missing data".to_string()))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SubscriptionApiError::Unauthorized),
        StatusCode::TOO_MANY_REQUESTS => Err(SubscriptionApiError::RateLimited),
        StatusCode::BAD_REQUEST
        | StatusCode::PAYMENT_REQUIRED
        | StatusCode::CONFLICT
        | StatusCode::UNPROCESSABLE_ENTITY => {
            let envelope = serde_json::from_str::<EnvelopeModel<serde_json::Value>>(body).ok();
            Err(rejection(envelope.and_then(|e| e.error)))
        }
        s => Err(SubscriptionApiError::Http {
            status: s.as_u16(),
            body: body.to_string(),
        }),
    }
}

fn rejection(
    error: Option<crate::data::models::subscription_api::envelope_model::ErrorBodyModel>,
) -> SubscriptionApiError {
    let (code, message) = error
        .map(|e| (e.code, e.message))
        .unwrap_or((None, None));
    SubscriptionApiError::Rejected {
        code: code.unwrap_or_else(|| "UNKNOWN".to_string()),
        message: message.unwrap_or_else(|| "request rejected".to_string()),
    }
}
