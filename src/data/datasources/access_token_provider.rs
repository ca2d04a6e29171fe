use async_trait::async_trait;

use crate::errors::SubscriptionApiError;

/// Source of the bearer token attached to backend requests (the signed-in
/// user's auth session).
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, SubscriptionApiError>;
}

/// Fixed token, for sessions whose token is refreshed by the caller.
#[derive(Debug, Clone)]
pub struct StaticAccessToken(pub String);

#[async_trait]
impl AccessTokenProvider for StaticAccessToken {
    async fn access_token(&self) -> Result<String, SubscriptionApiError> {
        if self.0.is_empty() {
            return Err(SubscriptionApiError::AccessToken(
                "no signed-in session".to_string(),
            ));
        }
        Ok(self.0.clone())
    }
}
