//! Service provider seam.

use async_trait::async_trait;
use serde_json::Value;

/// Errors out of one provider call. The hub decides retry behavior
/// from the variant.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Request-side failure (4xx class). Never retried.
    #[error("service rejected request: {0}")]
    Invalid(String),

    /// Upstream failure (5xx class). Retriable.
    #[error("service failed: {0}")]
    Upstream(String),

    /// The provider did not answer in time. Retriable.
    #[error("service timed out")]
    Timeout,
}

impl ServiceError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, ServiceError::Upstream(_) | ServiceError::Timeout)
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::Timeout
        } else if e.is_status() {
            let status = e.status().map(|s| s.as_u16()).unwrap_or(0);
            if (400..500).contains(&status) {
                ServiceError::Invalid(e.to_string())
            } else {
                ServiceError::Upstream(e.to_string())
            }
        } else {
            ServiceError::Upstream(e.to_string())
        }
    }
}

/// One pluggable outbound service.
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Stable name the hub registers the provider under.
    fn name(&self) -> &'static str;

    /// Invoke a method with JSON parameters.
    async fn call(&self, method: &str, params: &Value) -> Result<Value, ServiceError>;
}
