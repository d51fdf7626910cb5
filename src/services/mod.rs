//! Outbound service hub.
//!
//! Providers register statically at startup; every call runs under the
//! per-service timeout capped by the turn's remaining deadline, with
//! retries for retriable failures only and a circuit breaker per
//! service. Cancellation drops the in-flight future, which releases the
//! provider slot immediately.

pub mod llm;
pub mod provider;
pub mod translate;
pub mod weather;

pub use llm::LlmProvider;
pub use provider::{ServiceError, ServiceProvider};
pub use translate::TranslationProvider;
pub use weather::WeatherProvider;

use crate::breaker::{Admission, CircuitBreaker};
use crate::context::RequestContext;
use crate::error::CoreError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-service call policy.
#[derive(Debug, Clone)]
pub struct ServicePolicy {
    pub timeout: Duration,
    pub retries: u32,
    /// First backoff step; doubles per retry.
    pub backoff: Duration,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retries: 2,
            backoff: Duration::from_millis(200),
        }
    }
}

impl ServicePolicy {
    /// Synthesis calls get one attempt with a longer leash.
    pub fn llm(timeout: Duration) -> Self {
        Self {
            timeout,
            retries: 0,
            backoff: Duration::from_millis(0),
        }
    }
}

struct ServiceEntry {
    provider: Arc<dyn ServiceProvider>,
    policy: ServicePolicy,
    breaker: CircuitBreaker,
}

/// Dispatches named service calls to registered providers.
#[derive(Default)]
pub struct ServiceHub {
    services: HashMap<&'static str, ServiceEntry>,
}

impl ServiceHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Called during startup wiring only.
    pub fn register(&mut self, provider: Arc<dyn ServiceProvider>, policy: ServicePolicy) {
        let name = provider.name();
        self.services.insert(
            name,
            ServiceEntry {
                provider,
                policy,
                breaker: CircuitBreaker::new(name),
            },
        );
    }

    pub fn is_registered(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    /// Execute `service.method(params)` under the caller's deadline.
    pub async fn execute(
        &self,
        service: &str,
        method: &str,
        params: &Value,
        ctx: &RequestContext,
    ) -> Result<Value, CoreError> {
        let entry = self.services.get(service).ok_or_else(|| {
            CoreError::ServiceUnavailable(format!("service '{service}' is not registered"))
        })?;

        if let Admission::ShortCircuit = entry.breaker.admit() {
            return Err(CoreError::ServiceUnavailable(format!(
                "service '{service}' circuit open"
            )));
        }

        let mut last: Option<ServiceError> = None;
        for attempt in 0..=entry.policy.retries {
            ctx.check()?;

            let remaining = ctx.remaining();
            let deadline_limited = remaining <= entry.policy.timeout;
            let budget = entry.policy.timeout.min(remaining);
            let call = entry.provider.call(method, params);
            let outcome = tokio::select! {
                biased;
                _ = ctx.cancellation_token().cancelled() => {
                    // Dropping the call future releases the provider
                    // slot; a cancelled turn never retries.
                    return Err(CoreError::Cancelled);
                }
                out = tokio::time::timeout(budget, call) => {
                    out.map_err(|_| ServiceError::Timeout)
                }
            };

            match outcome {
                Ok(Ok(value)) => {
                    entry.breaker.record_success();
                    debug!(service, method, attempt, "service call succeeded");
                    return Ok(value);
                }
                Ok(Err(e)) | Err(e) => {
                    if matches!(e, ServiceError::Timeout) && deadline_limited {
                        // The turn deadline cut the call short, not the
                        // provider's own budget; surface it as such.
                        entry.breaker.record_failure();
                        return Err(CoreError::Timeout);
                    }
                    if !e.is_retriable() {
                        warn!(service, method, error = %e, "service call failed fast");
                        return Err(CoreError::ServiceUnavailable(e.to_string()));
                    }
                    warn!(service, method, attempt, error = %e, "service call failed");
                    last = Some(e);
                    if attempt < entry.policy.retries {
                        let delay = entry.policy.backoff * 2u32.saturating_pow(attempt);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        entry.breaker.record_failure();
        Err(CoreError::ServiceUnavailable(
            last.map(|e| e.to_string())
                .unwrap_or_else(|| format!("service '{service}' exhausted retries")),
        ))
    }
}
