//! LLM synthesis provider.
//!
//! Speaks the Anthropic messages API. Methods:
//!
//! - `complete` — params `{system?, prompt, max_tokens?}`, returns
//!   `{text}`.

use super::provider::{ServiceError, ServiceProvider};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1_024;

pub struct LlmProvider {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl LlmProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.anthropic.com".into(),
            model: DEFAULT_MODEL.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Point at a compatible endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn complete(&self, params: &Value) -> Result<Value, ServiceError> {
        let prompt = params
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::Invalid("missing 'prompt'".into()))?;
        let system = params.get("system").and_then(Value::as_str).unwrap_or("");
        let max_tokens = params
            .get("max_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_TOKENS as u64);

        let mut body = json!({
            "model": &self.model,
            "max_tokens": max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });
        if !system.is_empty() {
            body["system"] = Value::from(system);
        }

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return if status.is_client_error() {
                Err(ServiceError::Invalid(format!("{status}: {body}")))
            } else {
                Err(ServiceError::Upstream(format!("{status}: {body}")))
            };
        }

        #[derive(Deserialize)]
        struct ContentBlock {
            text: Option<String>,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            content: Vec<ContentBlock>,
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Upstream(format!("undecodable response: {e}")))?;
        let text: String = parsed
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        debug!(chars = text.len(), "synthesis completed");
        Ok(json!({ "text": text }))
    }
}

#[async_trait]
impl ServiceProvider for LlmProvider {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn call(&self, method: &str, params: &Value) -> Result<Value, ServiceError> {
        match method {
            "complete" => self.complete(params).await,
            other => Err(ServiceError::Invalid(format!("unknown method '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_prompt_is_invalid() {
        let provider = LlmProvider::new("key".into());
        let err = provider
            .call("complete", &json!({"system": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_unknown_method_is_invalid() {
        let provider = LlmProvider::new("key".into());
        let err = provider.call("summon", &Value::Null).await.unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(_)));
    }
}
