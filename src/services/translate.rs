//! Translation provider.
//!
//! Speaks a LibreTranslate-compatible API. Methods:
//! - `translate` — params `{text, source?, target}`, returns `{text}`.

use super::provider::{ServiceError, ServiceProvider};
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct TranslationProvider {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl TranslationProvider {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    async fn translate(&self, params: &Value) -> Result<Value, ServiceError> {
        let text = params
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::Invalid("missing 'text'".into()))?;
        let target = params
            .get("target")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::Invalid("missing 'target'".into()))?;
        let source = params.get("source").and_then(Value::as_str).unwrap_or("auto");

        let mut body = json!({
            "q": text,
            "source": source,
            "target": target,
            "format": "text",
        });
        if let Some(api_key) = &self.api_key {
            body["api_key"] = Value::from(api_key.as_str());
        }

        let response = self
            .client
            .post(format!("{}/translate", self.base_url))
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

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Upstream(format!("undecodable response: {e}")))?;
        let translated = payload
            .get("translatedText")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::Upstream("missing translatedText".into()))?;

        Ok(json!({ "text": translated }))
    }
}

#[async_trait]
impl ServiceProvider for TranslationProvider {
    fn name(&self) -> &'static str {
        "translation"
    }

    async fn call(&self, method: &str, params: &Value) -> Result<Value, ServiceError> {
        match method {
            "translate" => self.translate(params).await,
            other => Err(ServiceError::Invalid(format!("unknown method '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_target_invalid() {
        let provider = TranslationProvider::new("http://localhost:5000");
        let err = provider
            .call("translate", &json!({"text": "hello"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(_)));
    }
}
