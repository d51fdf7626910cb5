//! Weather lookup provider.
//!
//! Methods:
//! - `current` — params `{lat, lon}`, returns
//!   `{temperature_c, wind_kph, code}`.

use super::provider::{ServiceError, ServiceProvider};
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct WeatherProvider {
    base_url: String,
    client: reqwest::Client,
}

impl WeatherProvider {
    pub fn new() -> Self {
        Self {
            base_url: "https://api.open-meteo.com".into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn current(&self, params: &Value) -> Result<Value, ServiceError> {
        let lat = params
            .get("lat")
            .and_then(Value::as_f64)
            .ok_or_else(|| ServiceError::Invalid("missing 'lat'".into()))?;
        let lon = params
            .get("lon")
            .and_then(Value::as_f64)
            .ok_or_else(|| ServiceError::Invalid("missing 'lon'".into()))?;

        let response = self
            .client
            .get(format!("{}/v1/forecast", self.base_url))
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                ("current_weather", "true".into()),
            ])
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
        let current = payload
            .get("current_weather")
            .ok_or_else(|| ServiceError::Upstream("missing current_weather".into()))?;

        Ok(json!({
            "temperature_c": current.get("temperature"),
            "wind_kph": current.get("windspeed"),
            "code": current.get("weathercode"),
        }))
    }
}

impl Default for WeatherProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceProvider for WeatherProvider {
    fn name(&self) -> &'static str {
        "weather"
    }

    async fn call(&self, method: &str, params: &Value) -> Result<Value, ServiceError> {
        match method {
            "current" => self.current(params).await,
            other => Err(ServiceError::Invalid(format!("unknown method '{other}'"))),
        }
    }
}
