//! Validated settings injected at construction.
//!
//! The core never reads the environment; whatever loads configuration
//! (CLI flags, files, env) happens outside and hands a [`Settings`]
//! record to [`crate::Assistant::new`]. `Settings::validate` rejects
//! records that would put a component into an unusable state.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_languages() -> Vec<String> {
    vec!["en".into(), "ar".into(), "fr".into(), "de".into(), "es".into()]
}

fn default_language() -> String {
    "en".into()
}

/// Top-level settings record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Allow-list for the request `language` parameter.
    #[serde(default = "default_languages")]
    pub languages_supported: Vec<String>,

    /// Language used when detection fails and a record has no entry for
    /// the requested language.
    #[serde(default = "default_language")]
    pub default_language: String,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub nlu: NluConfig,

    #[serde(default)]
    pub dialog: DialogConfig,

    #[serde(default)]
    pub services: ServiceHubConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            languages_supported: default_languages(),
            default_language: default_language(),
            session: SessionConfig::default(),
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            nlu: NluConfig::default(),
            dialog: DialogConfig::default(),
            services: ServiceHubConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl Settings {
    /// Validate cross-field constraints. Invalid settings are a startup
    /// failure, not something to limp along with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.languages_supported.is_empty() {
            return Err(CoreError::BadInput(
                "languages_supported must not be empty".into(),
            ));
        }
        if !self.languages_supported.contains(&self.default_language) {
            return Err(CoreError::BadInput(format!(
                "default_language '{}' is not in languages_supported",
                self.default_language
            )));
        }
        if self.session.session_ttl_seconds == 0 {
            return Err(CoreError::BadInput("session_ttl_seconds must be > 0".into()));
        }
        if self.session.remember_me_seconds < self.session.session_ttl_seconds {
            return Err(CoreError::BadInput(
                "remember_me_seconds must be >= session_ttl_seconds".into(),
            ));
        }
        if self.database.db_min_conn > self.database.db_max_conn {
            return Err(CoreError::BadInput(format!(
                "db_min_conn {} exceeds db_max_conn {}",
                self.database.db_min_conn, self.database.db_max_conn
            )));
        }
        if self.database.db_max_conn == 0 {
            return Err(CoreError::BadInput("db_max_conn must be > 0".into()));
        }
        if self.cache.cache_l1_capacity == 0 {
            return Err(CoreError::BadInput("cache_l1_capacity must be > 0".into()));
        }
        if self.nlu.vector_ef_search == 0 {
            return Err(CoreError::BadInput("vector_ef_search must be > 0".into()));
        }
        Ok(())
    }
}

/// Session store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Networked session backend address, e.g. `redis://127.0.0.1:6379`.
    pub primary_store_uri: String,

    /// Default session lifetime.
    pub session_ttl_seconds: u64,

    /// Extended lifetime when a client asks to be remembered.
    pub remember_me_seconds: u64,

    /// Per-attempt timeout against the primary backend.
    pub primary_timeout_ms: u64,

    /// Turns of conversation history kept on the context.
    pub history_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            primary_store_uri: "redis://127.0.0.1:6379".into(),
            session_ttl_seconds: 24 * 60 * 60,
            remember_me_seconds: 30 * 24 * 60 * 60,
            primary_timeout_ms: 1_500,
            history_window: 20,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self, remember_me: bool) -> Duration {
        if remember_me {
            Duration::from_secs(self.remember_me_seconds)
        } else {
            Duration::from_secs(self.session_ttl_seconds)
        }
    }

    pub fn primary_timeout(&self) -> Duration {
        Duration::from_millis(self.primary_timeout_ms)
    }
}

/// Connection pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub db_min_conn: u32,
    pub db_max_conn: u32,

    /// Acquisition blocks this long before failing.
    pub acquire_timeout_secs: u64,

    /// Idle horizon after which a connection is validated or discarded.
    pub idle_timeout_secs: u64,

    /// Interval of the pool metrics sampler.
    pub sample_interval_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/rihla".into(),
            db_min_conn: 2,
            db_max_conn: 20,
            acquire_timeout_secs: 5,
            idle_timeout_secs: 60,
            sample_interval_secs: 30,
        }
    }
}

/// Tiered cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// L2 key-value store address; typically the same cluster as the
    /// session primary.
    pub l2_uri: String,

    /// LRU capacity of the in-process tier.
    pub cache_l1_capacity: usize,

    /// Default TTL; the query-result facet uses it directly.
    pub cache_l2_ttl_seconds: u64,

    /// Deadline on any single L2 round-trip.
    pub l2_deadline_ms: u64,

    /// TTL of the vector-search facet.
    pub vector_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l2_uri: "redis://127.0.0.1:6379".into(),
            cache_l1_capacity: 1_000,
            cache_l2_ttl_seconds: 30 * 60,
            l2_deadline_ms: 50,
            vector_ttl_seconds: 60 * 60,
        }
    }
}

/// NLU settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NluConfig {
    /// Minimum language-detection confidence before falling back to the
    /// session preference.
    pub language_confidence_floor: f32,

    /// Margin the top intent must hold over the runner-up.
    pub intent_margin: f32,

    /// ANN quality knob passed through to vector search.
    pub vector_ef_search: u32,

    /// Upper bound on concurrent model inferences; 0 means derive from
    /// the CPU count as `max(2, cpus / 2)`.
    pub inference_workers: usize,
}

impl Default for NluConfig {
    fn default() -> Self {
        Self {
            language_confidence_floor: 0.8,
            intent_margin: 0.05,
            vector_ef_search: 40,
            inference_workers: 0,
        }
    }
}

impl NluConfig {
    /// Effective worker-group size.
    pub fn worker_count(&self) -> usize {
        if self.inference_workers > 0 {
            return self.inference_workers;
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        (cpus / 2).max(2)
    }
}

/// Dialog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogConfig {
    /// Turns a filled slot stays valid before it is cleared.
    pub slot_ttl_turns: u64,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self { slot_ttl_turns: 10 }
    }
}

/// Service hub settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHubConfig {
    /// Default per-call timeout when a service has no override.
    pub default_timeout_seconds: u64,

    /// Bound on LLM synthesis calls.
    pub llm_timeout_seconds: u64,

    /// Credential for the LLM provider; synthesis is disabled when
    /// absent and answering falls back to prewritten descriptions.
    #[serde(default)]
    pub llm_api_key: Option<String>,

    /// Endpoint of the translation provider, when deployed.
    #[serde(default)]
    pub translation_url: Option<String>,
}

impl Default for ServiceHubConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 5,
            llm_timeout_seconds: 20,
            llm_api_key: None,
            translation_url: None,
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Whole-turn deadline.
    pub request_deadline_seconds: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            request_deadline_seconds: 30,
        }
    }
}

impl OrchestratorConfig {
    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn test_default_language_must_be_supported() {
        let mut s = Settings::default();
        s.default_language = "sw".into();
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_pool_bounds_checked() {
        let mut s = Settings::default();
        s.database.db_min_conn = 30;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_remember_me_not_shorter_than_default_ttl() {
        let mut s = Settings::default();
        s.session.remember_me_seconds = 10;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_ttl_selection() {
        let c = SessionConfig::default();
        assert_eq!(c.ttl(false), Duration::from_secs(86_400));
        assert_eq!(c.ttl(true), Duration::from_secs(2_592_000));
    }

    #[test]
    fn test_worker_count_floor() {
        let c = NluConfig {
            inference_workers: 0,
            ..NluConfig::default()
        };
        assert!(c.worker_count() >= 2);

        let fixed = NluConfig {
            inference_workers: 7,
            ..NluConfig::default()
        };
        assert_eq!(fixed.worker_count(), 7);
    }

    #[test]
    fn test_settings_deserialize_partial() {
        // Only overrides present; the rest fills from defaults.
        let s: Settings = serde_json::from_str(
            r#"{"session": {"primary_store_uri": "redis://cache:6379",
                 "session_ttl_seconds": 3600,
                 "remember_me_seconds": 7200,
                 "primary_timeout_ms": 500,
                 "history_window": 8}}"#,
        )
        .unwrap();
        assert_eq!(s.session.session_ttl_seconds, 3_600);
        assert_eq!(s.default_language, "en");
        s.validate().unwrap();
    }
}
