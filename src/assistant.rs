//! The assistant root object.
//!
//! Every component is constructed here, once, at startup, and handed
//! by reference into its dependents — no global registries, no lazy
//! singletons. Shutdown releases everything in reverse construction
//! order: analytics first (drain), then loaded models, then the
//! database pool.

use crate::cache::{CacheBackend, RedisCacheBackend, TieredCache};
use crate::config::Settings;
use crate::database::{DatabaseManager, IndexSuggestion, PoolSample, QueryRecord};
use crate::dialog::DialogManager;
use crate::envelope::{ChatRequest, ChatResponse, SessionCreateRequest, SessionCreateResponse};
use crate::error::CoreError;
use crate::knowledge::{
    KnowledgeBase, KnowledgeStore, MemoryKnowledgeStore, PgKnowledgeStore, RagPipeline,
};
use crate::nlu::{InferenceWorkers, ModelRegistry, NluPipeline};
use crate::orchestrator::{
    AnalyticsEmitter, AnalyticsSink, Orchestrator, ResponseGenerator, TracingSink,
};
use crate::services::{
    LlmProvider, ServiceHub, ServicePolicy, TranslationProvider, WeatherProvider,
};
use crate::session::{MemorySessionBackend, RedisSessionBackend, SessionBackend, SessionStore};
use rihla_embedder::{Embedder, HashEmbedder};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Swappable backends for one assistant instance.
///
/// Production wiring comes from [`Assistant::connect`]; tests and
/// single-process deployments assemble parts explicitly.
pub struct AssistantParts {
    pub session_backend: Arc<dyn SessionBackend>,
    pub knowledge_store: Arc<dyn KnowledgeStore>,
    pub embedder: Arc<dyn Embedder>,
    pub hub: ServiceHub,
    pub analytics_sink: Arc<dyn AnalyticsSink>,
    /// Present only when the knowledge store runs on Postgres.
    pub database: Option<Arc<DatabaseManager>>,
}

impl AssistantParts {
    /// Fully in-process parts: memory session backend, memory caches,
    /// memory knowledge store, no outbound providers.
    pub fn in_memory(default_language: &str) -> Self {
        Self {
            session_backend: Arc::new(MemorySessionBackend::new()),
            knowledge_store: Arc::new(MemoryKnowledgeStore::new(default_language)),
            embedder: Arc::new(HashEmbedder::new()),
            hub: ServiceHub::new(),
            analytics_sink: Arc::new(TracingSink),
            database: None,
        }
    }
}

pub struct Assistant {
    orchestrator: Orchestrator,
    sessions: Arc<SessionStore>,
    registry: Arc<ModelRegistry>,
    analytics: Arc<AnalyticsEmitter>,
    database: Option<Arc<DatabaseManager>>,
}

impl Assistant {
    /// Production wiring: Redis sessions and cache L2, Postgres
    /// knowledge store, HTTP service providers.
    pub async fn connect(settings: Settings) -> Result<Self, CoreError> {
        settings.validate()?;

        let session_backend = RedisSessionBackend::connect(&settings.session.primary_store_uri)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        let cache_backend = RedisCacheBackend::connect(&settings.cache.l2_uri)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        let database = Arc::new(
            DatabaseManager::connect(&settings.database)
                .await
                .map_err(|e| CoreError::Internal(e.to_string()))?,
        );

        let cache = Arc::new(TieredCache::new(
            Arc::new(cache_backend) as Arc<dyn CacheBackend>,
            settings.cache.clone(),
        ));
        let knowledge_store = Arc::new(PgKnowledgeStore::new(
            Arc::clone(&database),
            cache,
            &settings.default_language,
        ));
        knowledge_store
            .ensure_indexes()
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        let mut hub = ServiceHub::new();
        if let Some(api_key) = &settings.services.llm_api_key {
            hub.register(
                Arc::new(LlmProvider::new(api_key.clone())),
                ServicePolicy::llm(Duration::from_secs(settings.services.llm_timeout_seconds)),
            );
        }
        hub.register(
            Arc::new(WeatherProvider::new()),
            ServicePolicy {
                timeout: Duration::from_secs(settings.services.default_timeout_seconds),
                ..ServicePolicy::default()
            },
        );
        if let Some(url) = &settings.services.translation_url {
            hub.register(
                Arc::new(TranslationProvider::new(url)),
                ServicePolicy {
                    timeout: Duration::from_secs(settings.services.default_timeout_seconds),
                    ..ServicePolicy::default()
                },
            );
        }

        let parts = AssistantParts {
            session_backend: Arc::new(session_backend),
            knowledge_store,
            embedder: Arc::new(HashEmbedder::new()),
            hub,
            analytics_sink: Arc::new(TracingSink),
            database: Some(database),
        };
        Self::from_parts(settings, parts)
    }

    /// Assemble an assistant from explicit parts.
    pub fn from_parts(settings: Settings, parts: AssistantParts) -> Result<Self, CoreError> {
        settings.validate()?;

        let sessions = Arc::new(SessionStore::new(
            parts.session_backend,
            settings.session.clone(),
        ));

        let kb = Arc::new(KnowledgeBase::new(
            Arc::clone(&parts.knowledge_store),
            &settings.default_language,
        ));

        let registry = Arc::new(ModelRegistry::new());
        let workers = Arc::new(InferenceWorkers::new(settings.nlu.worker_count()));
        let nlu = Arc::new(NluPipeline::new(
            Arc::clone(&parts.embedder),
            Arc::clone(&kb),
            &registry,
            Arc::clone(&workers),
            settings.nlu.clone(),
            &settings.default_language,
        ));

        let hub = Arc::new(parts.hub);
        let rag = Arc::new(RagPipeline::new(
            Arc::clone(&parts.knowledge_store),
            parts.embedder,
            workers,
            Arc::clone(&hub),
            &settings.default_language,
            settings.nlu.vector_ef_search,
        ));

        let dialog = Arc::new(DialogManager::with_defaults(settings.dialog.clone()));
        let responder = Arc::new(ResponseGenerator::new(&settings.default_language));
        let analytics = Arc::new(AnalyticsEmitter::new(parts.analytics_sink));

        let orchestrator = Orchestrator::new(
            settings,
            Arc::clone(&sessions),
            nlu,
            dialog,
            kb,
            rag,
            hub,
            responder,
            Arc::clone(&analytics),
        );

        info!("assistant assembled");
        Ok(Self {
            orchestrator,
            sessions,
            registry,
            analytics,
            database: parts.database,
        })
    }

    /// Process one user turn.
    pub async fn handle_message(&self, request: ChatRequest) -> Result<ChatResponse, CoreError> {
        self.orchestrator.handle_message(request).await
    }

    /// Create a session.
    pub async fn create_session(
        &self,
        request: SessionCreateRequest,
    ) -> Result<SessionCreateResponse, CoreError> {
        self.orchestrator.create_session(request).await
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Pool health samples, when running on Postgres.
    pub fn pool_samples(&self) -> Vec<PoolSample> {
        self.database
            .as_ref()
            .map(|db| db.pool_samples())
            .unwrap_or_default()
    }

    /// Retained slow queries, when running on Postgres.
    pub fn slow_queries(&self) -> Vec<QueryRecord> {
        self.database
            .as_ref()
            .map(|db| db.analyzer().slow_queries())
            .unwrap_or_default()
    }

    /// Index suggestions from the analyzer, when running on Postgres.
    pub fn index_suggestions(&self) -> Vec<IndexSuggestion> {
        self.database
            .as_ref()
            .map(|db| db.analyzer().suggest_indexes())
            .unwrap_or_default()
    }

    /// Release everything in reverse construction order.
    pub async fn shutdown(&self) {
        info!("assistant shutting down");
        self.analytics.shutdown().await;
        self.registry.release_all();
        if let Some(database) = &self.database {
            database.close().await;
        }
    }
}
