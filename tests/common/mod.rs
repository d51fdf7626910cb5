//! Shared fixtures: an assistant wired to in-memory backends with a
//! seeded knowledge base, a collecting analytics sink, and scriptable
//! service providers.

use async_trait::async_trait;
use rihla::knowledge::{
    EntityDraft, EntityKind, GeoPoint, KnowledgeStore, MemoryKnowledgeStore, MultilingualText,
};
use rihla::orchestrator::CollectorSink;
use rihla::services::{ServiceError, ServicePolicy, ServiceProvider};
use rihla::session::backend::{SessionBackend, SessionError};
use rihla::session::MemorySessionBackend;
use rihla::{Assistant, AssistantParts, Settings};
use rihla_embedder::{Embedder, HashEmbedder};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// LLM stand-in with a fixed reply, or a stall longer than any turn.
pub struct ScriptedLlm {
    pub reply: Option<String>,
    pub stall: bool,
}

#[async_trait]
impl ServiceProvider for ScriptedLlm {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn call(&self, _method: &str, _params: &Value) -> Result<Value, ServiceError> {
        if self.stall {
            tokio::time::sleep(Duration::from_secs(600)).await;
        }
        match &self.reply {
            Some(reply) => Ok(json!({ "text": reply })),
            None => Err(ServiceError::Timeout),
        }
    }
}

/// Session primary that can be killed at runtime.
pub struct TogglePrimary {
    inner: MemorySessionBackend,
    dead: AtomicBool,
}

impl TogglePrimary {
    pub fn new() -> Self {
        Self {
            inner: MemorySessionBackend::new(),
            dead: AtomicBool::new(false),
        }
    }

    pub fn set_dead(&self, dead: bool) {
        self.dead.store(dead, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), SessionError> {
        if self.dead.load(Ordering::SeqCst) {
            Err(SessionError::Backend("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionBackend for TogglePrimary {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SessionError> {
        self.check()?;
        self.inner.put(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), SessionError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, SessionError> {
        self.check()?;
        self.inner.expire(key, ttl).await
    }
}

/// Seed the tourism fixtures used across scenarios.
pub async fn seed_store(store: &MemoryKnowledgeStore) {
    let embedder = HashEmbedder::new();

    let giza = {
        let mut draft = EntityDraft::new(
            EntityKind::Destination,
            "giza",
            MultilingualText::of("en", "Giza").with("ar", "الجيزة"),
        );
        draft.description =
            MultilingualText::of("en", "City on the west bank of the Nile, across from Cairo.");
        draft.location = Some(GeoPoint::new(30.0131, 31.2089));
        draft.popularity = 0.9;
        store.create(&draft).await.unwrap()
    };

    let mut pyramids = EntityDraft::new(
        EntityKind::Attraction,
        "giza-pyramids",
        MultilingualText::of("en", "Pyramids of Giza").with("ar", "أهرامات الجيزة"),
    );
    pyramids.description = MultilingualText::of(
        "en",
        "The Giza pyramid complex holds the Great Pyramid, the last of the ancient wonders.",
    )
    .with("ar", "مجمع أهرامات الجيزة يضم الهرم الأكبر، آخر عجائب الدنيا القديمة.");
    pyramids.location = Some(GeoPoint::new(29.9792, 31.1342));
    pyramids.city_id = Some(giza.id);
    pyramids.popularity = 1.0;
    pyramids.embedding = Some(
        embedder
            .embed("Pyramids of Giza Great Pyramid ancient wonder")
            .unwrap(),
    );
    store.create(&pyramids).await.unwrap();

    let mut museum = EntityDraft::new(
        EntityKind::Attraction,
        "egyptian-museum",
        MultilingualText::of("en", "Egyptian Museum").with("ar", "المتحف المصري"),
    );
    museum.description = MultilingualText::of(
        "en",
        "Museum on Tahrir Square with the world's largest collection of pharaonic antiquities.",
    );
    museum.location = Some(GeoPoint::new(30.0478, 31.2336));
    museum.city_id = Some(giza.id);
    museum.popularity = 0.8;
    museum.embedding = Some(
        embedder
            .embed("Egyptian Museum pharaonic antiquities Tahrir")
            .unwrap(),
    );
    store.create(&museum).await.unwrap();

    let mut koshary = EntityDraft::new(
        EntityKind::Restaurant,
        "koshary-house",
        MultilingualText::of("en", "Koshary House"),
    );
    koshary.city_id = Some(giza.id);
    koshary.popularity = 0.6;
    store.create(&koshary).await.unwrap();
}

pub struct Fixture {
    pub assistant: Assistant,
    pub sink: Arc<CollectorSink>,
    pub primary: Arc<TogglePrimary>,
}

/// Build an assistant over in-memory backends.
///
/// `llm` installs a scripted LLM provider; `tweak` adjusts settings
/// before assembly.
pub async fn fixture(llm: Option<ScriptedLlm>, tweak: impl FnOnce(&mut Settings)) -> Fixture {
    let mut settings = Settings::default();
    tweak(&mut settings);

    let store = MemoryKnowledgeStore::new(&settings.default_language);
    seed_store(&store).await;

    let sink = Arc::new(CollectorSink::new());
    let primary = Arc::new(TogglePrimary::new());

    let mut parts = AssistantParts::in_memory(&settings.default_language);
    parts.session_backend = Arc::clone(&primary) as Arc<dyn SessionBackend>;
    parts.knowledge_store = Arc::new(store);
    parts.analytics_sink = Arc::clone(&sink) as Arc<dyn rihla::orchestrator::AnalyticsSink>;
    if let Some(llm) = llm {
        let timeout = Duration::from_secs(settings.services.llm_timeout_seconds);
        parts.hub.register(Arc::new(llm), ServicePolicy::llm(timeout));
    }

    Fixture {
        assistant: Assistant::from_parts(settings, parts).expect("valid fixture settings"),
        sink,
        primary,
    }
}

/// Wait until the collector has at least `n` events (emission is
/// asynchronous).
pub async fn wait_for_events(sink: &CollectorSink, n: usize) {
    for _ in 0..200 {
        if sink.events().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {n} analytics events, got {}", sink.events().len());
}
