//! Durable conversation state with a networked primary store, an
//! in-process fallback, and a circuit breaker between them.
//!
//! Writes go to the primary and are mirrored into the fallback; reads
//! consult the fallback only while the circuit is open. Each primary
//! call retries twice (100 ms then 500 ms backoff) inside one logical
//! call that tallies once against the breaker. A `get` miss is not an
//! error, and `save` only fails when both tiers are down.

pub mod backend;
pub mod context;
pub mod fallback;

pub use backend::{RedisSessionBackend, SessionBackend, SessionError};
pub use context::{DialogState, SessionContext, SessionId, SlotValue, Turn};
pub use fallback::MemorySessionBackend;

use crate::breaker::{Admission, CircuitBreaker};
use crate::config::SessionConfig;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule between primary retries.
const RETRY_BACKOFF: [Duration; 2] = [Duration::from_millis(100), Duration::from_millis(500)];

/// Result of [`SessionStore::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionValidation {
    pub valid: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub last_accessed: Option<DateTime<Utc>>,
}

impl SessionValidation {
    fn invalid() -> Self {
        Self {
            valid: false,
            created_at: None,
            last_accessed: None,
        }
    }
}

/// Session store fronting the primary and fallback backends.
pub struct SessionStore {
    primary: Arc<dyn SessionBackend>,
    fallback: Arc<MemorySessionBackend>,
    breaker: CircuitBreaker,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(primary: Arc<dyn SessionBackend>, config: SessionConfig) -> Self {
        Self {
            primary,
            fallback: Arc::new(MemorySessionBackend::new()),
            breaker: CircuitBreaker::new("session-primary"),
            config,
        }
    }

    /// Connect the Redis primary described by the config.
    pub async fn connect(config: SessionConfig) -> Result<Self, SessionError> {
        let primary = RedisSessionBackend::connect(&config.primary_store_uri).await?;
        Ok(Self::new(Arc::new(primary), config))
    }

    fn key(id: &SessionId) -> String {
        format!("session:{id}")
    }

    /// Whether primary traffic is currently short-circuiting.
    pub fn is_degraded(&self) -> bool {
        self.breaker.is_open()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Create a session and persist it. `now` is the request-entry
    /// timestamp, reused for every TTL computation in this call.
    pub async fn create(
        &self,
        metadata: Option<serde_json::Value>,
        remember_me: bool,
        now: DateTime<Utc>,
    ) -> Result<SessionContext, SessionError> {
        let ttl = self.config.ttl(remember_me);
        let ttl_chrono = chrono::Duration::from_std(ttl)
            .map_err(|e| SessionError::Backend(format!("ttl out of range: {e}")))?;
        let mut ctx = SessionContext::new(metadata, remember_me, ttl_chrono, now);
        self.save(&mut ctx, now).await?;
        debug!(session_id = %ctx.id, remember_me, "session created");
        Ok(ctx)
    }

    /// Load a session. Expired or undecodable records read as absent.
    pub async fn get(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionContext>, SessionError> {
        let key = Self::key(id);

        let raw = match self.breaker.admit() {
            Admission::ShortCircuit => self.fallback.get(&key).await?,
            Admission::Permit => {
                let primary = Arc::clone(&self.primary);
                let k = key.clone();
                match self
                    .retry(move || {
                        let primary = Arc::clone(&primary);
                        let k = k.clone();
                        Box::pin(async move { primary.get(&k).await })
                    })
                    .await
                {
                    Ok(value) => {
                        self.breaker.record_success();
                        value
                    }
                    Err(e) => {
                        warn!(session_id = %id, error = %e, "primary get failed, using fallback");
                        self.breaker.record_failure();
                        self.fallback.get(&key).await?
                    }
                }
            }
        };

        let Some(raw) = raw else {
            return Ok(None);
        };

        match SessionContext::decode(&raw) {
            Ok(ctx) if ctx.is_expired(now) => Ok(None),
            Ok(ctx) => Ok(Some(ctx)),
            Err(e) => {
                warn!(session_id = %id, error = %e, "dropping corrupt session record");
                Ok(None)
            }
        }
    }

    /// Persist the context. Last-writer-wins; a version regression
    /// relative to the mirrored copy is logged, never rejected.
    pub async fn save(
        &self,
        ctx: &mut SessionContext,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        ctx.touch(now);
        ctx.version += 1;

        let key = Self::key(&ctx.id);
        let ttl = remaining_ttl(ctx.expires_at, now);

        // Conflict detection against the last write this process saw.
        if let Ok(Some(prev_raw)) = self.fallback.get(&key).await {
            if let Ok(prev) = SessionContext::decode(&prev_raw) {
                if prev.version >= ctx.version {
                    warn!(
                        session_id = %ctx.id,
                        prev_version = prev.version,
                        new_version = ctx.version,
                        "conflicting session overwrite"
                    );
                    ctx.version = prev.version + 1;
                }
            }
        }

        let encoded = ctx.encode();

        let primary_ok = match self.breaker.admit() {
            Admission::ShortCircuit => false,
            Admission::Permit => {
                let primary = Arc::clone(&self.primary);
                let k = key.clone();
                let v = encoded.clone();
                match self
                    .retry(move || {
                        let primary = Arc::clone(&primary);
                        let (k, v) = (k.clone(), v.clone());
                        Box::pin(async move { primary.put(&k, &v, ttl).await })
                    })
                    .await
                {
                    Ok(()) => {
                        self.breaker.record_success();
                        true
                    }
                    Err(e) => {
                        warn!(session_id = %ctx.id, error = %e, "primary save failed, using fallback");
                        self.breaker.record_failure();
                        false
                    }
                }
            }
        };

        // Mirror every write; when the primary is down this is the write.
        match self.fallback.put(&key, &encoded, ttl).await {
            Ok(()) => Ok(()),
            Err(e) if primary_ok => {
                warn!(session_id = %ctx.id, error = %e, "fallback mirror failed");
                Ok(())
            }
            Err(_) => Err(SessionError::Unavailable),
        }
    }

    /// Remove a session from both tiers.
    pub async fn delete(&self, id: &SessionId) -> Result<(), SessionError> {
        let key = Self::key(id);

        if let Admission::Permit = self.breaker.admit() {
            let primary = Arc::clone(&self.primary);
            let k = key.clone();
            match self
                .retry(move || {
                    let primary = Arc::clone(&primary);
                    let k = k.clone();
                    Box::pin(async move { primary.delete(&k).await })
                })
                .await
            {
                Ok(()) => self.breaker.record_success(),
                Err(e) => {
                    warn!(session_id = %id, error = %e, "primary delete failed");
                    self.breaker.record_failure();
                }
            }
        }

        self.fallback.delete(&key).await
    }

    /// Report whether a session is live, with its timestamps.
    pub async fn validate(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<SessionValidation, SessionError> {
        Ok(match self.get(id, now).await? {
            Some(ctx) => SessionValidation {
                valid: true,
                created_at: Some(ctx.created_at),
                last_accessed: Some(ctx.last_accessed),
            },
            None => SessionValidation::invalid(),
        })
    }

    /// Extend a session's lifetime. Idempotent with respect to content:
    /// the expiry only ever moves forward. Returns the new expiry, or
    /// `None` when the session is absent.
    pub async fn refresh(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, SessionError> {
        let Some(mut ctx) = self.get(id, now).await? else {
            return Ok(None);
        };

        let ttl = self.config.ttl(ctx.remember_me);
        let ttl_chrono = chrono::Duration::from_std(ttl)
            .map_err(|e| SessionError::Backend(format!("ttl out of range: {e}")))?;
        let candidate = now + ttl_chrono;
        if candidate > ctx.expires_at {
            ctx.expires_at = candidate;
        }

        self.save(&mut ctx, now).await?;
        Ok(Some(ctx.expires_at))
    }

    /// Run one logical primary call: an initial attempt plus up to two
    /// retries with backoff, each bounded by the per-attempt timeout.
    async fn retry<T>(
        &self,
        mut op: impl FnMut() -> BoxFuture<'static, Result<T, SessionError>>,
    ) -> Result<T, SessionError> {
        let mut last = SessionError::Unavailable;
        for attempt in 0..=RETRY_BACKOFF.len() {
            match tokio::time::timeout(self.config.primary_timeout(), op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => last = e,
                Err(_) => last = SessionError::Timeout,
            }
            if attempt < RETRY_BACKOFF.len() {
                tokio::time::sleep(RETRY_BACKOFF[attempt]).await;
            }
        }
        Err(last)
    }
}

fn remaining_ttl(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (expires_at - now).to_std().unwrap_or(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    /// Primary that can be switched dead at runtime.
    struct FlakyBackend {
        inner: MemorySessionBackend,
        dead: AtomicBool,
        calls: AtomicU64,
    }

    impl FlakyBackend {
        fn new() -> Self {
            Self {
                inner: MemorySessionBackend::new(),
                dead: AtomicBool::new(false),
                calls: AtomicU64::new(0),
            }
        }

        fn set_dead(&self, dead: bool) {
            self.dead.store(dead, Ordering::SeqCst);
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }

        fn check(&self) -> Result<(), SessionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.dead.load(Ordering::SeqCst) {
                Err(SessionError::Backend("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl SessionBackend for FlakyBackend {
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

    fn store_with(primary: Arc<FlakyBackend>) -> SessionStore {
        SessionStore::new(primary, SessionConfig::default())
    }

    fn memory_store() -> SessionStore {
        SessionStore::new(Arc::new(MemorySessionBackend::new()), SessionConfig::default())
    }

    #[tokio::test]
    async fn test_create_get_round_trip() {
        let store = memory_store();
        let now = Utc::now();
        let ctx = store
            .create(Some(serde_json::json!({"channel": "web"})), false, now)
            .await
            .unwrap();

        let loaded = store.get(&ctx.id, now).await.unwrap().unwrap();
        assert_eq!(loaded.id, ctx.id);
        assert_eq!(loaded.metadata["channel"], "web");
        assert_eq!(loaded.version, ctx.version);
    }

    #[tokio::test]
    async fn test_get_missing_is_none_not_error() {
        let store = memory_store();
        let got = store
            .get(&SessionId::from("nope"), Utc::now())
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_create_get_delete_get() {
        let store = memory_store();
        let now = Utc::now();
        let ctx = store.create(None, false, now).await.unwrap();
        assert!(store.get(&ctx.id, now).await.unwrap().is_some());
        store.delete(&ctx.id).await.unwrap();
        assert!(store.get(&ctx.id, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_bumps_version_and_touches() {
        let store = memory_store();
        let now = Utc::now();
        let mut ctx = store.create(None, false, now).await.unwrap();
        let v1 = ctx.version;
        let later = now + chrono::Duration::seconds(10);
        store.save(&mut ctx, later).await.unwrap();
        assert!(ctx.version > v1);
        assert_eq!(ctx.last_accessed, later);
    }

    #[tokio::test]
    async fn test_remember_me_extends_expiry() {
        let store = memory_store();
        let now = Utc::now();
        let short = store.create(None, false, now).await.unwrap();
        let long = store.create(None, true, now).await.unwrap();
        assert!(long.expires_at > short.expires_at);
    }

    #[tokio::test]
    async fn test_validate_reports_timestamps() {
        let store = memory_store();
        let now = Utc::now();
        let ctx = store.create(None, false, now).await.unwrap();

        let v = store.validate(&ctx.id, now).await.unwrap();
        assert!(v.valid);
        assert_eq!(v.created_at, Some(ctx.created_at));

        let missing = store.validate(&SessionId::from("x"), now).await.unwrap();
        assert!(!missing.valid);
        assert!(missing.created_at.is_none());
    }

    #[tokio::test]
    async fn test_refresh_moves_expiry_forward_only() {
        let store = memory_store();
        let now = Utc::now();
        let ctx = store.create(None, false, now).await.unwrap();

        let later = now + chrono::Duration::hours(1);
        let e1 = store.refresh(&ctx.id, later).await.unwrap().unwrap();
        assert!(e1 > ctx.expires_at);

        // Refreshing again at the same instant does not move it back.
        let e2 = store.refresh(&ctx.id, later).await.unwrap().unwrap();
        assert_eq!(e1, e2);
    }

    #[tokio::test]
    async fn test_refresh_missing_session() {
        let store = memory_store();
        let got = store
            .refresh(&SessionId::from("gone"), Utc::now())
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_primary_outage_falls_back_and_opens_breaker() {
        let primary = Arc::new(FlakyBackend::new());
        let store = store_with(Arc::clone(&primary));
        let now = Utc::now();

        let mut ctx = store.create(None, false, now).await.unwrap();
        primary.set_dead(true);

        // Three failing logical saves trip the breaker; every save still
        // succeeds against the fallback.
        for _ in 0..3 {
            store.save(&mut ctx, now).await.unwrap();
        }
        assert!(store.is_degraded());

        // While open, reads come from the fallback without touching the
        // primary at all.
        let calls_before = primary.calls();
        let loaded = store.get(&ctx.id, now).await.unwrap().unwrap();
        assert_eq!(loaded.id, ctx.id);
        assert_eq!(primary.calls(), calls_before);
    }

    #[tokio::test]
    async fn test_retries_do_not_multiply_breaker_tallies() {
        let primary = Arc::new(FlakyBackend::new());
        let store = store_with(Arc::clone(&primary));
        let now = Utc::now();
        primary.set_dead(true);

        // Two failing logical calls = two tallies; each ran 3 attempts.
        let mut ctx = SessionContext::new(None, false, chrono::Duration::hours(1), now);
        store.save(&mut ctx, now).await.unwrap();
        store.save(&mut ctx, now).await.unwrap();
        assert!(!store.is_degraded());
        assert_eq!(store.breaker().total_failures(), 2);
        assert_eq!(primary.calls(), 6);
    }

    #[tokio::test]
    async fn test_conflicting_overwrite_keeps_version_monotonic() {
        let store = memory_store();
        let now = Utc::now();
        let created = store.create(None, false, now).await.unwrap();

        // Two copies of the same turn racing; the second writer's stale
        // version gets bumped past the stored one instead of regressing.
        let mut a = created.clone();
        let mut b = created.clone();
        store.save(&mut a, now).await.unwrap();
        store.save(&mut b, now).await.unwrap();
        assert!(b.version > a.version);
    }
}
