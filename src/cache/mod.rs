//! Two-level cache fronting expensive reads.
//!
//! Level 1 is the in-process LRU; level 2 the networked key-value
//! store. Writes go through L1 first, then L2; an L2 hit repopulates
//! L1. Invalidation clears both tiers. L2 round-trips are bounded by a
//! short deadline and every cache failure degrades to a miss — cache
//! errors are never request errors.

pub mod backend;
pub mod facets;
pub mod keys;
pub mod lru;

pub use backend::{CacheBackend, CacheEnvelope, CacheError, MemoryCacheBackend, RedisCacheBackend};
pub use facets::{QueryCache, VectorCache};
pub use keys::{canonical_key, quantize_embedding};
pub use lru::LruCache;

use crate::config::CacheConfig;
use serde_json::Value;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Counters for introspection.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
}

/// The tiered cache.
pub struct TieredCache {
    l1: Mutex<LruCache>,
    l2: Arc<dyn CacheBackend>,
    config: CacheConfig,
    stats: Mutex<CacheStats>,
}

impl TieredCache {
    pub fn new(l2: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self {
            l1: Mutex::new(LruCache::new(config.cache_l1_capacity)),
            l2,
            config,
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Build with an in-memory L2 (tests, single-process deployments).
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()), config)
    }

    fn l2_deadline(&self) -> Duration {
        Duration::from_millis(self.config.l2_deadline_ms)
    }

    /// Look up a value. Any backend trouble reads as a miss.
    pub async fn get(
        &self,
        namespace: &str,
        params: &[(&str, String)],
        shape_version: u32,
    ) -> Option<Value> {
        let key = canonical_key(namespace, params, shape_version);
        self.get_by_key(&key).await
    }

    pub(crate) async fn get_by_key(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.l1.lock().expect("cache mutex poisoned").get(key) {
            self.stats.lock().expect("cache mutex poisoned").l1_hits += 1;
            return Some(value);
        }

        let l2_result =
            tokio::time::timeout(self.l2_deadline(), self.l2.get(key)).await;
        let raw = match l2_result {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(key, error = %e, "cache L2 read failed");
                None
            }
            Err(_) => {
                debug!(key, "cache L2 read missed deadline");
                None
            }
        };

        let Some(raw) = raw else {
            self.stats.lock().expect("cache mutex poisoned").misses += 1;
            return None;
        };

        match CacheEnvelope::decode(&raw) {
            Ok(env) if !env.is_expired() => {
                let remaining = (env.expires_at - chrono::Utc::now())
                    .to_std()
                    .unwrap_or(Duration::from_secs(1));
                self.l1.lock().expect("cache mutex poisoned").put(
                    key.to_string(),
                    env.payload.clone(),
                    Instant::now() + remaining,
                );
                self.stats.lock().expect("cache mutex poisoned").l2_hits += 1;
                Some(env.payload)
            }
            Ok(_) => {
                self.stats.lock().expect("cache mutex poisoned").misses += 1;
                None
            }
            Err(e) => {
                warn!(key, error = %e, "dropping corrupt cache entry");
                self.stats.lock().expect("cache mutex poisoned").misses += 1;
                None
            }
        }
    }

    /// Store a value write-through. Failures are logged and swallowed.
    pub async fn set(
        &self,
        namespace: &str,
        params: &[(&str, String)],
        shape_version: u32,
        value: Value,
        ttl: Duration,
    ) {
        let key = canonical_key(namespace, params, shape_version);
        self.set_by_key(&key, value, ttl).await;
    }

    pub(crate) async fn set_by_key(&self, key: &str, value: Value, ttl: Duration) {
        self.l1.lock().expect("cache mutex poisoned").put(
            key.to_string(),
            value.clone(),
            Instant::now() + ttl,
        );

        let envelope = CacheEnvelope::new(value, ttl);
        let encoded = envelope.encode();
        let write = self.l2.set(key, &encoded, ttl);
        match tokio::time::timeout(self.l2_deadline(), write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(key, error = %e, "cache L2 write failed"),
            Err(_) => debug!(key, "cache L2 write missed deadline"),
        }
    }

    /// Drop every entry in a namespace from both tiers.
    pub async fn invalidate_namespace(&self, namespace: &str) {
        self.invalidate_prefix(&format!("{namespace}:")).await;
    }

    /// Drop every entry whose key starts with `prefix` from both tiers.
    pub async fn invalidate_prefix(&self, prefix: &str) {
        self.l1
            .lock()
            .expect("cache mutex poisoned")
            .remove_prefix(prefix);

        match tokio::time::timeout(
            // Invalidation scans can legitimately outlast one read
            // deadline; give them a fixed, larger budget.
            Duration::from_millis(500),
            self.l2.delete_prefix(prefix),
        )
        .await
        {
            Ok(Ok(n)) => debug!(prefix, removed = n, "cache invalidated"),
            Ok(Err(e)) => warn!(prefix, error = %e, "cache L2 invalidation failed"),
            Err(_) => warn!(prefix, "cache L2 invalidation missed deadline"),
        }
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock().expect("cache mutex poisoned")
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}
