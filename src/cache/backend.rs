//! Level-2 cache backends.
//!
//! The networked tier stores length-prefixed JSON envelopes carrying
//! their own expiry timestamp and hit counter alongside the store's
//! TTL, so an entry read after its embedded expiry is treated as absent
//! even if the store has not reaped it yet.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Errors from a single L2 operation. Never surfaced past the cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache entry corrupt: {0}")]
    Corrupt(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Backend(e.to_string())
    }
}

/// Stored cache envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope {
    pub payload: Value,
    pub expires_at: DateTime<Utc>,
    pub hits: u64,
}

impl CacheEnvelope {
    pub fn new(payload: Value, ttl: Duration) -> Self {
        Self {
            payload,
            expires_at: Utc::now()
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1)),
            hits: 0,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Wire format: `<len>:<json>`.
    pub fn encode(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "null".into());
        format!("{}:{}", json.len(), json)
    }

    pub fn decode(raw: &str) -> Result<Self, CacheError> {
        let (len_part, json) = raw
            .split_once(':')
            .ok_or_else(|| CacheError::Corrupt("missing length prefix".into()))?;
        let declared: usize = len_part
            .parse()
            .map_err(|_| CacheError::Corrupt("bad length prefix".into()))?;
        if declared != json.len() {
            return Err(CacheError::Corrupt(format!(
                "length mismatch: declared {declared}, got {}",
                json.len()
            )));
        }
        serde_json::from_str(json).map_err(|e| CacheError::Corrupt(e.to_string()))
    }
}

/// Operations the networked tier must provide.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, raw: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every key starting with `prefix`; returns how many.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
}

/// Redis-backed L2.
#[derive(Clone)]
pub struct RedisCacheBackend {
    conn: ConnectionManager,
}

impl RedisCacheBackend {
    pub async fn connect(uri: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(uri)
            .map_err(|e| CacheError::Backend(format!("invalid cache uri: {e}")))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, raw: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(raw)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut removed = 0u64;
        let mut cursor = 0u64;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let mut del = redis::cmd("DEL");
                for key in &keys {
                    del.arg(key);
                }
                let n: u64 = del.query_async(&mut conn).await?;
                removed += n;
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(removed)
    }
}

/// In-memory L2 used in tests and single-process deployments.
#[derive(Default)]
pub struct MemoryCacheBackend {
    entries: Mutex<HashMap<String, (String, std::time::Instant)>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = std::time::Instant::now();
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .values()
            .filter(|(_, exp)| *exp > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        match entries.get(key) {
            Some((value, exp)) if *exp > std::time::Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, raw: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.insert(
            key.to_string(),
            (raw.to_string(), std::time::Instant::now() + ttl),
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }
}
