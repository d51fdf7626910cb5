//! Session storage backends.
//!
//! The primary backend is a networked key-value store with per-key TTL;
//! the in-process fallback implements the same trait (see
//! [`super::fallback`]). The store layers retries and the circuit
//! breaker on top, so backends stay dumb: one attempt per call.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::debug;

/// Errors from a single backend operation.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session backend error: {0}")]
    Backend(String),

    #[error("session backend timed out")]
    Timeout,

    #[error("corrupt session record: {0}")]
    Corrupt(String),

    #[error("session store unavailable")]
    Unavailable,
}

impl From<redis::RedisError> for SessionError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() {
            SessionError::Timeout
        } else {
            SessionError::Backend(e.to_string())
        }
    }
}

/// Key-value operations a session backend must provide.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Store `value` under `key` with the given time-to-live.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SessionError>;

    /// Fetch the value under `key`, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<String>, SessionError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), SessionError>;

    /// Reset the TTL of an existing key. Returns false when the key is
    /// absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, SessionError>;
}

/// Redis-backed primary session store.
#[derive(Clone)]
pub struct RedisSessionBackend {
    conn: ConnectionManager,
}

impl RedisSessionBackend {
    /// Connect to the primary store. The connection manager reconnects
    /// transparently; individual command failures still surface so the
    /// breaker can tally them.
    pub async fn connect(uri: &str) -> Result<Self, SessionError> {
        let client = redis::Client::open(uri)
            .map_err(|e| SessionError::Backend(format!("invalid store uri: {e}")))?;
        let conn = ConnectionManager::new(client).await?;
        debug!("connected to primary session store");
        Ok(Self { conn })
    }
}

#[async_trait]
impl SessionBackend for RedisSessionBackend {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, SessionError> {
        let mut conn = self.conn.clone();
        let applied: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }
}
