//! In-process session backend with the same TTL semantics as the
//! primary store.
//!
//! Serves two roles: the fallback tier behind the circuit breaker in
//! production, and the primary in tests. Entries past expiry are
//! indistinguishable from absent ones; a sweep drops them lazily on
//! access and wholesale via [`MemorySessionBackend::purge_expired`].

use super::backend::{SessionBackend, SessionError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Concurrent map with per-entry expiry.
#[derive(Default)]
pub struct MemorySessionBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemorySessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().expect("fallback mutex poisoned");
        entries.values().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("fallback mutex poisoned");
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }
}

#[async_trait]
impl SessionBackend for MemorySessionBackend {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SessionError> {
        let mut entries = self.entries.lock().expect("fallback mutex poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        let mut entries = self.entries.lock().expect("fallback mutex poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), SessionError> {
        let mut entries = self.entries.lock().expect("fallback mutex poisoned");
        entries.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, SessionError> {
        let mut entries = self.entries.lock().expect("fallback mutex poisoned");
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                entry.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let store = MemorySessionBackend::new();
        store
            .put("session:a", "payload", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.get("session:a").await.unwrap().as_deref(),
            Some("payload")
        );
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_absent() {
        let store = MemorySessionBackend::new();
        store
            .put("session:a", "payload", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get("session:a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_absent_is_ok() {
        let store = MemorySessionBackend::new();
        store.delete("session:missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_expire_extends_lifetime() {
        let store = MemorySessionBackend::new();
        store
            .put("session:a", "payload", Duration::from_millis(30))
            .await
            .unwrap();
        assert!(store
            .expire("session:a", Duration::from_secs(60))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get("session:a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expire_missing_returns_false() {
        let store = MemorySessionBackend::new();
        assert!(!store
            .expire("session:gone", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemorySessionBackend::new();
        store
            .put("session:old", "x", Duration::from_millis(1))
            .await
            .unwrap();
        store
            .put("session:new", "y", Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }
}
