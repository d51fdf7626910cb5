//! Bounded in-process cache tier with LRU eviction.
//!
//! Not internally synchronized; [`super::TieredCache`] holds it behind
//! a mutex. Recency is tracked with a generation queue: every touch
//! appends (key, generation) and stale queue entries are skipped during
//! eviction, which keeps `get` O(1) amortized without a linked list.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;

struct Slot {
    value: Value,
    expires_at: Instant,
    generation: u64,
    hits: u64,
}

/// Bounded LRU map with per-entry expiry.
pub struct LruCache {
    capacity: usize,
    map: HashMap<String, Slot>,
    order: VecDeque<(String, u64)>,
    clock: u64,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be positive");
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity * 2),
            clock: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        // The recency queue accumulates one entry per touch; rebuild it
        // from live generations before it dwarfs the map.
        if self.order.len() > self.capacity.saturating_mul(8).max(64) {
            let live: std::collections::HashMap<&String, u64> = self
                .map
                .iter()
                .map(|(k, slot)| (k, slot.generation))
                .collect();
            let compacted: Vec<(String, u64)> = self
                .order
                .drain(..)
                .filter(|(key, generation)| live.get(key) == Some(generation))
                .collect();
            self.order.extend(compacted);
        }
        self.clock
    }

    /// Look up a live entry, refreshing its recency.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let generation = self.tick();
        match self.map.get_mut(key) {
            Some(slot) if slot.expires_at > now => {
                slot.generation = generation;
                slot.hits += 1;
                self.order.push_back((key.to_string(), generation));
                Some(slot.value.clone())
            }
            Some(_) => {
                self.map.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert or replace an entry, evicting the least recently used
    /// entries when over capacity.
    pub fn put(&mut self, key: String, value: Value, expires_at: Instant) {
        let generation = self.tick();
        self.order.push_back((key.clone(), generation));
        self.map.insert(
            key,
            Slot {
                value,
                expires_at,
                generation,
                hits: 0,
            },
        );
        self.evict_over_capacity();
    }

    pub fn remove(&mut self, key: &str) {
        self.map.remove(key);
    }

    /// Drop every entry whose key starts with `prefix`; returns the
    /// number removed.
    pub fn remove_prefix(&mut self, prefix: &str) -> usize {
        let before = self.map.len();
        self.map.retain(|k, _| !k.starts_with(prefix));
        before - self.map.len()
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    /// Hit count of an entry, if present. Used by introspection.
    pub fn hits(&self, key: &str) -> Option<u64> {
        self.map.get(key).map(|s| s.hits)
    }

    fn evict_over_capacity(&mut self) {
        while self.map.len() > self.capacity {
            let Some((key, generation)) = self.order.pop_front() else {
                break;
            };
            // Skip queue entries superseded by a later touch.
            let current = self.map.get(&key).map(|s| s.generation);
            if current == Some(generation) {
                self.map.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(600)
    }

    #[test]
    fn test_put_get() {
        let mut lru = LruCache::new(4);
        lru.put("a".into(), Value::from(1), far());
        assert_eq!(lru.get("a"), Some(Value::from(1)));
        assert_eq!(lru.get("b"), None);
    }

    #[test]
    fn test_expired_entry_is_miss() {
        let mut lru = LruCache::new(4);
        lru.put("a".into(), Value::from(1), Instant::now() - Duration::from_secs(1));
        assert_eq!(lru.get("a"), None);
        assert!(lru.is_empty());
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let mut lru = LruCache::new(2);
        lru.put("a".into(), Value::from(1), far());
        lru.put("b".into(), Value::from(2), far());

        // Touch "a" so "b" becomes the eviction candidate.
        assert!(lru.get("a").is_some());
        lru.put("c".into(), Value::from(3), far());

        assert!(lru.get("a").is_some());
        assert!(lru.get("b").is_none());
        assert!(lru.get("c").is_some());
    }

    #[test]
    fn test_reinsert_refreshes_recency() {
        let mut lru = LruCache::new(2);
        lru.put("a".into(), Value::from(1), far());
        lru.put("b".into(), Value::from(2), far());
        lru.put("a".into(), Value::from(10), far());
        lru.put("c".into(), Value::from(3), far());

        assert_eq!(lru.get("a"), Some(Value::from(10)));
        assert!(lru.get("b").is_none());
    }

    #[test]
    fn test_remove_prefix() {
        let mut lru = LruCache::new(8);
        lru.put("query:attractions:1".into(), Value::from(1), far());
        lru.put("query:attractions:2".into(), Value::from(2), far());
        lru.put("query:events:1".into(), Value::from(3), far());

        assert_eq!(lru.remove_prefix("query:attractions:"), 2);
        assert!(lru.get("query:attractions:1").is_none());
        assert!(lru.get("query:events:1").is_some());
    }

    #[test]
    fn test_hits_counter() {
        let mut lru = LruCache::new(2);
        lru.put("a".into(), Value::from(1), far());
        lru.get("a");
        lru.get("a");
        assert_eq!(lru.hits("a"), Some(2));
    }

    #[test]
    fn test_capacity_respected_under_churn() {
        let mut lru = LruCache::new(16);
        for i in 0..200 {
            lru.put(format!("k{i}"), Value::from(i), far());
        }
        assert!(lru.len() <= 16);
        // The most recent insert always survives.
        assert!(lru.get("k199").is_some());
    }
}
