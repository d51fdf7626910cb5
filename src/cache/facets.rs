//! Typed cache facets layered on the tiered cache.
//!
//! The query facet caches record lookups and search pages keyed by
//! (filters, limit, offset, language). The vector facet caches ANN
//! results keyed by the quantized embedding and invalidates per table
//! on any write to that table.

use super::keys::quantize_embedding;
use super::TieredCache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Bumped when the cached representation of query results changes.
const QUERY_SHAPE_VERSION: u32 = 1;

/// Bumped when the cached representation of vector results changes.
const VECTOR_SHAPE_VERSION: u32 = 1;

/// Cache facet for record lookups and search result pages.
pub struct QueryCache {
    cache: Arc<TieredCache>,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(cache: Arc<TieredCache>) -> Self {
        let ttl = Duration::from_secs(cache.config().cache_l2_ttl_seconds);
        Self { cache, ttl }
    }

    fn namespace(table: &str) -> String {
        format!("query:{table}")
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        params: &[(&str, String)],
    ) -> Option<T> {
        let value = self
            .cache
            .get(&Self::namespace(table), params, QUERY_SHAPE_VERSION)
            .await?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(table, error = %e, "cached query result failed to decode");
                None
            }
        }
    }

    pub async fn put<T: Serialize>(&self, table: &str, params: &[(&str, String)], value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => {
                self.cache
                    .set(&Self::namespace(table), params, QUERY_SHAPE_VERSION, json, self.ttl)
                    .await;
            }
            Err(e) => warn!(table, error = %e, "query result not cacheable"),
        }
    }

    /// Drop all cached pages for a table; called on any write to it.
    pub async fn invalidate_table(&self, table: &str) {
        self.cache.invalidate_namespace(&Self::namespace(table)).await;
    }
}

/// Cache facet for vector search results.
pub struct VectorCache {
    cache: Arc<TieredCache>,
    ttl: Duration,
}

impl VectorCache {
    pub fn new(cache: Arc<TieredCache>) -> Self {
        let ttl = Duration::from_secs(cache.config().vector_ttl_seconds);
        Self { cache, ttl }
    }

    fn namespace(table: &str) -> String {
        format!("vector:{table}")
    }

    /// Embedding-keyed parameters: the vector is quantized to 6
    /// significant digits per component before hashing.
    fn params<'a>(
        embedding: &[f32],
        extra: &'a [(&'a str, String)],
    ) -> Vec<(&'a str, String)> {
        let mut params: Vec<(&str, String)> = vec![("embedding", quantize_embedding(embedding))];
        params.extend(extra.iter().map(|(k, v)| (*k, v.clone())));
        params
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        embedding: &[f32],
        extra: &[(&str, String)],
    ) -> Option<T> {
        let params = Self::params(embedding, extra);
        let value = self
            .cache
            .get(&Self::namespace(table), &params, VECTOR_SHAPE_VERSION)
            .await?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(table, error = %e, "cached vector result failed to decode");
                None
            }
        }
    }

    pub async fn put<T: Serialize>(
        &self,
        table: &str,
        embedding: &[f32],
        extra: &[(&str, String)],
        value: &T,
    ) {
        let params = Self::params(embedding, extra);
        match serde_json::to_value(value) {
            Ok(json) => {
                self.cache
                    .set(&Self::namespace(table), &params, VECTOR_SHAPE_VERSION, json, self.ttl)
                    .await;
            }
            Err(e) => warn!(table, error = %e, "vector result not cacheable"),
        }
    }

    /// Drop all cached vector results for a table.
    pub async fn invalidate_table(&self, table: &str) {
        self.cache.invalidate_namespace(&Self::namespace(table)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    fn tiered() -> Arc<TieredCache> {
        Arc::new(TieredCache::in_memory(CacheConfig::default()))
    }

    #[tokio::test]
    async fn test_query_facet_round_trip() {
        let qc = QueryCache::new(tiered());
        let page = vec!["giza".to_string(), "luxor".to_string()];
        let params = vec![("q", "temples".to_string()), ("lang", "en".to_string())];

        qc.put("attractions", &params, &page).await;
        let got: Vec<String> = qc.get("attractions", &params).await.unwrap();
        assert_eq!(got, page);
    }

    #[tokio::test]
    async fn test_query_facet_table_invalidation() {
        let qc = QueryCache::new(tiered());
        let params = vec![("q", "x".to_string())];
        qc.put("attractions", &params, &1u32).await;
        qc.put("events", &params, &2u32).await;

        qc.invalidate_table("attractions").await;
        assert!(qc.get::<u32>("attractions", &params).await.is_none());
        assert_eq!(qc.get::<u32>("events", &params).await, Some(2));
    }

    #[tokio::test]
    async fn test_vector_facet_quantized_identity() {
        let vc = VectorCache::new(tiered());
        let a = vec![0.123_456_7f32; 8];
        let b = vec![0.123_456_74f32; 8];

        vc.put("attractions", &a, &[("limit", "5".into())], &vec![1i64, 2])
            .await;
        // A vector differing only past the 6th significant digit hits
        // the same entry.
        let got: Vec<i64> = vc
            .get("attractions", &b, &[("limit", "5".into())])
            .await
            .unwrap();
        assert_eq!(got, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_vector_facet_per_table_invalidation() {
        let vc = VectorCache::new(tiered());
        let emb = vec![0.5f32; 4];
        vc.put("attractions", &emb, &[], &vec![1i64]).await;
        vc.put("restaurants", &emb, &[], &vec![2i64]).await;

        vc.invalidate_table("attractions").await;
        assert!(vc.get::<Vec<i64>>("attractions", &emb, &[]).await.is_none());
        assert!(vc.get::<Vec<i64>>("restaurants", &emb, &[]).await.is_some());
    }
}
