//! Storage seam for knowledge entities.
//!
//! [`KnowledgeStore`] is what the knowledge base, NLU canonicalization
//! and RAG retrieval program against; the Postgres implementation lives
//! in [`super::pg`] and an in-memory one for tests in
//! [`super::memory`].

use super::types::{EntityDraft, EntityKind, KnowledgeEntity};
use crate::database::DatabaseError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Hard bounds on pagination.
pub const MAX_LIMIT: usize = 100;
pub const MAX_OFFSET: usize = 10_000;

/// Ceiling on the ANN quality knob after widening.
pub const MAX_EF_SEARCH: u32 = 400;

/// Errors out of the knowledge layer.
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("invalid entity: {0}")]
    InvalidEntity(String),

    #[error("entity not found: {kind} {id}")]
    NotFound { kind: EntityKind, id: i64 },
}

/// AND-composed search filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub city_id: Option<i64>,
    pub region_id: Option<i64>,
    pub category: Option<String>,
    pub min_rating: Option<f64>,
    pub price_tier: Option<String>,
    /// When true (the default for user-facing search), inactive records
    /// are excluded.
    pub active_only: bool,
}

impl SearchFilters {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Predicate form, used to post-filter ANN results and by the
    /// in-memory store.
    pub fn matches(&self, entity: &KnowledgeEntity) -> bool {
        if self.active_only && !entity.active {
            return false;
        }
        if let Some(city_id) = self.city_id {
            if entity.city_id != Some(city_id) {
                return false;
            }
        }
        if let Some(region_id) = self.region_id {
            if entity.region_id != Some(region_id) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if entity.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(min_rating) = self.min_rating {
            if entity.rating.unwrap_or(0.0) < min_rating {
                return false;
            }
        }
        if let Some(price_tier) = &self.price_tier {
            if entity.price_tier.as_deref() != Some(price_tier.as_str()) {
                return false;
            }
        }
        true
    }

    /// Canonical cache-key parameters for this filter set.
    pub fn cache_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(v) = self.city_id {
            params.push(("city_id", v.to_string()));
        }
        if let Some(v) = self.region_id {
            params.push(("region_id", v.to_string()));
        }
        if let Some(v) = &self.category {
            params.push(("category", v.clone()));
        }
        if let Some(v) = self.min_rating {
            params.push(("min_rating", format!("{v:.2}")));
        }
        if let Some(v) = &self.price_tier {
            params.push(("price_tier", v.clone()));
        }
        params.push(("active_only", self.active_only.to_string()));
        params
    }
}

/// One page of results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub limit: usize,
    pub offset: usize,
}

impl<T> Page<T> {
    pub fn empty(limit: usize, offset: usize) -> Self {
        Self {
            items: Vec::new(),
            limit,
            offset,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// An entity with its vector-similarity score in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredEntity {
    pub entity: KnowledgeEntity,
    pub score: f32,
}

/// An entity with its great-circle distance from the query point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyEntity {
    pub entity: KnowledgeEntity,
    pub distance_km: f64,
}

/// Clamp a requested limit into [1, 100]. Zero is handled by callers
/// before storage is touched.
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_LIMIT)
}

/// Clamp a requested offset into [0, 10_000].
pub fn clamp_offset(offset: usize) -> usize {
    offset.min(MAX_OFFSET)
}

/// Typed access to knowledge entities.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Fixed embedding dimension this store enforces.
    fn embedding_dim(&self) -> usize;

    /// Fetch by id. Not-found is `Ok(None)`.
    async fn get(&self, kind: EntityKind, id: i64) -> Result<Option<KnowledgeEntity>, KnowledgeError>;

    /// Filtered, optionally full-text, paginated search. Underlying
    /// errors degrade to an empty page with a logged warning.
    async fn search(
        &self,
        kind: EntityKind,
        query: Option<&str>,
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
        language: &str,
    ) -> Result<Page<KnowledgeEntity>, KnowledgeError>;

    /// Approximate nearest-neighbour search with post-filtering.
    async fn vector_search(
        &self,
        kind: EntityKind,
        embedding: &[f32],
        filters: &SearchFilters,
        limit: usize,
        ef_search: u32,
    ) -> Result<Vec<ScoredEntity>, KnowledgeError>;

    /// Records within `radius_km` of a point, nearest first, each with
    /// its computed distance.
    async fn nearby(
        &self,
        kind: EntityKind,
        lat: f64,
        lon: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<NearbyEntity>, KnowledgeError>;

    /// Exact multilingual-name lookup used by entity resolution. The
    /// languages are tried in order.
    async fn find_by_name(
        &self,
        kind: EntityKind,
        name: &str,
        languages: &[&str],
    ) -> Result<Option<KnowledgeEntity>, KnowledgeError>;

    async fn create(&self, draft: &EntityDraft) -> Result<KnowledgeEntity, KnowledgeError>;

    async fn update(&self, entity: &KnowledgeEntity) -> Result<(), KnowledgeError>;

    async fn delete(&self, kind: EntityKind, id: i64) -> Result<(), KnowledgeError>;
}
