//! In-memory knowledge store.
//!
//! Implements the same contract as the Postgres store over a plain map:
//! linear scans, brute-force cosine similarity instead of the ANN
//! index, haversine instead of PostGIS. Used by tests and by local
//! development without a database.

use super::store::{
    clamp_limit, clamp_offset, KnowledgeError, KnowledgeStore, NearbyEntity, Page, ScoredEntity,
    SearchFilters,
};
use super::types::{EntityDraft, EntityKind, GeoPoint, KnowledgeEntity};
use async_trait::async_trait;
use chrono::Utc;
use rihla_embedder::cosine_similarity;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

pub struct MemoryKnowledgeStore {
    entities: Mutex<HashMap<(EntityKind, i64), KnowledgeEntity>>,
    next_id: AtomicI64,
    default_language: String,
    embedding_dim: usize,
}

impl MemoryKnowledgeStore {
    pub fn new(default_language: &str) -> Self {
        Self {
            entities: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            default_language: default_language.to_string(),
            embedding_dim: rihla_embedder::EMBEDDING_DIM,
        }
    }

    pub fn len(&self) -> usize {
        self.entities.lock().expect("store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn all_of_kind(&self, kind: EntityKind) -> Vec<KnowledgeEntity> {
        self.entities
            .lock()
            .expect("store mutex poisoned")
            .values()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    fn text_score(entity: &KnowledgeEntity, query: &str, language: &str, default: &str) -> f64 {
        let query = query.to_lowercase();
        let name = entity.display_name(language, default).to_lowercase();
        let description = entity.display_description(language, default).to_lowercase();

        if name == query {
            return 3.0;
        }
        let mut score = 0.0;
        if name.contains(&query) {
            score += 2.0;
        }
        if description.contains(&query) {
            score += 1.0;
        }
        // Token overlap keeps multi-word queries useful.
        for token in query.split_whitespace() {
            if name.contains(token) {
                score += 0.5;
            }
            if description.contains(token) {
                score += 0.2;
            }
        }
        score
    }
}

#[async_trait]
impl KnowledgeStore for MemoryKnowledgeStore {
    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    async fn get(
        &self,
        kind: EntityKind,
        id: i64,
    ) -> Result<Option<KnowledgeEntity>, KnowledgeError> {
        Ok(self
            .entities
            .lock()
            .expect("store mutex poisoned")
            .get(&(kind, id))
            .cloned())
    }

    async fn search(
        &self,
        kind: EntityKind,
        query: Option<&str>,
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
        language: &str,
    ) -> Result<Page<KnowledgeEntity>, KnowledgeError> {
        if limit == 0 {
            return Ok(Page::empty(0, offset));
        }
        let limit = clamp_limit(limit);
        let offset = clamp_offset(offset);

        let mut candidates: Vec<(f64, KnowledgeEntity)> = self
            .all_of_kind(kind)
            .into_iter()
            .filter(|e| filters.matches(e))
            .filter_map(|e| match query.filter(|q| !q.trim().is_empty()) {
                Some(q) => {
                    let score = Self::text_score(&e, q, language, &self.default_language);
                    (score > 0.0).then_some((score, e))
                }
                None => Some((e.popularity, e)),
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.id.cmp(&b.1.id))
        });

        let items: Vec<KnowledgeEntity> = candidates
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, e)| e)
            .collect();

        Ok(Page {
            items,
            limit,
            offset,
        })
    }

    async fn vector_search(
        &self,
        kind: EntityKind,
        embedding: &[f32],
        filters: &SearchFilters,
        limit: usize,
        _ef_search: u32,
    ) -> Result<Vec<ScoredEntity>, KnowledgeError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = clamp_limit(limit);

        let mut scored: Vec<ScoredEntity> = self
            .all_of_kind(kind)
            .into_iter()
            .filter(|e| filters.matches(e))
            .filter_map(|e| {
                let candidate = e.embedding.as_ref()?;
                let score = cosine_similarity(embedding, candidate);
                Some(ScoredEntity { entity: e, score })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn nearby(
        &self,
        kind: EntityKind,
        lat: f64,
        lon: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<NearbyEntity>, KnowledgeError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = clamp_limit(limit);
        let origin = GeoPoint::new(lat, lon);

        let mut found: Vec<NearbyEntity> = self
            .all_of_kind(kind)
            .into_iter()
            .filter_map(|e| {
                let point = e.location?;
                let distance_km = origin.distance_km(&point);
                (distance_km <= radius_km).then_some(NearbyEntity {
                    entity: e,
                    distance_km,
                })
            })
            .collect();

        found.sort_by(|a, b| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        found.truncate(limit);
        Ok(found)
    }

    async fn find_by_name(
        &self,
        kind: EntityKind,
        name: &str,
        languages: &[&str],
    ) -> Result<Option<KnowledgeEntity>, KnowledgeError> {
        let needle = name.to_lowercase();
        let entities = self.all_of_kind(kind);
        for language in languages {
            for entity in &entities {
                if let Some(candidate) = entity.name.0.get(*language) {
                    if candidate.to_lowercase() == needle {
                        return Ok(Some(entity.clone()));
                    }
                }
            }
        }
        Ok(None)
    }

    async fn create(&self, draft: &EntityDraft) -> Result<KnowledgeEntity, KnowledgeError> {
        draft
            .validate(&self.default_language, self.embedding_dim)
            .map_err(KnowledgeError::InvalidEntity)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let entity = KnowledgeEntity {
            id,
            kind: draft.kind,
            slug: draft.slug.clone(),
            name: draft.name.clone(),
            description: draft.description.clone(),
            category: draft.category.clone(),
            rating: draft.rating,
            price_tier: draft.price_tier.clone(),
            active: draft.active,
            popularity: draft.popularity,
            city_id: draft.city_id,
            region_id: draft.region_id,
            location: draft.location,
            embedding: draft.embedding.clone(),
            data: draft.data.clone(),
            created_at: now,
            updated_at: now,
        };

        self.entities
            .lock()
            .expect("store mutex poisoned")
            .insert((draft.kind, id), entity.clone());
        Ok(entity)
    }

    async fn update(&self, entity: &KnowledgeEntity) -> Result<(), KnowledgeError> {
        let mut entities = self.entities.lock().expect("store mutex poisoned");
        match entities.get_mut(&(entity.kind, entity.id)) {
            Some(slot) => {
                let mut updated = entity.clone();
                updated.updated_at = Utc::now();
                *slot = updated;
                Ok(())
            }
            None => Err(KnowledgeError::NotFound {
                kind: entity.kind,
                id: entity.id,
            }),
        }
    }

    async fn delete(&self, kind: EntityKind, id: i64) -> Result<(), KnowledgeError> {
        let removed = self
            .entities
            .lock()
            .expect("store mutex poisoned")
            .remove(&(kind, id));
        match removed {
            Some(_) => Ok(()),
            None => Err(KnowledgeError::NotFound { kind, id }),
        }
    }
}
