//! Knowledge base facade: structured lookup and entity resolution.
//!
//! Resolution goes exact-first (multilingual name match in the current
//! language, then the default), then falls back to a text search whose
//! candidates are re-scored with Jaro-Winkler; only a candidate scoring
//! at least 0.85 resolves.

use super::store::{KnowledgeError, KnowledgeStore, SearchFilters};
use super::types::{EntityKind, KnowledgeEntity};
use std::sync::Arc;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

/// Minimum fuzzy score that still resolves an entity.
pub const RESOLVE_THRESHOLD: f64 = 0.85;

/// Candidate pool size for the fuzzy stage.
const FUZZY_CANDIDATES: usize = 10;

pub struct KnowledgeBase {
    store: Arc<dyn KnowledgeStore>,
    default_language: String,
}

impl KnowledgeBase {
    pub fn new(store: Arc<dyn KnowledgeStore>, default_language: &str) -> Self {
        Self {
            store,
            default_language: default_language.to_string(),
        }
    }

    pub fn store(&self) -> &Arc<dyn KnowledgeStore> {
        &self.store
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Structured lookup: filtered records of one kind, most popular
    /// first.
    pub async fn lookup(
        &self,
        kind: EntityKind,
        filters: &SearchFilters,
    ) -> Result<Vec<KnowledgeEntity>, KnowledgeError> {
        let page = self
            .store
            .search(kind, None, filters, 100, 0, &self.default_language)
            .await?;
        Ok(page.items)
    }

    pub async fn get(
        &self,
        kind: EntityKind,
        id: i64,
    ) -> Result<Option<KnowledgeEntity>, KnowledgeError> {
        self.store.get(kind, id).await
    }

    /// Resolve a surface form to a knowledge record.
    pub async fn resolve_entity(
        &self,
        surface: &str,
        kind: EntityKind,
        language: &str,
    ) -> Result<Option<KnowledgeEntity>, KnowledgeError> {
        let surface = surface.trim();
        if surface.is_empty() {
            return Ok(None);
        }

        let languages: Vec<&str> = if language == self.default_language {
            vec![language]
        } else {
            vec![language, self.default_language.as_str()]
        };

        if let Some(exact) = self.store.find_by_name(kind, surface, &languages).await? {
            debug!(surface, kind = %kind, id = exact.id, "entity resolved exactly");
            return Ok(Some(exact));
        }

        // Fuzzy stage: text-search candidates, re-scored with
        // Jaro-Winkler over folded names.
        let page = self
            .store
            .search(
                kind,
                Some(surface),
                &SearchFilters::none(),
                FUZZY_CANDIDATES,
                0,
                language,
            )
            .await?;
        let folded_surface = fold(surface);

        let mut best: Option<(f64, KnowledgeEntity)> = None;
        for candidate in page.items {
            let score = languages
                .iter()
                .filter_map(|lang| candidate.name.0.get(*lang))
                .map(|name| strsim::jaro_winkler(&folded_surface, &fold(name)))
                .fold(0.0f64, f64::max);
            if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, candidate));
            }
        }

        match best {
            Some((score, entity)) if score >= RESOLVE_THRESHOLD => {
                debug!(surface, kind = %kind, id = entity.id, score, "entity resolved fuzzily");
                Ok(Some(entity))
            }
            Some((score, _)) => {
                debug!(surface, kind = %kind, score, "best candidate below threshold");
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

/// NFKC-fold and lowercase for matching.
fn fold(s: &str) -> String {
    s.nfkc().collect::<String>().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::memory::MemoryKnowledgeStore;
    use crate::knowledge::types::{EntityDraft, MultilingualText};

    async fn kb() -> KnowledgeBase {
        let store = MemoryKnowledgeStore::new("en");
        store
            .create(&EntityDraft::new(
                EntityKind::Destination,
                "giza",
                MultilingualText::of("en", "Giza").with("ar", "الجيزة"),
            ))
            .await
            .unwrap();
        store
            .create(&EntityDraft::new(
                EntityKind::Attraction,
                "giza-pyramids",
                MultilingualText::of("en", "Pyramids of Giza").with("ar", "أهرامات الجيزة"),
            ))
            .await
            .unwrap();
        store
            .create(&EntityDraft::new(
                EntityKind::Attraction,
                "egyptian-museum",
                MultilingualText::of("en", "Egyptian Museum"),
            ))
            .await
            .unwrap();
        KnowledgeBase::new(Arc::new(store), "en")
    }

    #[tokio::test]
    async fn test_exact_resolution_current_language() {
        let kb = kb().await;
        let hit = kb
            .resolve_entity("أهرامات الجيزة", EntityKind::Attraction, "ar")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.slug, "giza-pyramids");
    }

    #[tokio::test]
    async fn test_exact_resolution_falls_back_to_default_language() {
        let kb = kb().await;
        // Arabic session, English surface form: default-language pass
        // still resolves.
        let hit = kb
            .resolve_entity("Pyramids of Giza", EntityKind::Attraction, "ar")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.slug, "giza-pyramids");
    }

    #[tokio::test]
    async fn test_fuzzy_resolution_above_threshold() {
        let kb = kb().await;
        let hit = kb
            .resolve_entity("Piramids of Giza", EntityKind::Attraction, "en")
            .await
            .unwrap();
        assert_eq!(hit.unwrap().slug, "giza-pyramids");
    }

    #[tokio::test]
    async fn test_unrelated_surface_does_not_resolve() {
        let kb = kb().await;
        let hit = kb
            .resolve_entity("weather in Tokyo", EntityKind::Attraction, "en")
            .await
            .unwrap();
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn test_empty_surface_is_none() {
        let kb = kb().await;
        assert!(kb
            .resolve_entity("   ", EntityKind::Attraction, "en")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_lookup_is_filtered() {
        let kb = kb().await;
        let all = kb
            .lookup(EntityKind::Attraction, &SearchFilters::none())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }
}
