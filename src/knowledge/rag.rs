//! Retrieval-augmented answering.
//!
//! Embed the question, vector-search the relevant entity kinds, re-rank
//! by similarity blended with popularity/recency, assemble a bounded
//! prompt with the recent conversation, and hand it to the LLM service.
//! Every stage has a fallback: a dead vector index degrades to text
//! search, a slow LLM degrades to the best candidate's prewritten
//! description, and an empty candidate set reports no-information.

use super::store::{KnowledgeStore, ScoredEntity, SearchFilters};
use super::types::{EntityKind, KnowledgeEntity};
use crate::context::RequestContext;
use crate::error::CoreError;
use crate::nlu::registry::InferenceWorkers;
use crate::services::ServiceHub;
use crate::session::SessionContext;
use chrono::Utc;
use rihla_embedder::Embedder;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Candidates carried into synthesis.
const TOP_K: usize = 8;

/// Byte budget for evidence snippets in the prompt.
const SNIPPET_BUDGET: usize = 4_096;

/// Conversation turns included in the prompt.
const HISTORY_TURNS: usize = 4;

/// Blend weights: similarity vs popularity/recency.
const W_VECTOR: f32 = 0.8;
const W_AUX: f32 = 0.2;

/// Entity kinds consulted for open questions.
const ANSWER_KINDS: [EntityKind; 5] = [
    EntityKind::Attraction,
    EntityKind::Destination,
    EntityKind::Faq,
    EntityKind::PracticalInfo,
    EntityKind::Event,
];

/// Outcome of one answering attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RagOutcome {
    Answer { text: String, sources: Vec<i64> },
    NoInformation,
}

pub struct RagPipeline {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
    workers: Arc<InferenceWorkers>,
    hub: Arc<ServiceHub>,
    default_language: String,
    ef_search: u32,
}

impl RagPipeline {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn Embedder>,
        workers: Arc<InferenceWorkers>,
        hub: Arc<ServiceHub>,
        default_language: &str,
        ef_search: u32,
    ) -> Self {
        Self {
            store,
            embedder,
            workers,
            hub,
            default_language: default_language.to_string(),
            ef_search,
        }
    }

    /// Answer a free-form question in the context of a session.
    pub async fn answer(
        &self,
        query: &str,
        language: &str,
        session: &SessionContext,
        ctx: &RequestContext,
    ) -> Result<RagOutcome, CoreError> {
        ctx.check()?;
        let query = query.trim();
        if query.is_empty() {
            return Ok(RagOutcome::NoInformation);
        }

        let candidates = self.retrieve(query, language, ctx).await?;
        if candidates.is_empty() {
            return Ok(RagOutcome::NoInformation);
        }

        let ranked = rerank(candidates);
        let sources: Vec<i64> = ranked.iter().map(|c| c.entity.id).collect();
        let prompt = self.build_prompt(query, language, session, &ranked);

        let params = json!({
            "system": format!(
                "You are a knowledgeable tourism assistant. Answer in the language \
                 tagged '{language}', using only the provided context. Be concise."
            ),
            "prompt": prompt,
        });

        match self.hub.execute("llm", "complete", &params, ctx).await {
            Ok(value) => {
                let text = value
                    .get("text")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                if text.is_empty() {
                    warn!("synthesis returned empty text, using top candidate");
                    Ok(self.describe_top(&ranked, language))
                } else {
                    Ok(RagOutcome::Answer { text, sources })
                }
            }
            Err(e) if e.is_cut_short() => Err(e),
            Err(e) => {
                warn!(error = %e, "synthesis unavailable, using top candidate");
                Ok(self.describe_top(&ranked, language))
            }
        }
    }

    /// Vector retrieval across the answerable kinds, with a text-search
    /// fallback when the index yields nothing.
    async fn retrieve(
        &self,
        query: &str,
        language: &str,
        ctx: &RequestContext,
    ) -> Result<Vec<ScoredEntity>, CoreError> {
        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        let embedding = self
            .workers
            .run(ctx, move || embedder.embed(&text))
            .await?
            .map_err(|e| CoreError::Internal(format!("query embedding failed: {e}")))?;

        let mut merged: Vec<ScoredEntity> = Vec::new();
        for kind in ANSWER_KINDS {
            ctx.check()?;
            match self
                .store
                .vector_search(kind, &embedding, &SearchFilters::none(), TOP_K, self.ef_search)
                .await
            {
                Ok(mut hits) => merged.append(&mut hits),
                Err(e) => {
                    warn!(kind = %kind, error = %e, "vector retrieval failed");
                }
            }
        }

        if merged.is_empty() {
            debug!("vector retrieval empty, falling back to text search");
            for kind in ANSWER_KINDS {
                ctx.check()?;
                match self
                    .store
                    .search(kind, Some(query), &SearchFilters::none(), TOP_K, 0, language)
                    .await
                {
                    Ok(page) => merged.extend(page.items.into_iter().map(|entity| ScoredEntity {
                        entity,
                        score: 0.5,
                    })),
                    Err(e) => warn!(kind = %kind, error = %e, "text fallback failed"),
                }
            }
        }

        Ok(merged)
    }

    fn build_prompt(
        &self,
        query: &str,
        language: &str,
        session: &SessionContext,
        ranked: &[ScoredEntity],
    ) -> String {
        let mut prompt = String::new();

        prompt.push_str("Context:\n");
        let mut used = 0usize;
        for (i, candidate) in ranked.iter().enumerate() {
            let entity = &candidate.entity;
            let snippet = format!(
                "[{}] {}: {}\n",
                i + 1,
                entity.display_name(language, &self.default_language),
                entity.display_description(language, &self.default_language),
            );
            if used + snippet.len() > SNIPPET_BUDGET {
                break;
            }
            used += snippet.len();
            prompt.push_str(&snippet);
        }

        let recent = session.recent_turns(HISTORY_TURNS);
        if !recent.is_empty() {
            prompt.push_str("\nConversation so far:\n");
            for turn in recent {
                prompt.push_str(&format!("User: {}\n", turn.user_text));
                prompt.push_str(&format!("Assistant: {}\n", turn.reply));
            }
        }

        prompt.push_str(&format!("\nQuestion: {query}\n"));
        prompt
    }

    fn describe_top(&self, ranked: &[ScoredEntity], language: &str) -> RagOutcome {
        match ranked.first() {
            Some(top) => {
                let description = top
                    .entity
                    .display_description(language, &self.default_language);
                let text = if description.is_empty() {
                    top.entity
                        .display_name(language, &self.default_language)
                        .to_string()
                } else {
                    description.to_string()
                };
                RagOutcome::Answer {
                    text,
                    sources: vec![top.entity.id],
                }
            }
            None => RagOutcome::NoInformation,
        }
    }
}

/// Blend vector similarity with popularity and recency, keep the top
/// candidates.
fn rerank(mut candidates: Vec<ScoredEntity>) -> Vec<ScoredEntity> {
    let now = Utc::now();
    let blended = |entity: &KnowledgeEntity, score: f32| -> f32 {
        let age_days = (now - entity.updated_at).num_days().max(0) as f32;
        let recency = (-age_days / 180.0).exp();
        let aux = 0.5 * entity.popularity as f32 + 0.5 * recency;
        W_VECTOR * score + W_AUX * aux
    };

    candidates.sort_by(|a, b| {
        blended(&b.entity, b.score)
            .partial_cmp(&blended(&a.entity, a.score))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(TOP_K);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NluConfig;
    use crate::knowledge::memory::MemoryKnowledgeStore;
    use crate::knowledge::types::{EntityDraft, MultilingualText};
    use crate::services::provider::{ServiceError, ServiceProvider};
    use crate::services::ServicePolicy;
    use async_trait::async_trait;
    use rihla_embedder::HashEmbedder;
    use serde_json::Value;
    use std::time::Duration;

    struct FixedLlm {
        reply: Option<String>,
    }

    #[async_trait]
    impl ServiceProvider for FixedLlm {
        fn name(&self) -> &'static str {
            "llm"
        }

        async fn call(&self, _method: &str, _params: &Value) -> Result<Value, ServiceError> {
            match &self.reply {
                Some(reply) => Ok(json!({"text": reply})),
                None => Err(ServiceError::Timeout),
            }
        }
    }

    async fn pipeline(reply: Option<&str>) -> (RagPipeline, SessionContext) {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new());
        let store = MemoryKnowledgeStore::new("en");

        for (slug, name, desc) in [
            (
                "giza-pyramids",
                "Pyramids of Giza",
                "The Giza pyramid complex, home of the Great Pyramid and the Sphinx.",
            ),
            (
                "egyptian-museum",
                "Egyptian Museum",
                "Museum in Cairo housing the world's largest collection of antiquities.",
            ),
        ] {
            let mut draft =
                EntityDraft::new(EntityKind::Attraction, slug, MultilingualText::of("en", name));
            draft.description = MultilingualText::of("en", desc);
            draft.embedding = Some(embedder.embed(&format!("{name} {desc}")).unwrap());
            draft.popularity = 0.8;
            store.create(&draft).await.unwrap();
        }

        let mut hub = ServiceHub::new();
        hub.register(
            Arc::new(FixedLlm {
                reply: reply.map(String::from),
            }),
            ServicePolicy::llm(Duration::from_secs(1)),
        );

        let workers = Arc::new(InferenceWorkers::new(NluConfig::default().worker_count()));
        let rag = RagPipeline::new(
            Arc::new(store),
            embedder,
            workers,
            Arc::new(hub),
            "en",
            40,
        );
        let session = SessionContext::new(None, false, chrono::Duration::hours(1), Utc::now());
        (rag, session)
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_answer_with_synthesis() {
        let (rag, session) = pipeline(Some("The pyramids are in Giza.")).await;
        let outcome = rag
            .answer("tell me about the pyramids", "en", &session, &ctx())
            .await
            .unwrap();
        match outcome {
            RagOutcome::Answer { text, sources } => {
                assert_eq!(text, "The pyramids are in Giza.");
                assert!(!sources.is_empty());
            }
            other => panic!("expected answer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_llm_timeout_falls_back_to_description() {
        let (rag, session) = pipeline(None).await;
        let outcome = rag
            .answer("pyramids of giza great pyramid", "en", &session, &ctx())
            .await
            .unwrap();
        match outcome {
            RagOutcome::Answer { text, sources } => {
                assert!(text.contains("pyramid") || text.contains("Pyramid"));
                assert_eq!(sources.len(), 1);
            }
            other => panic!("expected fallback answer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_query_is_no_information() {
        let (rag, session) = pipeline(Some("x")).await;
        let outcome = rag.answer("  ", "en", &session, &ctx()).await.unwrap();
        assert_eq!(outcome, RagOutcome::NoInformation);
    }

    #[tokio::test]
    async fn test_rerank_prefers_popular_recent_on_similarity_tie() {
        let now = Utc::now();
        let entity = |id: i64, popularity: f64, days_old: i64| KnowledgeEntity {
            id,
            kind: EntityKind::Attraction,
            slug: format!("e{id}"),
            name: MultilingualText::of("en", "X"),
            description: MultilingualText::new(),
            category: None,
            rating: None,
            price_tier: None,
            active: true,
            popularity,
            city_id: None,
            region_id: None,
            location: None,
            embedding: None,
            data: Value::Null,
            created_at: now,
            updated_at: now - chrono::Duration::days(days_old),
        };

        let ranked = rerank(vec![
            ScoredEntity {
                entity: entity(1, 0.1, 300),
                score: 0.9,
            },
            ScoredEntity {
                entity: entity(2, 0.9, 1),
                score: 0.9,
            },
        ]);
        assert_eq!(ranked[0].entity.id, 2);
    }

    #[tokio::test]
    async fn test_prompt_budget_is_bounded() {
        let (rag, session) = pipeline(Some("ok")).await;
        let long = ScoredEntity {
            entity: KnowledgeEntity {
                id: 1,
                kind: EntityKind::Faq,
                slug: "big".into(),
                name: MultilingualText::of("en", "Big"),
                description: MultilingualText::of("en", &"x".repeat(10_000)),
                category: None,
                rating: None,
                price_tier: None,
                active: true,
                popularity: 0.0,
                city_id: None,
                region_id: None,
                location: None,
                embedding: None,
                data: Value::Null,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            score: 1.0,
        };
        let prompt = rag.build_prompt("q", "en", &session, &[long.clone(), long]);
        // Oversized snippets are skipped rather than blowing the budget.
        assert!(prompt.len() < SNIPPET_BUDGET + 1_024);
    }
}
