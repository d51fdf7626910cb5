//! Natural-language understanding pipeline.
//!
//! Three stages — language detection, intent classification, entity
//! extraction — each behind a lazily loaded model handle. Every stage
//! degrades rather than failing the turn: unknown language falls back
//! to the session preference, a classification problem yields the
//! `fallback` intent, an extraction problem yields no entities. Only
//! cancellation and the deadline propagate as errors.

pub mod entities;
pub mod intent;
pub mod language;
pub mod registry;
pub mod types;

pub use entities::EntityModel;
pub use intent::{default_intent_phrases, ClassifiedIntent, IntentModel};
pub use language::{DetectedLanguage, LanguageModel};
pub use registry::{InferenceWorkers, ModelHandle, ModelRegistry, NluError};
pub use types::{NluEntity, NluResult, FALLBACK_INTENT};

use crate::config::NluConfig;
use crate::context::RequestContext;
use crate::error::CoreError;
use crate::knowledge::KnowledgeBase;
use crate::session::SessionContext;
use rihla_embedder::Embedder;
use std::sync::Arc;
use tracing::warn;

pub struct NluPipeline {
    language_model: Arc<ModelHandle<LanguageModel>>,
    intent_model: Arc<ModelHandle<IntentModel>>,
    entity_model: Arc<ModelHandle<EntityModel>>,
    workers: Arc<InferenceWorkers>,
    embedder: Arc<dyn Embedder>,
    kb: Arc<KnowledgeBase>,
    config: NluConfig,
    default_language: String,
}

impl NluPipeline {
    /// Wire the pipeline and register its models with the registry.
    /// Nothing loads until the first utterance arrives.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        kb: Arc<KnowledgeBase>,
        registry: &ModelRegistry,
        workers: Arc<InferenceWorkers>,
        config: NluConfig,
        default_language: &str,
    ) -> Self {
        let default_lang = default_language.to_string();
        let language_model = Arc::new(ModelHandle::new("language-detector", move || {
            Ok(LanguageModel::load(&default_lang))
        }));

        let intent_embedder = Arc::clone(&embedder);
        let margin = config.intent_margin;
        let intent_model = Arc::new(ModelHandle::new("intent-prototypes", move || {
            IntentModel::load(
                intent_embedder.as_ref(),
                &default_intent_phrases(),
                margin,
            )
        }));

        let entity_model = Arc::new(ModelHandle::new("entity-tagger", || {
            Ok(EntityModel::load())
        }));

        registry.register(Arc::clone(&language_model) as Arc<dyn registry::RegisteredModel>);
        registry.register(Arc::clone(&intent_model) as Arc<dyn registry::RegisteredModel>);
        registry.register(Arc::clone(&entity_model) as Arc<dyn registry::RegisteredModel>);

        Self {
            language_model,
            intent_model,
            entity_model,
            workers,
            embedder,
            kb,
            config,
            default_language: default_language.to_string(),
        }
    }

    /// Analyze one utterance in its session context.
    pub async fn analyze(
        &self,
        text: &str,
        session: &SessionContext,
        ctx: &RequestContext,
    ) -> Result<NluResult, CoreError> {
        ctx.check()?;
        let session_language = session
            .language
            .clone()
            .unwrap_or_else(|| self.default_language.clone());

        let trimmed = text.trim();
        if trimmed.is_empty() {
            // No model invocation for an empty utterance.
            let mut result = NluResult::fallback(&session_language);
            result.utterance_hash = types::utterance_hash(text);
            return Ok(result);
        }

        // Stage 1: language. The guard drops before the next stage so a
        // request never holds two models at once.
        let (language, language_confidence) = {
            match self.language_model.acquire() {
                Ok(model) => {
                    let detected = model.detect(trimmed);
                    if detected.confidence < self.config.language_confidence_floor {
                        (session_language.clone(), detected.confidence)
                    } else {
                        (detected.language, detected.confidence)
                    }
                }
                Err(e) => {
                    warn!(correlation_id = %ctx.correlation_id(), error = %e,
                          "language detection unavailable");
                    (session_language.clone(), 0.0)
                }
            }
        };

        // Stage 2: intent. Prototype loading and utterance embedding
        // are CPU-bound, so both run on the worker group.
        let classified = {
            let intent_model = Arc::clone(&self.intent_model);
            let embedder = Arc::clone(&self.embedder);
            let utterance = trimmed.to_string();
            let outcome = self
                .workers
                .run(ctx, move || -> Result<ClassifiedIntent, NluError> {
                    let model = intent_model.acquire()?;
                    let embedding = embedder
                        .embed(&utterance)
                        .map_err(|e| NluError::Inference(e.to_string()))?;
                    Ok(model.classify(&embedding))
                })
                .await?;
            match outcome {
                Ok(classified) => classified,
                Err(e) => {
                    warn!(correlation_id = %ctx.correlation_id(), error = %e,
                          "intent classification failed");
                    ClassifiedIntent {
                        intent: FALLBACK_INTENT.into(),
                        confidence: 0.0,
                        margin: 0.0,
                    }
                }
            }
        };

        // Stage 3: entities, canonicalized against the knowledge base.
        ctx.check()?;
        let entities = match self.entity_model.acquire() {
            Ok(model) => entities::tag_entities(&model, &self.kb, trimmed, &language).await,
            Err(e) => {
                warn!(correlation_id = %ctx.correlation_id(), error = %e,
                      "entity extraction unavailable");
                Vec::new()
            }
        };
        ctx.check()?;

        Ok(NluResult {
            language,
            language_confidence,
            intent: classified.intent,
            confidence: classified.confidence,
            entities,
            utterance_hash: types::utterance_hash(text),
        })
    }
}
