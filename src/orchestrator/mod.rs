//! End-to-end lifecycle of one user turn.
//!
//! Load (or mint) the session, run NLU, persist an interim save, ask
//! the dialog manager for an action, execute it against the knowledge
//! base, RAG pipeline or service hub, render the reply, persist the
//! final context, and emit exactly one analytics event — all under one
//! deadline and cancellation token. A turn cut short still persists its
//! partial context flagged `incomplete` and still emits its event.

pub mod analytics;
pub mod response;

pub use analytics::{
    AnalyticsEmitter, AnalyticsEvent, AnalyticsSink, CollectorSink, TracingSink, TurnOutcome,
};
pub use response::ResponseGenerator;

use crate::config::Settings;
use crate::context::RequestContext;
use crate::dialog::{slots, DialogAction, DialogManager, DialogOutcome};
use crate::envelope::{ChatRequest, ChatResponse, ResponseType, SessionCreateRequest, SessionCreateResponse};
use crate::error::{CoreError, ErrorKind};
use crate::knowledge::{EntityKind, KnowledgeBase, RagOutcome, RagPipeline, SearchFilters};
use crate::nlu::{NluPipeline, NluResult};
use crate::services::ServiceHub;
use crate::session::{SessionContext, SessionId, SessionStore};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// What executing a dialog action produced.
struct ActionResult {
    text: String,
    response_type: ResponseType,
    outcome: TurnOutcome,
    error_kind: Option<ErrorKind>,
    debug_info: Option<Value>,
}

impl ActionResult {
    fn text(text: String) -> Self {
        Self {
            text,
            response_type: ResponseType::Text,
            outcome: TurnOutcome::Success,
            error_kind: None,
            debug_info: None,
        }
    }

    fn degraded(text: String, error_kind: ErrorKind) -> Self {
        Self {
            text,
            response_type: ResponseType::Error,
            outcome: TurnOutcome::Error,
            error_kind: Some(error_kind),
            debug_info: None,
        }
    }
}

pub struct Orchestrator {
    settings: Settings,
    sessions: Arc<SessionStore>,
    nlu: Arc<NluPipeline>,
    dialog: Arc<DialogManager>,
    kb: Arc<KnowledgeBase>,
    rag: Arc<RagPipeline>,
    hub: Arc<ServiceHub>,
    responder: Arc<ResponseGenerator>,
    analytics: Arc<AnalyticsEmitter>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        sessions: Arc<SessionStore>,
        nlu: Arc<NluPipeline>,
        dialog: Arc<DialogManager>,
        kb: Arc<KnowledgeBase>,
        rag: Arc<RagPipeline>,
        hub: Arc<ServiceHub>,
        responder: Arc<ResponseGenerator>,
        analytics: Arc<AnalyticsEmitter>,
    ) -> Self {
        Self {
            settings,
            sessions,
            nlu,
            dialog,
            kb,
            rag,
            hub,
            responder,
            analytics,
        }
    }

    /// Create a session outside a chat turn.
    pub async fn create_session(
        &self,
        request: SessionCreateRequest,
    ) -> Result<SessionCreateResponse, CoreError> {
        let now = Utc::now();
        let session = self
            .sessions
            .create(request.metadata, request.remember_me, now)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        let expires_in = (session.expires_at - now).num_seconds().max(0) as u64;
        Ok(SessionCreateResponse::new(
            session.id.to_string(),
            session.token.clone(),
            expires_in,
        ))
    }

    /// Process one user turn.
    pub async fn handle_message(&self, request: ChatRequest) -> Result<ChatResponse, CoreError> {
        request.validate(&self.settings)?;

        let ctx = RequestContext::new(self.settings.orchestrator.request_deadline());
        let correlation_id = ctx.correlation_id();
        debug!(correlation_id = %correlation_id, "turn started");

        // A zero deadline times out before anything runs, NLU included.
        if let Err(e) = ctx.check() {
            let language = self.preliminary_language(&request, None);
            let session_id = request.session_id.clone().unwrap_or_default();
            return Ok(self.finish_cut_short(None, session_id, &language, &ctx, e).await);
        }

        // Session: presented ids must refer to live context; absent ids
        // mint a new anonymous session.
        let mut session = match &request.session_id {
            Some(id) => {
                let id = SessionId::from(id.as_str());
                match self.sessions.get(&id, ctx.now()).await {
                    Ok(Some(session)) => session,
                    Ok(None) => return Err(CoreError::SessionExpired),
                    Err(e) => return Err(CoreError::Internal(e.to_string())),
                }
            }
            None => self
                .sessions
                .create(None, false, ctx.now())
                .await
                .map_err(|e| CoreError::Internal(e.to_string()))?,
        };
        let session_id = session.id.to_string();

        // NLU.
        let nlu = match self.nlu.analyze(&request.message, &session, &ctx).await {
            Ok(nlu) => nlu,
            Err(e) if e.is_cut_short() => {
                let language = self.preliminary_language(&request, Some(&session));
                return Ok(self
                    .finish_cut_short(Some(session), session_id, &language, &ctx, e)
                    .await);
            }
            Err(e) => return Err(e),
        };

        // Language preference: explicit request parameter, then what
        // NLU settled on (which already folds in the session
        // preference when detection is weak).
        let language = match &request.language {
            Some(language) => language.clone(),
            None if self.settings.languages_supported.contains(&nlu.language) => {
                nlu.language.clone()
            }
            None => self.settings.default_language.clone(),
        };
        session.language = Some(language.clone());

        // Interim save: the turn is on the record before any external
        // call can stall it.
        session.push_turn(
            crate::session::Turn {
                user_text: request.message.clone(),
                nlu: nlu.clone(),
                reply: String::new(),
                at: ctx.now(),
            },
            self.settings.session.history_window,
        );
        session.incomplete = true;
        if let Err(e) = self.sessions.save(&mut session, ctx.now()).await {
            warn!(correlation_id = %correlation_id, error = %e, "interim save failed");
            let result = ActionResult::degraded(
                self.responder.render("apology_error", &language, &HashMap::new()),
                ErrorKind::Internal,
            );
            return Ok(self
                .finish(session, session_id, &language, &nlu, result, Vec::new(), &ctx)
                .await);
        }

        // Dialog decision.
        let turn_number = session.turn_counter;
        let mut dialog_state = session.dialog.clone();
        let outcome = self
            .dialog
            .next_action(&nlu, &mut dialog_state, turn_number);
        session.dialog = dialog_state;
        let suggestions = outcome.suggestions.clone();

        // Action execution under the remaining deadline.
        let result = match self
            .execute_action(outcome, &request.message, &session, &language, &ctx)
            .await
        {
            Ok(result) => result,
            Err(e) if e.is_cut_short() => {
                return Ok(self
                    .finish_cut_short(Some(session), session_id, &language, &ctx, e)
                    .await);
            }
            Err(e) => {
                warn!(correlation_id = %correlation_id, error = %e, "action execution failed");
                ActionResult::degraded(
                    self.responder.render("apology_error", &language, &HashMap::new()),
                    e.kind(),
                )
            }
        };

        Ok(self
            .finish(session, session_id, &language, &nlu, result, suggestions, &ctx)
            .await)
    }

    fn preliminary_language(
        &self,
        request: &ChatRequest,
        session: Option<&SessionContext>,
    ) -> String {
        request
            .language
            .clone()
            .or_else(|| session.and_then(|s| s.language.clone()))
            .unwrap_or_else(|| self.settings.default_language.clone())
    }

    async fn execute_action(
        &self,
        outcome: DialogOutcome,
        utterance: &str,
        session: &SessionContext,
        language: &str,
        ctx: &RequestContext,
    ) -> Result<ActionResult, CoreError> {
        ctx.check()?;
        match outcome.action {
            DialogAction::Respond { template, params } => {
                Ok(ActionResult::text(self.responder.render(&template, language, &params)))
            }
            DialogAction::Prompt { slot } => Ok(ActionResult::text(self.responder.render(
                &format!("prompt.{slot}"),
                language,
                &HashMap::new(),
            ))),
            DialogAction::EndConversation => {
                Ok(ActionResult::text(self.responder.render("goodbye", language, &HashMap::new())))
            }
            DialogAction::TransferToFlow { .. } => {
                // Transfers resolve inside the dialog manager; reaching
                // here means the target flow's entry had no action.
                Ok(ActionResult::text(self.responder.render("fallback", language, &HashMap::new())))
            }
            DialogAction::CallService {
                service,
                method,
                params,
            } => match service.as_str() {
                "knowledge" => self.knowledge_action(&method, session, language).await,
                "rag" => self.rag_action(utterance, session, language, ctx).await,
                _ => self
                    .hub_action(&service, &method, params, session, language, ctx)
                    .await,
            },
        }
    }

    async fn knowledge_action(
        &self,
        method: &str,
        session: &SessionContext,
        language: &str,
    ) -> Result<ActionResult, CoreError> {
        let state = &session.dialog;
        let no_information =
            || self.responder.render("no_information", language, &HashMap::new());

        match method {
            "describe" => {
                let entity = match slots::slot_id(state, "attraction") {
                    Some(id) => self
                        .kb
                        .get(EntityKind::Attraction, id)
                        .await
                        .map_err(|e| CoreError::Internal(e.to_string()))?,
                    None => match slots::slot_text(state, "attraction") {
                        Some(text) => self
                            .kb
                            .resolve_entity(&text, EntityKind::Attraction, language)
                            .await
                            .map_err(|e| CoreError::Internal(e.to_string()))?,
                        None => None,
                    },
                };
                match entity {
                    Some(entity) => {
                        let mut params = HashMap::new();
                        params.insert(
                            "name".to_string(),
                            entity
                                .display_name(language, self.kb.default_language())
                                .to_string(),
                        );
                        params.insert(
                            "description".to_string(),
                            entity
                                .display_description(language, self.kb.default_language())
                                .to_string(),
                        );
                        let mut result =
                            ActionResult::text(self.responder.render("describe", language, &params));
                        result.debug_info = Some(json!({"sources": [entity.id]}));
                        Ok(result)
                    }
                    None => Ok(ActionResult::text(no_information())),
                }
            }
            "nearby" => {
                let place = match self.place_entity(state, language).await? {
                    Some(place) => place,
                    None => return Ok(ActionResult::text(no_information())),
                };
                let Some(location) = place.location else {
                    return Ok(ActionResult::text(no_information()));
                };
                let hits = self
                    .kb
                    .store()
                    .nearby(EntityKind::Attraction, location.lat, location.lon, 25.0, 5)
                    .await
                    .map_err(|e| CoreError::Internal(e.to_string()))?;
                if hits.is_empty() {
                    return Ok(ActionResult::text(no_information()));
                }
                let items: Vec<String> = hits
                    .iter()
                    .map(|h| {
                        format!(
                            "{} ({:.1} km)",
                            h.entity.display_name(language, self.kb.default_language()),
                            h.distance_km
                        )
                    })
                    .collect();
                let mut params = HashMap::new();
                params.insert(
                    "place".to_string(),
                    place
                        .display_name(language, self.kb.default_language())
                        .to_string(),
                );
                params.insert("items".to_string(), items.join(", "));
                Ok(ActionResult::text(self.responder.render("nearby_list", language, &params)))
            }
            "search_restaurants" | "search_hotels" | "search_events" => {
                let kind = match method {
                    "search_restaurants" => EntityKind::Restaurant,
                    "search_hotels" => EntityKind::Accommodation,
                    _ => EntityKind::Event,
                };
                let mut filters = SearchFilters {
                    active_only: true,
                    ..SearchFilters::none()
                };
                if let Some(place) = self.place_entity(state, language).await? {
                    filters.city_id = Some(place.id);
                }
                let page = self
                    .kb
                    .store()
                    .search(kind, None, &filters, 5, 0, language)
                    .await
                    .map_err(|e| CoreError::Internal(e.to_string()))?;
                if page.is_empty() {
                    return Ok(ActionResult::text(no_information()));
                }
                let items: Vec<&str> = page
                    .items
                    .iter()
                    .map(|e| e.display_name(language, self.kb.default_language()))
                    .collect();
                let mut params = HashMap::new();
                params.insert("items".to_string(), items.join(", "));
                Ok(ActionResult::text(self.responder.render("result_list", language, &params)))
            }
            other => {
                warn!(method = other, "unknown knowledge method");
                Ok(ActionResult::text(no_information()))
            }
        }
    }

    async fn rag_action(
        &self,
        utterance: &str,
        session: &SessionContext,
        language: &str,
        ctx: &RequestContext,
    ) -> Result<ActionResult, CoreError> {
        match self.rag.answer(utterance, language, session, ctx).await? {
            RagOutcome::Answer { text, sources } => {
                let mut result = ActionResult::text(text);
                result.debug_info = Some(json!({ "sources": sources }));
                Ok(result)
            }
            RagOutcome::NoInformation => Ok(ActionResult::text(self.responder.render(
                "no_information",
                language,
                &HashMap::new(),
            ))),
        }
    }

    async fn hub_action(
        &self,
        service: &str,
        method: &str,
        mut params: Value,
        session: &SessionContext,
        language: &str,
        ctx: &RequestContext,
    ) -> Result<ActionResult, CoreError> {
        // Weather calls need coordinates resolved from the place slot.
        if service == "weather" {
            let Some(place) = self.place_entity(&session.dialog, language).await? else {
                return Ok(ActionResult::text(self.responder.render(
                    "no_information",
                    language,
                    &HashMap::new(),
                )));
            };
            let Some(location) = place.location else {
                return Ok(ActionResult::text(self.responder.render(
                    "no_information",
                    language,
                    &HashMap::new(),
                )));
            };
            params = json!({ "lat": location.lat, "lon": location.lon });

            return match self.hub.execute(service, method, &params, ctx).await {
                Ok(value) => {
                    let mut template_params = HashMap::new();
                    template_params.insert(
                        "place".to_string(),
                        place
                            .display_name(language, self.kb.default_language())
                            .to_string(),
                    );
                    template_params.insert(
                        "temperature".to_string(),
                        value["temperature_c"].as_f64().unwrap_or(0.0).to_string(),
                    );
                    template_params.insert(
                        "wind".to_string(),
                        value["wind_kph"].as_f64().unwrap_or(0.0).to_string(),
                    );
                    Ok(ActionResult::text(self.responder.render(
                        "weather_report",
                        language,
                        &template_params,
                    )))
                }
                Err(e) if e.is_cut_short() => Err(e),
                Err(e) => {
                    warn!(service, error = %e, "service call failed after fallbacks");
                    Ok(ActionResult::degraded(
                        self.responder.render("service_unavailable", language, &HashMap::new()),
                        ErrorKind::ServiceUnavailable,
                    ))
                }
            };
        }

        match self.hub.execute(service, method, &params, ctx).await {
            Ok(value) => {
                let text = value
                    .get("text")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| {
                        self.responder.render("no_information", language, &HashMap::new())
                    });
                Ok(ActionResult::text(text))
            }
            Err(e) if e.is_cut_short() => Err(e),
            Err(e) => {
                warn!(service, error = %e, "service call failed after fallbacks");
                Ok(ActionResult::degraded(
                    self.responder.render("service_unavailable", language, &HashMap::new()),
                    ErrorKind::ServiceUnavailable,
                ))
            }
        }
    }

    /// Resolve the `destination` slot to a knowledge record.
    async fn place_entity(
        &self,
        state: &crate::session::DialogState,
        language: &str,
    ) -> Result<Option<crate::knowledge::KnowledgeEntity>, CoreError> {
        if let Some(id) = slots::slot_id(state, "destination") {
            return self
                .kb
                .get(EntityKind::Destination, id)
                .await
                .map_err(|e| CoreError::Internal(e.to_string()));
        }
        if let Some(text) = slots::slot_text(state, "destination") {
            return self
                .kb
                .resolve_entity(&text, EntityKind::Destination, language)
                .await
                .map_err(|e| CoreError::Internal(e.to_string()));
        }
        Ok(None)
    }

    /// Final save, analytics, and the response envelope.
    async fn finish(
        &self,
        mut session: SessionContext,
        session_id: String,
        language: &str,
        nlu: &NluResult,
        result: ActionResult,
        suggestions: Vec<String>,
        ctx: &RequestContext,
    ) -> ChatResponse {
        if let Some(last) = session.history.back_mut() {
            last.reply = result.text.clone();
        }
        session.incomplete = false;
        if let Err(e) = self.sessions.save(&mut session, ctx.now()).await {
            warn!(correlation_id = %ctx.correlation_id(), error = %e, "final save failed");
        }

        self.analytics.emit(AnalyticsEvent {
            session_id: session_id.clone(),
            correlation_id: ctx.correlation_id(),
            intent: nlu.intent.clone(),
            entities: entity_descriptors(nlu),
            latency_ms: ctx.elapsed().as_millis() as u64,
            outcome: result.outcome,
            error_kind: result.error_kind,
            primary_store_degraded: self.sessions.is_degraded(),
            at: ctx.now(),
        });

        let mut debug_info = result.debug_info;
        if let Some(error_kind) = result.error_kind {
            debug_info = Some(json!({
                "error_kind": error_kind.to_string(),
                "correlation_id": ctx.correlation_id().to_string(),
            }));
        }

        ChatResponse {
            session_id,
            text: result.text,
            response_type: result.response_type,
            language: language.to_string(),
            suggestions: self.responder.suggestions(&suggestions, language),
            debug_info,
        }
    }

    /// A turn cut short by the deadline or the caller: persist the
    /// partial context flagged incomplete, emit the analytics event
    /// with outcome `timeout`, and apologize.
    async fn finish_cut_short(
        &self,
        session: Option<SessionContext>,
        session_id: String,
        language: &str,
        ctx: &RequestContext,
        cause: CoreError,
    ) -> ChatResponse {
        warn!(
            correlation_id = %ctx.correlation_id(),
            cause = %cause,
            "turn cut short"
        );

        let intent = session
            .as_ref()
            .and_then(|s| s.history.back())
            .map(|turn| turn.nlu.intent.clone())
            .unwrap_or_else(|| "unknown".to_string());

        if let Some(mut session) = session {
            session.incomplete = true;
            if let Err(e) = self.sessions.save(&mut session, ctx.now()).await {
                warn!(correlation_id = %ctx.correlation_id(), error = %e,
                      "incomplete-context save failed");
            }
        }

        self.analytics.emit(AnalyticsEvent {
            session_id: session_id.clone(),
            correlation_id: ctx.correlation_id(),
            intent,
            entities: Vec::new(),
            latency_ms: ctx.elapsed().as_millis() as u64,
            outcome: TurnOutcome::Timeout,
            error_kind: Some(ErrorKind::Timeout),
            primary_store_degraded: self.sessions.is_degraded(),
            at: ctx.now(),
        });

        ChatResponse::error(
            session_id,
            language,
            ErrorKind::Timeout,
            self.responder.render("apology_timeout", language, &HashMap::new()),
            ctx.correlation_id(),
        )
    }
}

fn entity_descriptors(nlu: &NluResult) -> Vec<String> {
    nlu.entities
        .iter()
        .map(|e| {
            format!(
                "{}:{}",
                e.entity_type,
                e.canonical_value.as_deref().unwrap_or(&e.surface)
            )
        })
        .collect()
}
