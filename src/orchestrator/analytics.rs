//! Asynchronous analytics emission.
//!
//! One canonical event shape per turn, pushed through an unbounded
//! channel to a pluggable sink. Emission is fire-and-forget: a full or
//! closed channel logs and drops, never failing the turn. Delivery is
//! at-most-once by design.

use crate::error::{CorrelationId, ErrorKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Success,
    Timeout,
    Error,
}

impl std::fmt::Display for TurnOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnOutcome::Success => write!(f, "success"),
            TurnOutcome::Timeout => write!(f, "timeout"),
            TurnOutcome::Error => write!(f, "error"),
        }
    }
}

/// The canonical per-turn analytics record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub session_id: String,
    pub correlation_id: CorrelationId,
    pub intent: String,
    /// Entity descriptors as `type:value` strings.
    pub entities: Vec<String>,
    pub latency_ms: u64,
    pub outcome: TurnOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub primary_store_degraded: bool,
    pub at: DateTime<Utc>,
}

/// Destination for analytics events.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn record(&self, event: AnalyticsEvent);
}

/// Default sink: structured log lines.
pub struct TracingSink;

#[async_trait]
impl AnalyticsSink for TracingSink {
    async fn record(&self, event: AnalyticsEvent) {
        info!(
            session_id = %event.session_id,
            correlation_id = %event.correlation_id,
            intent = %event.intent,
            entities = event.entities.len(),
            latency_ms = event.latency_ms,
            outcome = %event.outcome,
            error_kind = event.error_kind.map(|k| k.to_string()),
            primary_store_degraded = event.primary_store_degraded,
            "turn analytics"
        );
    }
}

/// In-memory sink for tests and local inspection.
#[derive(Default)]
pub struct CollectorSink {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().expect("collector mutex poisoned").clone()
    }
}

#[async_trait]
impl AnalyticsSink for CollectorSink {
    async fn record(&self, event: AnalyticsEvent) {
        self.events
            .lock()
            .expect("collector mutex poisoned")
            .push(event);
    }
}

/// Buffered emitter feeding the sink from a background task.
pub struct AnalyticsEmitter {
    tx: Mutex<Option<mpsc::UnboundedSender<AnalyticsEvent>>>,
    consumer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AnalyticsEmitter {
    pub fn new(sink: Arc<dyn AnalyticsSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AnalyticsEvent>();
        let consumer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                sink.record(event).await;
            }
        });
        Self {
            tx: Mutex::new(Some(tx)),
            consumer: Mutex::new(Some(consumer)),
        }
    }

    /// Queue one event. Failures log and drop.
    pub fn emit(&self, event: AnalyticsEvent) {
        let sender = self.tx.lock().expect("emitter mutex poisoned").clone();
        match sender {
            Some(sender) => {
                if sender.send(event).is_err() {
                    warn!("analytics consumer gone, dropping event");
                }
            }
            None => warn!("analytics emitter shut down, dropping event"),
        }
    }

    /// Drain the queue and stop the consumer.
    pub async fn shutdown(&self) {
        let sender = self.tx.lock().expect("emitter mutex poisoned").take();
        drop(sender);
        let consumer = self.consumer.lock().expect("emitter mutex poisoned").take();
        if let Some(consumer) = consumer {
            if let Err(e) = consumer.await {
                warn!(error = %e, "analytics consumer ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(outcome: TurnOutcome) -> AnalyticsEvent {
        AnalyticsEvent {
            session_id: "s1".into(),
            correlation_id: CorrelationId::new(),
            intent: "greeting".into(),
            entities: vec!["attraction:Pyramids".into()],
            latency_ms: 42,
            outcome,
            error_kind: None,
            primary_store_degraded: false,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_events_reach_sink_in_order() {
        let sink = Arc::new(CollectorSink::new());
        let emitter = AnalyticsEmitter::new(Arc::clone(&sink) as Arc<dyn AnalyticsSink>);

        emitter.emit(event(TurnOutcome::Success));
        emitter.emit(event(TurnOutcome::Timeout));
        emitter.shutdown().await;

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].outcome, TurnOutcome::Success);
        assert_eq!(events[1].outcome, TurnOutcome::Timeout);
    }

    #[tokio::test]
    async fn test_emit_after_shutdown_drops_quietly() {
        let sink = Arc::new(CollectorSink::new());
        let emitter = AnalyticsEmitter::new(Arc::clone(&sink) as Arc<dyn AnalyticsSink>);
        emitter.shutdown().await;
        emitter.emit(event(TurnOutcome::Error));
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_event_serializes_canonical_shape() {
        let json = serde_json::to_value(event(TurnOutcome::Timeout)).unwrap();
        assert_eq!(json["outcome"], "timeout");
        assert_eq!(json["latency_ms"], 42);
        assert!(json.get("error_kind").is_none());
        assert_eq!(json["primary_store_degraded"], false);
    }
}
