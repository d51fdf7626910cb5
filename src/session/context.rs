//! Conversation context: the canonical per-session record.
//!
//! The context is owned by the session store; the orchestrator holds it
//! for the duration of a single turn (at most one concurrent turn per
//! session is guaranteed upstream). Persisted as versioned JSON with a
//! `v` schema field so old records keep decoding after additive changes.

use crate::nlu::types::NluResult;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

/// Current schema version of the stored record.
const SCHEMA_VERSION: u32 = 1;

/// URL-safe 128-bit identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a random 128-bit URL-safe id.
    pub fn generate() -> Self {
        Self(random_token())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Random 128-bit value, URL-safe base64 without padding. Used for both
/// session ids and bearer tokens.
pub fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// A slot value captured during dialog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotValue {
    pub value: Value,
    pub entity_type: String,
    /// Turn counter value when the slot was filled; used for expiry.
    pub filled_at_turn: u64,
}

/// Dialog position stored on the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogState {
    /// Active flow name.
    pub flow: String,
    /// Current node within the flow.
    pub node: String,
    /// Filled slots.
    #[serde(default)]
    pub slots: HashMap<String, SlotValue>,
}

impl Default for DialogState {
    fn default() -> Self {
        Self {
            flow: "main".into(),
            node: "start".into(),
            slots: HashMap::new(),
        }
    }
}

/// One user utterance plus the system's reply to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub user_text: String,
    pub nlu: NluResult,
    pub reply: String,
    pub at: DateTime<Utc>,
}

/// Canonical per-session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub id: SessionId,

    /// Opaque bearer token bound to this session.
    pub token: String,

    /// Monotonically increasing write counter; regressions are logged
    /// as conflicting overwrites but never rejected.
    pub version: u64,

    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    /// Whether the extended lifetime was requested at creation.
    pub remember_me: bool,

    /// Preferred conversation language, once known.
    #[serde(default)]
    pub language: Option<String>,

    #[serde(default)]
    pub dialog: DialogState,

    /// Rolling window of recent turns, oldest first.
    #[serde(default)]
    pub history: VecDeque<Turn>,

    /// Total turns processed; drives slot expiry.
    #[serde(default)]
    pub turn_counter: u64,

    /// Arbitrary metadata supplied at creation.
    #[serde(default)]
    pub metadata: Value,

    /// Set when a turn was cut short before its final save.
    #[serde(default)]
    pub incomplete: bool,
}

impl SessionContext {
    /// Build a fresh context. `now` is the request-entry timestamp.
    pub fn new(metadata: Option<Value>, remember_me: bool, ttl: chrono::Duration, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::generate(),
            token: random_token(),
            version: 0,
            created_at: now,
            last_accessed: now,
            expires_at: now + ttl,
            remember_me,
            language: None,
            dialog: DialogState::default(),
            history: VecDeque::new(),
            turn_counter: 0,
            metadata: metadata.unwrap_or(Value::Null),
            incomplete: false,
        }
    }

    /// Whether the record is past its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Update the access timestamp, keeping it monotonic even if the
    /// caller's clock reads slightly behind a previous writer's.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_accessed {
            self.last_accessed = now;
        }
    }

    /// Append a completed turn, trimming the window to `window` entries.
    pub fn push_turn(&mut self, turn: Turn, window: usize) {
        self.history.push_back(turn);
        while self.history.len() > window {
            self.history.pop_front();
        }
        self.turn_counter += 1;
    }

    /// The last `n` turns, oldest first.
    pub fn recent_turns(&self, n: usize) -> Vec<&Turn> {
        let start = self.history.len().saturating_sub(n);
        self.history.iter().skip(start).collect()
    }

    /// Encode as the stored wire format.
    pub fn encode(&self) -> String {
        let record = StoredRecord {
            v: SCHEMA_VERSION,
            session: self.clone(),
        };
        // A context assembled from our own types always serializes.
        serde_json::to_string(&record).unwrap_or_else(|_| "{}".into())
    }

    /// Decode from the stored wire format, rejecting unknown schema
    /// versions and records without one.
    pub fn decode(raw: &str) -> Result<Self, String> {
        let record: StoredRecord =
            serde_json::from_str(raw).map_err(|e| format!("undecodable session record: {e}"))?;
        if record.v < 1 {
            return Err(format!("unsupported session schema v{}", record.v));
        }
        Ok(record.session)
    }
}

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    v: u32,
    session: SessionContext,
}
