//! Transport-agnostic request and response envelopes.
//!
//! The HTTP layer (out of scope here) deserializes whatever arrives on
//! the wire into these records; `ChatRequest::validate` is the single
//! schema gate, so by the time the orchestrator sees a request it is
//! structurally sound.

use crate::config::Settings;
use crate::error::{CoreError, CorrelationId, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum accepted utterance length in bytes.
pub const MAX_MESSAGE_BYTES: usize = 1_024;

/// One inbound user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The user utterance.
    pub message: String,

    /// Session handle; absent on a first contact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Explicit language override; must be on the allow-list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl ChatRequest {
    /// Schema and enumerated-value validation against the settings.
    pub fn validate(&self, settings: &Settings) -> Result<(), CoreError> {
        if self.message.len() > MAX_MESSAGE_BYTES {
            return Err(CoreError::BadInput(format!(
                "message exceeds {MAX_MESSAGE_BYTES} bytes"
            )));
        }
        if let Some(lang) = &self.language {
            if !settings.languages_supported.iter().any(|l| l == lang) {
                return Err(CoreError::BadInput(format!(
                    "unsupported language '{lang}'"
                )));
            }
        }
        Ok(())
    }
}

/// How the reply text should be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Text,
    Card,
    Error,
}

/// One outbound reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub text: String,
    pub response_type: ResponseType,
    pub language: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<Value>,
}

impl ChatResponse {
    /// The single error shape clients see: kind + correlation id, with
    /// a user-presentable message in the requested language.
    pub fn error(
        session_id: impl Into<String>,
        language: impl Into<String>,
        kind: ErrorKind,
        text: impl Into<String>,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            text: text.into(),
            response_type: ResponseType::Error,
            language: language.into(),
            suggestions: Vec::new(),
            debug_info: Some(serde_json::json!({
                "error_kind": kind.to_string(),
                "correlation_id": correlation_id.to_string(),
            })),
        }
    }
}

/// Input envelope for session creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionCreateRequest {
    /// Arbitrary metadata attached to the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    /// Ask for the extended lifetime.
    #[serde(default)]
    pub remember_me: bool,
}

/// Output envelope for session creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreateResponse {
    pub session_id: String,

    /// Opaque bearer bound to the session id; the core only ever
    /// compares it for equality.
    pub token: String,

    pub token_type: String,

    /// Seconds until expiry.
    pub expires_in: u64,
}

impl SessionCreateResponse {
    pub fn new(session_id: String, token: String, expires_in: u64) -> Self {
        Self {
            session_id,
            token,
            token_type: "bearer".into(),
            expires_in,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn test_valid_request() {
        let req = ChatRequest {
            message: "Hello".into(),
            session_id: None,
            language: Some("en".into()),
        };
        req.validate(&settings()).unwrap();
    }

    #[test]
    fn test_oversized_message_rejected() {
        let req = ChatRequest {
            message: "x".repeat(MAX_MESSAGE_BYTES + 1),
            session_id: None,
            language: None,
        };
        let err = req.validate(&settings()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadInput);
    }

    #[test]
    fn test_unknown_language_rejected() {
        let req = ChatRequest {
            message: "hi".into(),
            session_id: None,
            language: Some("tlh".into()),
        };
        assert!(req.validate(&settings()).is_err());
    }

    #[test]
    fn test_error_envelope_has_kind_and_correlation() {
        let resp = ChatResponse::error(
            "s1",
            "en",
            ErrorKind::Timeout,
            "Sorry, that took too long.",
            CorrelationId::new(),
        );
        assert_eq!(resp.response_type, ResponseType::Error);
        let dbg = resp.debug_info.unwrap();
        assert_eq!(dbg["error_kind"], "timeout");
        assert!(dbg["correlation_id"].as_str().unwrap().len() == 36);
    }

    #[test]
    fn test_response_serialization_shape() {
        let resp = ChatResponse {
            session_id: "abc".into(),
            text: "Welcome!".into(),
            response_type: ResponseType::Text,
            language: "en".into(),
            suggestions: vec!["Top attractions".into()],
            debug_info: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["response_type"], "text");
        assert!(json.get("debug_info").is_none());
    }

    #[test]
    fn test_session_create_response_token_type() {
        let r = SessionCreateResponse::new("id".into(), "tok".into(), 3600);
        assert_eq!(r.token_type, "bearer");
    }
}
