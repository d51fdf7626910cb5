//! Error taxonomy shared across component boundaries.
//!
//! Components recover locally where a fallback exists (cache, primary
//! session backend, individual service calls). What reaches the caller
//! is always a [`CoreError`], and what reaches the end user is only the
//! [`ErrorKind`] plus a correlation id — never table names, connection
//! strings or stack traces.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation id attached to every turn; appears in logs and surfaced
/// error payloads so a user report can be matched to traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Semantic error kind surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadInput,
    NotFound,
    SessionExpired,
    ServiceUnavailable,
    Timeout,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::BadInput => "bad_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::SessionExpired => "session_expired",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// Error contract at every component boundary.
///
/// `Cancelled` and `Timeout` are distinct variants so logs can tell a
/// caller abort from an elapsed deadline; both surface to clients as
/// kind `timeout` and neither is retried downstream.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    BadInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("session expired")]
    SessionExpired,

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("deadline exceeded")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The kind surfaced to clients.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::BadInput(_) => ErrorKind::BadInput,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::SessionExpired => ErrorKind::SessionExpired,
            CoreError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            CoreError::Timeout | CoreError::Cancelled => ErrorKind::Timeout,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the turn ended because the deadline or the caller cut it
    /// short.
    pub fn is_cut_short(&self) -> bool {
        matches!(self, CoreError::Timeout | CoreError::Cancelled)
    }
}
