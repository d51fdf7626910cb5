//! NLU result types.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Intent assigned when classification cannot commit to anything.
pub const FALLBACK_INTENT: &str = "fallback";

/// One extracted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NluEntity {
    /// Entity type tag, e.g. `attraction`, `destination`, `number`.
    pub entity_type: String,

    /// Exact text span as the user wrote it.
    pub surface: String,

    /// Knowledge-base id when resolution succeeded.
    pub canonical_id: Option<i64>,

    /// Canonical display value when resolution succeeded.
    pub canonical_value: Option<String>,

    /// Byte span in the original utterance.
    pub span: (usize, usize),
}

/// Output of the NLU pipeline for one utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NluResult {
    pub language: String,
    pub language_confidence: f32,

    pub intent: String,
    /// Intent confidence in [0, 1].
    pub confidence: f32,

    /// Entities in utterance order.
    pub entities: Vec<NluEntity>,

    /// SHA-256 of the raw utterance; lets analytics correlate repeated
    /// inputs without storing the text.
    pub utterance_hash: String,
}

impl NluResult {
    /// The degraded result: fallback intent, no entities.
    pub fn fallback(language: &str) -> Self {
        Self {
            language: language.to_string(),
            language_confidence: 0.0,
            intent: FALLBACK_INTENT.to_string(),
            confidence: 0.0,
            entities: Vec::new(),
            utterance_hash: String::new(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.intent == FALLBACK_INTENT
    }
}

/// Hash an utterance for analytics correlation.
pub fn utterance_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_shape() {
        let r = NluResult::fallback("ar");
        assert!(r.is_fallback());
        assert_eq!(r.language, "ar");
        assert!(r.entities.is_empty());
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn test_utterance_hash_stable() {
        assert_eq!(utterance_hash("hello"), utterance_hash("hello"));
        assert_ne!(utterance_hash("hello"), utterance_hash("hello!"));
        assert_eq!(utterance_hash("x").len(), 64);
    }
}
