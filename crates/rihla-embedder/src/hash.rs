//! Deterministic feature-hashing sentence encoder.
//!
//! Tokenizes into words and character n-grams after NFKC folding, hashes
//! each feature into one of 384 buckets with a sign bit, accumulates and
//! L2-normalizes. Texts sharing surface features land close in cosine
//! space, which is all the intent prototypes and cache identity need.
//! Identical input always produces an identical vector.

use crate::{Embedder, EmbedderError, EMBEDDING_DIM};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Character n-gram sizes fed into the hash.
const CHAR_NGRAMS: [usize; 2] = [3, 4];

/// Deterministic feature-hashing encoder.
///
/// Stateless and thread-safe; construction never fails and there is
/// nothing to download.
#[derive(Debug, Clone, Default)]
pub struct HashEmbedder {
    _private: (),
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Fold text for feature extraction: NFKC normalize, lowercase,
    /// collapse non-alphanumerics to single spaces.
    fn fold(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut last_space = true;
        for ch in text.nfkc() {
            let ch = ch.to_lowercase().next().unwrap_or(ch);
            if ch.is_alphanumeric() {
                out.push(ch);
                last_space = false;
            } else if !last_space {
                out.push(' ');
                last_space = true;
            }
        }
        out.trim_end().to_string()
    }

    /// Hash a feature string into (bucket, sign).
    fn feature_slot(feature: &str) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let idx = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
            % EMBEDDING_DIM;
        let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
        (idx, sign)
    }

    fn accumulate(acc: &mut [f32], feature: &str, weight: f32) {
        let (idx, sign) = Self::feature_slot(feature);
        acc[idx] += sign * weight;
    }
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize {
        EMBEDDING_DIM
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let folded = Self::fold(text);
        let mut acc = vec![0.0f32; EMBEDDING_DIM];

        if folded.is_empty() {
            return Ok(acc);
        }

        // Word unigrams and bigrams carry most of the signal.
        let words: Vec<&str> = folded.split(' ').filter(|w| !w.is_empty()).collect();
        for w in &words {
            Self::accumulate(&mut acc, &format!("w:{w}"), 1.0);
        }
        for pair in words.windows(2) {
            Self::accumulate(&mut acc, &format!("b:{} {}", pair[0], pair[1]), 0.8);
        }

        // Character n-grams make the encoder robust to inflection and
        // work for unsegmented scripts.
        let chars: Vec<char> = folded.chars().collect();
        for n in CHAR_NGRAMS {
            if chars.len() < n {
                continue;
            }
            for window in chars.windows(n) {
                let gram: String = window.iter().collect();
                Self::accumulate(&mut acc, &format!("c{n}:{gram}"), 0.4);
            }
        }

        Ok(crate::math::normalize(acc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let e = HashEmbedder::new();
        let a = e.embed("Tell me about the pyramids").unwrap();
        let b = e.embed("Tell me about the pyramids").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_dimension_and_norm() {
        let e = HashEmbedder::new();
        let v = e.embed("hello world").unwrap();
        assert_eq!(v.len(), EMBEDDING_DIM);
        assert!((crate::math::l2_norm(&v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_input_is_zero_vector() {
        let e = HashEmbedder::new();
        let v = e.embed("").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        let e = HashEmbedder::new();
        let a = e.embed("Pyramids of Giza!").unwrap();
        let b = e.embed("pyramids of giza").unwrap();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_similar_texts_are_closer_than_unrelated() {
        let e = HashEmbedder::new();
        let a = e.embed("opening hours of the egyptian museum").unwrap();
        let b = e.embed("when does the egyptian museum open").unwrap();
        let c = e.embed("book a nile dinner cruise for tomorrow").unwrap();

        let sim_related = cosine_similarity(&a, &b);
        let sim_unrelated = cosine_similarity(&a, &c);
        assert!(
            sim_related > sim_unrelated,
            "related {sim_related} <= unrelated {sim_unrelated}"
        );
    }

    #[test]
    fn test_arabic_text_embeds() {
        let e = HashEmbedder::new();
        let v = e.embed("بكام تذكرة الأهرامات؟").unwrap();
        assert!((crate::math::l2_norm(&v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_batch_matches_single() {
        let e = HashEmbedder::new();
        let batch = e.embed_batch(&["one", "two"]).unwrap();
        assert_eq!(batch[0], e.embed("one").unwrap());
        assert_eq!(batch[1], e.embed("two").unwrap());
    }
}
