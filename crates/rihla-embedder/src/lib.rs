//! Sentence embeddings for tourism-domain semantic search.
//!
//! Two encoders behind one [`Embedder`] trait:
//!
//! - [`HashEmbedder`] — deterministic feature-hashing encoder. No model
//!   files, no downloads, identical vectors across runs and machines.
//!   This is the default and what every test uses.
//! - `BgeEmbedder` (feature `bge`) — Candle-backed multilingual
//!   transformer. Downloads weights from the HuggingFace Hub on first
//!   use and produces the same 384-dimensional output shape.
//!
//! All encoders L2-normalize their output, so dot product == cosine
//! similarity.

pub mod hash;
pub mod math;

#[cfg(feature = "bge")]
pub mod bge;

pub use hash::HashEmbedder;
pub use math::{compute_centroid, cosine_similarity, l2_norm, normalize};

#[cfg(feature = "bge")]
pub use bge::BgeEmbedder;

/// Embedding dimension shared by every encoder in this crate.
pub const EMBEDDING_DIM: usize = 384;

/// Errors from embedding computation.
#[derive(Debug, thiserror::Error)]
pub enum EmbedderError {
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("failed to tokenize input: {0}")]
    Tokenization(String),

    #[error("failed to compute embedding: {0}")]
    Embedding(String),
}

/// A sentence encoder producing fixed-dimension, L2-normalized vectors.
///
/// Implementations must be thread-safe; inference is dispatched from a
/// bounded blocking-worker group.
pub trait Embedder: Send + Sync {
    /// Embedding dimension of this encoder.
    fn dim(&self) -> usize;

    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed a batch of texts. The default implementation loops.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}
