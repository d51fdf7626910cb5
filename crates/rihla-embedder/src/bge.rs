//! Candle-backed multilingual sentence encoder.
//!
//! Loads a BERT-architecture multilingual model from the HuggingFace Hub
//! and computes 384-dimensional embeddings with attention-masked mean
//! pooling. Output is L2 normalized so dot product == cosine similarity,
//! matching [`crate::HashEmbedder`]'s contract.

use crate::{Embedder, EmbedderError, EMBEDDING_DIM};
use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{api::sync::Api, Repo, RepoType};
use tokenizers::Tokenizer;
use tracing::{debug, info};

/// Default model repository on the HuggingFace Hub.
///
/// Multilingual MiniLM covers the supported conversation languages with
/// a 384-dimensional output, so no storage schema changes are needed
/// when switching encoders.
const MODEL_REPO: &str = "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2";

/// Multilingual transformer encoder.
pub struct BgeEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl BgeEmbedder {
    /// Load the default multilingual model, downloading it if needed.
    ///
    /// Weights are cached in the HuggingFace cache directory.
    pub fn new() -> Result<Self> {
        Self::with_model(MODEL_REPO)
    }

    /// Load a specific BERT-architecture model by Hub repository name.
    pub fn with_model(model_name: &str) -> Result<Self> {
        info!("Loading embedding model: {}", model_name);

        let device = Device::Cpu;

        let api = Api::new().context("Failed to create HuggingFace API client")?;
        let repo = api.repo(Repo::new(model_name.to_string(), RepoType::Model));

        let config_path = repo
            .get("config.json")
            .context("Failed to download config.json")?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .context("Failed to download tokenizer.json")?;
        let weights_path = repo
            .get("model.safetensors")
            .context("Failed to download model.safetensors")?;

        debug!("Model files downloaded to cache");

        let config: Config = serde_json::from_str(
            &std::fs::read_to_string(&config_path).context("Failed to read config.json")?,
        )
        .context("Failed to parse config.json")?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)
                .context("Failed to load model weights")?
        };

        let model = BertModel::load(vb, &config).context("Failed to build BERT model")?;

        info!("Embedding model loaded: {}", model_name);

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    /// Tokenize a batch into the three model inputs, right-padding every
    /// sequence to the widest one in the batch. Token ids, the attention
    /// mask and segment ids share one `(batch, width)` shape.
    fn batch_inputs(&self, texts: &[&str]) -> Result<(Tensor, Tensor, Tensor)> {
        let encoded = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;
        let width = encoded.iter().map(|e| e.get_ids().len()).max().unwrap_or(1);

        let mut ids: Vec<u32> = Vec::with_capacity(texts.len() * width);
        let mut mask: Vec<u32> = Vec::with_capacity(texts.len() * width);
        let mut segments: Vec<u32> = Vec::with_capacity(texts.len() * width);
        for sequence in &encoded {
            let filled = sequence.get_ids().len();
            ids.extend_from_slice(sequence.get_ids());
            mask.extend_from_slice(sequence.get_attention_mask());
            segments.extend_from_slice(sequence.get_type_ids());
            // Padding positions: id 0, masked out, segment 0.
            ids.resize(ids.len() + width - filled, 0);
            mask.resize(mask.len() + width - filled, 0);
            segments.resize(segments.len() + width - filled, 0);
        }

        let shape = (texts.len(), width);
        Ok((
            Tensor::from_vec(ids, shape, &self.device)?,
            Tensor::from_vec(mask, shape, &self.device)?,
            Tensor::from_vec(segments, shape, &self.device)?,
        ))
    }

    fn forward_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let (ids, mask, segments) = self.batch_inputs(texts)?;

        // (batch, width, hidden)
        let hidden = self.model.forward(&ids, &segments, Some(&mask))?;

        // Attention-masked mean pooling: zero out padding positions,
        // then divide each row by its real token count.
        let weights = mask
            .to_dtype(DTYPE)?
            .unsqueeze(2)?
            .broadcast_as(hidden.shape())?;
        let token_counts = weights.sum(1)?.maximum(1e-9)?;
        let pooled = hidden.broadcast_mul(&weights)?.sum(1)?.broadcast_div(&token_counts)?;

        let unit = Self::to_unit_rows(&pooled)?;
        Ok(unit.to_vec2::<f32>()?)
    }

    /// Divide each row by its L2 norm, guarding degenerate rows.
    fn to_unit_rows(rows: &Tensor) -> Result<Tensor> {
        let norms = rows.mul(rows)?.sum_keepdim(1)?.sqrt()?.maximum(1e-12)?;
        Ok(rows.broadcast_div(&norms)?)
    }
}

impl Embedder for BgeEmbedder {
    fn dim(&self) -> usize {
        EMBEDDING_DIM
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut batch = self
            .forward_batch(&[text])
            .map_err(|e| EmbedderError::Embedding(e.to_string()))?;
        batch
            .pop()
            .ok_or_else(|| EmbedderError::Embedding("empty forward output".into()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        self.forward_batch(texts)
            .map_err(|e| EmbedderError::Embedding(e.to_string()))
    }
}
