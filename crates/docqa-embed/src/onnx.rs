//! ONNX Runtime embedder.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use ndarray::ArrayViewD;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Encoding, Tokenizer};
use tracing::{debug, info};

use docqa_core::{DocQaError, Embedder, EmbeddingConfig, Result};

use crate::l2_normalize;

/// Sentence embedding model loaded from `model.onnx` and `tokenizer.json`.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimension: usize,
    max_tokens: usize,
}

impl OnnxEmbedder {
    /// Load the model files found in `config.model_path`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        config.validate()?;
        let dir = config.model_path.as_path();
        Self::new(
            dir.join("model.onnx"),
            dir.join("tokenizer.json"),
            config.dimension,
            config.max_tokens,
            config.num_threads,
        )
    }

    pub fn new(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        dimension: usize,
        max_tokens: usize,
        num_threads: usize,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()
            .map_err(|e| DocQaError::embedding(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| DocQaError::embedding(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(num_threads.max(1))
            .map_err(|e| DocQaError::embedding(format!("Failed to set thread count: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| DocQaError::embedding(format!("Failed to load model: {}", e)))?;

        let tokenizer = Tokenizer::from_file(tokenizer_path.as_ref())
            .map_err(|e| DocQaError::embedding(format!("Failed to load tokenizer: {}", e)))?;

        info!(
            "Embedder initialized: dim={}, max_tokens={}",
            dimension, max_tokens
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimension,
            max_tokens,
        })
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| DocQaError::embedding(format!("Tokenization failed: {}", e)))?;

        // Sequences past the model limit are truncated.
        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(self.max_tokens);
        let batch_size = encodings.len();
        debug!("Embedding batch: size={}, max_len={}", batch_size, max_len);

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];
        for (i, encoding) in encodings.iter().enumerate() {
            let row = i * max_len;
            for (j, (&id, &mask)) in encoding
                .get_ids()
                .iter()
                .zip(encoding.get_attention_mask())
                .take(max_len)
                .enumerate()
            {
                input_ids[row + j] = id as i64;
                attention_mask[row + j] = mask as i64;
            }
        }

        let input_ids = Tensor::from_array((vec![batch_size, max_len], input_ids))
            .map_err(|e| DocQaError::embedding(format!("Failed to create input tensor: {}", e)))?;
        let attention_mask = Tensor::from_array((vec![batch_size, max_len], attention_mask))
            .map_err(|e| DocQaError::embedding(format!("Failed to create mask tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| DocQaError::embedding(format!("Failed to lock session: {}", e)))?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask
            ])
            .map_err(|e| DocQaError::embedding(format!("Inference failed: {}", e)))?;

        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| DocQaError::embedding("No output tensor found"))?;
        let view = output
            .try_extract_array::<f32>()
            .map_err(|e| DocQaError::embedding(format!("Failed to extract tensor: {}", e)))?;

        let embeddings = match view.ndim() {
            3 => mean_pool(&view, &encodings, max_len),
            2 => (0..batch_size)
                .map(|i| l2_normalize((0..view.shape()[1]).map(|j| view[[i, j]]).collect()))
                .collect(),
            _ => {
                return Err(DocQaError::embedding(format!(
                    "Unexpected output shape: {:?}",
                    view.shape()
                )))
            }
        };

        for e in &embeddings {
            if e.len() != self.dimension {
                return Err(DocQaError::DimensionMismatch {
                    expected: self.dimension,
                    actual: e.len(),
                });
            }
        }
        Ok(embeddings)
    }
}

/// Attention-masked mean over the sequence axis of `[batch, seq, hidden]`.
fn mean_pool(tensor: &ArrayViewD<'_, f32>, encodings: &[Encoding], max_len: usize) -> Vec<Vec<f32>> {
    let seq_len = tensor.shape()[1].min(max_len);
    let hidden = tensor.shape()[2];

    encodings
        .iter()
        .enumerate()
        .map(|(i, encoding)| {
            let mut sum = vec![0.0f32; hidden];
            let mut count = 0usize;
            for (j, &m) in encoding.get_attention_mask().iter().take(seq_len).enumerate() {
                if m == 1 {
                    count += 1;
                    for (k, s) in sum.iter_mut().enumerate() {
                        *s += tensor[[i, j, k]];
                    }
                }
            }
            if count > 0 {
                for s in &mut sum {
                    *s /= count as f32;
                }
            }
            l2_normalize(sum)
        })
        .collect()
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch(texts)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| DocQaError::embedding("No embedding returned"))
    }

    fn count_tokens(&self, text: &str) -> Result<usize> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| DocQaError::embedding(format!("Tokenization failed: {}", e)))?;
        Ok(encoding.get_ids().len())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_tokens(&self) -> usize {
        self.max_tokens
    }
}
