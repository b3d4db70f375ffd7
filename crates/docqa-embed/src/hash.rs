//! Feature-hashing embedder.

use async_trait::async_trait;
use docqa_core::text::{estimate_tokens, tokenize};
use docqa_core::{DocQaError, Embedder, EmbeddingConfig, Result};

use crate::l2_normalize;

/// Deterministic bag-of-words embedder.
///
/// Each keyword term is hashed with blake3 into one of `dimension` buckets
/// with a hash-derived sign, then the vector is L2 normalized. Texts sharing
/// terms get positive cosine similarity; texts with no terms embed to zero.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    max_tokens: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize, max_tokens: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(DocQaError::config("embedding dimension must be > 0"));
        }
        if max_tokens == 0 {
            return Err(DocQaError::config("embedding max_tokens must be > 0"));
        }
        Ok(Self {
            dimension,
            max_tokens,
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::new(config.dimension, config.max_tokens)
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for term in tokenize(text) {
            let hash = blake3::hash(term.as_bytes());
            let bytes = hash.as_bytes();
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&bytes[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        l2_normalize(v)
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dimension: 384,
            max_tokens: 512,
        }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_one(text))
    }

    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(estimate_tokens(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_tokens(&self) -> usize {
        self.max_tokens
    }
}
