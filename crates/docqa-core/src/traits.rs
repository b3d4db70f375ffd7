//! Core traits defining the interfaces between components.

use std::sync::Arc;

use async_trait::async_trait;
use ulid::Ulid;

use crate::error::Result;
use crate::text::truncate_at_word;
use crate::types::{Chunk, ChunkData, ChunkMeta, DistanceMetric, Document, Granularity, IndexFilter, Stats};

/// Embedding model trait.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of document texts.
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Count tokens in text.
    fn count_tokens(&self, text: &str) -> Result<usize>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Get the maximum context length in tokens.
    fn max_tokens(&self) -> usize;
}

/// Bound `text` to the embedder's input limit, cutting at a word boundary.
pub fn truncate_to_limit<'a, E: Embedder + ?Sized>(embedder: &E, text: &'a str) -> Result<&'a str> {
    let limit = embedder.max_tokens();
    if embedder.count_tokens(text)? <= limit {
        return Ok(text);
    }

    // Binary search the longest byte prefix that fits.
    let (mut lo, mut hi) = (0usize, text.len());
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        let candidate = truncate_at_word(text, mid);
        if embedder.count_tokens(candidate)? <= limit {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    Ok(truncate_at_word(text, lo))
}

/// Nearest-neighbour store for chunk embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the vector for a chunk.
    async fn upsert(&self, chunk_id: Ulid, vector: &[f32], meta: ChunkMeta) -> Result<()>;

    /// Return up to `k` nearest chunks as `(chunk_id, distance)`, closest first.
    ///
    /// Vectors whose dimension differs from [`VectorIndex::dimension`] are rejected.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<(Ulid, f32)>>;

    /// Drop vectors for the given chunks.
    async fn remove(&self, chunk_ids: &[Ulid]) -> Result<()>;

    /// Dimensionality of stored vectors.
    fn dimension(&self) -> usize;

    /// Distance metric used by [`VectorIndex::query`].
    fn metric(&self) -> DistanceMetric;

    /// Release resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Full-text search over chunk content.
#[async_trait]
pub trait KeywordIndex: Send + Sync {
    /// Index a chunk's content.
    async fn index(&self, chunk_id: Ulid, content: &str) -> Result<()>;

    /// Return up to `k` matches as `(chunk_id, rank)`, higher rank first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<(Ulid, f32)>>;

    /// Drop the given chunks from the index.
    async fn remove(&self, chunk_ids: &[Ulid]) -> Result<()>;

    /// Release resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Persistence for documents and chunk records.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn insert_document(&self, doc: &Document) -> Result<()>;

    /// Latest version stored for a source URI.
    async fn latest_document(&self, source_uri: &str) -> Result<Option<Document>>;

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    /// Delete one document version together with its chunk records.
    async fn remove_document(&self, doc_id: Ulid, version: u32) -> Result<()>;

    /// Fetch chunks by id. Unknown ids are skipped.
    async fn get_chunks(&self, ids: &[Ulid]) -> Result<Vec<Chunk>>;

    async fn chunks_for_document(&self, doc_id: Ulid, version: u32) -> Result<Vec<Chunk>>;

    async fn stats(&self) -> Result<Stats>;

    /// Release resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Explicitly constructed handle to the index collaborators.
///
/// Opened by the caller, shared by ingestion and retrieval, and closed once
/// with [`IndexHandle::close`].
#[derive(Clone)]
pub struct IndexHandle {
    pub vectors: Arc<dyn VectorIndex>,
    pub keywords: Arc<dyn KeywordIndex>,
    pub chunks: Arc<dyn ChunkStore>,
}

impl IndexHandle {
    pub fn new(
        vectors: Arc<dyn VectorIndex>,
        keywords: Arc<dyn KeywordIndex>,
        chunks: Arc<dyn ChunkStore>,
    ) -> Self {
        Self {
            vectors,
            keywords,
            chunks,
        }
    }

    /// Build a handle from one store implementing all three collaborators.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: VectorIndex + KeywordIndex + ChunkStore + 'static,
    {
        Self {
            vectors: store.clone(),
            keywords: store.clone(),
            chunks: store,
        }
    }

    /// Close every collaborator, reporting the first failure.
    pub async fn close(&self) -> Result<()> {
        let vectors = self.vectors.close().await;
        let keywords = self.keywords.close().await;
        let chunks = self.chunks.close().await;
        vectors.and(keywords).and(chunks)
    }
}

/// Chunking strategy trait.
///
/// Implementations own their validated options and hold no mutable state, so
/// one instance can chunk many documents concurrently.
pub trait Chunker: Send + Sync {
    /// Chunk text content into spans.
    fn chunk(&self, content: &str) -> Result<Vec<ChunkData>>;

    /// Granularities this chunker emits.
    fn granularities(&self) -> Vec<Granularity>;
}
