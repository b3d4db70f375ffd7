//! In-memory index collaborators.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::debug;
use ulid::Ulid;

use docqa_core::text::tokenize;
use docqa_core::{
    Chunk, ChunkMeta, ChunkStore, DistanceMetric, DocQaError, Document, IndexFilter,
    KeywordIndex, Result, Stats, VectorIndex,
};

use crate::{check_dimension, cosine_distance, nearest};

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

#[derive(Default)]
struct Inner {
    /// Document versions keyed by source URI, oldest first.
    documents: HashMap<String, Vec<Document>>,
    chunks: HashMap<Ulid, Chunk>,
    vectors: HashMap<Ulid, (Vec<f32>, ChunkMeta)>,
    /// term -> chunk -> term frequency
    postings: HashMap<String, HashMap<Ulid, u32>>,
    /// Token length of each keyword-indexed chunk.
    lengths: HashMap<Ulid, u32>,
}

impl Inner {
    fn unindex(&mut self, chunk_id: Ulid) {
        if self.lengths.remove(&chunk_id).is_none() {
            return;
        }
        self.postings.retain(|_, docs| {
            docs.remove(&chunk_id);
            !docs.is_empty()
        });
    }

    fn bm25(&self, query: &str, k: usize) -> Vec<(Ulid, f32)> {
        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();
        if terms.is_empty() || self.lengths.is_empty() {
            return Vec::new();
        }

        let n = self.lengths.len() as f32;
        let avgdl = self.lengths.values().map(|&l| l as f32).sum::<f32>() / n;
        let mut scores: HashMap<Ulid, f32> = HashMap::new();

        for term in &terms {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let df = postings.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for (id, &tf) in postings {
                let dl = self.lengths.get(id).copied().unwrap_or(0) as f32;
                let tf = tf as f32;
                let norm = (tf * (BM25_K1 + 1.0))
                    / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * dl / avgdl.max(1.0)));
                *scores.entry(*id).or_insert(0.0) += idf * norm;
            }
        }

        let mut results: Vec<(Ulid, f32)> = scores.into_iter().collect();
        results.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        results.truncate(k);
        results
    }
}

/// Vector index, keyword index and chunk store held in process memory.
pub struct MemoryStore {
    dimension: usize,
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| DocQaError::internal(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| DocQaError::internal(e.to_string()))
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        let mut inner = self.write()?;
        let versions = inner.documents.entry(doc.source_uri.clone()).or_default();
        if versions.iter().any(|d| d.version == doc.version) {
            return Err(DocQaError::invalid_argument(format!(
                "document {} v{} already stored",
                doc.id, doc.version
            )));
        }
        versions.push(doc.clone());
        versions.sort_by_key(|d| d.version);
        Ok(())
    }

    async fn latest_document(&self, source_uri: &str) -> Result<Option<Document>> {
        let inner = self.read()?;
        Ok(inner
            .documents
            .get(source_uri)
            .and_then(|versions| versions.last())
            .cloned())
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut inner = self.write()?;
        for chunk in chunks {
            inner.chunks.insert(chunk.id, chunk.clone());
        }
        debug!("Inserted {} chunks", chunks.len());
        Ok(())
    }

    async fn remove_document(&self, doc_id: Ulid, version: u32) -> Result<()> {
        let mut inner = self.write()?;
        for versions in inner.documents.values_mut() {
            versions.retain(|d| !(d.id == doc_id && d.version == version));
        }
        inner.documents.retain(|_, versions| !versions.is_empty());
        inner
            .chunks
            .retain(|_, c| !(c.doc_id == doc_id && c.version == version));
        Ok(())
    }

    async fn get_chunks(&self, ids: &[Ulid]) -> Result<Vec<Chunk>> {
        let inner = self.read()?;
        Ok(ids.iter().filter_map(|id| inner.chunks.get(id).cloned()).collect())
    }

    async fn chunks_for_document(&self, doc_id: Ulid, version: u32) -> Result<Vec<Chunk>> {
        let inner = self.read()?;
        let mut chunks: Vec<Chunk> = inner
            .chunks
            .values()
            .filter(|c| c.doc_id == doc_id && c.version == version)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| (c.granularity, c.chunk_index));
        Ok(chunks)
    }

    async fn stats(&self) -> Result<Stats> {
        let inner = self.read()?;
        let documents = inner.documents.values().map(|v| v.len() as u64).sum();
        let storage_bytes = inner
            .documents
            .values()
            .flatten()
            .map(|d| d.byte_size as u64)
            .sum::<u64>()
            + inner
                .vectors
                .values()
                .map(|(v, _)| (v.len() * 4) as u64)
                .sum::<u64>();

        Ok(Stats {
            documents,
            chunks: inner.chunks.len() as u64,
            embeddings: inner.vectors.len() as u64,
            storage_bytes,
        })
    }
}

#[async_trait]
impl VectorIndex for MemoryStore {
    async fn upsert(&self, chunk_id: Ulid, vector: &[f32], meta: ChunkMeta) -> Result<()> {
        check_dimension(self.dimension, vector)?;
        self.write()?.vectors.insert(chunk_id, (vector.to_vec(), meta));
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<(Ulid, f32)>> {
        check_dimension(self.dimension, vector)?;
        let inner = self.read()?;
        let hits = inner
            .vectors
            .iter()
            .filter(|(_, (_, meta))| filter.map_or(true, |f| f.matches(meta)))
            .map(|(id, (v, _))| (*id, cosine_distance(vector, v)))
            .collect();
        Ok(nearest(hits, k))
    }

    async fn remove(&self, chunk_ids: &[Ulid]) -> Result<()> {
        let mut inner = self.write()?;
        for id in chunk_ids {
            inner.vectors.remove(id);
        }
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Cosine
    }
}

#[async_trait]
impl KeywordIndex for MemoryStore {
    async fn index(&self, chunk_id: Ulid, content: &str) -> Result<()> {
        let terms = tokenize(content);
        let mut inner = self.write()?;
        inner.unindex(chunk_id);

        let mut tf: HashMap<String, u32> = HashMap::new();
        for term in &terms {
            *tf.entry(term.clone()).or_insert(0) += 1;
        }
        for (term, count) in tf {
            inner.postings.entry(term).or_default().insert(chunk_id, count);
        }
        inner.lengths.insert(chunk_id, terms.len() as u32);
        Ok(())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<(Ulid, f32)>> {
        Ok(self.read()?.bm25(query, k))
    }

    async fn remove(&self, chunk_ids: &[Ulid]) -> Result<()> {
        let mut inner = self.write()?;
        for id in chunk_ids {
            inner.unindex(*id);
        }
        Ok(())
    }
}
