//! docqa-pipeline - Ingestion and query orchestration
//!
//! Ties a chunking strategy, an embedding provider and an explicitly opened
//! [`IndexHandle`] together:
//!
//! - [`Pipeline::ingest`] versions a document, chunks it, embeds the chunks
//!   and indexes them for vector and keyword search.
//! - [`Pipeline::query`] runs hybrid retrieval and scores the confidence of
//!   the result set.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docqa_pipeline::Pipeline;
//!
//! let store = Arc::new(MemoryStore::new(384));
//! let pipeline = Pipeline::open(
//!     config,
//!     build_chunker(&config.chunking)?,
//!     Arc::new(HashEmbedder::default()),
//!     IndexHandle::from_store(store),
//! )?;
//! pipeline.ingest("file://manual.txt", &text).await?;
//! let context = pipeline.query("how to purify water", &pipeline.default_options()).await?;
//! pipeline.close().await?;
//! ```

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};
use ulid::Ulid;

use docqa_core::{
    truncate_to_limit, ChunkForest, Chunker, DocQaConfig, DocQaError, Document, Embedder,
    IndexHandle, Provider, Result, ScoredContext, Stats,
};
use docqa_query::{ConfidenceScorer, RetrievalEngine, RetrieveOptions};

/// Outcome of ingesting one document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub source_uri: String,
    pub doc_id: Ulid,
    pub version: u32,

    /// Chunks written for this version.
    pub chunks: usize,

    /// Chunks that received an embedding.
    pub embedded: usize,

    /// Content matched the latest stored version; nothing was written.
    pub unchanged: bool,

    /// Version whose chunks were removed from the indexes.
    pub superseded: Option<u32>,
}

/// Outcome of ingesting a batch of documents.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub ingested: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub reports: Vec<IngestReport>,
}

/// Document QA pipeline over an injected chunker, embedder and index handle.
pub struct Pipeline {
    config: DocQaConfig,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn Embedder>,
    indexes: IndexHandle,
    engine: RetrievalEngine,
    confidence: ConfidenceScorer,
}

impl Pipeline {
    /// Validate `config` and wire the collaborators together.
    ///
    /// The caller owns the lifecycle of `indexes`; [`Pipeline::close`]
    /// releases them.
    pub fn open(
        config: DocQaConfig,
        chunker: Arc<dyn Chunker>,
        embedder: Arc<dyn Embedder>,
        indexes: IndexHandle,
    ) -> Result<Self> {
        config.validate()?;
        let engine =
            RetrievalEngine::new(indexes.clone(), embedder.clone(), config.retrieval.clone())?;
        let confidence = ConfidenceScorer::new(config.confidence.clone())?;
        info!(
            "Pipeline opened: granularities={:?}, dimension={}",
            chunker.granularities(),
            embedder.dimension()
        );

        Ok(Self {
            config,
            chunker,
            embedder,
            indexes,
            engine,
            confidence,
        })
    }

    pub fn config(&self) -> &DocQaConfig {
        &self.config
    }

    /// Retrieval options taken from the configured defaults.
    pub fn default_options(&self) -> RetrieveOptions {
        RetrieveOptions::from(&self.config.retrieval)
    }

    /// Ingest `content` under `source_uri`.
    ///
    /// Unchanged content is a no-op. Changed content becomes the next
    /// version of the document and the previous version's chunks leave both
    /// indexes. When embedding fails the chunks are stored without
    /// embeddings and stay keyword searchable.
    pub async fn ingest(&self, source_uri: &str, content: &str) -> Result<IngestReport> {
        let start = Instant::now();
        let previous = self
            .indexes
            .chunks
            .latest_document(source_uri)
            .await
            .map_err(|e| e.into_provider(Provider::ChunkStore))?;

        if let Some(prev) = &previous {
            if !prev.content_changed(content) {
                debug!("{} unchanged at v{}", source_uri, prev.version);
                return Ok(IngestReport {
                    source_uri: source_uri.to_string(),
                    doc_id: prev.id,
                    version: prev.version,
                    chunks: 0,
                    embedded: 0,
                    unchanged: true,
                    superseded: None,
                });
            }
        }

        let doc = match &previous {
            Some(prev) => prev.supersede(content),
            None => Document::new(source_uri, content),
        };

        let data = self.chunker.chunk(content)?;
        let mut forest = ChunkForest::build(&doc, data)?;
        info!(
            "Chunked {} v{} into {} chunks",
            source_uri,
            doc.version,
            forest.len()
        );

        let embedded = self.embed_chunks(&mut forest).await;
        let chunks = forest.into_chunks();
        let ids: Vec<Ulid> = chunks.iter().map(|c| c.id).collect();

        // Index before persisting: until the document row lands, a failed
        // ingest leaves the previous version as the latest one.
        let mut vectors = 0;
        for chunk in &chunks {
            if let Some(embedding) = &chunk.embedding {
                match self.indexes.vectors.upsert(chunk.id, embedding, chunk.meta()).await {
                    Ok(()) => vectors += 1,
                    Err(e) => warn!("Vector upsert failed for chunk {}: {}", chunk.id, e),
                }
            }
        }

        for chunk in &chunks {
            if let Err(e) = self.indexes.keywords.index(chunk.id, &chunk.content).await {
                self.discard(&ids).await;
                return Err(e.into_provider(Provider::KeywordIndex));
            }
        }

        if let Err(e) = self.indexes.chunks.insert_document(&doc).await {
            self.discard(&ids).await;
            return Err(e.into_provider(Provider::ChunkStore));
        }
        if let Err(e) = self.indexes.chunks.insert_chunks(&chunks).await {
            if let Err(undo) = self.indexes.chunks.remove_document(doc.id, doc.version).await {
                warn!("Failed to roll back {} v{}: {}", source_uri, doc.version, undo);
            }
            self.discard(&ids).await;
            return Err(e.into_provider(Provider::ChunkStore));
        }

        let superseded = match &previous {
            Some(prev) => {
                self.retire(prev).await?;
                Some(prev.version)
            }
            None => None,
        };

        info!(
            "Ingested {} v{}: {} chunks, {} embedded, {} vectors in {}ms",
            source_uri,
            doc.version,
            chunks.len(),
            embedded,
            vectors,
            start.elapsed().as_millis()
        );

        Ok(IngestReport {
            source_uri: source_uri.to_string(),
            doc_id: doc.id,
            version: doc.version,
            chunks: chunks.len(),
            embedded,
            unchanged: false,
            superseded,
        })
    }

    /// Ingest `(source_uri, content)` pairs. A collaborator failure is
    /// retried once; remaining failures are logged and counted and never
    /// stop the batch.
    pub async fn ingest_batch<U, C>(&self, documents: &[(U, C)]) -> BatchReport
    where
        U: AsRef<str>,
        C: AsRef<str>,
    {
        let mut report = BatchReport::default();
        for (uri, content) in documents {
            let mut outcome = self.ingest(uri.as_ref(), content.as_ref()).await;
            if let Err(e) = &outcome {
                if e.is_recoverable() {
                    warn!("Retrying {} after {}", uri.as_ref(), e);
                    outcome = self.ingest(uri.as_ref(), content.as_ref()).await;
                }
            }
            match outcome {
                Ok(r) => {
                    if r.unchanged {
                        report.unchanged += 1;
                    } else {
                        report.ingested += 1;
                    }
                    report.reports.push(r);
                }
                Err(e) => {
                    warn!("Failed to ingest {}: {} ({})", uri.as_ref(), e, e.error_code());
                    report.failed += 1;
                }
            }
        }
        info!(
            "Batch complete: {} ingested, {} unchanged, {} failed",
            report.ingested, report.unchanged, report.failed
        );
        report
    }

    /// Retrieve context for `question` and score its confidence.
    pub async fn query(&self, question: &str, options: &RetrieveOptions) -> Result<ScoredContext> {
        let start = Instant::now();
        let retrieval = self.engine.search(question, options).await?;
        let confidence = self.confidence.score(&retrieval.results);
        let assessment = self.confidence.assess(confidence.confidence);

        Ok(ScoredContext {
            query: question.to_string(),
            results: retrieval.results,
            confidence,
            assessment,
            strategy: retrieval.strategy,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    pub async fn stats(&self) -> Result<Stats> {
        self.indexes.chunks.stats().await
    }

    /// Close the index collaborators.
    pub async fn close(&self) -> Result<()> {
        info!("Closing pipeline");
        self.indexes.close().await
    }

    /// Embed every chunk in batches, returning how many got an embedding.
    async fn embed_chunks(&self, forest: &mut ChunkForest) -> usize {
        let inputs: Vec<(Ulid, &str)> = forest
            .chunks()
            .iter()
            .map(|c| {
                let text = match truncate_to_limit(self.embedder.as_ref(), &c.content) {
                    Ok(t) => t,
                    Err(e) => {
                        debug!("Token count failed for chunk {}: {}", c.id, e);
                        c.content.as_str()
                    }
                };
                (c.id, text)
            })
            .collect();

        let batch_size = self.config.embedding.batch_size.max(1);
        let mut embeddings: Vec<(Ulid, Vec<f32>)> = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(batch_size) {
            let texts: Vec<&str> = batch.iter().map(|(_, t)| *t).collect();
            match self.embedder.embed_documents(&texts).await {
                Ok(vectors) if vectors.len() == batch.len() => {
                    embeddings.extend(batch.iter().map(|(id, _)| *id).zip(vectors));
                }
                Ok(vectors) => warn!(
                    "Embedding provider returned {} vectors for {} chunks, storing them unembedded",
                    vectors.len(),
                    batch.len()
                ),
                Err(e) => warn!(
                    "Embedding failed for {} chunks, storing them unembedded: {}",
                    batch.len(),
                    e
                ),
            }
        }

        let mut embedded = 0;
        for (id, embedding) in embeddings {
            if forest.set_embedding(id, embedding) {
                embedded += 1;
            }
        }
        embedded
    }

    /// Drop the chunks of a failed ingest from both indexes.
    async fn discard(&self, ids: &[Ulid]) {
        if let Err(e) = self.indexes.vectors.remove(ids).await {
            warn!("Failed to drop {} vectors of a failed ingest: {}", ids.len(), e);
        }
        if let Err(e) = self.indexes.keywords.remove(ids).await {
            warn!("Failed to drop {} keyword entries of a failed ingest: {}", ids.len(), e);
        }
    }

    /// Remove a superseded version's chunks from both indexes.
    async fn retire(&self, prev: &Document) -> Result<()> {
        let old = self
            .indexes
            .chunks
            .chunks_for_document(prev.id, prev.version)
            .await
            .map_err(|e| e.into_provider(Provider::ChunkStore))?;
        let ids: Vec<Ulid> = old.iter().map(|c| c.id).collect();
        if ids.is_empty() {
            return Ok(());
        }

        self.indexes
            .vectors
            .remove(&ids)
            .await
            .map_err(|e| e.into_provider(Provider::VectorIndex))?;
        self.indexes
            .keywords
            .remove(&ids)
            .await
            .map_err(|e| e.into_provider(Provider::KeywordIndex))?;
        debug!(
            "Retired {} chunks of {} v{}",
            ids.len(),
            prev.source_uri,
            prev.version
        );
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("granularities", &self.chunker.granularities())
            .field("dimension", &self.embedder.dimension())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use docqa_chunk::build_chunker;
    use docqa_core::{Granularity, KeywordIndex, SearchStrategy};
    use docqa_embed::HashEmbedder;
    use docqa_store::MemoryStore;

    const DIM: usize = 128;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed_documents(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Err(DocQaError::embedding("rate limited"))
        }

        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Err(DocQaError::embedding("rate limited"))
        }

        fn count_tokens(&self, text: &str) -> Result<usize> {
            Ok(docqa_core::text::estimate_tokens(text))
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn max_tokens(&self) -> usize {
            512
        }
    }

    /// Keyword index over a [`MemoryStore`] that fails a set number of
    /// `index` calls.
    struct FlakyKeywords {
        inner: Arc<MemoryStore>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl KeywordIndex for FlakyKeywords {
        async fn index(&self, chunk_id: Ulid, content: &str) -> Result<()> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DocQaError::database("disk I/O error"));
            }
            self.inner.index(chunk_id, content).await
        }

        async fn search(&self, query: &str, k: usize) -> Result<Vec<(Ulid, f32)>> {
            self.inner.search(query, k).await
        }

        async fn remove(&self, chunk_ids: &[Ulid]) -> Result<()> {
            KeywordIndex::remove(self.inner.as_ref(), chunk_ids).await
        }
    }

    fn flaky_pipeline() -> (Pipeline, Arc<FlakyKeywords>) {
        let config = config();
        let store = Arc::new(MemoryStore::new(DIM));
        let keywords = Arc::new(FlakyKeywords {
            inner: store.clone(),
            failures: AtomicUsize::new(0),
        });
        let chunker = build_chunker(&config.chunking).unwrap();
        let indexes = IndexHandle::new(store.clone(), keywords.clone(), store);
        let pipeline = Pipeline::open(
            config,
            chunker,
            Arc::new(HashEmbedder::new(DIM, 512).unwrap()),
            indexes,
        )
        .unwrap();
        (pipeline, keywords)
    }

    fn config() -> DocQaConfig {
        let mut config = DocQaConfig::default();
        config.embedding.dimension = DIM;
        config.chunking.paragraph.min_tokens = 5;
        config.chunking.paragraph.max_tokens = 40;
        config.chunking.paragraph.overlap_tokens = 0;
        config
    }

    fn pipeline_with(embedder: Arc<dyn Embedder>) -> (Pipeline, Arc<MemoryStore>) {
        let config = config();
        let store = Arc::new(MemoryStore::new(DIM));
        let chunker = build_chunker(&config.chunking).unwrap();
        let pipeline =
            Pipeline::open(config, chunker, embedder, IndexHandle::from_store(store.clone()))
                .unwrap();
        (pipeline, store)
    }

    fn pipeline() -> (Pipeline, Arc<MemoryStore>) {
        pipeline_with(Arc::new(HashEmbedder::new(DIM, 512).unwrap()))
    }

    const GUIDE: &str = "Boil water for at least one full minute before drinking it.\n\n\
        Store drinking water in sealed containers kept away from direct sunlight.\n\n\
        Canned food lasts for years when kept in a cool and dry place.";

    #[tokio::test]
    async fn test_ingest_and_query() {
        let (pipeline, _) = pipeline();
        let report = pipeline.ingest("file://guide.txt", GUIDE).await.unwrap();
        assert!(!report.unchanged);
        assert_eq!(report.version, 1);
        assert!(report.chunks > 0);
        assert_eq!(report.embedded, report.chunks);

        let context = pipeline
            .query("boil water", &pipeline.default_options())
            .await
            .unwrap();
        assert!(!context.results.is_empty());
        assert!(context.results[0].chunk.content.contains("Boil water"));
        assert_eq!(context.strategy, SearchStrategy::Hybrid);
        assert!(context.confidence.confidence <= context.confidence.top_score);
        assert_eq!(context.query, "boil water");
    }

    #[tokio::test]
    async fn test_reingest_unchanged_is_noop() {
        let (pipeline, _) = pipeline();
        pipeline.ingest("file://guide.txt", GUIDE).await.unwrap();
        let before = pipeline.stats().await.unwrap();

        let report = pipeline.ingest("file://guide.txt", GUIDE).await.unwrap();
        assert!(report.unchanged);
        assert_eq!(report.version, 1);

        let after = pipeline.stats().await.unwrap();
        assert_eq!(before.documents, after.documents);
        assert_eq!(before.chunks, after.chunks);
    }

    #[tokio::test]
    async fn test_changed_content_supersedes() {
        let (pipeline, _) = pipeline();
        let first = pipeline.ingest("file://guide.txt", GUIDE).await.unwrap();
        let second = pipeline
            .ingest(
                "file://guide.txt",
                "Purify water with iodine tablets when boiling is impossible.",
            )
            .await
            .unwrap();

        assert_eq!(second.doc_id, first.doc_id);
        assert_eq!(second.version, 2);
        assert_eq!(second.superseded, Some(1));

        let options = RetrieveOptions {
            strategy: SearchStrategy::KeywordOnly,
            ..pipeline.default_options()
        };
        let old = pipeline.query("canned food", &options).await.unwrap();
        assert!(old.results.is_empty(), "superseded chunks left the index");

        let new = pipeline.query("iodine tablets", &options).await.unwrap();
        assert_eq!(new.results.len(), 1);
        assert_eq!(new.results[0].chunk.version, 2);
    }

    #[tokio::test]
    async fn test_embedding_failure_keeps_chunks_keyword_searchable() {
        let (pipeline, _) = pipeline_with(Arc::new(FailingEmbedder));
        let report = pipeline.ingest("file://guide.txt", GUIDE).await.unwrap();
        assert!(report.chunks > 0);
        assert_eq!(report.embedded, 0);

        let stats = pipeline.stats().await.unwrap();
        assert_eq!(stats.embeddings, 0);
        assert_eq!(stats.chunks, report.chunks as u64);

        let context = pipeline
            .query("canned food", &pipeline.default_options())
            .await
            .unwrap();
        assert_eq!(context.strategy, SearchStrategy::KeywordOnly);
        assert!(!context.results.is_empty());
    }

    #[tokio::test]
    async fn test_keyword_failure_keeps_previous_version() {
        let (pipeline, keywords) = flaky_pipeline();
        let first = pipeline.ingest("file://guide.txt", GUIDE).await.unwrap();
        let before = pipeline.stats().await.unwrap();

        const UPDATE: &str = "Purify water with iodine tablets when boiling is impossible.";
        keywords.failures.store(1, Ordering::SeqCst);
        let err = pipeline.ingest("file://guide.txt", UPDATE).await.unwrap_err();
        assert!(matches!(
            err,
            DocQaError::Provider {
                provider: Provider::KeywordIndex,
                ..
            }
        ));

        // Nothing of the failed version is left behind.
        let after = pipeline.stats().await.unwrap();
        assert_eq!(after.documents, before.documents);
        assert_eq!(after.chunks, before.chunks);
        assert_eq!(after.embeddings, before.embeddings);

        let keyword = RetrieveOptions {
            strategy: SearchStrategy::KeywordOnly,
            ..pipeline.default_options()
        };
        let old = pipeline.query("canned food", &keyword).await.unwrap();
        assert_eq!(old.results[0].chunk.version, first.version);
        assert!(pipeline
            .query("iodine tablets", &keyword)
            .await
            .unwrap()
            .results
            .is_empty());

        let retry = pipeline.ingest("file://guide.txt", UPDATE).await.unwrap();
        assert!(!retry.unchanged);
        assert_eq!(retry.version, 2);
        assert_eq!(retry.superseded, Some(1));

        assert!(pipeline
            .query("canned food", &keyword)
            .await
            .unwrap()
            .results
            .is_empty());
        let new = pipeline.query("iodine tablets", &keyword).await.unwrap();
        assert_eq!(new.results.len(), 1);
        assert_eq!(new.results[0].chunk.version, 2);
    }

    #[tokio::test]
    async fn test_batch_retries_collaborator_failure_once() {
        let (pipeline, keywords) = flaky_pipeline();
        keywords.failures.store(1, Ordering::SeqCst);
        let report = pipeline.ingest_batch(&[("file://guide.txt", GUIDE)]).await;
        assert_eq!(report.ingested, 1);
        assert_eq!(report.failed, 0);

        keywords.failures.store(2, Ordering::SeqCst);
        let report = pipeline
            .ingest_batch(&[("file://kit.txt", "Keep a first aid kit in every vehicle.")])
            .await;
        assert_eq!(report.ingested, 0);
        assert_eq!(report.failed, 1);
        assert!(pipeline
            .indexes
            .chunks
            .latest_document("file://kit.txt")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_batch_counts() {
        let (pipeline, _) = pipeline();
        let docs = vec![
            ("file://a.txt", GUIDE),
            ("file://b.txt", "Keep a first aid kit in every vehicle."),
            ("file://a.txt", GUIDE),
        ];
        let report = pipeline.ingest_batch(&docs).await;
        assert_eq!(report.ingested, 2);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.reports.len(), 3);
    }

    #[tokio::test]
    async fn test_hierarchical_chunker_injected() {
        let mut config = config();
        config.chunking.hierarchical = true;
        config.chunking.section.min_tokens = 1;
        config.chunking.sentence.min_tokens = 1;
        let store = Arc::new(MemoryStore::new(DIM));
        let chunker = build_chunker(&config.chunking).unwrap();
        let pipeline = Pipeline::open(
            config,
            chunker,
            Arc::new(HashEmbedder::new(DIM, 512).unwrap()),
            IndexHandle::from_store(store),
        )
        .unwrap();

        pipeline.ingest("file://guide.txt", GUIDE).await.unwrap();
        let options = RetrieveOptions {
            granularity: Some(Granularity::Sentence),
            ..pipeline.default_options()
        };
        let context = pipeline.query("sealed containers", &options).await.unwrap();
        assert!(!context.results.is_empty());
        assert!(context
            .results
            .iter()
            .all(|r| r.chunk.granularity == Granularity::Sentence && r.chunk.parent_id.is_some()));
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let mut config = config();
        config.retrieval.top_k = 0;
        let store = Arc::new(MemoryStore::new(DIM));
        let chunker = build_chunker(&config.chunking).unwrap();
        let result = Pipeline::open(
            config,
            chunker,
            Arc::new(HashEmbedder::new(DIM, 512).unwrap()),
            IndexHandle::from_store(store),
        );
        assert!(matches!(result, Err(DocQaError::Config { .. })));
    }
}
