//! Retrieval engine for hybrid search.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use ulid::Ulid;

use docqa_core::text::keyword_query;
use docqa_core::{
    truncate_to_limit, Chunk, DocQaError, Embedder, Granularity, IndexFilter, IndexHandle,
    Provider, Result, RetrievalConfig, RetrievalResult, SearchStrategy,
};

use crate::fusion::{fuse, normalize_keyword_scores};
use crate::rank::{compare_results, dedup};

/// Per-call retrieval options.
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    /// Maximum number of results to return.
    pub top_k: usize,

    /// Vector hits below this similarity are dropped.
    pub similarity_threshold: f32,

    pub strategy: SearchStrategy,

    /// Use quality score as the secondary sort key.
    pub enable_reranking: bool,

    /// Chunks below this quality score are dropped.
    pub min_quality: f32,

    /// Only return chunks of this granularity.
    pub granularity: Option<Granularity>,

    /// Only return chunks of these documents.
    pub doc_ids: Option<Vec<Ulid>>,
}

impl From<&RetrievalConfig> for RetrieveOptions {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            similarity_threshold: config.similarity_threshold,
            strategy: config.strategy,
            enable_reranking: config.enable_reranking,
            min_quality: config.min_quality,
            granularity: None,
            doc_ids: None,
        }
    }
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl RetrieveOptions {
    fn validate(&self, max_top_k: usize) -> Result<()> {
        if self.top_k == 0 || self.top_k > max_top_k {
            return Err(DocQaError::config(format!(
                "top_k must be in 1..={}",
                max_top_k
            )));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(DocQaError::config("similarity_threshold must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.min_quality) {
            return Err(DocQaError::config("min_quality must be in [0, 1]"));
        }
        Ok(())
    }

    fn filter(&self) -> Option<IndexFilter> {
        let filter = IndexFilter {
            doc_ids: self.doc_ids.clone(),
            granularity: self.granularity,
        };
        if filter.is_empty() {
            None
        } else {
            Some(filter)
        }
    }
}

/// Ranked results and the strategy that actually served them.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub results: Vec<RetrievalResult>,

    /// Differs from the requested strategy when a hybrid query degraded.
    pub strategy: SearchStrategy,
}

/// Hybrid retrieval engine.
///
/// Runs the vector branch (embed, then nearest-neighbour query) and the
/// keyword branch concurrently, fuses their scores, removes redundant
/// chunks and returns a deterministic ranking. The engine only reads from
/// the indexes.
pub struct RetrievalEngine {
    indexes: IndexHandle,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    /// Create a new retrieval engine.
    pub fn new(
        indexes: IndexHandle,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Result<Self> {
        config.validate()?;
        if embedder.dimension() != indexes.vectors.dimension() {
            return Err(DocQaError::config(format!(
                "embedder dimension {} does not match vector index dimension {}",
                embedder.dimension(),
                indexes.vectors.dimension()
            )));
        }
        Ok(Self {
            indexes,
            embedder,
            config,
        })
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve ranked chunks for a query.
    pub async fn retrieve(
        &self,
        query: &str,
        options: &RetrieveOptions,
    ) -> Result<Vec<RetrievalResult>> {
        Ok(self.search(query, options).await?.results)
    }

    /// Retrieve ranked chunks, also reporting the strategy that served them.
    pub async fn search(&self, query: &str, options: &RetrieveOptions) -> Result<Retrieval> {
        options.validate(self.config.max_top_k)?;
        let start = Instant::now();
        let requested = options.strategy;

        if query.trim().is_empty() {
            debug!("Blank query, nothing to retrieve");
            return Ok(Retrieval {
                results: Vec::new(),
                strategy: requested,
            });
        }

        info!("Retrieving for: {:?} ({:?})", query, requested);

        let fetch_k = (options.top_k * self.config.overfetch_factor).max(self.config.min_fetch);
        let filter = options.filter();

        let (vector, keyword) = tokio::join!(
            async {
                if requested.uses_vector() {
                    Some(
                        self.vector_branch(query, fetch_k, filter.as_ref(), options.similarity_threshold)
                            .await,
                    )
                } else {
                    None
                }
            },
            async {
                if requested.uses_keyword() {
                    Some(self.keyword_branch(query, fetch_k).await)
                } else {
                    None
                }
            }
        );

        let mut strategy = requested;
        let mut vector_failed = false;
        let vector_hits = match vector {
            None => Vec::new(),
            Some(Ok(hits)) => hits,
            Some(Err(e)) if requested == SearchStrategy::Hybrid => {
                warn!("Vector search failed, degrading to keyword only: {}", e);
                vector_failed = true;
                strategy = SearchStrategy::KeywordOnly;
                Vec::new()
            }
            Some(Err(e)) => return Err(e),
        };
        let keyword_hits = match keyword {
            None => Vec::new(),
            Some(Ok(hits)) => hits,
            Some(Err(e)) if requested == SearchStrategy::Hybrid => {
                if vector_failed {
                    warn!("Keyword search also failed, returning no results: {}", e);
                    return Ok(Retrieval {
                        results: Vec::new(),
                        strategy: requested,
                    });
                }
                warn!("Keyword search failed, degrading to vector only: {}", e);
                strategy = SearchStrategy::VectorOnly;
                Vec::new()
            }
            Some(Err(e)) => return Err(e),
        };

        debug!(
            "Vector search returned {} results, keyword search returned {} results",
            vector_hits.len(),
            keyword_hits.len()
        );

        // Hydrate and filter before normalizing, so the keyword batch maximum
        // comes from a hit that can still be returned.
        let mut ids: Vec<Ulid> = vector_hits.iter().map(|(id, _)| *id).collect();
        ids.extend(keyword_hits.iter().map(|(id, _)| *id));
        ids.sort();
        ids.dedup();
        let chunks = self
            .indexes
            .chunks
            .get_chunks(&ids)
            .await
            .map_err(|e| e.into_provider(Provider::ChunkStore))?;
        let mut by_id: HashMap<Ulid, Chunk> = chunks
            .into_iter()
            .filter(|c| Self::accepts(c, options))
            .map(|c| (c.id, c))
            .collect();

        let vector_hits: Vec<(Ulid, f32)> = vector_hits
            .into_iter()
            .filter(|(id, _)| by_id.contains_key(id))
            .collect();
        let keyword_hits: Vec<(Ulid, f32)> = keyword_hits
            .into_iter()
            .filter(|(id, _)| by_id.contains_key(id))
            .collect();

        let keyword_hits = normalize_keyword_scores(keyword_hits);
        let fused = fuse(&vector_hits, &keyword_hits, &self.config.fusion);
        debug!("Fused to {} candidates", fused.len());

        let mut results: Vec<RetrievalResult> = fused
            .into_iter()
            .filter_map(|f| {
                let chunk = by_id.remove(&f.chunk_id)?;
                Some(RetrievalResult {
                    rank: 0,
                    chunk,
                    similarity: f.similarity,
                    keyword_score: f.keyword_score,
                    combined_score: f.combined,
                    source: f.source,
                })
            })
            .collect();

        results.sort_by(|a, b| compare_results(a, b, options.enable_reranking));
        let mut results = dedup(results, self.config.dedup_margin);
        results.truncate(options.top_k);
        for (i, result) in results.iter_mut().enumerate() {
            result.rank = i as u32 + 1;
        }

        info!(
            "Retrieval completed in {}ms, returned {} results",
            start.elapsed().as_millis(),
            results.len()
        );

        Ok(Retrieval { results, strategy })
    }

    /// Post-hydration filters. Keyword hits are not filtered by the index.
    fn accepts(chunk: &Chunk, options: &RetrieveOptions) -> bool {
        if chunk.quality_score < options.min_quality {
            return false;
        }
        if options.granularity.is_some_and(|g| g != chunk.granularity) {
            return false;
        }
        match &options.doc_ids {
            Some(ids) => ids.contains(&chunk.doc_id),
            None => true,
        }
    }

    /// Embed the query and return `(chunk_id, similarity)` above `threshold`.
    async fn vector_branch(
        &self,
        query: &str,
        k: usize,
        filter: Option<&IndexFilter>,
        threshold: f32,
    ) -> Result<Vec<(Ulid, f32)>> {
        let text = truncate_to_limit(self.embedder.as_ref(), query)
            .map_err(|e| e.into_provider(Provider::Embedding))?;
        let embedding = self
            .with_timeout(
                Provider::Embedding,
                self.config.embed_timeout_ms,
                self.embedder.embed_query(text),
            )
            .await?;

        let hits = self
            .with_timeout(
                Provider::VectorIndex,
                self.config.vector_timeout_ms,
                self.indexes.vectors.query(&embedding, k, filter),
            )
            .await?;

        let metric = self.indexes.vectors.metric();
        Ok(hits
            .into_iter()
            .map(|(id, distance)| (id, metric.similarity(distance)))
            .filter(|(_, similarity)| *similarity >= threshold)
            .collect())
    }

    /// Search the keyword index with the normalized query terms.
    async fn keyword_branch(&self, query: &str, k: usize) -> Result<Vec<(Ulid, f32)>> {
        let Some(terms) = keyword_query(query) else {
            debug!("No searchable terms in query");
            return Ok(Vec::new());
        };
        self.with_timeout(
            Provider::KeywordIndex,
            self.config.keyword_timeout_ms,
            self.indexes.keywords.search(&terms, k),
        )
        .await
    }

    async fn with_timeout<T>(
        &self,
        provider: Provider,
        timeout_ms: u64,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
            Ok(result) => result.map_err(|e| e.into_provider(provider)),
            Err(_) => Err(DocQaError::Timeout {
                provider,
                timeout_ms,
            }),
        }
    }
}
