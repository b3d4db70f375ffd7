//! docqa-query - Hybrid retrieval and confidence scoring
//!
//! This crate runs vector similarity search and keyword search side by side,
//! fuses their scores into one ranking, collapses redundant chunks, and
//! scores how much the resulting context can be trusted.
//!
//! # Features
//!
//! - Hybrid, vector-only and keyword-only strategies
//! - Weighted fusion with an agreement bonus
//! - Graceful degradation when one source fails or times out
//! - Overlap-aware deduplication and a total result order
//! - Confidence scoring with an answer/hedge/decline assessment
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_query::{RetrievalEngine, RetrieveOptions};
//!
//! let engine = RetrievalEngine::new(indexes, embedder, config.retrieval.clone())?;
//! let options = RetrieveOptions::from(&config.retrieval);
//! let results = engine.retrieve("how long to boil water", &options).await?;
//! ```

mod confidence;
mod engine;
mod fusion;
mod rank;

pub use confidence::ConfidenceScorer;
pub use engine::{Retrieval, RetrievalEngine, RetrieveOptions};
pub use fusion::{fuse, normalize_keyword_scores, Fused};
pub use rank::{compare_results, conflicts, dedup};

// Re-export for convenience
pub use docqa_core::{ConfidenceRecord, MatchSource, RetrievalResult, SearchStrategy};
