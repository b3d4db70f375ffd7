//! docqa-chunk - Chunking strategies
//!
//! Splits document text into retrievable, quality-scored chunks.
//!
//! # Chunkers
//!
//! - [`StructuralChunker`]: packs headings, paragraphs and sentences into
//!   chunks of a single granularity.
//!
//! - [`HierarchicalChunker`]: builds a document/section/paragraph/sentence
//!   forest, each level chunked inside its parent.
//!
//! # Example
//!
//! ```rust
//! use docqa_chunk::{Chunker, StructuralChunker};
//! use docqa_core::ChunkConfig;
//!
//! let chunker = StructuralChunker::new(ChunkConfig::default()).unwrap();
//! let chunks = chunker.chunk("A.\n\nB. C. D.").unwrap();
//! assert_eq!(chunks.len(), 1);
//! ```

use std::sync::Arc;

mod hierarchical;
mod quality;
mod structural;
pub mod structure;

pub use hierarchical::HierarchicalChunker;
pub use quality::QualityScorer;
pub use structural::{StructuralChunker, TokenCounter};

// Re-export types for convenience
pub use docqa_core::{ChunkConfig, ChunkData, Chunker, ChunkingConfig, Granularity};

use docqa_core::Result;

/// Chunk `text` at paragraph granularity with `config`.
pub fn chunk(text: &str, config: &ChunkConfig) -> Result<Vec<ChunkData>> {
    StructuralChunker::new(config.clone())?.chunk(text)
}

/// Build the chunker selected by `config.hierarchical`.
pub fn build_chunker(config: &ChunkingConfig) -> Result<Arc<dyn Chunker>> {
    if config.hierarchical {
        Ok(Arc::new(HierarchicalChunker::new(config)?))
    } else {
        let chunker = StructuralChunker::new(config.paragraph.clone())?
            .with_quality(config.quality.clone())?;
        Ok(Arc::new(chunker))
    }
}
