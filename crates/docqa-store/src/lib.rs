//! docqa-store - Index collaborators
//!
//! Implementations of the vector index, keyword index and chunk store
//! traits:
//!
//! - [`MemoryStore`]: everything in process memory; brute-force cosine
//!   search and BM25 keyword ranking.
//! - [`SqliteStore`]: SQLite with FTS5 keyword search and embeddings stored
//!   as little-endian f32 BLOBs.

mod memory;
mod schema;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

// Re-export schema for testing/migrations
pub use schema::SCHEMA;

use docqa_core::{DocQaError, Result};
use ulid::Ulid;

/// Cosine distance `1 - cos(a, b)`. A zero vector is at distance 1 from
/// everything.
pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na.sqrt() * nb.sqrt())
}

pub(crate) fn check_dimension(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(DocQaError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Keep the `k` closest hits, closest first, ties by id.
pub(crate) fn nearest(mut hits: Vec<(Ulid, f32)>, k: usize) -> Vec<(Ulid, f32)> {
    hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    hits.truncate(k);
    hits
}
