//! Core domain types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ulid::Ulid;

/// Size tier of a chunk, from coarsest to finest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Document,
    Section,
    Paragraph,
    Sentence,
}

impl Granularity {
    /// All granularities, coarsest first.
    pub const ALL: [Granularity; 4] = [
        Self::Document,
        Self::Section,
        Self::Paragraph,
        Self::Sentence,
    ];

    /// Stable lowercase name, used for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Section => "section",
            Self::Paragraph => "paragraph",
            Self::Sentence => "sentence",
        }
    }

    /// Parse the stored name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(Self::Document),
            "section" => Some(Self::Section),
            "paragraph" => Some(Self::Paragraph),
            "sentence" => Some(Self::Sentence),
            _ => None,
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An ingested document. Never mutated; re-ingestion produces a new version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier shared by all versions of the document.
    pub id: Ulid,

    /// Version number, starting at 1.
    pub version: u32,

    /// Source URI (file://, https://, data:).
    pub source_uri: String,

    /// Raw text content.
    pub raw_content: String,

    /// Size of the raw content in bytes.
    pub byte_size: usize,

    /// Blake3 hash of raw content.
    #[serde(with = "serde_bytes_opt")]
    pub content_hash: Option<[u8; 32]>,

    /// User-provided metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Creation timestamp (Unix millis).
    pub created_at: u64,
}

impl Document {
    /// Create the first version of a document.
    pub fn new(source_uri: &str, content: &str) -> Self {
        Self::build(Ulid::new(), 1, source_uri, content)
    }

    /// Create the next version of this document with new content.
    pub fn supersede(&self, content: &str) -> Self {
        Self::build(self.id, self.version + 1, &self.source_uri, content)
    }

    fn build(id: Ulid, version: u32, source_uri: &str, content: &str) -> Self {
        let content_hash = blake3::hash(content.as_bytes());

        Self {
            id,
            version,
            source_uri: source_uri.to_string(),
            raw_content: content.to_string(),
            byte_size: content.len(),
            content_hash: Some(*content_hash.as_bytes()),
            metadata: HashMap::new(),
            created_at: now_millis(),
        }
    }

    /// Check if content has changed by comparing hashes.
    pub fn content_changed(&self, new_content: &str) -> bool {
        let new_hash = blake3::hash(new_content.as_bytes());
        self.content_hash
            .map(|h| h != *new_hash.as_bytes())
            .unwrap_or(true)
    }
}

/// A chunk of a document at one granularity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier (ULID).
    pub id: Ulid,

    /// Source document ID.
    pub doc_id: Ulid,

    /// Version of the source document.
    pub version: u32,

    /// Reading-order position within (document, version, granularity).
    pub chunk_index: u32,

    /// Size tier.
    pub granularity: Granularity,

    /// Chunk text content, an exact span of the document text.
    pub content: String,

    /// Estimated token count.
    pub token_count: u32,

    /// Number of characters.
    pub char_count: u32,

    /// Number of whitespace-separated words.
    pub word_count: u32,

    /// Nearest section heading, if any.
    pub heading: Option<String>,

    /// Quality score in [0, 1].
    pub quality_score: f32,

    /// Embedding vector, absent when the embedding step failed.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,

    /// Enclosing chunk at the next coarser granularity.
    pub parent_id: Option<Ulid>,

    /// Previous chunk at the same granularity.
    pub prev_id: Option<Ulid>,

    /// Next chunk at the same granularity.
    pub next_id: Option<Ulid>,

    /// Byte offset of the span start in the document text.
    pub start_offset: u32,

    /// Byte offset one past the span end.
    pub end_offset: u32,

    /// Start line in source (1-based).
    pub start_line: u32,

    /// End line in source (1-based, inclusive).
    pub end_line: u32,

    /// Blake3 hash of chunk content.
    #[serde(with = "serde_bytes_opt")]
    pub content_hash: Option<[u8; 32]>,
}

impl Chunk {
    /// Whether the byte spans of two chunks intersect.
    pub fn overlaps(&self, other: &Chunk) -> bool {
        self.doc_id == other.doc_id
            && self.version == other.version
            && self.start_offset < other.end_offset
            && other.start_offset < self.end_offset
    }

    /// Metadata handed to the vector index alongside the embedding.
    pub fn meta(&self) -> ChunkMeta {
        ChunkMeta {
            doc_id: self.doc_id,
            version: self.version,
            granularity: self.granularity,
        }
    }
}

/// Raw chunk data produced by a chunker, before IDs are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkData {
    /// Chunk text content.
    pub content: String,

    /// Token count.
    pub token_count: usize,

    /// Byte offset of the span start.
    pub start: usize,

    /// Byte offset one past the span end.
    pub end: usize,

    /// Start line (1-based).
    pub start_line: u32,

    /// End line (1-based, inclusive).
    pub end_line: u32,

    /// Size tier.
    pub granularity: Granularity,

    /// Detected or inherited heading.
    pub heading: Option<String>,

    /// Quality score in [0, 1].
    pub quality_score: f32,

    /// Index of the parent entry in the same output list.
    pub parent: Option<usize>,
}

/// Metadata stored with a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub doc_id: Ulid,
    pub version: u32,
    pub granularity: Granularity,
}

/// Optional restriction applied to index queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexFilter {
    /// Only chunks of these documents.
    #[serde(default)]
    pub doc_ids: Option<Vec<Ulid>>,

    /// Only chunks of this granularity.
    #[serde(default)]
    pub granularity: Option<Granularity>,
}

impl IndexFilter {
    /// Check whether a chunk's metadata passes the filter.
    pub fn matches(&self, meta: &ChunkMeta) -> bool {
        if let Some(ids) = &self.doc_ids {
            if !ids.contains(&meta.doc_id) {
                return false;
            }
        }
        match self.granularity {
            Some(g) => g == meta.granularity,
            None => true,
        }
    }

    /// True when the filter lets everything through.
    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_none() && self.granularity.is_none()
    }
}

/// Distance metric reported by a vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`, in [0, 2].
    Cosine,
    /// L2 distance, in [0, inf).
    Euclidean,
}

impl DistanceMetric {
    /// Convert a raw distance into a similarity in [0, 1].
    pub fn similarity(&self, distance: f32) -> f32 {
        let sim = match self {
            Self::Cosine => 1.0 - distance,
            Self::Euclidean => 1.0 / (1.0 + distance.max(0.0)),
        };
        if sim.is_finite() {
            sim.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Which search strategies a retrieval call uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    VectorOnly,
    KeywordOnly,
    Hybrid,
}

impl SearchStrategy {
    pub fn uses_vector(&self) -> bool {
        matches!(self, Self::VectorOnly | Self::Hybrid)
    }

    pub fn uses_keyword(&self) -> bool {
        matches!(self, Self::KeywordOnly | Self::Hybrid)
    }
}

impl std::str::FromStr for SearchStrategy {
    type Err = crate::error::DocQaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vector" | "vector_only" => Ok(Self::VectorOnly),
            "keyword" | "keyword_only" => Ok(Self::KeywordOnly),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(crate::error::DocQaError::config(format!(
                "unknown search strategy: {}",
                other
            ))),
        }
    }
}

/// Which search strategies found a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Vector,
    Keyword,
    Both,
}

/// A retrieved chunk with its scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Result rank (1-indexed).
    pub rank: u32,

    /// The matched chunk.
    pub chunk: Chunk,

    /// Vector similarity in [0, 1], if found by vector search.
    pub similarity: Option<f32>,

    /// Normalized keyword rank in [0, 1], if found by keyword search.
    pub keyword_score: Option<f32>,

    /// Fused score in [0, 1].
    pub combined_score: f32,

    /// Which strategies found this chunk.
    pub source: MatchSource,
}

/// Caller decision suggested by a confidence value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Assessment {
    Answer,
    Hedge,
    Decline,
}

/// Confidence summary of a retrieval result set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceRecord {
    /// Overall confidence in [0, 1].
    pub confidence: f32,

    /// Best combined score.
    pub top_score: f32,

    /// Top score minus the k-th best score, >= 0.
    pub score_spread: f32,

    /// Fraction of results found by both strategies.
    pub source_agreement: f32,

    /// Number of results scored.
    pub result_count: usize,
}

/// What a query hands back to the answer-generation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredContext {
    /// The original query.
    pub query: String,

    /// Ranked results.
    pub results: Vec<RetrievalResult>,

    /// Confidence in the result set.
    pub confidence: ConfidenceRecord,

    /// Assessment derived from the confidence.
    pub assessment: Assessment,

    /// Strategy actually used after any degradation.
    pub strategy: SearchStrategy,

    /// Latency in milliseconds.
    pub latency_ms: u64,
}

/// Statistics about the stored corpus.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    /// Number of document versions.
    pub documents: u64,

    /// Number of chunks.
    pub chunks: u64,

    /// Number of chunks with embeddings.
    pub embeddings: u64,

    /// Storage size in bytes, when known.
    pub storage_bytes: u64,
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Helper module for optional byte array serialization.
mod serde_bytes_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<[u8; 32]>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => hex::encode(bytes).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<[u8; 32]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(hex) => {
                let bytes = hex::decode(&hex).map_err(serde::de::Error::custom)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("invalid hash length"))?;
                Ok(Some(arr))
            }
            None => Ok(None),
        }
    }
}
