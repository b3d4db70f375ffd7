//! Configuration types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{DocQaError, Result};
use crate::types::SearchStrategy;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocQaConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Embedding configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chunking configuration.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Retrieval configuration.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Confidence scoring configuration.
    #[serde(default)]
    pub confidence: ConfidenceConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: 30000,
        }
    }
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Path to ONNX model directory (used by the `onnx` embedder).
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Embedding dimension.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Provider input limit in tokens.
    #[serde(default = "default_embed_max_tokens")]
    pub max_tokens: usize,

    /// Batch size for embedding.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of threads for CPU inference.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            dimension: 384,
            max_tokens: 512,
            batch_size: 32,
            num_threads: 4,
        }
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(DocQaError::config("embedding.dimension must be > 0"));
        }
        if self.max_tokens == 0 {
            return Err(DocQaError::config("embedding.max_tokens must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(DocQaError::config("embedding.batch_size must be > 0"));
        }
        Ok(())
    }
}

/// Options for one granularity level of the chunker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum tokens per chunk.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Minimum tokens per chunk (all but the last chunk of a document).
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,

    /// Trailing tokens carried into the next chunk when a paragraph is split.
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,

    /// Treat detected headings and step markers as boundaries.
    #[serde(default = "default_true")]
    pub preserve_structure: bool,

    /// Chunks with fewer non-whitespace characters are discarded.
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            min_tokens: 50,
            overlap_tokens: 50,
            preserve_structure: true,
            min_content_chars: 2,
        }
    }
}

impl ChunkConfig {
    /// Reject option combinations the chunker cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(DocQaError::config("max_tokens must be > 0"));
        }
        if self.min_tokens > self.max_tokens {
            return Err(DocQaError::config(format!(
                "min_tokens ({}) exceeds max_tokens ({})",
                self.min_tokens, self.max_tokens
            )));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(DocQaError::config(format!(
                "overlap_tokens ({}) must be below max_tokens ({})",
                self.overlap_tokens, self.max_tokens
            )));
        }
        if self.min_content_chars == 0 {
            return Err(DocQaError::config("min_content_chars must be > 0"));
        }
        Ok(())
    }
}

/// Weights of the chunk quality heuristic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_quality_base")]
    pub base: f32,

    /// Preferred content length band, in characters.
    #[serde(default = "default_preferred_min_chars")]
    pub preferred_min_chars: usize,
    #[serde(default = "default_preferred_max_chars")]
    pub preferred_max_chars: usize,
    #[serde(default = "default_tenth_double")]
    pub length_bonus: f32,

    /// Chunks shorter than this many characters are penalized.
    #[serde(default = "default_short_chars")]
    pub short_chars: usize,
    #[serde(default = "default_tenth")]
    pub short_penalty: f32,

    /// Bonus for step / numbered / bulleted list markers.
    #[serde(default = "default_tenth")]
    pub structure_bonus: f32,

    /// Bonus when any domain keyword is present.
    #[serde(default = "default_tenth")]
    pub keyword_bonus: f32,
    #[serde(default = "default_domain_keywords")]
    pub keywords: Vec<String>,

    /// Bonus when unique/total words reaches the threshold.
    #[serde(default = "default_diversity_threshold")]
    pub diversity_threshold: f32,
    #[serde(default = "default_tenth")]
    pub diversity_bonus: f32,
    #[serde(default = "default_diversity_min_words")]
    pub diversity_min_words: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            base: 0.5,
            preferred_min_chars: 200,
            preferred_max_chars: 2000,
            length_bonus: 0.2,
            short_chars: 50,
            short_penalty: 0.1,
            structure_bonus: 0.1,
            keyword_bonus: 0.1,
            keywords: default_domain_keywords(),
            diversity_threshold: 0.5,
            diversity_bonus: 0.1,
            diversity_min_words: 5,
        }
    }
}

impl QualityConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.base) {
            return Err(DocQaError::config("quality.base must be in [0, 1]"));
        }
        if self.preferred_min_chars > self.preferred_max_chars {
            return Err(DocQaError::config(
                "quality.preferred_min_chars exceeds preferred_max_chars",
            ));
        }
        Ok(())
    }
}

/// Chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Produce a document/section/paragraph/sentence forest.
    #[serde(default)]
    pub hierarchical: bool,

    /// Paragraph level (also the flat chunker's options).
    #[serde(default)]
    pub paragraph: ChunkConfig,

    /// Section level.
    #[serde(default = "default_section_level")]
    pub section: ChunkConfig,

    /// Sentence level.
    #[serde(default = "default_sentence_level")]
    pub sentence: ChunkConfig,

    /// Quality scoring weights.
    #[serde(default)]
    pub quality: QualityConfig,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            hierarchical: false,
            paragraph: ChunkConfig::default(),
            section: default_section_level(),
            sentence: default_sentence_level(),
            quality: QualityConfig::default(),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        self.paragraph.validate()?;
        if self.hierarchical {
            self.section.validate()?;
            self.sentence.validate()?;
        }
        self.quality.validate()
    }
}

/// Weights for fusing vector and keyword scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,

    /// Added when both strategies found a chunk.
    #[serde(default = "default_tenth")]
    pub agreement_bonus: f32,

    /// Multiplier for chunks found by one strategy only.
    #[serde(default = "default_single_source_penalty")]
    pub single_source_penalty: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.7,
            keyword_weight: 0.3,
            agreement_bonus: 0.1,
            single_source_penalty: 0.8,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.vector_weight < 0.0 || self.keyword_weight < 0.0 {
            return Err(DocQaError::config("fusion weights must be non-negative"));
        }
        if self.vector_weight + self.keyword_weight <= 0.0 {
            return Err(DocQaError::config("fusion weights must not both be zero"));
        }
        if !(0.0..=1.0).contains(&self.agreement_bonus) {
            return Err(DocQaError::config("fusion.agreement_bonus must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.single_source_penalty) {
            return Err(DocQaError::config(
                "fusion.single_source_penalty must be in [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Retrieval defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Default number of results.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Maximum number of results.
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Vector hits below this similarity are dropped.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    #[serde(default = "default_strategy")]
    pub strategy: SearchStrategy,

    /// Use quality score as the secondary sort key.
    #[serde(default = "default_true")]
    pub enable_reranking: bool,

    /// Chunks below this quality score are dropped.
    #[serde(default)]
    pub min_quality: f32,

    /// Candidates fetched per source, as a multiple of top_k.
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,

    /// Lower bound on candidates fetched per source.
    #[serde(default = "default_min_fetch")]
    pub min_fetch: usize,

    #[serde(default)]
    pub fusion: FusionConfig,

    /// Overlapping chunks within this score margin are collapsed.
    #[serde(default = "default_dedup_margin")]
    pub dedup_margin: f32,

    #[serde(default = "default_embed_timeout")]
    pub embed_timeout_ms: u64,

    #[serde(default = "default_index_timeout")]
    pub vector_timeout_ms: u64,

    #[serde(default = "default_index_timeout")]
    pub keyword_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_top_k: 100,
            similarity_threshold: 0.3,
            strategy: SearchStrategy::Hybrid,
            enable_reranking: true,
            min_quality: 0.0,
            overfetch_factor: 3,
            min_fetch: 20,
            fusion: FusionConfig::default(),
            dedup_margin: 0.05,
            embed_timeout_ms: 10000,
            vector_timeout_ms: 5000,
            keyword_timeout_ms: 5000,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 || self.top_k > self.max_top_k {
            return Err(DocQaError::config(format!(
                "retrieval.top_k must be in 1..={}",
                self.max_top_k
            )));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(DocQaError::config(
                "retrieval.similarity_threshold must be in [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.min_quality) {
            return Err(DocQaError::config("retrieval.min_quality must be in [0, 1]"));
        }
        if self.overfetch_factor == 0 {
            return Err(DocQaError::config("retrieval.overfetch_factor must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.dedup_margin) {
            return Err(DocQaError::config("retrieval.dedup_margin must be in [0, 1]"));
        }
        if self.embed_timeout_ms == 0 || self.vector_timeout_ms == 0 || self.keyword_timeout_ms == 0
        {
            return Err(DocQaError::config("retrieval timeouts must be > 0"));
        }
        self.fusion.validate()
    }
}

/// Confidence scoring weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    /// Confidence reported for an empty result set.
    #[serde(default = "default_tenth")]
    pub empty_floor: f32,

    #[serde(default = "default_top_weight")]
    pub top_weight: f32,

    #[serde(default = "default_tenth_double")]
    pub spread_weight: f32,

    #[serde(default = "default_tenth_double")]
    pub agreement_weight: f32,

    /// Spread at which the spread signal saturates.
    #[serde(default = "default_spread_saturation")]
    pub spread_saturation: f32,

    /// Rank whose score the spread is measured against.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_answer_threshold")]
    pub answer_threshold: f32,

    #[serde(default = "default_hedge_threshold")]
    pub hedge_threshold: f32,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            empty_floor: 0.1,
            top_weight: 0.6,
            spread_weight: 0.2,
            agreement_weight: 0.2,
            spread_saturation: 0.3,
            top_k: 5,
            answer_threshold: 0.6,
            hedge_threshold: 0.3,
        }
    }
}

impl ConfidenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.top_weight < 0.0 || self.spread_weight < 0.0 || self.agreement_weight < 0.0 {
            return Err(DocQaError::config("confidence weights must be non-negative"));
        }
        if self.top_weight + self.spread_weight + self.agreement_weight <= 0.0 {
            return Err(DocQaError::config("confidence weights must not all be zero"));
        }
        if self.spread_saturation <= 0.0 {
            return Err(DocQaError::config("confidence.spread_saturation must be > 0"));
        }
        if self.top_k == 0 {
            return Err(DocQaError::config("confidence.top_k must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.empty_floor) {
            return Err(DocQaError::config("confidence.empty_floor must be in [0, 1]"));
        }
        if self.hedge_threshold > self.answer_threshold {
            return Err(DocQaError::config(
                "confidence.hedge_threshold exceeds answer_threshold",
            ));
        }
        Ok(())
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_tenth() -> f32 {
    0.1
}

fn default_tenth_double() -> f32 {
    0.2
}

fn default_busy_timeout() -> u32 {
    30000
}

fn default_dimension() -> usize {
    384
}

fn default_embed_max_tokens() -> usize {
    512
}

fn default_batch_size() -> usize {
    32
}

fn default_num_threads() -> usize {
    4
}

fn default_max_tokens() -> usize {
    512
}

fn default_min_tokens() -> usize {
    50
}

fn default_overlap_tokens() -> usize {
    50
}

fn default_min_content_chars() -> usize {
    2
}

fn default_section_level() -> ChunkConfig {
    ChunkConfig {
        max_tokens: 2048,
        min_tokens: 100,
        overlap_tokens: 0,
        preserve_structure: true,
        min_content_chars: 2,
    }
}

fn default_sentence_level() -> ChunkConfig {
    ChunkConfig {
        max_tokens: 128,
        min_tokens: 8,
        overlap_tokens: 0,
        preserve_structure: true,
        min_content_chars: 2,
    }
}

fn default_quality_base() -> f32 {
    0.5
}

fn default_preferred_min_chars() -> usize {
    200
}

fn default_preferred_max_chars() -> usize {
    2000
}

fn default_short_chars() -> usize {
    50
}

fn default_domain_keywords() -> Vec<String> {
    [
        "procedure",
        "instruction",
        "requirement",
        "warning",
        "caution",
        "important",
        "note",
        "example",
        "definition",
        "troubleshooting",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_diversity_threshold() -> f32 {
    0.5
}

fn default_diversity_min_words() -> usize {
    5
}

fn default_vector_weight() -> f32 {
    0.7
}

fn default_keyword_weight() -> f32 {
    0.3
}

fn default_single_source_penalty() -> f32 {
    0.8
}

fn default_top_k() -> usize {
    5
}

fn default_max_top_k() -> usize {
    100
}

fn default_similarity_threshold() -> f32 {
    0.3
}

fn default_strategy() -> SearchStrategy {
    SearchStrategy::Hybrid
}

fn default_overfetch_factor() -> usize {
    3
}

fn default_min_fetch() -> usize {
    20
}

fn default_dedup_margin() -> f32 {
    0.05
}

fn default_embed_timeout() -> u64 {
    10000
}

fn default_index_timeout() -> u64 {
    5000
}

fn default_top_weight() -> f32 {
    0.6
}

fn default_spread_saturation() -> f32 {
    0.3
}

fn default_answer_threshold() -> f32 {
    0.6
}

fn default_hedge_threshold() -> f32 {
    0.3
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("docqa")
        .join("docqa.db")
}

fn default_model_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("docqa")
        .join("models")
        .join("all-MiniLM-L6-v2")
}

impl DocQaConfig {
    /// Load configuration from file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DocQaError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("docqa").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("docqa.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        // Return defaults
        Ok(Self::default())
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.embedding.validate()?;
        self.chunking.validate()?;
        self.retrieval.validate()?;
        self.confidence.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DocQaConfig::default();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.strategy, SearchStrategy::Hybrid);
        assert_eq!(config.chunking.paragraph.max_tokens, 512);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_chunk_config_validation() {
        let mut config = ChunkConfig::default();
        assert!(config.validate().is_ok());

        config.min_tokens = 600;
        assert!(matches!(config.validate(), Err(DocQaError::Config { .. })));

        let config = ChunkConfig {
            overlap_tokens: 512,
            ..ChunkConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ChunkConfig {
            max_tokens: 0,
            min_tokens: 0,
            overlap_tokens: 0,
            ..ChunkConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = DocQaConfig::parse(
            r#"
            [retrieval]
            top_k = 8
            strategy = "keyword_only"

            [retrieval.fusion]
            vector_weight = 0.5
            keyword_weight = 0.5

            [chunking.paragraph]
            max_tokens = 256
            "#,
        )
        .unwrap();
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.retrieval.strategy, SearchStrategy::KeywordOnly);
        assert_eq!(config.retrieval.fusion.vector_weight, 0.5);
        assert_eq!(config.retrieval.fusion.single_source_penalty, 0.8);
        assert_eq!(config.chunking.paragraph.max_tokens, 256);
        assert_eq!(config.chunking.paragraph.min_tokens, 50);
    }

    #[test]
    fn test_parse_rejects_invalid_values() {
        let err = DocQaConfig::parse(
            r#"
            [retrieval]
            similarity_threshold = 1.5
            "#,
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");

        assert!(DocQaConfig::parse("[retrieval.fusion]\nvector_weight = 0.0\nkeyword_weight = 0.0").is_err());
    }
}
