//! Error types for the document QA pipeline.

use std::fmt;

use thiserror::Error;

/// Result type alias using DocQaError.
pub type Result<T> = std::result::Result<T, DocQaError>;

/// External collaborator that produced a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Embedding,
    VectorIndex,
    KeywordIndex,
    ChunkStore,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Embedding => "embedding provider",
            Self::VectorIndex => "vector index",
            Self::KeywordIndex => "keyword index",
            Self::ChunkStore => "chunk store",
        };
        write!(f, "{}", s)
    }
}

/// Errors that can occur in the pipeline.
#[derive(Error, Debug)]
pub enum DocQaError {
    /// Invalid chunking, retrieval or scoring options. Never retried.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// An embedding or index call failed.
    #[error("{provider} error: {message}")]
    Provider { provider: Provider, message: String },

    /// An embedding or index call did not finish in time.
    #[error("{provider} timed out after {timeout_ms}ms")]
    Timeout { provider: Provider, timeout_ms: u64 },

    /// Vector dimensionality does not match the index.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Database error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DocQaError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a provider error.
    pub fn provider(provider: Provider, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Create an embedding provider error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::provider(Provider::Embedding, message)
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Re-tag any error raised while talking to `provider` as a provider error.
    ///
    /// Timeouts and provider errors keep their shape; everything else is
    /// folded into `Provider` with the original message.
    pub fn into_provider(self, provider: Provider) -> Self {
        match self {
            Self::Provider { .. } | Self::Timeout { .. } => self,
            other => Self::provider(provider, other.to_string()),
        }
    }

    /// Whether the failure came from a collaborator and may clear on retry or
    /// by falling back to another source.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. } | Self::Timeout { .. } | Self::DimensionMismatch { .. }
        )
    }

    /// Get a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Provider { .. } => "PROVIDER_ERROR",
            Self::Timeout { .. } => "PROVIDER_TIMEOUT",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DocQaError::provider(Provider::KeywordIndex, "fts5 unavailable");
        assert_eq!(err.to_string(), "keyword index error: fts5 unavailable");

        let err = DocQaError::Timeout {
            provider: Provider::Embedding,
            timeout_ms: 250,
        };
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(DocQaError::config("bad").error_code(), "CONFIG_ERROR");
        assert_eq!(DocQaError::embedding("rate limited").error_code(), "PROVIDER_ERROR");
        assert_eq!(DocQaError::database("locked").error_code(), "DATABASE_ERROR");
    }

    #[test]
    fn test_into_provider() {
        let err = DocQaError::database("disk full").into_provider(Provider::VectorIndex);
        assert!(matches!(
            err,
            DocQaError::Provider {
                provider: Provider::VectorIndex,
                ..
            }
        ));
        assert!(err.to_string().contains("disk full"));

        let timeout = DocQaError::Timeout {
            provider: Provider::Embedding,
            timeout_ms: 10,
        };
        assert!(matches!(
            timeout.into_provider(Provider::VectorIndex),
            DocQaError::Timeout {
                provider: Provider::Embedding,
                ..
            }
        ));
    }

    #[test]
    fn test_recoverable() {
        assert!(DocQaError::embedding("x").is_recoverable());
        assert!(DocQaError::DimensionMismatch {
            expected: 3,
            actual: 4
        }
        .is_recoverable());
        assert!(!DocQaError::config("x").is_recoverable());
    }
}
