use farcast_core::{ErrorKind, SemanticCode};
use thiserror::Error;

/// Result type for knowledge-base operations.
pub type KbResult<T> = Result<T, KbError>;

/// Errors from chunking, embedding, and knowledge storage.
#[derive(Error, Debug)]
pub enum KbError {
    #[error("Source not found: {source_type}:{source_id}")]
    SourceNotFound {
        source_type: String,
        source_id: String,
    },

    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimMismatch { expected: usize, got: usize },

    #[error("Embedding API rate limited")]
    RateLimited,

    #[error("Embedding model still loading")]
    ModelLoading,

    #[error("Embedding request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Embedding API error: {0}")]
    Api(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl KbError {
    /// The taxonomy kind of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SourceNotFound { .. } | Self::ChunkNotFound(_) => ErrorKind::Integrity,
            Self::DimMismatch { .. } | Self::RateLimited | Self::ModelLoading => {
                ErrorKind::Semantic
            }
            Self::Timeout(_) | Self::Api(_) | Self::Storage(_) => ErrorKind::Transient,
        }
    }

    /// The stable semantic code, when one applies.
    pub fn semantic_code(&self) -> Option<SemanticCode> {
        match self {
            Self::DimMismatch { .. } => Some(SemanticCode::EmbeddingDimMismatch),
            Self::RateLimited => Some(SemanticCode::RateLimited),
            Self::ModelLoading => Some(SemanticCode::ModelLoading),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for KbError {
    fn from(err: reqwest::Error) -> Self {
        Self::Api(err.to_string())
    }
}
