use farcast_core::{ErrorKind, SemanticCode};
use farcast_kb::KbError;
use thiserror::Error;

/// Result type for retrieval operations.
pub type RagResult<T> = Result<T, RagError>;

/// Errors from hybrid retrieval.
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Query text is empty")]
    EmptyQuery,

    #[error("Retrieval exceeded its {0:?} budget")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Knowledge(#[from] KbError),
}

impl RagError {
    /// The taxonomy kind of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyQuery => ErrorKind::Validation,
            Self::Timeout(_) => ErrorKind::Semantic,
            Self::Knowledge(inner) => inner.kind(),
        }
    }

    /// The stable semantic code, when one applies.
    pub fn semantic_code(&self) -> Option<SemanticCode> {
        match self {
            Self::Timeout(_) => Some(SemanticCode::RagTimeout),
            Self::Knowledge(inner) => inner.semantic_code(),
            Self::EmptyQuery => None,
        }
    }
}
