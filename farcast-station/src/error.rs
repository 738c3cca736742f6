use farcast_core::{ErrorKind, SemanticCode};
use thiserror::Error;

/// Result type for station operations.
pub type StationResult<T> = Result<T, StationError>;

/// Errors from orchestration, mastering, and playout.
#[derive(Error, Debug)]
pub enum StationError {
    #[error("Segment not found: {0}")]
    SegmentNotFound(String),

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Illegal segment transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Segment {0} has no bound asset")]
    MissingAsset(String),

    #[error("Segment {0} is in state {1}; manual requeue required")]
    SegmentFailed(String, String),

    #[error("TTS error (status {status:?}): {message}")]
    Tts { status: Option<u16>, message: String },

    #[error("Audio assembly error: {0}")]
    Audio(String),

    #[error("Normalizer error: {0}")]
    Normalizer(String),

    #[error("Normalized audio failed validation: {0}")]
    AudioQuality(String),

    #[error(transparent)]
    Blob(#[from] farcast_blob::BlobError),

    #[error(transparent)]
    Retrieval(#[from] farcast_rag::RagError),

    #[error(transparent)]
    Script(#[from] farcast_script::ScriptError),

    #[error(transparent)]
    Queue(#[from] farcast_queue::QueueError),

    #[error("Script for a {0} segment retrieved no grounding chunks")]
    Ungrounded(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl StationError {
    /// The taxonomy kind of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SegmentNotFound(_)
            | Self::AssetNotFound(_)
            | Self::IllegalTransition { .. }
            | Self::MissingAsset(_)
            | Self::SegmentFailed(..) => ErrorKind::Integrity,
            Self::AudioQuality(_) | Self::Ungrounded(_) => ErrorKind::Semantic,
            Self::Retrieval(inner) => inner.kind(),
            Self::Script(inner) => inner.kind(),
            Self::Tts { .. }
            | Self::Audio(_)
            | Self::Normalizer(_)
            | Self::Blob(_)
            | Self::Queue(_)
            | Self::Storage(_) => ErrorKind::Transient,
        }
    }

    /// The stable semantic code, when one applies.
    pub fn semantic_code(&self) -> Option<SemanticCode> {
        match self {
            Self::AudioQuality(_) => Some(SemanticCode::AudioQualityFail),
            Self::Ungrounded(_) => Some(SemanticCode::ScriptUngrounded),
            Self::Retrieval(inner) => inner.semantic_code(),
            Self::Script(inner) => inner.semantic_code(),
            _ => None,
        }
    }

    /// Map into the worker runtime's failure classes.
    pub fn into_job_error(self) -> farcast_queue::JobError {
        match self.semantic_code() {
            Some(code) => farcast_queue::JobError::semantic(code, self.to_string()),
            None => match self.kind() {
                ErrorKind::Integrity => farcast_queue::JobError::fatal(self.to_string()),
                _ => farcast_queue::JobError::retryable(self.to_string()),
            },
        }
    }
}
