use farcast_core::{ErrorKind, SemanticCode};
use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations.
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Dead letter not found: {0}")]
    DeadLetterNotFound(String),

    #[error("Lease lost: job {job_id} is not leased by {worker_id}")]
    LeaseLost { job_id: String, worker_id: String },

    #[error("Job {0} is not in a state that allows this operation")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Worker shutdown")]
    WorkerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Job execution outcome — determines retry behavior.
///
/// Retryable and semantic failures re-enter the queue with backoff until
/// the attempt budget is spent; fatal failures dead-letter immediately.
#[derive(Error, Debug, Clone)]
pub enum JobError {
    /// Transient I/O failure; retried with backoff
    #[error("transient: {0}")]
    Retryable(String),

    /// Pipeline failure with a stable code; retried, then dead-lettered
    #[error("semantic: {code}: {message}")]
    Semantic { code: SemanticCode, message: String },

    /// Integrity violation; dead-lettered regardless of attempts left
    #[error("integrity: {0}")]
    Fatal(String),
}

impl JobError {
    /// Create a retryable error.
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    /// Create a semantic error with its stable code.
    pub fn semantic(code: SemanticCode, msg: impl Into<String>) -> Self {
        Self::Semantic { code, message: msg.into() }
    }

    /// Create a fatal error.
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Whether this failure must bypass the retry budget.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// The taxonomy kind this failure belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Retryable(_) => ErrorKind::Transient,
            Self::Semantic { .. } => ErrorKind::Semantic,
            Self::Fatal(_) => ErrorKind::Integrity,
        }
    }
}
