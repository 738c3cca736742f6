use thiserror::Error;

/// Result type for blob operations.
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors from blob storage operations.
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Blob not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Signing error: {0}")]
    Signing(String),
}

impl BlobError {
    /// Create a backend error from any displayable source.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}
