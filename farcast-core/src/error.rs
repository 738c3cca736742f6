use serde::{Deserialize, Serialize};

/// Failure classification shared by every Farcast crate.
///
/// The worker runtime maps a failure's kind onto queue policy: validation
/// failures are never retried, transient and semantic failures retry with
/// backoff up to the job's attempt budget, and integrity failures are
/// dead-lettered immediately regardless of attempts left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input at an API boundary; surfaced as 4xx, never retried
    Validation,

    /// DB deadlock, HTTP 5xx/timeout, rate limit; retried with backoff
    Transient,

    /// Pipeline-level failure with a stable code; retried then dead-lettered
    Semantic,

    /// Invalid state transition, lost lease, broken reference; always
    /// dead-lettered
    Integrity,
}

impl ErrorKind {
    /// Get the kind name as a string, used as the tag in `last_error`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Transient => "transient",
            Self::Semantic => "semantic",
            Self::Integrity => "integrity",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Stable codes for semantic pipeline failures.
///
/// Emitted as a tagged enum rather than free-form strings so downstream
/// consumers never have to scan messages by substring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SemanticCode {
    /// Hybrid retrieval exceeded its wall-clock budget
    RagTimeout,

    /// A grounding-required slot retrieved zero chunks
    ScriptUngrounded,

    /// Generated script failed length or structural validation
    ScriptInvalid,

    /// Embedding API returned a vector of the wrong dimension
    EmbeddingDimMismatch,

    /// Normalized audio failed loudness/peak validation
    AudioQualityFail,

    /// Upstream API returned HTTP 429
    RateLimited,

    /// Embedding model still loading (HTTP 503)
    ModelLoading,
}

impl SemanticCode {
    /// Get the wire code as a string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RagTimeout => "RAG_TIMEOUT",
            Self::ScriptUngrounded => "SCRIPT_UNGROUNDED",
            Self::ScriptInvalid => "SCRIPT_INVALID",
            Self::EmbeddingDimMismatch => "EMBEDDING_DIM_MISMATCH",
            Self::AudioQualityFail => "AUDIO_QUALITY_FAIL",
            Self::RateLimited => "RATE_LIMITED",
            Self::ModelLoading => "MODEL_LOADING",
        }
    }
}

impl std::fmt::Display for SemanticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
