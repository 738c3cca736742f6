use farcast_core::{ErrorKind, SemanticCode};
use thiserror::Error;

/// Result type for script generation.
pub type ScriptResult<T> = Result<T, ScriptError>;

/// Errors from LLM completion and script validation.
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("LLM API error (status {status:?}): {message}")]
    Llm { status: Option<u16>, message: String },

    #[error("LLM returned an empty completion")]
    EmptyCompletion,

    #[error("Script failed validation: {0}")]
    Invalid(String),

    #[error("Conversation failed quality checks: {0}")]
    ConversationQuality(String),

    #[error("Template error: {0}")]
    Template(String),
}

impl ScriptError {
    /// Whether the generation call should be retried in place (rate limit
    /// or upstream overload).
    pub fn is_retryable_status(&self) -> bool {
        matches!(
            self,
            Self::Llm {
                status: Some(429) | Some(529),
                ..
            }
        )
    }

    /// The taxonomy kind of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Llm { .. } | Self::EmptyCompletion => ErrorKind::Transient,
            Self::Invalid(_) | Self::ConversationQuality(_) => ErrorKind::Semantic,
            Self::Template(_) => ErrorKind::Validation,
        }
    }

    /// The stable semantic code, when one applies.
    pub fn semantic_code(&self) -> Option<SemanticCode> {
        match self {
            Self::Invalid(_) | Self::ConversationQuality(_) => Some(SemanticCode::ScriptInvalid),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ScriptError {
    fn from(err: reqwest::Error) -> Self {
        Self::Llm {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}
