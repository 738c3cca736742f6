use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChunkId, SourceId};

/// Kind of upstream row a chunk was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Long-lived world-building document
    UniverseDoc,

    /// Dated in-universe event
    Event,
}

impl SourceType {
    /// Get the source type name as a string.
    pub fn name(self) -> &'static str {
        match self {
            Self::UniverseDoc => "universe_doc",
            Self::Event => "event",
        }
    }

    /// Parse from the wire form used in citations and filters.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "universe_doc" => Some(Self::UniverseDoc),
            "event" => Some(Self::Event),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An upstream document or event row the indexer consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDoc {
    /// Source row identifier
    pub id: SourceId,

    /// Kind of source
    pub source_type: SourceType,

    /// Display title
    pub title: String,

    /// Markdown body to be chunked
    pub body_md: String,

    /// Language tag if known upstream; detected otherwise
    pub lang: Option<String>,

    /// When the row was published upstream
    pub published_at: Option<DateTime<Utc>>,

    /// In-universe date, for events; drives recency boosting
    pub event_date: Option<DateTime<Utc>>,
}

/// A token-bounded text window with overlap to its neighbors.
///
/// Chunks of a source form a contiguous ordered sequence; consecutive
/// chunks share a tail/head of at most `overlap_tokens` tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbChunk {
    /// Unique chunk identifier
    pub id: ChunkId,

    /// Source row this chunk was extracted from
    pub source_id: SourceId,

    /// Kind of source
    pub source_type: SourceType,

    /// The chunk text
    pub chunk_text: String,

    /// Position within the source's chunk sequence
    pub chunk_index: usize,

    /// Estimated token count
    pub token_count: usize,

    /// sha-256 of `chunk_text`, lowercase hex
    pub content_hash: String,

    /// Detected language of the source
    pub lang: String,
}

/// Indexing progress for one source row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl IndexState {
    /// Get the state name as a string.
    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

/// Per-source indexing status row maintained by the `kb_index` worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbIndexStatus {
    /// Source row being indexed
    pub source_id: SourceId,

    /// Kind of source
    pub source_type: SourceType,

    /// Current indexing state
    pub state: IndexState,

    /// Chunks persisted so far
    pub chunks_created: usize,

    /// Embeddings persisted so far
    pub embeddings_created: usize,

    /// When indexing started
    pub started_at: Option<DateTime<Utc>>,

    /// When indexing completed
    pub completed_at: Option<DateTime<Utc>>,

    /// Last indexing error
    pub error: Option<String>,
}

impl KbIndexStatus {
    /// Create a pending status for a source.
    pub fn pending(source_id: SourceId, source_type: SourceType) -> Self {
        Self {
            source_id,
            source_type,
            state: IndexState::Pending,
            chunks_created: 0,
            embeddings_created: 0,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Transition to processing, stamping the start time.
    pub fn start(&mut self) {
        self.state = IndexState::Processing;
        self.started_at = Some(Utc::now());
        self.error = None;
    }

    /// Transition to complete with final counters.
    pub fn complete(&mut self, chunks: usize, embeddings: usize) {
        self.state = IndexState::Complete;
        self.chunks_created = chunks;
        self.embeddings_created = embeddings;
        self.completed_at = Some(Utc::now());
    }

    /// Transition to failed, recording the error.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = IndexState::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_type_round_trips() {
        assert_eq!(SourceType::parse("universe_doc"), Some(SourceType::UniverseDoc));
        assert_eq!(SourceType::parse("event"), Some(SourceType::Event));
        assert_eq!(SourceType::parse("bogus"), None);
        assert_eq!(SourceType::Event.to_string(), "event");
    }

    #[test]
    fn index_status_lifecycle() {
        let mut status = KbIndexStatus::pending(SourceId::from("doc-1"), SourceType::UniverseDoc);
        assert_eq!(status.state, IndexState::Pending);

        status.start();
        assert_eq!(status.state, IndexState::Processing);
        assert!(status.started_at.is_some());

        status.complete(4, 4);
        assert_eq!(status.state, IndexState::Complete);
        assert_eq!(status.chunks_created, 4);
        assert!(status.completed_at.is_some());
    }

    #[test]
    fn index_status_failure_records_error() {
        let mut status = KbIndexStatus::pending(SourceId::from("doc-2"), SourceType::Event);
        status.start();
        status.fail("embedding dimension mismatch");
        assert_eq!(status.state, IndexState::Failed);
        assert!(status.error.as_deref().unwrap().contains("dimension"));
    }
}
