use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AssetId, ChunkId, ProgramId, SegmentId, SourceId};

/// Categorical role of a segment. Determines the word-count target for
/// script generation and the retrieval template used to ground it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    News,
    Culture,
    Tech,
    Interview,
    Panel,
    Dialogue,
    StationId,
    Weather,
    History,
}

impl SlotType {
    /// Target word count for a generated script of this slot.
    pub fn word_target(self) -> usize {
        match self {
            Self::News => 200,
            Self::Culture => 300,
            Self::Interview => 400,
            Self::StationId => 50,
            Self::Weather => 150,
            Self::Tech => 250,
            _ => 200,
        }
    }

    /// Conversation slots render one TTS call per dialogue turn.
    pub fn is_conversation(self) -> bool {
        matches!(self, Self::Interview | Self::Panel | Self::Dialogue)
    }

    /// Whether a script for this slot must be grounded in retrieved
    /// knowledge. Station idents and weather fillers may air ungrounded.
    pub fn requires_grounding(self) -> bool {
        !matches!(self, Self::StationId | Self::Weather)
    }

    /// Get human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::News => "news",
            Self::Culture => "culture",
            Self::Tech => "tech",
            Self::Interview => "interview",
            Self::Panel => "panel",
            Self::Dialogue => "dialogue",
            Self::StationId => "station_id",
            Self::Weather => "weather",
            Self::History => "history",
        }
    }
}

impl std::fmt::Display for SlotType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Segment lifecycle. Only the transitions listed in
/// [`SegmentState::can_transition_to`] are legal; everything else is an
/// integrity violation and must never be written to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentState {
    /// Waiting for a `segment_make` job to pick it up
    Queued,

    /// RAG retrieval in progress
    Retrieving,

    /// LLM script generation in progress
    Generating,

    /// TTS synthesis and raw-asset upload in progress
    Rendering,

    /// Raw audio handed off to mastering
    Normalizing,

    /// Mastered, validated, and eligible for playout
    Ready,

    /// Currently on air
    Airing,

    /// Played out; aired_at recorded
    Aired,

    /// A pipeline step failed; manual requeue only
    Failed,

    /// Terminal archive state
    Archived,
}

impl SegmentState {
    /// The legal-transition table. A segment may only move along these
    /// edges; `failed → queued` is reserved for manual requeue.
    pub fn can_transition_to(self, next: SegmentState) -> bool {
        use SegmentState::*;
        matches!(
            (self, next),
            (Queued, Retrieving)
                | (Queued, Failed)
                | (Retrieving, Generating)
                | (Retrieving, Failed)
                | (Generating, Rendering)
                | (Generating, Failed)
                | (Rendering, Normalizing)
                | (Rendering, Failed)
                | (Normalizing, Ready)
                | (Normalizing, Failed)
                | (Ready, Airing)
                | (Airing, Aired)
                | (Aired, Archived)
                | (Failed, Queued)
        )
    }

    /// Check if the segment is in a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Aired | Self::Archived)
    }

    /// States at or past `ready` require a validated asset.
    pub fn requires_passed_asset(self) -> bool {
        matches!(self, Self::Ready | Self::Airing | Self::Aired | Self::Archived)
    }

    /// Get the state name as a string.
    pub fn name(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Retrieving => "retrieving",
            Self::Generating => "generating",
            Self::Rendering => "rendering",
            Self::Normalizing => "normalizing",
            Self::Ready => "ready",
            Self::Airing => "airing",
            Self::Aired => "aired",
            Self::Failed => "failed",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for SegmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A citation emitted by the script generator, resolved against the RAG
/// result that grounded the script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Upstream document the cited chunk belongs to
    pub doc_id: SourceId,

    /// The cited chunk
    pub chunk_id: ChunkId,

    /// Display title of the source
    pub title: String,

    /// Final fused retrieval score of the cited chunk
    pub relevance_score: f32,
}

/// The atomic unit of broadcast content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    /// Unique segment identifier
    pub id: SegmentId,

    /// Owning program, if scheduled as part of one
    pub program_id: Option<ProgramId>,

    /// Categorical role of the segment
    pub slot_type: SlotType,

    /// Current lifecycle state
    pub state: SegmentState,

    /// BCP-47-ish language tag of the script
    pub lang: String,

    /// Generated script, markdown
    pub script_md: Option<String>,

    /// Bound audio asset once rendering has produced one
    pub asset_id: Option<AssetId>,

    /// Measured duration of the final audio
    pub duration_sec: Option<f64>,

    /// Scheduled broadcast instant (wall clock; shifted into the
    /// station's fictional year for prompts and retrieval)
    pub scheduled_start_ts: Option<DateTime<Utc>>,

    /// When the stream engine reported the segment as aired
    pub aired_at: Option<DateTime<Utc>>,

    /// Pipeline retries consumed so far
    pub retry_count: u32,

    /// Maximum pipeline retries
    pub max_retries: u32,

    /// Last recorded failure
    pub last_error: Option<String>,

    /// Citations extracted from the generated script
    pub citations: Vec<Citation>,

    /// Content cache key for script/asset reuse
    pub cache_key: Option<String>,

    /// Retry-safe creation key supplied by the external scheduler
    pub idempotency_key: Option<String>,

    /// Playout priority, 0..=10
    pub priority: u8,

    /// When the segment row was created
    pub created_at: DateTime<Utc>,

    /// When the segment row was last updated
    pub updated_at: DateTime<Utc>,
}

impl Segment {
    /// Create a new queued segment.
    pub fn new(slot_type: SlotType, lang: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SegmentId::new(),
            program_id: None,
            slot_type,
            state: SegmentState::Queued,
            lang: lang.into(),
            script_md: None,
            asset_id: None,
            duration_sec: None,
            scheduled_start_ts: None,
            aired_at: None,
            retry_count: 0,
            max_retries: 3,
            last_error: None,
            citations: Vec::new(),
            cache_key: None,
            idempotency_key: None,
            priority: 5,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the scheduled broadcast instant.
    pub fn with_scheduled_start(mut self, ts: DateTime<Utc>) -> Self {
        self.scheduled_start_ts = Some(ts);
        self
    }

    /// Set the playout priority (clamped to 0..=10).
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(10);
        self
    }

    /// Set the retry-safe creation key.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        use SegmentState::*;
        let path = [Queued, Retrieving, Generating, Rendering, Normalizing, Ready, Airing, Aired, Archived];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn pipeline_states_may_fail() {
        use SegmentState::*;
        for state in [Queued, Retrieving, Generating, Rendering, Normalizing] {
            assert!(state.can_transition_to(Failed), "{} -> failed", state);
        }
    }

    #[test]
    fn illegal_transitions_rejected() {
        use SegmentState::*;
        assert!(!Queued.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Failed));
        assert!(!Aired.can_transition_to(Airing));
        assert!(!Archived.can_transition_to(Queued));
        assert!(!Failed.can_transition_to(Retrieving));
    }

    #[test]
    fn failed_requeues_manually() {
        assert!(SegmentState::Failed.can_transition_to(SegmentState::Queued));
    }

    #[test]
    fn word_targets_per_slot() {
        assert_eq!(SlotType::News.word_target(), 200);
        assert_eq!(SlotType::StationId.word_target(), 50);
        assert_eq!(SlotType::History.word_target(), 200);
    }

    #[test]
    fn grounding_requirements() {
        assert!(SlotType::News.requires_grounding());
        assert!(!SlotType::StationId.requires_grounding());
        assert!(!SlotType::Weather.requires_grounding());
    }

    #[test]
    fn slot_type_serializes_snake_case() {
        let json = serde_json::to_string(&SlotType::StationId).unwrap();
        assert_eq!(json, "\"station_id\"");
    }
}
