use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, JobPriority};
use crate::error::{QueueError, QueueResult};

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be claimed once `scheduled_for` passes
    Pending,

    /// Claimed under a live lease
    Processing,

    /// Finished successfully
    Completed,

    /// Attempt budget exhausted; a dead-letter row exists
    Failed,
}

impl JobState {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Get the state name as a string.
    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse a state from its SQL text form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Immutable submission data for a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    /// Job type identifier for dispatch
    pub job_type: String,

    /// Serialized job payload (opaque bytes)
    pub payload: Vec<u8>,

    /// Claim-ordering priority
    pub priority: JobPriority,

    /// Delay before the job becomes claimable
    pub delay: std::time::Duration,

    /// Maximum delivery attempts before dead-lettering
    pub max_attempts: u32,
}

impl NewJob {
    /// Create a new job submission with default priority, no delay, and
    /// three attempts.
    pub fn new(job_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            priority: JobPriority::default(),
            delay: std::time::Duration::ZERO,
            max_attempts: 3,
        }
    }

    /// Create a submission with a JSON-serialized payload.
    pub fn json<T: Serialize>(job_type: impl Into<String>, payload: &T) -> QueueResult<Self> {
        Ok(Self::new(job_type, serde_json::to_vec(payload)?))
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: impl Into<JobPriority>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Delay eligibility by the given duration.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// A job row as stored by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job identifier
    pub id: JobId,

    /// Job type identifier for dispatch
    pub job_type: String,

    /// Serialized job payload (opaque bytes)
    pub payload: Vec<u8>,

    /// Claim-ordering priority
    pub priority: JobPriority,

    /// Current lifecycle state
    pub state: JobState,

    /// When the job becomes claimable
    pub scheduled_for: DateTime<Utc>,

    /// Delivery attempts so far (incremented on claim)
    pub attempts: u32,

    /// Maximum delivery attempts before dead-lettering
    pub max_attempts: u32,

    /// Worker instance holding the current lease
    pub lease_owner: Option<String>,

    /// When the current lease expires
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Last recorded failure, tagged with its kind
    pub last_error: Option<String>,

    /// When the job was created
    pub created_at: DateTime<Utc>,

    /// When the job was last updated
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Build the stored row for a submission.
    pub fn from_new(new_job: NewJob) -> Self {
        let now = Utc::now();
        let delay = Duration::from_std(new_job.delay).unwrap_or_else(|_| Duration::zero());
        Self {
            id: JobId::new(),
            job_type: new_job.job_type,
            payload: new_job.payload,
            priority: new_job.priority,
            state: JobState::Pending,
            scheduled_for: now + delay,
            attempts: 0,
            max_attempts: new_job.max_attempts,
            lease_owner: None,
            lease_expires_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A job is claimable iff it is pending and its schedule has passed.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.scheduled_for <= now
    }

    /// A job is stale iff it is processing under an expired lease.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Processing
            && self.lease_expires_at.map(|at| at < now).unwrap_or(true)
    }

    /// Deserialize the payload as JSON.
    pub fn payload_json<T: for<'de> Deserialize<'de>>(&self) -> QueueResult<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| QueueError::Serialization(e.to_string()))
    }
}

/// Per-state job counts for a job type.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}
