use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::JobRecord;

/// Unique identifier for a dead-letter row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeadLetterId(pub String);

impl DeadLetterId {
    /// Generate a new unique dead-letter ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DeadLetterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeadLetterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeadLetterId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Terminal quarantine for a job that exhausted its retries (or failed
/// fatally). The payload is preserved so operators can requeue manually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Unique dead-letter identifier
    pub id: DeadLetterId,

    /// Job type of the quarantined job
    pub job_type: String,

    /// Preserved payload, requeueable as-is
    pub payload: Vec<u8>,

    /// The failure that exhausted the job, tagged with its kind
    pub failure_reason: String,

    /// Attempts consumed before quarantine
    pub attempts_made: u32,

    /// When the row was quarantined
    pub created_at: DateTime<Utc>,

    /// Set once an operator has reviewed (e.g. requeued) the row
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl DeadLetter {
    /// Quarantine a job record with its final failure.
    pub fn from_job(job: &JobRecord, failure_reason: impl Into<String>) -> Self {
        Self {
            id: DeadLetterId::new(),
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            failure_reason: failure_reason.into(),
            attempts_made: job.attempts,
            created_at: Utc::now(),
            reviewed_at: None,
        }
    }
}
