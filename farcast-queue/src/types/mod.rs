mod dead_letter;
mod ids;
mod job;
mod priority;

pub use dead_letter::{DeadLetter, DeadLetterId};
pub use ids::JobId;
pub use job::{JobCounts, JobRecord, JobState, NewJob};
pub use priority::JobPriority;

use serde::{Deserialize, Serialize};

/// Push notification emitted when a job of a given type becomes claimable.
///
/// Workers subscribe to the channel `new_job_<type>`; a missed wake-up is
/// harmless because the claim loop also polls on an interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wakeup {
    /// Job type that gained a claimable job
    pub job_type: String,

    /// The job that triggered the notification
    pub job_id: JobId,
}
