use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use std::pin::Pin;
use std::time::Duration;

use farcast_core::HealthCheck;

use crate::{
    DeadLetter, DeadLetterId, JobCounts, JobId, JobRecord, NewJob, QueueResult, Wakeup,
};

/// Type alias for boxed streams (stable Rust compatible).
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Storage primitives for the durable job queue.
///
/// All operations are atomic with respect to concurrent workers; the store
/// owns Job and DeadLetter rows exclusively, and every mutation goes
/// through these operations.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a pending job and emit a wake-up on `new_job_<type>`.
    async fn enqueue(&self, new_job: NewJob) -> QueueResult<JobId>;

    /// Atomically claim the single best claimable job of `worker_type`:
    /// highest priority, then oldest `scheduled_for`, then smallest id.
    ///
    /// The claimed job moves to `processing` with `lease_owner = worker_id`,
    /// `lease_expires_at = now + lease`, and `attempts` incremented.
    /// Concurrent claimers must never block on each other (skip-locked
    /// semantics) and must never receive the same job.
    async fn claim(
        &self,
        worker_type: &str,
        worker_id: &str,
        lease: Duration,
    ) -> QueueResult<Option<JobRecord>>;

    /// Extend the lease iff `worker_id` still holds it; otherwise
    /// [`QueueError::LeaseLost`](crate::QueueError::LeaseLost).
    async fn renew_lease(
        &self,
        job_id: &JobId,
        worker_id: &str,
        lease: Duration,
    ) -> QueueResult<()>;

    /// Transition `processing → completed`. No-op if already completed.
    async fn complete(&self, job_id: &JobId) -> QueueResult<()>;

    /// Record a failed delivery.
    ///
    /// With attempts left and `fatal == false` the job returns to `pending`
    /// with exponential backoff; otherwise it transitions to `failed` and a
    /// dead-letter row preserving the payload is inserted. Idempotent on
    /// terminal states. `error` is recorded as `last_error`.
    async fn fail(&self, job_id: &JobId, error: &str, fatal: bool) -> QueueResult<()>;

    /// Fetch a job row.
    async fn get(&self, job_id: &JobId) -> QueueResult<JobRecord>;

    /// Per-state counts for a job type.
    async fn counts(&self, job_type: &str) -> QueueResult<JobCounts>;

    /// Jobs in `processing` whose lease expired before `now`. Consumed by
    /// the [reaper](crate::Reaper).
    async fn stale_jobs(&self, now: DateTime<Utc>) -> QueueResult<Vec<JobId>>;

    /// All quarantined jobs, newest first.
    async fn dead_letters(&self) -> QueueResult<Vec<DeadLetter>>;

    /// Re-enqueue a dead-lettered payload as a fresh pending job and stamp
    /// the row as reviewed. Manual operator action only.
    async fn requeue_dead_letter(&self, id: &DeadLetterId) -> QueueResult<JobId>;

    /// Subscribe to wake-up notifications for a job type (channel
    /// `new_job_<type>`). Workers combine this with interval polling.
    fn wakeups(&self, job_type: &str) -> BoxStream<Wakeup>;

    /// Upsert a worker liveness report.
    async fn upsert_health(&self, check: HealthCheck) -> QueueResult<()>;

    /// All worker liveness reports.
    async fn list_health(&self) -> QueueResult<Vec<HealthCheck>>;
}
