//! # farcast-queue: Durable Job Processing for the Broadcast Pipeline
//!
//! At-least-once job dispatch over a shared persistent queue:
//!
//! - **Lease-based claims**: a claim grants a time-bounded exclusive right
//!   to execute a job; row-level skip-locked semantics mean concurrent
//!   claimers never block and never double-claim.
//! - **Retry with backoff**: failed jobs re-enter the queue with
//!   exponential backoff until their attempt budget is spent, then land in
//!   the dead-letter quarantine for manual review.
//! - **Expiry reaper**: the sole guarantor of liveness against crashed
//!   workers — stale leases are failed back into the retry policy.
//! - **Worker runtime**: a reusable harness with a concurrency cap, lease
//!   renewal, heartbeats, push/pull hybrid wake-up, and graceful drain.
//!
//! Handlers must be idempotent: a job may be handed to [`JobHandler::handle`]
//! more than once.
//!
//! ```no_run
//! use std::sync::Arc;
//! use farcast_queue::{
//!     JobHandler, JobError, JobRecord, JobStore, NewJob, WorkerOptions, WorkerRuntime,
//! };
//! use farcast_queue::backend::memory::MemoryJobStore;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl JobHandler for Printer {
//!     async fn handle(&self, job: &JobRecord, _cancel: &CancellationToken) -> Result<(), JobError> {
//!         println!("{}", String::from_utf8_lossy(&job.payload));
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> farcast_queue::QueueResult<()> {
//! let store = Arc::new(MemoryJobStore::new());
//! store.enqueue(NewJob::new("print", b"hello".to_vec())).await?;
//!
//! let worker = WorkerRuntime::new(
//!     store,
//!     WorkerOptions::new("print", "printer-1"),
//!     Arc::new(Printer),
//! );
//! let handle = worker.spawn();
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod backoff;
pub mod error;
pub mod reaper;
pub mod store;
pub mod types;
pub mod worker;

pub use error::{JobError, QueueError, QueueResult};
pub use reaper::Reaper;
pub use store::{BoxStream, JobStore};
pub use types::{
    DeadLetter, DeadLetterId, JobCounts, JobId, JobPriority, JobRecord, JobState, NewJob, Wakeup,
};
pub use worker::{JobHandler, WorkerHandle, WorkerOptions, WorkerRuntime};

#[cfg(feature = "postgres")]
pub use backend::postgres::PgJobStore;
