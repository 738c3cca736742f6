use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use farcast_core::HealthCheck;

use crate::{JobError, JobRecord, JobStore, QueueError, QueueResult};

/// Parameters for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Job type this worker claims
    pub worker_type: String,

    /// Unique instance identifier within the deployment
    pub instance_id: String,

    /// Concurrency cap: jobs processing at once in this instance
    pub max_concurrent_jobs: usize,

    /// Liveness report cadence
    pub heartbeat_interval: Duration,

    /// Lease duration requested on claim; renewed at half-life
    pub lease_seconds: u64,

    /// Claim-poll fallback when no wake-up arrives
    pub poll_interval: Duration,

    /// How long shutdown waits for in-flight handlers before abandoning
    pub drain_deadline: Duration,
}

impl WorkerOptions {
    /// Create options with production defaults.
    pub fn new(worker_type: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            worker_type: worker_type.into(),
            instance_id: instance_id.into(),
            max_concurrent_jobs: 4,
            heartbeat_interval: Duration::from_secs(30),
            lease_seconds: 300,
            poll_interval: Duration::from_secs(5),
            drain_deadline: Duration::from_secs(30),
        }
    }

    /// Set the concurrency cap.
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    /// Set the heartbeat cadence.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the lease duration.
    pub fn with_lease_seconds(mut self, lease_seconds: u64) -> Self {
        self.lease_seconds = lease_seconds.max(1);
        self
    }

    /// Set the poll fallback interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the shutdown drain deadline.
    pub fn with_drain_deadline(mut self, deadline: Duration) -> Self {
        self.drain_deadline = deadline;
        self
    }

    fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }

    fn renewal_interval(&self) -> Duration {
        Duration::from_secs((self.lease_seconds / 2).max(1))
    }
}

/// User-supplied job execution logic.
///
/// Delivery is at-least-once, so `handle` must be idempotent. The
/// cancellation token fires when the lease is lost (someone else may now
/// run the job) or graceful shutdown begins; handlers must check it at I/O
/// boundaries.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobRecord, cancel: &CancellationToken) -> Result<(), JobError>;
}

/// Handle for managing worker lifecycle.
pub struct WorkerHandle {
    shutdown: CancellationToken,
    join: JoinHandle<QueueResult<()>>,
}

impl WorkerHandle {
    /// Gracefully shut the worker down: stop claiming, drain in-flight
    /// handlers to the deadline, then return.
    pub async fn shutdown(self) -> QueueResult<()> {
        self.shutdown.cancel();
        self.join
            .await
            .map_err(|e| QueueError::Internal(format!("worker join error: {e}")))?
    }

    /// Token that triggers this worker's shutdown when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// Reusable worker harness: claim loop, concurrency cap, lease renewal,
/// heartbeats, and graceful drain around a [`JobHandler`].
pub struct WorkerRuntime {
    store: Arc<dyn JobStore>,
    options: WorkerOptions,
    handler: Arc<dyn JobHandler>,
}

impl WorkerRuntime {
    pub fn new(
        store: Arc<dyn JobStore>,
        options: WorkerOptions,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        Self {
            store,
            options,
            handler,
        }
    }

    /// Spawn the worker loop onto the runtime.
    pub fn spawn(self) -> WorkerHandle {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let join = tokio::spawn(async move { self.run(token).await });
        WorkerHandle { shutdown, join }
    }

    /// Run the claim loop until the token is cancelled.
    #[instrument(skip_all, fields(worker_type = %self.options.worker_type, instance_id = %self.options.instance_id))]
    pub async fn run(self, shutdown: CancellationToken) -> QueueResult<()> {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_jobs));
        let mut wakeups = self.store.wakeups(&self.options.worker_type);
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut heartbeat = tokio::time::interval(self.options.heartbeat_interval);

        info!(max_concurrent = self.options.max_concurrent_jobs, "worker started");

        loop {
            // Claim until the queue is empty or all slots are busy.
            while !shutdown.is_cancelled() {
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    break;
                };
                match self
                    .store
                    .claim(
                        &self.options.worker_type,
                        &self.options.instance_id,
                        self.options.lease(),
                    )
                    .await
                {
                    Ok(Some(job)) => {
                        self.spawn_job(&mut tasks, job, permit, &shutdown);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "claim failed");
                        break;
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = heartbeat.tick() => {
                    self.beat(&semaphore, started, "running").await;
                }
                _ = wakeups.next() => {
                    debug!("wake-up received");
                }
                _ = tokio::time::sleep(self.options.poll_interval) => {}
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Graceful drain: in-flight handlers get the deadline to wind down
        // (their cancellation tokens are already fired via `shutdown`).
        info!(in_flight = tasks.len(), "draining worker");
        let drained = tokio::time::timeout(self.options.drain_deadline, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("drain deadline exceeded; abandoning jobs to the reaper");
            tasks.shutdown().await;
        }

        self.beat(&semaphore, started, "stopped").await;
        info!("worker stopped");
        Ok(())
    }

    fn spawn_job(
        &self,
        tasks: &mut JoinSet<()>,
        job: JobRecord,
        permit: tokio::sync::OwnedSemaphorePermit,
        shutdown: &CancellationToken,
    ) {
        let store = self.store.clone();
        let handler = self.handler.clone();
        let worker_id = self.options.instance_id.clone();
        let lease = self.options.lease();
        let renewal_interval = self.options.renewal_interval();
        let cancel = shutdown.child_token();

        tasks.spawn(async move {
            let _permit = permit;
            let job_id = job.id.clone();
            debug!(%job_id, attempts = job.attempts, "processing job");

            // Renew at half-life until the handler returns; a failed
            // renewal means the lease was lost and the handler must stop.
            let lease_lost = Arc::new(AtomicBool::new(false));
            let renewal = {
                let store = store.clone();
                let job_id = job_id.clone();
                let worker_id = worker_id.clone();
                let cancel = cancel.clone();
                let lease_lost = lease_lost.clone();
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(renewal_interval);
                    ticker.tick().await;
                    loop {
                        ticker.tick().await;
                        if let Err(e) = store.renew_lease(&job_id, &worker_id, lease).await {
                            warn!(%job_id, error = %e, "lease renewal failed; cancelling handler");
                            lease_lost.store(true, Ordering::SeqCst);
                            cancel.cancel();
                            break;
                        }
                    }
                })
            };

            // Run the handler in its own task so a panic is contained and
            // recorded as a retryable failure.
            let exec = {
                let handler = handler.clone();
                let job = job.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { handler.handle(&job, &cancel).await })
            };
            let result = match exec.await {
                Ok(result) => result,
                Err(join_err) => Err(JobError::retryable(format!("handler panicked: {join_err}"))),
            };

            renewal.abort();

            // Someone else may hold the lease now; acking would stomp
            // their claim. The job's fate belongs to the new owner.
            if lease_lost.load(Ordering::SeqCst) {
                warn!(%job_id, "lease lost mid-handler; skipping ack");
                return;
            }

            match result {
                Ok(()) => {
                    if let Err(e) = store.complete(&job_id).await {
                        warn!(%job_id, error = %e, "complete failed");
                    } else {
                        debug!(%job_id, "job completed");
                    }
                }
                Err(job_error) => {
                    error!(%job_id, error = %job_error, "job failed");
                    if let Err(e) = store
                        .fail(&job_id, &job_error.to_string(), job_error.is_fatal())
                        .await
                    {
                        warn!(%job_id, error = %e, "fail ack failed");
                    }
                }
            }
        });
    }

    async fn beat(&self, semaphore: &Semaphore, started: Instant, status: &str) {
        let jobs_in_flight = self
            .options
            .max_concurrent_jobs
            .saturating_sub(semaphore.available_permits());
        let check = HealthCheck {
            worker_type: self.options.worker_type.clone(),
            instance_id: self.options.instance_id.clone(),
            status: status.to_string(),
            last_heartbeat: Utc::now(),
            jobs_in_flight,
            uptime_sec: started.elapsed().as_secs(),
        };
        if let Err(e) = self.store.upsert_health(check).await {
            warn!(error = %e, "heartbeat upsert failed");
        }
    }
}
