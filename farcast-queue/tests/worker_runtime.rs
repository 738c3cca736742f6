use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use farcast_queue::backend::memory::MemoryJobStore;
use farcast_queue::{
    JobError, JobHandler, JobId, JobRecord, JobState, JobStore, NewJob, Reaper, WorkerOptions,
    WorkerRuntime,
};

fn fast_options(worker_type: &str, instance_id: &str) -> WorkerOptions {
    WorkerOptions::new(worker_type, instance_id)
        .with_poll_interval(Duration::from_millis(20))
        .with_heartbeat_interval(Duration::from_millis(50))
        .with_drain_deadline(Duration::from_secs(2))
}

async fn wait_until<F, Fut>(mut condition: F, timeout: Duration)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_state(store: &Arc<MemoryJobStore>, job_id: &JobId, state: JobState) {
    wait_until(
        || {
            let store = store.clone();
            let job_id = job_id.clone();
            async move { store.get(&job_id).await.unwrap().state == state }
        },
        Duration::from_secs(3),
    )
    .await;
}

struct CountingHandler {
    calls: Arc<AtomicUsize>,
    fail_first: usize,
}

#[async_trait]
impl JobHandler for CountingHandler {
    async fn handle(&self, _job: &JobRecord, _cancel: &CancellationToken) -> Result<(), JobError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            Err(JobError::retryable("synthesized 503"))
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn worker_completes_enqueued_job() {
    let store = Arc::new(MemoryJobStore::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let job_id = store
        .enqueue(NewJob::new("render", b"{}".to_vec()))
        .await
        .unwrap();

    let worker = WorkerRuntime::new(
        store.clone(),
        fast_options("render", "render-1"),
        Arc::new(CountingHandler { calls: calls.clone(), fail_first: 0 }),
    );
    let handle = worker.spawn();

    wait_for_state(&store, &job_id, JobState::Completed).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_job_retries_until_success() {
    let store = Arc::new(MemoryJobStore::new());
    let calls = Arc::new(AtomicUsize::new(0));

    // Fails on attempts 1 and 2, succeeds on attempt 3.
    let job_id = store
        .enqueue(NewJob::new("render", b"{}".to_vec()).with_max_attempts(3))
        .await
        .unwrap();

    let worker = WorkerRuntime::new(
        store.clone(),
        fast_options("render", "render-1"),
        Arc::new(CountingHandler { calls: calls.clone(), fail_first: 2 }),
    );
    let handle = worker.spawn();

    // Collapse the backoff windows as they appear so the test stays fast.
    for expected_attempts in 1..=2u32 {
        wait_until(
            || {
                let store = store.clone();
                let job_id = job_id.clone();
                async move {
                    let record = store.get(&job_id).await.unwrap();
                    record.state == JobState::Pending && record.attempts == expected_attempts
                }
            },
            Duration::from_secs(3),
        )
        .await;
        store.force_due(&job_id);
    }

    wait_for_state(&store, &job_id, JobState::Completed).await;

    let record = store.get(&job_id).await.unwrap();
    assert_eq!(record.attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(record.last_error.as_deref().unwrap().contains("503"));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn exhausted_retries_dead_letter_the_job() {
    let store = Arc::new(MemoryJobStore::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let job_id = store
        .enqueue(NewJob::new("render", b"{}".to_vec()).with_max_attempts(2))
        .await
        .unwrap();

    let worker = WorkerRuntime::new(
        store.clone(),
        fast_options("render", "render-1"),
        Arc::new(CountingHandler { calls: calls.clone(), fail_first: usize::MAX }),
    );
    let handle = worker.spawn();

    wait_until(
        || {
            let store = store.clone();
            let job_id = job_id.clone();
            async move {
                let record = store.get(&job_id).await.unwrap();
                record.state == JobState::Pending && record.attempts == 1
            }
        },
        Duration::from_secs(3),
    )
    .await;
    store.force_due(&job_id);

    wait_for_state(&store, &job_id, JobState::Failed).await;

    let letters = store.dead_letters().await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].attempts_made, 2);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn concurrency_cap_bounds_jobs_in_flight() {
    let store = Arc::new(MemoryJobStore::new());

    struct Blocking {
        release: Arc<tokio::sync::Notify>,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobHandler for Blocking {
        async fn handle(
            &self,
            _job: &JobRecord,
            _cancel: &CancellationToken,
        ) -> Result<(), JobError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.release.notified().await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let release = Arc::new(tokio::sync::Notify::new());
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        store
            .enqueue(NewJob::new("render", b"{}".to_vec()))
            .await
            .unwrap();
    }

    let worker = WorkerRuntime::new(
        store.clone(),
        fast_options("render", "render-1").with_max_concurrent_jobs(4),
        Arc::new(Blocking {
            release: release.clone(),
            running: running.clone(),
            peak: peak.clone(),
        }),
    );
    let handle = worker.spawn();

    {
        let running = running.clone();
        wait_until(
            move || {
                let running = running.clone();
                async move { running.load(Ordering::SeqCst) == 4 }
            },
            Duration::from_secs(3),
        )
        .await;
    }

    // Steady state: the cap holds while the queue still has waiting jobs.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(running.load(Ordering::SeqCst), 4);
    let counts = store.counts("render").await.unwrap();
    assert_eq!(counts.processing, 4);
    assert_eq!(counts.pending, 6);

    // Heartbeats report in-flight within the cap.
    for check in store.list_health().await.unwrap() {
        assert!(check.jobs_in_flight <= 4);
    }

    // Release handlers until the queue drains.
    wait_until(
        || {
            release.notify_waiters();
            let store = store.clone();
            async move { store.counts("render").await.unwrap().completed == 10 }
        },
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(peak.load(Ordering::SeqCst), 4);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_drains_in_flight_jobs() {
    let store = Arc::new(MemoryJobStore::new());

    struct Slow;

    #[async_trait]
    impl JobHandler for Slow {
        async fn handle(
            &self,
            _job: &JobRecord,
            _cancel: &CancellationToken,
        ) -> Result<(), JobError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        }
    }

    let job_id = store
        .enqueue(NewJob::new("render", b"{}".to_vec()))
        .await
        .unwrap();

    let worker = WorkerRuntime::new(
        store.clone(),
        fast_options("render", "render-1"),
        Arc::new(Slow),
    );
    let handle = worker.spawn();

    wait_for_state(&store, &job_id, JobState::Processing).await;

    // Shutdown must wait for the in-flight handler, not abandon it.
    handle.shutdown().await.unwrap();
    let record = store.get(&job_id).await.unwrap();
    assert_eq!(record.state, JobState::Completed);
}

#[tokio::test]
async fn lost_lease_cancels_handler_and_job_is_reclaimed() {
    let store = Arc::new(MemoryJobStore::new());

    struct WaitForCancel {
        cancelled: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobHandler for WaitForCancel {
        async fn handle(
            &self,
            _job: &JobRecord,
            cancel: &CancellationToken,
        ) -> Result<(), JobError> {
            cancel.cancelled().await;
            self.cancelled.fetch_add(1, Ordering::SeqCst);
            Err(JobError::retryable("lease lost"))
        }
    }

    let cancelled = Arc::new(AtomicUsize::new(0));
    let job_id = store
        .enqueue(NewJob::new("render", b"{}".to_vec()))
        .await
        .unwrap();

    // A single slot: the stuck handler occupies it, so this worker
    // cannot re-claim the job once the reaper re-pends it.
    let worker = WorkerRuntime::new(
        store.clone(),
        fast_options("render", "render-1")
            .with_lease_seconds(1)
            .with_max_concurrent_jobs(1),
        Arc::new(WaitForCancel { cancelled: cancelled.clone() }),
    );
    let handle = worker.spawn();

    wait_for_state(&store, &job_id, JobState::Processing).await;

    // Simulate crash-and-recover: the lease expires, the reaper returns
    // the job to pending, and another worker claims it. The original
    // handler's next renewal then fails and its token fires. The expiry
    // races the renewal task, so repeat until the reclaim wins.
    let reaper = Reaper::new(store.clone());
    let reclaimed = loop {
        store.force_lease_expiry(&job_id);
        reaper.tick().await.unwrap();
        store.force_due(&job_id);
        if let Some(job) = store
            .claim("render", "render-2", Duration::from_secs(300))
            .await
            .unwrap()
        {
            break job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert_eq!(reclaimed.id, job_id);
    assert_eq!(reclaimed.attempts, 2);

    {
        let cancelled = cancelled.clone();
        wait_until(
            move || {
                let cancelled = cancelled.clone();
                async move { cancelled.load(Ordering::SeqCst) == 1 }
            },
            Duration::from_secs(3),
        )
        .await;
    }

    handle.shutdown().await.unwrap();
}
