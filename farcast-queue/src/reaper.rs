use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{JobStore, QueueResult};

/// Lease-expiry reaper.
///
/// Every tick, each stale job (`processing` with an expired lease) is
/// failed with "lease expired", which routes it through the normal
/// backoff / dead-letter policy. This is the sole guarantor of liveness
/// against crashed workers.
pub struct Reaper {
    store: Arc<dyn JobStore>,
    interval: Duration,
}

impl Reaper {
    /// Create a reaper with the default 60 s interval.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            interval: Duration::from_secs(60),
        }
    }

    /// Create a reaper with a custom interval.
    pub fn with_interval(store: Arc<dyn JobStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Run until the token is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> QueueResult<()> {
        let mut ticker = interval(self.interval);
        info!(interval_secs = self.interval.as_secs(), "reaper started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("reaper stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(0) => debug!("no stale leases"),
                        Ok(reclaimed) => info!(reclaimed, "reclaimed stale leases"),
                        Err(e) => warn!(error = %e, "reaper tick failed"),
                    }
                }
            }
        }
    }

    /// Run one reaper cycle; returns the number of reclaimed jobs.
    pub async fn tick(&self) -> QueueResult<usize> {
        let stale = self.store.stale_jobs(Utc::now()).await?;
        let mut reclaimed = 0;

        for job_id in stale {
            debug!(%job_id, "reclaiming expired lease");
            match self.store.fail(&job_id, "transient: lease expired", false).await {
                Ok(()) => reclaimed += 1,
                Err(e) => warn!(%job_id, error = %e, "failed to reclaim lease"),
            }
        }

        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryJobStore;
    use crate::{JobState, NewJob};

    #[tokio::test]
    async fn reaper_returns_stale_job_to_pending() {
        let store = Arc::new(MemoryJobStore::new());
        let job_id = store.enqueue(NewJob::new("kb_index", vec![])).await.unwrap();
        store
            .claim("kb_index", "w1", Duration::from_secs(300))
            .await
            .unwrap()
            .unwrap();
        store.force_lease_expiry(&job_id);

        let reaper = Reaper::new(store.clone());
        assert_eq!(reaper.tick().await.unwrap(), 1);

        let record = store.get(&job_id).await.unwrap();
        assert_eq!(record.state, JobState::Pending);
        assert_eq!(record.last_error.as_deref(), Some("transient: lease expired"));

        // Another worker claims the recovered job; attempts reflect both
        // deliveries.
        store.force_due(&job_id);
        let reclaimed = store
            .claim("kb_index", "w2", Duration::from_secs(300))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.id, job_id);
        assert_eq!(reclaimed.attempts, 2);
    }

    #[tokio::test]
    async fn reaper_dead_letters_exhausted_stale_job() {
        let store = Arc::new(MemoryJobStore::new());
        let job_id = store
            .enqueue(NewJob::new("kb_index", vec![]).with_max_attempts(1))
            .await
            .unwrap();
        store
            .claim("kb_index", "w1", Duration::from_secs(300))
            .await
            .unwrap();
        store.force_lease_expiry(&job_id);

        Reaper::new(store.clone()).tick().await.unwrap();

        let record = store.get(&job_id).await.unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(store.dead_letters().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn live_leases_are_left_alone() {
        let store = Arc::new(MemoryJobStore::new());
        store.enqueue(NewJob::new("kb_index", vec![])).await.unwrap();
        store
            .claim("kb_index", "w1", Duration::from_secs(300))
            .await
            .unwrap();

        assert_eq!(Reaper::new(store.clone()).tick().await.unwrap(), 0);
    }
}
