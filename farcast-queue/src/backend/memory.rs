use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::debug;

use farcast_core::HealthCheck;

use crate::backoff;
use crate::store::{BoxStream, JobStore};
use crate::{
    DeadLetter, DeadLetterId, JobCounts, JobId, JobRecord, JobState, NewJob, QueueError,
    QueueResult, Wakeup,
};

/// In-memory job store for development and tests.
///
/// Implements the full [`JobStore`] contract — lease exclusivity, backoff,
/// dead-lettering, wake-ups — against `parking_lot` maps, so conformance
/// suites written against it transfer to the durable backends.
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<JobId, JobRecord>>>,
    dead_letters: Arc<RwLock<Vec<DeadLetter>>>,
    health: Arc<RwLock<HashMap<(String, String), HealthCheck>>>,
    wakeup_tx: broadcast::Sender<Wakeup>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        let (wakeup_tx, _) = broadcast::channel(1024);
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            dead_letters: Arc::new(RwLock::new(Vec::new())),
            health: Arc::new(RwLock::new(HashMap::new())),
            wakeup_tx,
        }
    }

    /// Force a lease to expire (test helper).
    pub fn force_lease_expiry(&self, job_id: &JobId) {
        let mut jobs = self.jobs.write();
        if let Some(record) = jobs.get_mut(job_id) {
            if record.state == JobState::Processing {
                record.lease_expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
                record.updated_at = Utc::now();
            }
        }
    }

    /// Make a pending job immediately claimable regardless of its backoff
    /// schedule (test helper).
    pub fn force_due(&self, job_id: &JobId) {
        let mut jobs = self.jobs.write();
        if let Some(record) = jobs.get_mut(job_id) {
            if record.state == JobState::Pending {
                record.scheduled_for = Utc::now();
                record.updated_at = Utc::now();
            }
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryJobStore {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
            dead_letters: self.dead_letters.clone(),
            health: self.health.clone(),
            wakeup_tx: self.wakeup_tx.clone(),
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, new_job: NewJob) -> QueueResult<JobId> {
        let record = JobRecord::from_new(new_job);
        let job_id = record.id.clone();
        let job_type = record.job_type.clone();

        self.jobs.write().insert(job_id.clone(), record);

        // Receiver lag or absence is fine; claim loops also poll.
        let _ = self.wakeup_tx.send(Wakeup {
            job_type,
            job_id: job_id.clone(),
        });

        Ok(job_id)
    }

    async fn claim(
        &self,
        worker_type: &str,
        worker_id: &str,
        lease: Duration,
    ) -> QueueResult<Option<JobRecord>> {
        let now = Utc::now();
        let mut jobs = self.jobs.write();

        // Selection order: priority DESC, scheduled_for ASC, id ASC.
        let best = jobs
            .values()
            .filter(|r| r.job_type == worker_type && r.is_claimable(now))
            .min_by_key(|r| (Reverse(r.priority), r.scheduled_for, r.id.clone()))
            .map(|r| r.id.clone());

        let Some(job_id) = best else {
            return Ok(None);
        };

        let record = jobs.get_mut(&job_id).expect("selected job present");
        record.state = JobState::Processing;
        record.lease_owner = Some(worker_id.to_string());
        record.lease_expires_at =
            Some(now + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(300)));
        record.attempts += 1;
        record.updated_at = now;

        debug!(job_id = %record.id, attempts = record.attempts, "claimed job");
        Ok(Some(record.clone()))
    }

    async fn renew_lease(
        &self,
        job_id: &JobId,
        worker_id: &str,
        lease: Duration,
    ) -> QueueResult<()> {
        let mut jobs = self.jobs.write();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        let held = record.state == JobState::Processing
            && record.lease_owner.as_deref() == Some(worker_id);
        if !held {
            return Err(QueueError::LeaseLost {
                job_id: job_id.to_string(),
                worker_id: worker_id.to_string(),
            });
        }

        record.lease_expires_at = Some(
            Utc::now()
                + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(300)),
        );
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn complete(&self, job_id: &JobId) -> QueueResult<()> {
        let mut jobs = self.jobs.write();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        match record.state {
            JobState::Completed => Ok(()),
            JobState::Processing => {
                record.state = JobState::Completed;
                record.lease_owner = None;
                record.lease_expires_at = None;
                record.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(QueueError::InvalidState(job_id.to_string())),
        }
    }

    async fn fail(&self, job_id: &JobId, error: &str, fatal: bool) -> QueueResult<()> {
        let now = Utc::now();
        let mut jobs = self.jobs.write();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        if record.state.is_terminal() {
            return Ok(());
        }

        record.last_error = Some(error.to_string());
        record.lease_owner = None;
        record.lease_expires_at = None;
        record.updated_at = now;

        if !fatal && record.attempts < record.max_attempts {
            let delay = backoff::retry_delay(record.attempts);
            record.state = JobState::Pending;
            record.scheduled_for =
                now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(30));
            debug!(job_id = %record.id, attempts = record.attempts, delay_secs = delay.as_secs(), "re-enqueued with backoff");
        } else {
            record.state = JobState::Failed;
            let dead = DeadLetter::from_job(record, error);
            self.dead_letters.write().push(dead);
            debug!(job_id = %record.id, attempts = record.attempts, "dead-lettered");
        }

        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<JobRecord> {
        self.jobs
            .read()
            .get(job_id)
            .cloned()
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))
    }

    async fn counts(&self, job_type: &str) -> QueueResult<JobCounts> {
        let jobs = self.jobs.read();
        let mut counts = JobCounts::default();
        for record in jobs.values().filter(|r| r.job_type == job_type) {
            match record.state {
                JobState::Pending => counts.pending += 1,
                JobState::Processing => counts.processing += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn stale_jobs(&self, now: DateTime<Utc>) -> QueueResult<Vec<JobId>> {
        Ok(self
            .jobs
            .read()
            .values()
            .filter(|r| r.is_stale(now))
            .map(|r| r.id.clone())
            .collect())
    }

    async fn dead_letters(&self) -> QueueResult<Vec<DeadLetter>> {
        let mut letters = self.dead_letters.read().clone();
        letters.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(letters)
    }

    async fn requeue_dead_letter(&self, id: &DeadLetterId) -> QueueResult<JobId> {
        let (job_type, payload) = {
            let mut letters = self.dead_letters.write();
            let letter = letters
                .iter_mut()
                .find(|l| &l.id == id)
                .ok_or_else(|| QueueError::DeadLetterNotFound(id.to_string()))?;
            letter.reviewed_at = Some(Utc::now());
            (letter.job_type.clone(), letter.payload.clone())
        };

        self.enqueue(NewJob::new(job_type, payload)).await
    }

    fn wakeups(&self, job_type: &str) -> BoxStream<Wakeup> {
        let job_type = job_type.to_string();
        let stream = BroadcastStream::new(self.wakeup_tx.subscribe()).filter_map(move |item| {
            match item {
                Ok(wakeup) if wakeup.job_type == job_type => Some(wakeup),
                _ => None,
            }
        });
        Box::pin(stream)
    }

    async fn upsert_health(&self, check: HealthCheck) -> QueueResult<()> {
        self.health
            .write()
            .insert((check.worker_type.clone(), check.instance_id.clone()), check);
        Ok(())
    }

    async fn list_health(&self) -> QueueResult<Vec<HealthCheck>> {
        Ok(self.health.read().values().cloned().collect())
    }
}
