//! PostgreSQL-backed job store.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so concurrent claimers across the
//! whole deployment never block and never double-claim; wake-ups ride
//! `LISTEN/NOTIFY` on channel `new_job_<type>`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, warn};

use farcast_core::HealthCheck;

use crate::backoff;
use crate::store::{BoxStream, JobStore};
use crate::{
    DeadLetter, DeadLetterId, JobCounts, JobId, JobRecord, JobState, NewJob, QueueError,
    QueueResult, Wakeup,
};

const SCHEMA: &str = include_str!("../../migrations/0001_queue.sql");

/// Durable job store over PostgreSQL.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Connect with a small dedicated pool.
    pub async fn connect(database_url: &str) -> QueueResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the queue schema (idempotent).
    pub async fn migrate(&self) -> QueueResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_job(row: &PgRow) -> QueueResult<JobRecord> {
    let state_text: String = row.try_get("state").map_err(QueueError::from)?;
    let state = JobState::parse(&state_text)
        .ok_or_else(|| QueueError::Storage(format!("unknown job state: {state_text}")))?;

    Ok(JobRecord {
        id: JobId::from(row.try_get::<String, _>("id").map_err(QueueError::from)?),
        job_type: row.try_get("job_type").map_err(QueueError::from)?,
        payload: row.try_get("payload").map_err(QueueError::from)?,
        priority: (row.try_get::<i16, _>("priority").map_err(QueueError::from)? as u8).into(),
        state,
        scheduled_for: row.try_get("scheduled_for").map_err(QueueError::from)?,
        attempts: row.try_get::<i32, _>("attempts").map_err(QueueError::from)? as u32,
        max_attempts: row.try_get::<i32, _>("max_attempts").map_err(QueueError::from)? as u32,
        lease_owner: row.try_get("lease_owner").map_err(QueueError::from)?,
        lease_expires_at: row.try_get("lease_expires_at").map_err(QueueError::from)?,
        last_error: row.try_get("last_error").map_err(QueueError::from)?,
        created_at: row.try_get("created_at").map_err(QueueError::from)?,
        updated_at: row.try_get("updated_at").map_err(QueueError::from)?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, new_job: NewJob) -> QueueResult<JobId> {
        let record = JobRecord::from_new(new_job);

        sqlx::query(
            r#"
            INSERT INTO farcast_jobs
                (id, job_type, payload, priority, state, scheduled_for,
                 attempts, max_attempts, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, 0, $6, $7, $7)
            "#,
        )
        .bind(record.id.as_str())
        .bind(&record.job_type)
        .bind(&record.payload)
        .bind(record.priority.as_i16())
        .bind(record.scheduled_for)
        .bind(record.max_attempts as i32)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(format!("new_job_{}", record.job_type))
            .bind(record.id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(record.id)
    }

    async fn claim(
        &self,
        worker_type: &str,
        worker_id: &str,
        lease: Duration,
    ) -> QueueResult<Option<JobRecord>> {
        let row = sqlx::query(
            r#"
            WITH next_job AS (
                SELECT id FROM farcast_jobs
                WHERE job_type = $1
                  AND state = 'pending'
                  AND scheduled_for <= now()
                ORDER BY priority DESC, scheduled_for ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE farcast_jobs j
            SET state = 'processing',
                lease_owner = $2,
                lease_expires_at = now() + make_interval(secs => $3),
                attempts = attempts + 1,
                updated_at = now()
            FROM next_job
            WHERE j.id = next_job.id
            RETURNING j.*
            "#,
        )
        .bind(worker_type)
        .bind(worker_id)
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let record = row_to_job(&row)?;
                debug!(job_id = %record.id, attempts = record.attempts, "claimed job");
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn renew_lease(
        &self,
        job_id: &JobId,
        worker_id: &str,
        lease: Duration,
    ) -> QueueResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE farcast_jobs
            SET lease_expires_at = now() + make_interval(secs => $3),
                updated_at = now()
            WHERE id = $1 AND state = 'processing' AND lease_owner = $2
            "#,
        )
        .bind(job_id.as_str())
        .bind(worker_id)
        .bind(lease.as_secs_f64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseLost {
                job_id: job_id.to_string(),
                worker_id: worker_id.to_string(),
            });
        }
        Ok(())
    }

    async fn complete(&self, job_id: &JobId) -> QueueResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE farcast_jobs
            SET state = 'completed', lease_owner = NULL, lease_expires_at = NULL,
                updated_at = now()
            WHERE id = $1 AND state IN ('processing', 'completed')
            "#,
        )
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a missing row from an illegal state.
            let exists = sqlx::query("SELECT 1 FROM farcast_jobs WHERE id = $1")
                .bind(job_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
            return Err(match exists {
                Some(_) => QueueError::InvalidState(job_id.to_string()),
                None => QueueError::JobNotFound(job_id.to_string()),
            });
        }
        Ok(())
    }

    async fn fail(&self, job_id: &JobId, error: &str, fatal: bool) -> QueueResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM farcast_jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        let record = row_to_job(&row)?;

        if record.state.is_terminal() {
            tx.commit().await?;
            return Ok(());
        }

        if !fatal && record.attempts < record.max_attempts {
            let delay = backoff::retry_delay(record.attempts);
            sqlx::query(
                r#"
                UPDATE farcast_jobs
                SET state = 'pending',
                    scheduled_for = now() + make_interval(secs => $2),
                    lease_owner = NULL, lease_expires_at = NULL,
                    last_error = $3, updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(job_id.as_str())
            .bind(delay.as_secs_f64())
            .bind(error)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE farcast_jobs
                SET state = 'failed',
                    lease_owner = NULL, lease_expires_at = NULL,
                    last_error = $2, updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(job_id.as_str())
            .bind(error)
            .execute(&mut *tx)
            .await?;

            let dead = DeadLetter::from_job(&record, error);
            sqlx::query(
                r#"
                INSERT INTO farcast_dead_letters
                    (id, job_type, payload, failure_reason, attempts_made, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(dead.id.as_str())
            .bind(&dead.job_type)
            .bind(&dead.payload)
            .bind(&dead.failure_reason)
            .bind(dead.attempts_made as i32)
            .bind(dead.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<JobRecord> {
        let row = sqlx::query("SELECT * FROM farcast_jobs WHERE id = $1")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        row_to_job(&row)
    }

    async fn counts(&self, job_type: &str) -> QueueResult<JobCounts> {
        let rows = sqlx::query(
            "SELECT state, count(*) AS n FROM farcast_jobs WHERE job_type = $1 GROUP BY state",
        )
        .bind(job_type)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = JobCounts::default();
        for row in rows {
            let state: String = row.try_get("state")?;
            let n: i64 = row.try_get("n")?;
            match state.as_str() {
                "pending" => counts.pending = n as usize,
                "processing" => counts.processing = n as usize,
                "completed" => counts.completed = n as usize,
                "failed" => counts.failed = n as usize,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn stale_jobs(&self, now: DateTime<Utc>) -> QueueResult<Vec<JobId>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM farcast_jobs
            WHERE state = 'processing'
              AND (lease_expires_at IS NULL OR lease_expires_at < $1)
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(JobId::from(row.try_get::<String, _>("id")?)))
            .collect()
    }

    async fn dead_letters(&self) -> QueueResult<Vec<DeadLetter>> {
        let rows =
            sqlx::query("SELECT * FROM farcast_dead_letters ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await?;

        rows.iter()
            .map(|row| {
                Ok(DeadLetter {
                    id: DeadLetterId(row.try_get::<String, _>("id")?),
                    job_type: row.try_get("job_type")?,
                    payload: row.try_get("payload")?,
                    failure_reason: row.try_get("failure_reason")?,
                    attempts_made: row.try_get::<i32, _>("attempts_made")? as u32,
                    created_at: row.try_get("created_at")?,
                    reviewed_at: row.try_get("reviewed_at")?,
                })
            })
            .collect()
    }

    async fn requeue_dead_letter(&self, id: &DeadLetterId) -> QueueResult<JobId> {
        let row = sqlx::query(
            r#"
            UPDATE farcast_dead_letters SET reviewed_at = now()
            WHERE id = $1
            RETURNING job_type, payload
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| QueueError::DeadLetterNotFound(id.to_string()))?;

        let job_type: String = row.try_get("job_type")?;
        let payload: Vec<u8> = row.try_get("payload")?;
        self.enqueue(NewJob::new(job_type, payload)).await
    }

    fn wakeups(&self, job_type: &str) -> BoxStream<Wakeup> {
        let pool = self.pool.clone();
        let job_type = job_type.to_string();
        let channel = format!("new_job_{job_type}");

        Box::pin(async_stream::stream! {
            let mut listener = match PgListener::connect_with(&pool).await {
                Ok(listener) => listener,
                Err(e) => {
                    warn!(error = %e, "wake-up listener connect failed; falling back to polling");
                    return;
                }
            };
            if let Err(e) = listener.listen(&channel).await {
                warn!(error = %e, channel, "LISTEN failed; falling back to polling");
                return;
            }
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        yield Wakeup {
                            job_type: job_type.clone(),
                            job_id: JobId::from(notification.payload()),
                        };
                    }
                    Err(e) => {
                        warn!(error = %e, "wake-up listener dropped; falling back to polling");
                        return;
                    }
                }
            }
        })
    }

    async fn upsert_health(&self, check: HealthCheck) -> QueueResult<()> {
        sqlx::query(
            r#"
            INSERT INTO farcast_health
                (worker_type, instance_id, status, last_heartbeat, jobs_in_flight, uptime_sec)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (worker_type, instance_id) DO UPDATE
            SET status = EXCLUDED.status,
                last_heartbeat = EXCLUDED.last_heartbeat,
                jobs_in_flight = EXCLUDED.jobs_in_flight,
                uptime_sec = EXCLUDED.uptime_sec
            "#,
        )
        .bind(&check.worker_type)
        .bind(&check.instance_id)
        .bind(&check.status)
        .bind(check.last_heartbeat)
        .bind(check.jobs_in_flight as i32)
        .bind(check.uptime_sec as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_health(&self) -> QueueResult<Vec<HealthCheck>> {
        let rows = sqlx::query("SELECT * FROM farcast_health")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(HealthCheck {
                    worker_type: row.try_get("worker_type")?,
                    instance_id: row.try_get("instance_id")?,
                    status: row.try_get("status")?,
                    last_heartbeat: row.try_get("last_heartbeat")?,
                    jobs_in_flight: row.try_get::<i32, _>("jobs_in_flight")? as usize,
                    uptime_sec: row.try_get::<i64, _>("uptime_sec")? as u64,
                })
            })
            .collect()
    }
}
