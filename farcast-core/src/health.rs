use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Liveness report upserted by every worker process on each heartbeat tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Worker type (job type family) this instance processes
    pub worker_type: String,

    /// Unique instance identifier within the deployment
    pub instance_id: String,

    /// Free-form status string, e.g. "running", "draining"
    pub status: String,

    /// Last heartbeat instant
    pub last_heartbeat: DateTime<Utc>,

    /// Jobs currently executing in this instance
    pub jobs_in_flight: usize,

    /// Seconds since the instance started
    pub uptime_sec: u64,
}

impl HealthCheck {
    /// A worker is healthy iff its last heartbeat is fresher than twice the
    /// heartbeat interval.
    pub fn is_healthy(&self, heartbeat_interval: std::time::Duration, now: DateTime<Utc>) -> bool {
        let window = Duration::from_std(heartbeat_interval * 2)
            .unwrap_or_else(|_| Duration::seconds(60));
        now - self.last_heartbeat < window
    }
}
