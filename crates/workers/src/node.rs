//! Remote worker bookkeeping.

use serde::{Deserialize, Serialize};

/// Worker availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Online with no active jobs
    Idle,
    /// Online with at least one active job
    Busy,
    /// Missed heartbeats; receives no work until it reports again
    Offline,
}

/// A remote proof worker as seen by the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerNode {
    pub id: String,
    pub endpoint: String,
    pub status: WorkerStatus,
    pub active_jobs: usize,
    pub max_concurrency: usize,
    pub total_processed: u64,
    pub total_failed: u64,
    /// Running mean of successful job durations
    pub avg_duration_ms: f64,
    /// Last heartbeat (Unix milliseconds)
    pub last_heartbeat: u64,
}

impl WorkerNode {
    pub fn new(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        max_concurrency: usize,
        now_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            status: WorkerStatus::Idle,
            active_jobs: 0,
            max_concurrency,
            total_processed: 0,
            total_failed: 0,
            avg_duration_ms: 0.0,
            last_heartbeat: now_ms,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status != WorkerStatus::Offline
    }

    pub fn is_saturated(&self) -> bool {
        self.active_jobs >= self.max_concurrency
    }

    /// Online and below its concurrency limit
    pub fn can_accept(&self) -> bool {
        self.is_online() && !self.is_saturated()
    }

    /// `active_jobs / max_concurrency`
    pub fn utilization(&self) -> f64 {
        if self.max_concurrency == 0 {
            return 1.0;
        }
        self.active_jobs as f64 / self.max_concurrency as f64
    }

    /// `utilization + avg_duration_ms / 10000`; lower is cheaper
    pub fn load_score(&self) -> f64 {
        self.utilization() + self.avg_duration_ms / 10_000.0
    }

    pub(crate) fn begin_job(&mut self) {
        self.active_jobs += 1;
        self.refresh_status();
    }

    pub(crate) fn end_job(&mut self, outcome: Result<f64, ()>) {
        self.active_jobs = self.active_jobs.saturating_sub(1);
        match outcome {
            Ok(duration_ms) => {
                self.total_processed += 1;
                let n = self.total_processed as f64;
                self.avg_duration_ms += (duration_ms - self.avg_duration_ms) / n;
            }
            Err(()) => self.total_failed += 1,
        }
        self.refresh_status();
    }

    pub(crate) fn go_offline(&mut self) {
        self.status = WorkerStatus::Offline;
        self.active_jobs = 0;
    }

    pub(crate) fn refresh_status(&mut self) {
        if self.status == WorkerStatus::Offline {
            return;
        }
        self.status = if self.active_jobs > 0 {
            WorkerStatus::Busy
        } else {
            WorkerStatus::Idle
        };
    }
}
