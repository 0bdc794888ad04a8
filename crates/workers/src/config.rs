//! Worker pool configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pool tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Expected heartbeat period; workers silent for two periods go offline
    pub heartbeat_interval_ms: u64,
    /// Retries after the first failed attempt
    pub max_task_retries: u32,
    /// Busy/online ratio at or above which more workers are recommended
    pub scale_up_threshold: f64,
    /// Busy/online ratio at or below which fewer workers are recommended
    pub scale_down_threshold: f64,
    pub min_workers: usize,
    pub max_workers: usize,
    /// Hard limit on a single dispatch
    pub task_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 10_000,
            max_task_retries: 3,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.2,
            min_workers: 2,
            max_workers: 10,
            task_timeout_ms: 120_000,
        }
    }
}

impl PoolConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence after which a worker is considered offline
    pub fn offline_after_ms(&self) -> u64 {
        self.heartbeat_interval_ms.saturating_mul(2)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}
