//! Pipeline configuration.
//!
//! Every struct is `#[serde(default)]`, so a TOML file only needs the keys it
//! overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use trustproof_core::config::{from_toml_file, from_toml_str};
use trustproof_fusion::FusionConfig;
use trustproof_workers::PoolConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_queue_size: usize,
    pub max_concurrent: usize,
    /// Terminal requests kept for statistics
    pub history_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            max_concurrent: 4,
            history_size: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per request, fallbacks included
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Pause after releasing resources on memory pressure
    pub resource_cooldown_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            resource_cooldown_ms: 2_000,
        }
    }
}

impl RetryConfig {
    /// `min(base · 2^attempt, max)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_ms: u64,
    pub max_entries: usize,
    pub cleanup_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 3_600_000,
            max_entries: 50,
            cleanup_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub history_size: usize,
    /// Relative evidence-size window for duration predictions
    pub similar_size_tolerance: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            history_size: 1_000,
            similar_size_tolerance: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_requests: usize,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 10,
            window_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub max_entries: usize,
    /// Sign entries with an ephemeral ed25519 key
    pub sign_entries: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            sign_entries: false,
        }
    }
}

/// Everything the proof pipeline needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Hard limit on one attempt
    pub proof_timeout_ms: u64,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub metrics: MetricsConfig,
    pub rate_limit: RateLimitConfig,
    pub audit: AuditConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            proof_timeout_ms: 120_000,
            queue: QueueConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            metrics: MetricsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn proof_timeout(&self) -> Duration {
        Duration::from_millis(self.proof_timeout_ms)
    }
}

/// Node-level configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: String,
    /// `text` or `json`
    pub log_format: String,
    pub fusion: FusionConfig,
    pub pipeline: PipelineConfig,
    pub pool: PoolConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "proof-node-1".to_string(),
            log_format: "text".to_string(),
            fusion: FusionConfig::default(),
            pipeline: PipelineConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> trustproof_core::Result<Self> {
        from_toml_file(path)
    }

    pub fn parse(content: &str) -> trustproof_core::Result<Self> {
        from_toml_str(content)
    }
}
