//! Fusion engine tuning.

use serde::{Deserialize, Serialize};

/// Tunables for reputation computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Evidence sets larger than this are fused through partitions
    pub partition_threshold: usize,
    /// Maximum attestations per partition
    pub partition_size: usize,
    /// Evidence count at which confidence saturates
    pub confidence_saturation: usize,
    /// Weight kept by the prior in incremental updates
    pub incremental_base_weight: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            partition_threshold: 50,
            partition_size: 20,
            confidence_saturation: 10,
            incremental_base_weight: 0.7,
        }
    }
}
