//! Reputation result types.

use serde::{Deserialize, Serialize};
use trustproof_core::SubjectiveOpinion;

/// Version tag stamped on every reputation result
pub const ALGORITHM_VERSION: &str = "ebsl-1.0";

/// Provenance of a reputation computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationMetadata {
    /// Fusion algorithm version
    pub algorithm_version: String,
    /// Number of attestations that contributed evidence (cumulative for updates)
    pub opinion_count: usize,
    /// Computation time (Unix milliseconds)
    pub timestamp: u64,
    /// Produced by `incremental_update_reputation`
    pub is_incremental: bool,
    /// Evidence was fused through partitions
    pub is_partitioned: bool,
    /// Number of partitions when `is_partitioned`
    pub partition_count: Option<usize>,
    /// Opinion the incremental update started from
    pub prior_opinion: Option<SubjectiveOpinion>,
}

/// Reputation of one identity derived from fused evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationResult {
    pub user_id: String,
    /// Expected value of the fused opinion, in [0,1]
    pub score: f64,
    pub opinion: SubjectiveOpinion,
    /// Evidence volume times certainty, in [0,1]
    pub confidence: f64,
    pub metadata: ReputationMetadata,
}
