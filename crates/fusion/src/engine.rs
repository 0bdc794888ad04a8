//! Trust fusion engine: evidence filtering, fusion and reputation derivation.

use crate::config::FusionConfig;
use crate::error::{FusionError, FusionResult};
use crate::membership::{compute_set_membership_inputs, SetMembershipInputs};
use crate::opinion::{fuse_opinions, fuse_subjective_opinions, opinion_to_reputation};
use crate::reputation::{ReputationMetadata, ReputationResult, ALGORITHM_VERSION};
use std::sync::Arc;
use tracing::{debug, warn};
use trustproof_core::{Clock, SubjectiveOpinion, SystemClock, TrustAttestation, OPINION_EPSILON};

/// Fuses attestations into reputation results.
#[derive(Debug, Clone)]
pub struct TrustFusionEngine {
    config: FusionConfig,
    clock: Arc<dyn Clock>,
}

impl TrustFusionEngine {
    /// Create an engine with explicit configuration and clock
    pub fn new(config: FusionConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// Engine with default tuning on the system clock
    pub fn with_defaults() -> Self {
        Self::new(FusionConfig::default(), Arc::new(SystemClock))
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn validate_opinion(&self, opinion: &SubjectiveOpinion) -> bool {
        opinion.is_valid()
    }

    /// Weighted pairwise fusion, see [`fuse_opinions`]
    pub fn fuse_opinions(
        &self,
        first: &SubjectiveOpinion,
        second: &SubjectiveOpinion,
        first_weight: f64,
        second_weight: f64,
    ) -> FusionResult<SubjectiveOpinion> {
        fuse_opinions(first, second, first_weight, second_weight)
    }

    /// Left-fold fusion over an attestation list.
    ///
    /// Each step weights the running opinion by the share of total weight it
    /// already accumulated and the incoming attestation by its own share.
    /// An all-zero weight set is treated as uniform.
    pub fn fuse_multiple_opinions(
        &self,
        attestations: &[TrustAttestation],
    ) -> FusionResult<SubjectiveOpinion> {
        let (first, rest) = match attestations.split_first() {
            None => return Ok(SubjectiveOpinion::neutral()),
            Some(split) => split,
        };
        if rest.is_empty() {
            return Ok(first.opinion);
        }

        let total: f64 = attestations.iter().map(|a| a.weight).sum();
        let uniform = !total.is_finite() || total < OPINION_EPSILON;
        let weight_of = |a: &TrustAttestation| if uniform { 1.0 } else { a.weight };
        let total = if uniform {
            attestations.len() as f64
        } else {
            total
        };

        let mut fused = first.opinion;
        let mut accumulated = weight_of(first);
        for attestation in rest {
            let weight = weight_of(attestation);
            fused = fuse_opinions(
                &fused,
                &attestation.opinion,
                accumulated / total,
                weight / total,
            )?;
            accumulated += weight;
        }
        Ok(fused)
    }

    /// Split into contiguous chunks of at most `max_size` (minimum 1).
    pub fn partition_attestations<'a>(
        &self,
        attestations: &'a [TrustAttestation],
        max_size: usize,
    ) -> Vec<&'a [TrustAttestation]> {
        attestations.chunks(max_size.max(1)).collect()
    }

    /// Attestations about `user_id` that are live and carry a valid opinion.
    pub fn filter_attestations(
        &self,
        user_id: &str,
        attestations: &[TrustAttestation],
    ) -> Vec<TrustAttestation> {
        let now = self.clock.now_ms();
        let mut rejected = 0usize;
        let valid: Vec<TrustAttestation> = attestations
            .iter()
            .filter(|a| {
                let keep = a.target == user_id
                    && a.is_live_at(now)
                    && a.weight.is_finite()
                    && a.weight >= 0.0
                    && a.opinion.is_valid();
                if !keep {
                    rejected += 1;
                }
                keep
            })
            .cloned()
            .collect();
        if rejected > 0 {
            debug!(user_id, rejected, kept = valid.len(), "Filtered attestations");
        }
        valid
    }

    /// Compute reputation for `user_id` from an attestation set.
    pub fn compute_reputation(
        &self,
        user_id: &str,
        attestations: &[TrustAttestation],
        force_partition: bool,
    ) -> FusionResult<ReputationResult> {
        let valid = self.filter_attestations(user_id, attestations);
        let partitioned =
            !valid.is_empty() && (force_partition || valid.len() > self.config.partition_threshold);

        let (opinion, partition_count) = if partitioned {
            let partitions = self.partition_attestations(&valid, self.config.partition_size);
            let mut fused_partitions = Vec::with_capacity(partitions.len());
            for partition in &partitions {
                fused_partitions.push(self.fuse_multiple_opinions(partition)?);
            }
            let mut fused = fused_partitions[0];
            for partial in &fused_partitions[1..] {
                fused = fuse_subjective_opinions(&fused, partial)?;
            }
            (fused, Some(partitions.len()))
        } else {
            (self.fuse_multiple_opinions(&valid)?, None)
        };

        debug!(
            user_id,
            opinion_count = valid.len(),
            partitioned,
            uncertainty = opinion.uncertainty,
            "Computed reputation"
        );

        Ok(self.build_result(
            user_id,
            opinion,
            valid.len(),
            ReputationMetadata {
                algorithm_version: ALGORITHM_VERSION.to_string(),
                opinion_count: valid.len(),
                timestamp: self.clock.now_ms(),
                is_incremental: false,
                is_partitioned: partitioned,
                partition_count,
                prior_opinion: None,
            },
        ))
    }

    /// Incremental update with the configured prior weight.
    pub fn incremental_update(
        &self,
        prior: &ReputationResult,
        new_attestations: &[TrustAttestation],
    ) -> FusionResult<ReputationResult> {
        self.incremental_update_reputation(
            prior,
            new_attestations,
            self.config.incremental_base_weight,
        )
    }

    /// Fuse new evidence against a prior result with weights
    /// `(base_weight, 1 - base_weight)`. The prior is left untouched.
    pub fn incremental_update_reputation(
        &self,
        prior: &ReputationResult,
        new_attestations: &[TrustAttestation],
        base_weight: f64,
    ) -> FusionResult<ReputationResult> {
        if !(0.0..=1.0).contains(&base_weight) {
            return Err(FusionError::InvalidWeight(base_weight));
        }

        let valid = self.filter_attestations(&prior.user_id, new_attestations);
        if valid.is_empty() {
            warn!(user_id = %prior.user_id, "Incremental update without usable evidence");
        }
        let update = self.fuse_multiple_opinions(&valid)?;
        let opinion = fuse_opinions(&prior.opinion, &update, base_weight, 1.0 - base_weight)?;
        let opinion_count = prior.metadata.opinion_count + valid.len();

        Ok(self.build_result(
            &prior.user_id,
            opinion,
            opinion_count,
            ReputationMetadata {
                algorithm_version: ALGORITHM_VERSION.to_string(),
                opinion_count,
                timestamp: self.clock.now_ms(),
                is_incremental: true,
                is_partitioned: false,
                partition_count: None,
                prior_opinion: Some(prior.opinion),
            },
        ))
    }

    /// Public inputs committing to the attestation set, see
    /// [`compute_set_membership_inputs`].
    pub fn compute_set_membership_inputs(
        &self,
        attestations: &[TrustAttestation],
        target: Option<&str>,
    ) -> FusionResult<SetMembershipInputs> {
        compute_set_membership_inputs(attestations, target)
    }

    /// `min(n / saturation, 1) · (1 - u)`
    pub fn confidence(&self, evidence_count: usize, opinion: &SubjectiveOpinion) -> f64 {
        let saturation = self.config.confidence_saturation.max(1) as f64;
        let volume = (evidence_count as f64 / saturation).min(1.0);
        (volume * (1.0 - opinion.uncertainty)).clamp(0.0, 1.0)
    }

    fn build_result(
        &self,
        user_id: &str,
        opinion: SubjectiveOpinion,
        evidence_count: usize,
        metadata: ReputationMetadata,
    ) -> ReputationResult {
        ReputationResult {
            user_id: user_id.to_string(),
            score: opinion_to_reputation(&opinion),
            opinion,
            confidence: self.confidence(evidence_count, &opinion),
            metadata,
        }
    }
}

impl Default for TrustFusionEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustproof_core::{AttestationType, ManualClock};

    const NOW: u64 = 1_700_000_000_000;

    fn engine() -> TrustFusionEngine {
        TrustFusionEngine::new(FusionConfig::default(), Arc::new(ManualClock::new(NOW)))
    }

    fn attestation(source: &str, target: &str, opinion: SubjectiveOpinion) -> TrustAttestation {
        TrustAttestation {
            source: source.to_string(),
            target: target.to_string(),
            opinion,
            attestation_type: AttestationType::Trust,
            weight: 1.0,
            created_at: NOW - 1_000,
            expires_at: NOW + 86_400_000,
        }
    }

    fn synthetic(count: usize, target: &str) -> Vec<TrustAttestation> {
        (0..count)
            .map(|i| {
                let belief = 0.5 + (i % 5) as f64 * 0.05;
                attestation(
                    &format!("source-{}", i),
                    target,
                    SubjectiveOpinion::new(belief, 0.1, 0.9 - belief, 0.5),
                )
            })
            .collect()
    }

    #[test]
    fn test_fuse_multiple_empty_and_singleton() {
        let engine = engine();
        assert_eq!(
            engine.fuse_multiple_opinions(&[]).unwrap(),
            SubjectiveOpinion::neutral()
        );
        let single = attestation("a", "bob", SubjectiveOpinion::new(0.7, 0.1, 0.2, 0.4));
        assert_eq!(
            engine.fuse_multiple_opinions(&[single.clone()]).unwrap(),
            single.opinion
        );
    }

    #[test]
    fn test_fuse_multiple_reduces_uncertainty() {
        let engine = engine();
        let attestations = synthetic(8, "bob");
        let fused = engine.fuse_multiple_opinions(&attestations).unwrap();
        let min_input = attestations
            .iter()
            .map(|a| a.opinion.uncertainty)
            .fold(f64::INFINITY, f64::min);
        assert!(fused.uncertainty <= min_input);
        assert!(engine.validate_opinion(&fused));
    }

    #[test]
    fn test_partition_sizes() {
        let engine = engine();
        let attestations = synthetic(45, "bob");
        let partitions = engine.partition_attestations(&attestations, 20);
        let sizes: Vec<usize> = partitions.iter().map(|p| p.len()).collect();
        assert_eq!(sizes, vec![20, 20, 5]);
        assert_eq!(engine.partition_attestations(&attestations, 0).len(), 45);
    }

    #[test]
    fn test_forced_partition_metadata() {
        let engine = engine();
        let result = engine
            .compute_reputation("bob", &synthetic(105, "bob"), true)
            .unwrap();
        assert!(result.metadata.is_partitioned);
        assert_eq!(result.metadata.partition_count, Some(6));
        assert_eq!(result.metadata.opinion_count, 105);
        assert!(result.score > 0.5);
        assert!(result.confidence > 0.9);
    }

    #[test]
    fn test_large_sets_partition_automatically() {
        let engine = engine();
        let small = engine.compute_reputation("bob", &synthetic(50, "bob"), false).unwrap();
        let large = engine.compute_reputation("bob", &synthetic(51, "bob"), false).unwrap();
        assert!(!small.metadata.is_partitioned);
        assert!(large.metadata.is_partitioned);
        assert_eq!(large.metadata.partition_count, Some(3));
    }

    #[test]
    fn test_expired_only_yields_neutral() {
        let engine = engine();
        let mut expired = synthetic(5, "bob");
        for a in &mut expired {
            a.expires_at = NOW - 1;
        }
        let result = engine.compute_reputation("bob", &expired, false).unwrap();
        assert_eq!(result.score, 0.5);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.metadata.opinion_count, 0);
        assert!(!result.metadata.is_partitioned);
    }

    #[test]
    fn test_filters_other_targets_and_invalid_opinions() {
        let engine = engine();
        let mut attestations = synthetic(3, "bob");
        attestations.push(attestation("x", "carol", SubjectiveOpinion::new(1.0, 0.0, 0.0, 0.5)));
        attestations.push(attestation("y", "bob", SubjectiveOpinion::new(0.9, 0.9, 0.9, 0.5)));
        let result = engine.compute_reputation("bob", &attestations, false).unwrap();
        assert_eq!(result.metadata.opinion_count, 3);
    }

    #[test]
    fn test_confidence_formula() {
        let engine = engine();
        let opinion = SubjectiveOpinion::new(0.5, 0.2, 0.3, 0.5);
        assert!((engine.confidence(5, &opinion) - 0.35).abs() < 1e-12);
        assert!((engine.confidence(50, &opinion) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_incremental_update_accumulates() {
        let engine = engine();
        let prior = engine.compute_reputation("bob", &synthetic(4, "bob"), false).unwrap();
        let snapshot = prior.clone();

        let negative: Vec<TrustAttestation> = (0..3)
            .map(|i| {
                attestation(
                    &format!("critic-{}", i),
                    "bob",
                    SubjectiveOpinion::new(0.05, 0.8, 0.15, 0.5),
                )
            })
            .collect();
        let updated = engine.incremental_update(&prior, &negative).unwrap();

        assert_eq!(prior, snapshot);
        assert!(updated.metadata.is_incremental);
        assert_eq!(updated.metadata.opinion_count, 7);
        assert_eq!(updated.metadata.prior_opinion, Some(prior.opinion));
        assert!(updated.score < prior.score);
        assert!(updated.opinion.uncertainty <= prior.opinion.uncertainty);
    }

    #[test]
    fn test_incremental_update_without_evidence_keeps_opinion() {
        let engine = engine();
        let prior = engine.compute_reputation("bob", &synthetic(4, "bob"), false).unwrap();
        let updated = engine.incremental_update(&prior, &[]).unwrap();
        assert!((updated.score - prior.score).abs() < 1e-9);
        assert_eq!(updated.metadata.opinion_count, 4);
    }

    #[test]
    fn test_incremental_update_rejects_bad_weight() {
        let engine = engine();
        let prior = engine.compute_reputation("bob", &synthetic(2, "bob"), false).unwrap();
        assert!(matches!(
            engine.incremental_update_reputation(&prior, &[], 1.5),
            Err(FusionError::InvalidWeight(_))
        ));
    }
}
