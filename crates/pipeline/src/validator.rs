//! Structural checks and tamper detection for proof results.

use crate::error::{ProofError, ProofErrorKind};
use serde::{Deserialize, Serialize};
use tracing::warn;
use trustproof_core::{is_well_formed_hash, ProofResult, ProofSubmission, SubjectiveOpinion};

/// Looser than the fusion invariant; results cross process boundaries
pub const OPINION_SUM_TOLERANCE: f64 = 1e-3;
/// Largest integer an IEEE-754 double represents exactly
const MAX_SAFE_PROOF_ELEMENT: f64 = 9_007_199_254_740_991.0;
const EXPECTED_MIN_PROOF_LEN: usize = 5;
const EXPECTED_MAX_PROOF_LEN: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProofValidator;

impl ProofValidator {
    pub fn new() -> Self {
        Self
    }

    /// Structural and numeric checks. Warnings do not invalidate.
    pub fn validate(&self, result: &ProofResult) -> ValidationReport {
        let mut report = ValidationReport::default();

        if result.proof.is_empty() {
            report.errors.push("proof is empty".to_string());
        } else if !(EXPECTED_MIN_PROOF_LEN..=EXPECTED_MAX_PROOF_LEN).contains(&result.proof.len()) {
            report
                .warnings
                .push(format!("unusual proof length {}", result.proof.len()));
        }

        if result.public_inputs.is_empty() {
            report.errors.push("public inputs are empty".to_string());
        }

        if !is_well_formed_hash(&result.hash) {
            report
                .warnings
                .push(format!("hash is not 0x-prefixed 64 hex digits: {}", result.hash));
        }

        check_opinion(&result.fused_opinion, &mut report);

        for warning in &report.warnings {
            warn!(hash = %result.hash, "{}", warning);
        }
        report
    }

    /// True when the stored hash does not match the proof and opinion
    pub fn detect_tampering(&self, result: &ProofResult) -> bool {
        result.recompute_hash() != result.hash
    }

    /// Validation outcome as an error: tampering is fatal, structural
    /// failures are retryable.
    pub fn check(&self, result: &ProofResult) -> Result<(), ProofError> {
        if self.detect_tampering(result) {
            return Err(ProofError::new(
                ProofErrorKind::ProofTampered,
                format!("content hash mismatch for {}", result.hash),
            ));
        }
        let report = self.validate(result);
        if !report.is_valid() {
            return Err(ProofError::new(
                ProofErrorKind::ProofValidationFailed,
                report.errors.join("; "),
            ));
        }
        Ok(())
    }

    /// Convert an untrusted worker submission into a checked result.
    ///
    /// Proof elements must be finite, non-negative integers within the exactly
    /// representable range.
    pub fn validate_submission(
        &self,
        submission: &ProofSubmission,
    ) -> Result<ProofResult, ProofError> {
        let mut proof = Vec::with_capacity(submission.proof.len());
        for (index, element) in submission.proof.iter().enumerate() {
            let in_range = (0.0..=MAX_SAFE_PROOF_ELEMENT).contains(element);
            if !element.is_finite() || !in_range || element.fract() != 0.0 {
                return Err(ProofError::new(
                    ProofErrorKind::ProofValidationFailed,
                    format!("proof element {} is not a valid field element: {}", index, element),
                ));
            }
            proof.push(*element as u64);
        }

        let result = ProofResult {
            proof,
            public_inputs: submission.public_inputs.clone(),
            hash: submission.hash.clone(),
            fused_opinion: submission.fused_opinion,
            proof_type: submission.proof_type,
            circuit_size: submission.circuit_size,
            generated_at: submission.generated_at,
        };
        self.check(&result)?;
        Ok(result)
    }
}

fn check_opinion(opinion: &SubjectiveOpinion, report: &mut ValidationReport) {
    let fields = [
        ("belief", opinion.belief),
        ("disbelief", opinion.disbelief),
        ("uncertainty", opinion.uncertainty),
        ("base_rate", opinion.base_rate),
    ];
    for (name, value) in fields {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            report.errors.push(format!("{} out of range: {}", name, value));
        }
    }
    let mass = opinion.mass();
    if (mass - 1.0).abs() > OPINION_SUM_TOLERANCE {
        report
            .errors
            .push(format!("opinion mass {} differs from 1", mass));
    }
}
