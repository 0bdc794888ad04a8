//! Witness construction from fused reputation data.

use crate::error::{ProverError, ProverResult};
use serde::{Deserialize, Serialize};
use trustproof_core::{CircuitSize, ProofType, SubjectiveOpinion};
use trustproof_fusion::membership::to_fixed_point;
use trustproof_fusion::{opinion_to_reputation, SetMembershipInputs};

/// Bytes packed into one proof word. 48-bit limbs survive a round trip
/// through JSON numbers without loss.
pub const PROOF_LIMB_BYTES: usize = 6;

/// Private input handed to the prover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WitnessInput {
    pub circuit_size: CircuitSize,
    pub proof_type: ProofType,
    pub commitment: String,
    /// Per-attestation digests, truncated to the circuit capacity
    pub attestation_hashes: Vec<String>,
    /// Attestations covered by the commitment, before truncation
    pub attestation_count: usize,
    /// Fused `[b, d, u, a]` in fixed point
    pub scaled_opinion: [u64; 4],
    pub scaled_score: u64,
    pub scaled_threshold: Option<u64>,
}

impl WitnessInput {
    /// Build the witness for one proof attempt.
    ///
    /// Threshold proofs need a threshold in [0,1] that the fused score meets.
    pub fn build(
        membership: &SetMembershipInputs,
        fused_opinion: &SubjectiveOpinion,
        proof_type: ProofType,
        threshold: Option<f64>,
        circuit_size: CircuitSize,
    ) -> ProverResult<Self> {
        let score = opinion_to_reputation(fused_opinion);

        let scaled_threshold = match proof_type {
            ProofType::Exact => None,
            ProofType::Threshold => {
                let threshold = threshold.ok_or_else(|| {
                    ProverError::InvalidInput("threshold proof without threshold".to_string())
                })?;
                if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
                    return Err(ProverError::InvalidInput(format!(
                        "threshold {} outside [0,1]",
                        threshold
                    )));
                }
                if score < threshold {
                    return Err(ProverError::InvalidInput(format!(
                        "score {:.6} below threshold {:.6}",
                        score, threshold
                    )));
                }
                Some(to_fixed_point(threshold))
            }
        };

        let mut attestation_hashes = membership.attestation_hashes.clone();
        attestation_hashes.truncate(circuit_size.capacity());

        Ok(Self {
            circuit_size,
            proof_type,
            commitment: membership.commitment.clone(),
            attestation_hashes,
            attestation_count: membership.attestation_hashes.len(),
            scaled_opinion: [
                to_fixed_point(fused_opinion.belief),
                to_fixed_point(fused_opinion.disbelief),
                to_fixed_point(fused_opinion.uncertainty),
                to_fixed_point(fused_opinion.base_rate),
            ],
            scaled_score: to_fixed_point(score),
            scaled_threshold,
        })
    }

    /// Serialized form passed to `Prover::gen_witness`
    pub fn to_bytes(&self) -> ProverResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProverError::WitnessGenerationFailed(e.to_string()))
    }
}

/// Public inputs the verifier sees.
///
/// Exact proofs reveal the scaled score, threshold proofs only the threshold.
pub fn public_inputs(witness: &WitnessInput) -> Vec<String> {
    let mut inputs = vec![
        witness.commitment.clone(),
        witness.attestation_count.to_string(),
        witness.circuit_size.label().to_string(),
    ];
    match witness.scaled_threshold {
        Some(threshold) => inputs.push(threshold.to_string()),
        None => inputs.push(witness.scaled_score.to_string()),
    }
    inputs
}

/// Pack proof bytes into little-endian 48-bit words.
pub fn proof_words(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks(PROOF_LIMB_BYTES)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            u64::from_le_bytes(word)
        })
        .collect()
}
