//! Set-membership public inputs for the reputation circuit.
//!
//! Each attestation is serialized deterministically from its numeric fields and
//! identifiers, hashed with BLAKE3, and the commitment is the BLAKE3 hash of
//! the concatenated per-attestation digests.
//!
//! The commitment follows input order: the same set presented in a different
//! order yields a different commitment. Callers that need an order-independent
//! commitment must sort before calling.

use crate::error::{FusionError, FusionResult};
use serde::{Deserialize, Serialize};
use trustproof_core::{prefixed_hex, TrustAttestation};

/// Scale applied to opinion fields when converting to circuit integers
pub const FIXED_POINT_SCALE: f64 = 1_000_000.0;

/// Inputs the circuit needs to prove membership of the attestation set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetMembershipInputs {
    /// Per-attestation digests in input order
    pub attestation_hashes: Vec<String>,
    /// Digest over the concatenated attestation digests
    pub commitment: String,
    /// Identity the set is about, if known
    pub target: Option<String>,
    /// `[b, d, u, a]` scaled by [`FIXED_POINT_SCALE`], one row per attestation
    pub scaled_opinions: Vec<[u64; 4]>,
    /// Weights scaled by [`FIXED_POINT_SCALE`]
    pub scaled_weights: Vec<u64>,
}

/// Scale a unit-interval value to a fixed-point integer.
pub fn to_fixed_point(value: f64) -> u64 {
    (value.max(0.0) * FIXED_POINT_SCALE).round() as u64
}

fn attestation_digest(attestation: &TrustAttestation) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for id in [&attestation.source, &attestation.target] {
        hasher.update(&(id.len() as u64).to_le_bytes());
        hasher.update(id.as_bytes());
    }
    hasher.update(&[attestation.attestation_type.code()]);
    let opinion = &attestation.opinion;
    for field in [
        opinion.belief,
        opinion.disbelief,
        opinion.uncertainty,
        opinion.base_rate,
        attestation.weight,
    ] {
        hasher.update(&to_fixed_point(field).to_le_bytes());
    }
    hasher.update(&attestation.created_at.to_le_bytes());
    hasher.update(&attestation.expires_at.to_le_bytes());
    *hasher.finalize().as_bytes()
}

/// Compute per-attestation hashes and the set commitment.
pub fn compute_set_membership_inputs(
    attestations: &[TrustAttestation],
    target: Option<&str>,
) -> FusionResult<SetMembershipInputs> {
    if attestations.is_empty() {
        return Err(FusionError::EmptyAttestations(
            "set membership requires at least one attestation".to_string(),
        ));
    }

    let digests: Vec<[u8; 32]> = attestations.iter().map(attestation_digest).collect();

    let mut commitment = blake3::Hasher::new();
    for digest in &digests {
        commitment.update(digest);
    }

    Ok(SetMembershipInputs {
        attestation_hashes: digests.iter().map(prefixed_hex).collect(),
        commitment: prefixed_hex(commitment.finalize().as_bytes()),
        target: target.map(str::to_string),
        scaled_opinions: attestations
            .iter()
            .map(|a| {
                [
                    to_fixed_point(a.opinion.belief),
                    to_fixed_point(a.opinion.disbelief),
                    to_fixed_point(a.opinion.uncertainty),
                    to_fixed_point(a.opinion.base_rate),
                ]
            })
            .collect(),
        scaled_weights: attestations.iter().map(|a| to_fixed_point(a.weight)).collect(),
    })
}
