//! Core types shared by the fusion engine, the worker pool and the proof pipeline.

use crate::hash::content_hash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance for the `b + d + u = 1` opinion invariant.
pub const OPINION_EPSILON: f64 = 1e-9;

/// Subjective logic opinion about a proposition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubjectiveOpinion {
    /// Belief mass
    pub belief: f64,
    /// Disbelief mass
    pub disbelief: f64,
    /// Uncertainty mass
    pub uncertainty: f64,
    /// Prior probability in the absence of evidence
    pub base_rate: f64,
}

impl SubjectiveOpinion {
    /// Create an opinion without validation
    pub const fn new(belief: f64, disbelief: f64, uncertainty: f64, base_rate: f64) -> Self {
        Self {
            belief,
            disbelief,
            uncertainty,
            base_rate,
        }
    }

    /// Vacuous opinion: no evidence, base rate 0.5
    pub const fn neutral() -> Self {
        Self::new(0.0, 0.0, 1.0, 0.5)
    }

    /// Fields in [0,1] and `|b + d + u - 1| < ε`
    pub fn is_valid(&self) -> bool {
        let in_unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        in_unit(self.belief)
            && in_unit(self.disbelief)
            && in_unit(self.uncertainty)
            && in_unit(self.base_rate)
            && (self.mass() - 1.0).abs() < OPINION_EPSILON
    }

    /// `b + d + u`
    pub fn mass(&self) -> f64 {
        self.belief + self.disbelief + self.uncertainty
    }

    /// Projected probability `b + a·u`
    pub fn expected_value(&self) -> f64 {
        self.belief + self.base_rate * self.uncertainty
    }
}

impl Default for SubjectiveOpinion {
    fn default() -> Self {
        Self::neutral()
    }
}

/// Kind of claim an attestation makes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationType {
    Trust,
    Skill,
    Vouch,
    Endorsement,
}

impl AttestationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttestationType::Trust => "trust",
            AttestationType::Skill => "skill",
            AttestationType::Vouch => "vouch",
            AttestationType::Endorsement => "endorsement",
        }
    }

    /// Stable numeric code used in deterministic serialization
    pub fn code(&self) -> u8 {
        match self {
            AttestationType::Trust => 0,
            AttestationType::Skill => 1,
            AttestationType::Vouch => 2,
            AttestationType::Endorsement => 3,
        }
    }
}

/// A weighted, time-bounded trust claim made by one identity about another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustAttestation {
    /// Issuing identity
    pub source: String,
    /// Identity the claim is about
    pub target: String,
    /// Opinion carried by the claim
    pub opinion: SubjectiveOpinion,
    /// Claim kind
    pub attestation_type: AttestationType,
    /// Relative weight (≥ 0)
    pub weight: f64,
    /// Issuance time (Unix milliseconds)
    pub created_at: u64,
    /// Expiry time (Unix milliseconds)
    pub expires_at: u64,
}

impl TrustAttestation {
    /// An attestation is live while `expires_at > now`
    pub fn is_live_at(&self, now_ms: u64) -> bool {
        self.expires_at > now_ms
    }
}

/// Kind of proof requested over a reputation score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofType {
    /// Reveals the exact score
    Exact,
    /// Proves the score meets a threshold
    Threshold,
}

impl ProofType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofType::Exact => "exact",
            ProofType::Threshold => "threshold",
        }
    }
}

impl fmt::Display for ProofType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority. Ordering is ascending: `Low < Normal < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Compiled circuit size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitSize {
    Small,
    Medium,
    Large,
}

impl CircuitSize {
    /// All sizes, smallest first
    pub const ALL: [CircuitSize; 3] = [CircuitSize::Small, CircuitSize::Medium, CircuitSize::Large];

    /// Maximum attestations a circuit of this size commits to individually
    pub fn capacity(&self) -> usize {
        match self {
            CircuitSize::Small => 16,
            CircuitSize::Medium => 64,
            CircuitSize::Large => 256,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CircuitSize::Small => "small",
            CircuitSize::Medium => "medium",
            CircuitSize::Large => "large",
        }
    }

    /// Smallest circuit whose capacity covers `count` attestations (saturates at Large)
    pub fn for_attestation_count(count: usize) -> Self {
        Self::ALL
            .into_iter()
            .find(|size| count <= size.capacity())
            .unwrap_or(CircuitSize::Large)
    }
}

impl fmt::Display for CircuitSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A validated proof over a fused reputation opinion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofResult {
    /// Proof field elements
    pub proof: Vec<u64>,
    /// Public inputs (commitment, score, threshold...)
    pub public_inputs: Vec<String>,
    /// Content hash over proof + fused opinion
    pub hash: String,
    /// Opinion the proof attests
    pub fused_opinion: SubjectiveOpinion,
    /// Proof kind
    pub proof_type: ProofType,
    /// Circuit used to produce the proof
    pub circuit_size: CircuitSize,
    /// Generation time (Unix milliseconds)
    pub generated_at: u64,
}

impl ProofResult {
    /// Build a result, computing its content hash
    pub fn new(
        proof: Vec<u64>,
        public_inputs: Vec<String>,
        fused_opinion: SubjectiveOpinion,
        proof_type: ProofType,
        circuit_size: CircuitSize,
        generated_at: u64,
    ) -> Self {
        let hash = content_hash(&proof, &fused_opinion);
        Self {
            proof,
            public_inputs,
            hash,
            fused_opinion,
            proof_type,
            circuit_size,
            generated_at,
        }
    }

    /// Recompute the content hash from the proof and opinion
    pub fn recompute_hash(&self) -> String {
        content_hash(&self.proof, &self.fused_opinion)
    }
}

/// Untrusted proof payload as returned by a remote worker.
///
/// Proof elements arrive as JSON numbers and must pass submission-time
/// validation before becoming a [`ProofResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofSubmission {
    pub proof: Vec<f64>,
    pub public_inputs: Vec<String>,
    pub hash: String,
    pub fused_opinion: SubjectiveOpinion,
    pub proof_type: ProofType,
    pub circuit_size: CircuitSize,
    pub generated_at: u64,
    /// Worker that produced the proof
    #[serde(default)]
    pub worker_id: Option<String>,
}

impl From<&ProofResult> for ProofSubmission {
    fn from(result: &ProofResult) -> Self {
        Self {
            proof: result.proof.iter().map(|w| *w as f64).collect(),
            public_inputs: result.public_inputs.clone(),
            hash: result.hash.clone(),
            fused_opinion: result.fused_opinion,
            proof_type: result.proof_type,
            circuit_size: result.circuit_size,
            generated_at: result.generated_at,
            worker_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opinion_validity() {
        assert!(SubjectiveOpinion::neutral().is_valid());
        assert!(SubjectiveOpinion::new(0.7, 0.2, 0.1, 0.5).is_valid());
        assert!(!SubjectiveOpinion::new(0.7, 0.2, 0.2, 0.5).is_valid());
        assert!(!SubjectiveOpinion::new(1.2, -0.2, 0.0, 0.5).is_valid());
        assert!(!SubjectiveOpinion::new(0.5, 0.5, 0.0, 1.5).is_valid());
        assert!(!SubjectiveOpinion::new(f64::NAN, 0.5, 0.5, 0.5).is_valid());
    }

    #[test]
    fn test_expected_value_bounds() {
        assert_eq!(SubjectiveOpinion::new(1.0, 0.0, 0.0, 0.3).expected_value(), 1.0);
        assert_eq!(SubjectiveOpinion::new(0.0, 1.0, 0.0, 0.3).expected_value(), 0.0);
        assert_eq!(SubjectiveOpinion::new(0.0, 0.0, 1.0, 0.7).expected_value(), 0.7);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_circuit_selection() {
        assert_eq!(CircuitSize::for_attestation_count(0), CircuitSize::Small);
        assert_eq!(CircuitSize::for_attestation_count(16), CircuitSize::Small);
        assert_eq!(CircuitSize::for_attestation_count(17), CircuitSize::Medium);
        assert_eq!(CircuitSize::for_attestation_count(200), CircuitSize::Large);
        assert_eq!(CircuitSize::for_attestation_count(10_000), CircuitSize::Large);
    }

    #[test]
    fn test_proof_result_hash_roundtrip() {
        let result = ProofResult::new(
            vec![1, 2, 3, 4, 5],
            vec!["0x01".to_string()],
            SubjectiveOpinion::new(0.6, 0.1, 0.3, 0.5),
            ProofType::Exact,
            CircuitSize::Small,
            1_000,
        );
        assert_eq!(result.hash, result.recompute_hash());
    }

    #[test]
    fn test_attestation_serde_names() {
        let json = serde_json::to_string(&AttestationType::Endorsement).unwrap();
        assert_eq!(json, "\"endorsement\"");
        let size: CircuitSize = serde_json::from_str("\"medium\"").unwrap();
        assert_eq!(size, CircuitSize::Medium);
    }

    #[test]
    fn test_attestation_liveness() {
        let attestation = TrustAttestation {
            source: "alice".into(),
            target: "bob".into(),
            opinion: SubjectiveOpinion::new(0.8, 0.1, 0.1, 0.5),
            attestation_type: AttestationType::Trust,
            weight: 1.0,
            created_at: 0,
            expires_at: 100,
        };
        assert!(attestation.is_live_at(99));
        assert!(!attestation.is_live_at(100));
    }
}
