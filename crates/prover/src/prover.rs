//! Prover boundary.
//!
//! The cryptographic prover is opaque: it turns a witness plus circuit
//! artifacts into proof bytes. Calls are synchronous and potentially slow, so
//! async callers run them on a blocking thread.

use crate::error::{ProverError, ProverResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Length of a mock proof in bytes: 32-byte digest followed by a 32-byte tag
const MOCK_PROOF_LEN: usize = 64;

/// Trait for proof generation (dependency injection)
pub trait Prover: Send + Sync {
    /// Derive witness bytes from the serialized input
    fn gen_witness(&self, input: &[u8], compiled_circuit: &[u8]) -> ProverResult<Vec<u8>>;

    /// Produce proof bytes
    fn prove(
        &self,
        witness: &[u8],
        proving_key: &[u8],
        compiled_circuit: &[u8],
        srs: &[u8],
    ) -> ProverResult<Vec<u8>>;

    /// Check a proof against the verifying key
    fn verify(&self, proof: &[u8], verifying_key: &[u8], settings: &[u8]) -> ProverResult<bool>;
}

/// Deterministic prover for tests and the demo node.
///
/// Proofs are structurally valid but cryptographically meaningless. Failures
/// can be scripted and are returned by `prove` in FIFO order before any
/// successful call.
#[derive(Debug, Default)]
pub struct MockProver {
    latency: Option<Duration>,
    scripted_failures: Mutex<VecDeque<ProverError>>,
    prove_calls: AtomicUsize,
}

impl MockProver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every `prove` call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue failures returned by the next `prove` calls
    pub fn with_failures(self, failures: Vec<ProverError>) -> Self {
        for failure in failures {
            self.push_failure(failure);
        }
        self
    }

    pub fn push_failure(&self, failure: ProverError) {
        self.scripted_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(failure);
    }

    /// Number of `prove` invocations so far
    pub fn prove_calls(&self) -> usize {
        self.prove_calls.load(Ordering::SeqCst)
    }

    fn tag(digest: &[u8]) -> [u8; 32] {
        *blake3::Hasher::new()
            .update(b"trustproof/mock-proof-tag")
            .update(digest)
            .finalize()
            .as_bytes()
    }
}

impl Prover for MockProver {
    fn gen_witness(&self, input: &[u8], compiled_circuit: &[u8]) -> ProverResult<Vec<u8>> {
        if input.is_empty() {
            return Err(ProverError::WitnessGenerationFailed(
                "empty witness input".to_string(),
            ));
        }
        if compiled_circuit.is_empty() {
            return Err(ProverError::NotInitialized);
        }

        let mut witness = blake3::hash(compiled_circuit).as_bytes().to_vec();
        witness.extend_from_slice(input);
        Ok(witness)
    }

    fn prove(
        &self,
        witness: &[u8],
        proving_key: &[u8],
        compiled_circuit: &[u8],
        srs: &[u8],
    ) -> ProverResult<Vec<u8>> {
        self.prove_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }

        let scripted = self
            .scripted_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        if let Some(failure) = scripted {
            debug!(error = %failure, "Mock prover returning scripted failure");
            return Err(failure);
        }

        if proving_key.is_empty() || compiled_circuit.is_empty() {
            return Err(ProverError::NotInitialized);
        }

        let digest = blake3::Hasher::new()
            .update(witness)
            .update(proving_key)
            .update(srs)
            .finalize();

        let mut proof = Vec::with_capacity(MOCK_PROOF_LEN);
        proof.extend_from_slice(digest.as_bytes());
        proof.extend_from_slice(&Self::tag(digest.as_bytes()));
        Ok(proof)
    }

    fn verify(&self, proof: &[u8], verifying_key: &[u8], _settings: &[u8]) -> ProverResult<bool> {
        if verifying_key.is_empty() {
            return Err(ProverError::VerificationFailed(
                "empty verifying key".to_string(),
            ));
        }
        if proof.len() != MOCK_PROOF_LEN {
            return Ok(false);
        }
        let (digest, tag) = proof.split_at(32);
        Ok(Self::tag(digest) == tag)
    }
}
