//! Error types for prover and circuit operations.

use thiserror::Error;
use trustproof_core::CircuitSize;

/// Result type for prover operations
pub type ProverResult<T> = std::result::Result<T, ProverError>;

/// Error types surfaced by the prover boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProverError {
    /// Prover not initialized
    #[error("Prover not initialized")]
    NotInitialized,

    /// Circuit source has no artifacts for this size
    #[error("Circuit not found: {0}")]
    CircuitNotFound(CircuitSize),

    /// Circuit artifacts could not be fetched or compiled
    #[error("Circuit load failed for {size}: {reason}")]
    CircuitLoadFailed { size: CircuitSize, reason: String },

    /// Downloaded artifacts do not match the manifest hash
    #[error("Circuit integrity mismatch for {size}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        size: CircuitSize,
        expected: String,
        actual: String,
    },

    /// Fallback table is not strictly decreasing
    #[error("Invalid circuit fallback table: {0}")]
    InvalidFallbackTable(String),

    /// Witness generation failed
    #[error("Witness generation failed: {0}")]
    WitnessGenerationFailed(String),

    /// Proof generation failed
    #[error("Proof generation failed: {0}")]
    ProofGenerationFailed(String),

    /// Prover ran out of memory
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Proof verification failed
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
