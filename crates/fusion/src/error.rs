//! Error types for opinion fusion.

use thiserror::Error;

/// Result type for fusion operations
pub type FusionResult<T> = std::result::Result<T, FusionError>;

/// Errors raised by the fusion engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    /// An opinion violates the range or additivity invariant
    #[error("Invalid opinion: {0}")]
    InvalidOpinion(String),

    /// A fusion weight is negative or not finite
    #[error("Invalid weight: {0}")]
    InvalidWeight(f64),

    /// An operation that needs at least one attestation received none
    #[error("Empty attestation set: {0}")]
    EmptyAttestations(String),
}
