//! Prover and circuit boundary for reputation proofs.
//!
//! The cryptographic prover and the circuit artifact source are external
//! capabilities. This crate defines their interfaces, verifies downloaded
//! circuit artifacts against their manifest hash, owns the statically validated
//! circuit fallback table, and builds witnesses from fused reputation data.

pub mod circuit;
pub mod error;
pub mod prover;
pub mod witness;

pub use circuit::{
    bundle_hash, CircuitBundle, CircuitFallbackTable, CircuitSource, CircuitStore,
    SyntheticCircuitSource,
};
pub use error::{ProverError, ProverResult};
pub use prover::{MockProver, Prover};
pub use witness::{proof_words, public_inputs, WitnessInput};
