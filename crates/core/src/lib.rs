//! Core functionality for the TrustProof reputation proving system.
//!
//! This crate provides the shared data model (opinions, attestations, proof
//! results), content hashing, clocks, configuration loading and logging used
//! across the TrustProof workspace.

pub mod config;
pub mod error;
pub mod hash;
pub mod logging;
pub mod time;
pub mod types;

pub use error::{CoreError, Result};
pub use hash::{content_hash, is_well_formed_hash, prefixed_hex};
pub use time::{current_timestamp_ms, Clock, ManualClock, SystemClock};
pub use types::{
    AttestationType, CircuitSize, Priority, ProofResult, ProofSubmission, ProofType,
    SubjectiveOpinion, TrustAttestation, OPINION_EPSILON,
};
