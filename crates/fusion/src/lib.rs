//! Evidence-Based Subjective Logic fusion engine.
//!
//! This crate merges many independent trust attestations about an identity into
//! a single subjective opinion and derives a reputation score from it:
//! - Opinion validation and weighted pairwise fusion
//! - Left-fold fusion of weighted attestation sets
//! - Partitioned fusion for large evidence sets
//! - Incremental updates against a prior reputation
//! - Set-membership commitments consumed by the proof circuit
//!
//! The engine is pure computation: no I/O and no concurrency. Time only enters
//! through the injected [`Clock`](trustproof_core::Clock) used for expiry filtering.

pub mod config;
pub mod engine;
pub mod error;
pub mod membership;
pub mod opinion;
pub mod reputation;

pub use config::FusionConfig;
pub use engine::TrustFusionEngine;
pub use error::{FusionError, FusionResult};
pub use membership::{compute_set_membership_inputs, SetMembershipInputs, FIXED_POINT_SCALE};
pub use opinion::{
    fuse_opinions, fuse_subjective_opinions, opinion_to_reputation, validate_opinion,
};
pub use reputation::{ReputationMetadata, ReputationResult, ALGORITHM_VERSION};
