//! End-to-end tests for the proof pipeline
//!
//! This test suite validates:
//! - Local proving from attestations to a validated, cached proof
//! - Circuit fallback on memory pressure and corrupt artifacts
//! - Tamper detection on executor output
//! - Worker pool execution, offline reassignment and cancellation

pub mod test_utils;

#[cfg(test)]
mod local_pipeline_tests;

#[cfg(test)]
mod recovery_tests;

#[cfg(test)]
mod pool_pipeline_tests;
