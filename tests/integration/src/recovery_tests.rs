//! Recovery paths driven by real circuit and prover failures

use crate::test_utils::{attestations_about, uncached, Harness};
use trustproof_core::{CircuitSize, ProofType};
use trustproof_pipeline::{AuditEvent, ProofErrorKind, RequestOptions};
use trustproof_prover::{MockProver, ProverError};

#[tokio::test]
async fn test_out_of_memory_falls_back_to_smaller_circuit() {
    let harness = Harness::with_prover(
        MockProver::new().with_failures(vec![ProverError::OutOfMemory("heap".to_string())]),
    );
    let pipeline = harness.local_pipeline();

    // 40 attestations select the medium circuit
    let result = pipeline
        .generate_proof(
            attestations_about("did:trust:alice", 40),
            ProofType::Exact,
            RequestOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.circuit_size, CircuitSize::Small);
    assert_eq!(result.public_inputs[1], "40");
    assert_eq!(harness.prover.prove_calls(), 2);

    let benchmarks = pipeline.circuit_benchmarks();
    assert_eq!(benchmarks.len(), 1);
    assert_eq!(benchmarks[0].circuit_size, CircuitSize::Small);
}

#[tokio::test]
async fn test_out_of_memory_on_smallest_circuit_releases_artifacts() {
    let harness = Harness::with_prover(
        MockProver::new().with_failures(vec![ProverError::OutOfMemory("heap".to_string())]),
    );
    let pipeline = harness.local_pipeline();

    let result = pipeline
        .generate_proof(attestations_about("did:trust:bob", 4), ProofType::Exact, uncached())
        .await
        .unwrap();

    assert_eq!(result.circuit_size, CircuitSize::Small);
    assert_eq!(harness.prover.prove_calls(), 2);
    // Released after the failure, fetched again for the retry
    assert_eq!(harness.source.fetch_count(), 2);
    assert_eq!(harness.store.cached_sizes(), vec![CircuitSize::Small]);
}

#[tokio::test]
async fn test_corrupt_circuit_falls_back() {
    let harness = Harness::new();
    harness.source.corrupt(CircuitSize::Medium);
    let pipeline = harness.local_pipeline();

    let result = pipeline
        .generate_proof(attestations_about("did:trust:carol", 40), ProofType::Exact, uncached())
        .await
        .unwrap();

    assert_eq!(result.circuit_size, CircuitSize::Small);
    // The corrupt bundle never reaches the prover
    assert_eq!(harness.prover.prove_calls(), 1);
    assert_eq!(harness.store.cached_sizes(), vec![CircuitSize::Small]);
}

#[tokio::test]
async fn test_missing_smallest_circuit_surfaces() {
    let harness = Harness::new();
    harness.source.remove(CircuitSize::Small);
    let pipeline = harness.local_pipeline();

    let error = pipeline
        .generate_proof(attestations_about("did:trust:dave", 3), ProofType::Exact, uncached())
        .await
        .unwrap_err();

    assert_eq!(error.kind, ProofErrorKind::CircuitNotFound);
    assert_eq!(error.context.circuit_size, Some(CircuitSize::Small));
    assert_eq!(harness.prover.prove_calls(), 0);
    assert_eq!(pipeline.queue_stats().failed, 1);
    assert_eq!(
        pipeline.audit_entries().last().map(|e| e.event),
        Some(AuditEvent::Failed)
    );
}

#[tokio::test]
async fn test_transient_prover_failure_is_retried() {
    let harness = Harness::with_prover(MockProver::new().with_failures(vec![
        ProverError::ProofGenerationFailed("constraint system busy".to_string()),
        ProverError::ProofGenerationFailed("constraint system busy".to_string()),
    ]));
    let pipeline = harness.local_pipeline();

    let result = pipeline
        .generate_proof(attestations_about("did:trust:erin", 6), ProofType::Exact, uncached())
        .await
        .unwrap();

    assert_eq!(result.circuit_size, CircuitSize::Small);
    assert_eq!(harness.prover.prove_calls(), 3);
    let snapshot = pipeline.metrics_snapshot();
    assert_eq!(snapshot.completed_jobs, 1);
    assert_eq!(snapshot.success_rate, 1.0);
}

#[tokio::test]
async fn test_persistent_failure_exhausts_attempt_budget() {
    let failures = (0..5)
        .map(|_| ProverError::ProofGenerationFailed("constraint system busy".to_string()))
        .collect();
    let harness = Harness::with_prover(MockProver::new().with_failures(failures));
    let pipeline = harness.local_pipeline();

    let error = pipeline
        .generate_proof(attestations_about("did:trust:frank", 6), ProofType::Exact, uncached())
        .await
        .unwrap_err();

    assert_eq!(error.kind, ProofErrorKind::ProofGenerationFailed);
    assert_eq!(error.context.attempt, Some(2));
    assert_eq!(harness.prover.prove_calls(), 3);
    assert_eq!(pipeline.metrics_snapshot().success_rate, 0.0);
}
