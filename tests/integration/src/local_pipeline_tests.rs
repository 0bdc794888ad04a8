//! Local proving from attestations to a validated proof

use crate::test_utils::{attestations_about, uncached, Harness};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use trustproof_core::{is_well_formed_hash, CircuitSize, ProofSubmission, ProofType};
use trustproof_pipeline::{
    AuditEvent, ExecutionEvent, ProgressUpdate, ProofErrorKind, ProofExecutor, ProofJob,
    ProofPipeline, RequestOptions, RequestStatus,
};

#[tokio::test]
async fn test_exact_proof_end_to_end() {
    let harness = Harness::new();
    let pipeline = harness.local_pipeline();

    let result = pipeline
        .generate_proof(
            attestations_about("did:trust:alice", 12),
            ProofType::Exact,
            RequestOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.proof_type, ProofType::Exact);
    assert_eq!(result.circuit_size, CircuitSize::Small);
    assert!(is_well_formed_hash(&result.hash));
    assert_eq!(result.hash, result.recompute_hash());
    assert!(!result.proof.is_empty());
    // commitment, count, circuit label, revealed score
    assert_eq!(result.public_inputs.len(), 4);
    assert_eq!(result.public_inputs[1], "12");
    assert_eq!(result.public_inputs[2], "small");
    assert_eq!(harness.prover.prove_calls(), 1);

    let snapshot = pipeline.metrics_snapshot();
    assert_eq!(snapshot.completed_jobs, 1);
    assert_eq!(snapshot.success_rate, 1.0);
    assert_eq!(snapshot.active_jobs, 0);

    let benchmarks = pipeline.circuit_benchmarks();
    assert!(benchmarks
        .iter()
        .any(|b| b.circuit_size == CircuitSize::Small && b.samples == 1));
}

#[tokio::test]
async fn test_repeat_request_is_served_from_cache() {
    let harness = Harness::new();
    let pipeline = harness.local_pipeline();
    let evidence = attestations_about("did:trust:bob", 5);

    let first = pipeline
        .generate_proof(evidence.clone(), ProofType::Exact, RequestOptions::default())
        .await
        .unwrap();

    let updates: Arc<Mutex<Vec<ProgressUpdate>>> = Arc::default();
    let sink = Arc::clone(&updates);
    let options = RequestOptions {
        on_progress: Some(Arc::new(move |update: ProgressUpdate| {
            sink.lock().unwrap().push(update)
        })),
        ..RequestOptions::default()
    };
    let second = pipeline
        .generate_proof(evidence.clone(), ProofType::Exact, options)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(harness.prover.prove_calls(), 1);
    let stats = pipeline.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.entries, 1);

    let updates = updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].status, RequestStatus::Completed);

    // Opting out of the cache proves again
    pipeline
        .generate_proof(evidence, ProofType::Exact, uncached())
        .await
        .unwrap();
    assert_eq!(harness.prover.prove_calls(), 2);

    let events: Vec<AuditEvent> = pipeline.audit_entries().iter().map(|e| e.event).collect();
    assert_eq!(
        events,
        vec![
            AuditEvent::Requested,
            AuditEvent::Completed,
            AuditEvent::CacheHit,
            AuditEvent::Requested,
            AuditEvent::Completed,
        ]
    );
    assert!(pipeline.verify_audit_chain().is_intact());
}

#[tokio::test]
async fn test_threshold_proofs_are_keyed_by_threshold() {
    let harness = Harness::new();
    let pipeline = harness.local_pipeline();
    let evidence = attestations_about("did:trust:carol", 8);
    let threshold = |t: f64| RequestOptions {
        threshold: Some(t),
        ..RequestOptions::default()
    };

    let low = pipeline
        .generate_proof(evidence.clone(), ProofType::Threshold, threshold(0.5))
        .await
        .unwrap();
    let higher = pipeline
        .generate_proof(evidence.clone(), ProofType::Threshold, threshold(0.6))
        .await
        .unwrap();

    assert_eq!(low.proof_type, ProofType::Threshold);
    assert_ne!(low.public_inputs[3], higher.public_inputs[3]);
    assert_eq!(harness.prover.prove_calls(), 2);

    // A threshold the fused score does not meet cannot be proven
    let error = pipeline
        .generate_proof(evidence, ProofType::Threshold, threshold(0.99))
        .await
        .unwrap_err();
    assert_eq!(error.kind, ProofErrorKind::InvalidInput);
    assert!(error.is_fatal());
    assert_eq!(harness.prover.prove_calls(), 2);
}

#[tokio::test]
async fn test_evidence_about_someone_else_is_rejected() {
    let harness = Harness::new();
    let pipeline = harness.local_pipeline();

    let mut evidence = attestations_about("did:trust:dave", 3);
    evidence.extend(attestations_about("did:trust:erin", 3));
    let result = pipeline
        .generate_proof(evidence, ProofType::Exact, uncached())
        .await
        .unwrap();
    // Only the first subject's attestations are committed to
    assert_eq!(result.public_inputs[1], "3");

    let mut expired = attestations_about("did:trust:frank", 2);
    for attestation in &mut expired {
        attestation.expires_at = 1;
    }
    let error = pipeline
        .generate_proof(expired, ProofType::Exact, uncached())
        .await
        .unwrap_err();
    assert_eq!(error.kind, ProofErrorKind::InvalidInput);
}

/// Proves locally, then rewrites the fused opinion
struct TamperingExecutor {
    inner: Arc<dyn ProofExecutor>,
}

#[async_trait]
impl ProofExecutor for TamperingExecutor {
    fn name(&self) -> &'static str {
        "tampering"
    }

    async fn execute(
        &self,
        job: &ProofJob,
        events: &(dyn Fn(ExecutionEvent) + Send + Sync),
    ) -> anyhow::Result<ProofSubmission> {
        let mut submission = self.inner.execute(job, events).await?;
        submission.fused_opinion.belief = 0.95;
        submission.fused_opinion.disbelief = 0.0;
        submission.fused_opinion.uncertainty = 0.05;
        Ok(submission)
    }
}

#[tokio::test]
async fn test_tampered_output_is_rejected_without_retry() {
    let harness = Harness::new();
    let executor: Arc<dyn ProofExecutor> = Arc::new(TamperingExecutor {
        inner: harness.executor.clone(),
    });
    let pipeline = ProofPipeline::builder(executor)
        .config(crate::test_utils::fast_config())
        .build();

    let error = pipeline
        .generate_proof(
            attestations_about("did:trust:grace", 4),
            ProofType::Exact,
            RequestOptions::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(error.kind, ProofErrorKind::ProofTampered);
    assert_eq!(harness.prover.prove_calls(), 1);
    assert_eq!(pipeline.cache_stats().entries, 0);
    assert_eq!(pipeline.queue_stats().failed, 1);
    assert_eq!(
        pipeline.audit_entries().last().map(|e| e.event),
        Some(AuditEvent::Failed)
    );
}
