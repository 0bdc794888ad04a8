//! Proving through the worker pool

use crate::test_utils::{
    attestations_about, eventually, manual_pool, uncached, Harness, StallingTransport,
};
use std::sync::Arc;
use trustproof_core::{CircuitSize, ProofType};
use trustproof_pipeline::{ProofErrorKind, RequestOptions, RequestStatus};
use trustproof_prover::{MockProver, ProverError};
use trustproof_workers::{PoolEvent, WorkerPoolManager, WorkerStatus};

#[tokio::test]
async fn test_requests_spread_across_workers() {
    let harness = Harness::new();
    let pool = WorkerPoolManager::new(Default::default(), harness.transport());
    pool.register_worker("worker-a", "inproc://a", 2).unwrap();
    pool.register_worker("worker-b", "inproc://b", 2).unwrap();
    let pipeline = harness.pool_pipeline(&pool);

    let tickets: Vec<_> = (0..4)
        .map(|i| {
            pipeline
                .request_proof(
                    attestations_about(&format!("did:trust:subject-{}", i), 6),
                    ProofType::Exact,
                    uncached(),
                )
                .unwrap()
        })
        .collect();
    for ticket in tickets {
        let result = ticket.wait().await.unwrap();
        assert_eq!(result.hash, result.recompute_hash());
    }

    let stats = pool.stats();
    assert_eq!(stats.completed_tasks, 4);
    assert_eq!(stats.in_flight_tasks, 0);
    assert_eq!(stats.idle_workers, 2);
    assert_eq!(pipeline.queue_stats().completed, 4);
    assert_eq!(harness.prover.prove_calls(), 4);
}

#[tokio::test]
async fn test_offline_worker_task_is_reassigned() {
    let harness = Harness::new();
    let transport = Arc::new(StallingTransport::new("stuck", harness.transport()));
    let (pool, clock) = manual_pool(transport);
    let mut events = pool.subscribe();
    pool.register_worker("stuck", "inproc://stuck", 1).unwrap();
    let pipeline = harness.pool_pipeline(&pool);

    let ticket = pipeline
        .request_proof(attestations_about("did:trust:alice", 5), ProofType::Exact, uncached())
        .unwrap();
    assert!(eventually(|| pool.stats().in_flight_tasks == 1).await);

    pool.register_worker("healthy", "inproc://healthy", 1).unwrap();
    clock.advance(std::time::Duration::from_millis(
        pool.config().offline_after_ms() + 1,
    ));
    pool.record_heartbeat("healthy").unwrap();
    assert_eq!(pool.check_heartbeats(), vec!["stuck".to_string()]);

    let result = ticket.wait().await.unwrap();
    assert_eq!(result.circuit_size, CircuitSize::Small);

    let stats = pool.stats();
    assert_eq!(stats.reassigned_tasks, 1);
    assert_eq!(stats.completed_tasks, 1);
    assert_eq!(stats.offline_workers, 1);
    assert_eq!(pool.worker("stuck").map(|w| w.status), Some(WorkerStatus::Offline));
    assert_eq!(pool.worker("healthy").map(|w| w.total_processed), Some(1));

    let mut reassigned = false;
    while let Ok(event) = events.try_recv() {
        if let PoolEvent::TaskReassigned { from_worker, .. } = event {
            reassigned |= from_worker == "stuck";
        }
    }
    assert!(reassigned);
}

#[tokio::test]
async fn test_cancelling_request_cancels_pool_task() {
    let harness = Harness::new();
    let transport = Arc::new(StallingTransport::new("stuck", harness.transport()));
    let (pool, _clock) = manual_pool(transport);
    pool.register_worker("stuck", "inproc://stuck", 1).unwrap();
    let pipeline = harness.pool_pipeline(&pool);

    let ticket = pipeline
        .request_proof(attestations_about("did:trust:bob", 5), ProofType::Exact, uncached())
        .unwrap();
    let request_id = ticket.request_id().to_string();
    assert!(eventually(|| pool.stats().in_flight_tasks == 1).await);

    assert!(pipeline.cancel(&request_id));
    let error = ticket.wait().await.unwrap_err();
    assert_eq!(error.kind, ProofErrorKind::Cancelled);
    assert_eq!(
        pipeline.request(&request_id).map(|r| r.status),
        Some(RequestStatus::Cancelled)
    );

    // The abandoned attempt released its worker
    assert!(eventually(|| pool.stats().in_flight_tasks == 0).await);
    assert_eq!(pool.worker("stuck").map(|w| w.active_jobs), Some(0));
    assert_eq!(pipeline.queue_stats().cancelled, 1);
}

#[tokio::test]
async fn test_worker_out_of_memory_falls_back_through_pool() {
    // Every pool attempt on the medium circuit runs out of memory
    let failures = (0..4)
        .map(|_| ProverError::OutOfMemory("heap".to_string()))
        .collect();
    let harness = Harness::with_prover(MockProver::new().with_failures(failures));
    let pool = WorkerPoolManager::new(Default::default(), harness.transport());
    pool.register_worker("worker-a", "inproc://a", 1).unwrap();
    let pipeline = harness.pool_pipeline(&pool);

    let result = pipeline
        .generate_proof(attestations_about("did:trust:carol", 40), ProofType::Exact, uncached())
        .await
        .unwrap();

    assert_eq!(result.circuit_size, CircuitSize::Small);
    // One initial dispatch and three pool retries, then the fallback attempt
    assert_eq!(harness.prover.prove_calls(), 5);
    let stats = pool.stats();
    assert_eq!(stats.failed_tasks, 1);
    assert_eq!(stats.completed_tasks, 1);
}

#[tokio::test]
async fn test_unmet_threshold_through_pool_fails_once() {
    let harness = Harness::new();
    let pool = WorkerPoolManager::new(Default::default(), harness.transport());
    pool.register_worker("worker-a", "inproc://a", 1).unwrap();
    let mut events = pool.subscribe();
    let pipeline = harness.pool_pipeline(&pool);

    let options = RequestOptions {
        threshold: Some(0.99),
        use_cache: false,
        ..RequestOptions::default()
    };
    let error = pipeline
        .generate_proof(attestations_about("did:trust:dave", 5), ProofType::Threshold, options)
        .await
        .unwrap_err();

    // Same typed error as proving locally
    assert_eq!(error.kind, ProofErrorKind::InvalidInput);
    assert!(error.is_fatal());
    assert_eq!(error.context.attempt, Some(0));
    assert_eq!(harness.prover.prove_calls(), 0);

    let stats = pool.stats();
    assert_eq!(stats.failed_tasks, 1);
    assert_eq!(stats.completed_tasks, 0);
    let mut assigned = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            PoolEvent::TaskAssigned { .. } => assigned += 1,
            PoolEvent::TaskRetrying { .. } => panic!("fatal failure was retried"),
            _ => {}
        }
    }
    assert_eq!(assigned, 1);
    assert_eq!(pipeline.queue_stats().failed, 1);
}
