//! Shared fixtures for the end-to-end tests

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use trustproof_core::{
    logging, AttestationType, Clock, ManualClock, ProofSubmission, SubjectiveOpinion,
    TrustAttestation,
};
use trustproof_fusion::TrustFusionEngine;
use trustproof_pipeline::{
    InProcessTransport, LocalExecutor, PipelineConfig, PoolExecutor, ProofPipeline,
    RequestOptions, RetryConfig,
};
use trustproof_prover::{CircuitStore, MockProver, SyntheticCircuitSource};
use trustproof_workers::{
    LoadScoreBalancer, PoolConfig, WorkerNode, WorkerPoolManager, WorkerTask, WorkerTransport,
};

/// Quiet logs unless `RUST_LOG` says otherwise
pub fn init_test_logging() {
    logging::init_with_filter("warn");
}

/// Local proving stack over the synthetic circuit source and mock prover
pub struct Harness {
    pub source: Arc<SyntheticCircuitSource>,
    pub store: Arc<CircuitStore>,
    pub prover: Arc<MockProver>,
    pub executor: Arc<LocalExecutor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_prover(MockProver::new())
    }

    pub fn with_prover(prover: MockProver) -> Self {
        init_test_logging();
        let source = Arc::new(SyntheticCircuitSource::new());
        let store = Arc::new(CircuitStore::new(source.clone()));
        let prover = Arc::new(prover);
        let executor = Arc::new(LocalExecutor::new(
            Arc::new(TrustFusionEngine::with_defaults()),
            Arc::clone(&store),
            prover.clone(),
        ));
        Self {
            source,
            store,
            prover,
            executor,
        }
    }

    /// Pipeline proving directly on this harness
    pub fn local_pipeline(&self) -> ProofPipeline {
        ProofPipeline::local(fast_config(), Arc::clone(&self.executor))
    }

    /// Pipeline proving through `pool`
    pub fn pool_pipeline(&self, pool: &WorkerPoolManager) -> ProofPipeline {
        ProofPipeline::builder(Arc::new(PoolExecutor::new(pool.clone())))
            .config(fast_config())
            .circuit_store(Arc::clone(&self.store))
            .build()
    }

    pub fn transport(&self) -> Arc<InProcessTransport> {
        Arc::new(InProcessTransport::new(Arc::clone(&self.executor)))
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Short backoffs so recovery paths finish quickly in real time
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        proof_timeout_ms: 10_000,
        retry: RetryConfig {
            base_delay_ms: 5,
            max_delay_ms: 20,
            resource_cooldown_ms: 5,
            ..RetryConfig::default()
        },
        ..PipelineConfig::default()
    }
}

pub fn uncached() -> RequestOptions {
    RequestOptions {
        use_cache: false,
        ..RequestOptions::default()
    }
}

/// `count` live attestations about `subject` from distinct peers
pub fn attestations_about(subject: &str, count: usize) -> Vec<TrustAttestation> {
    (0..count)
        .map(|i| TrustAttestation {
            source: format!("did:trust:peer-{}", i),
            target: subject.to_string(),
            opinion: SubjectiveOpinion::new(0.7, 0.1, 0.2, 0.5),
            attestation_type: if i % 2 == 0 {
                AttestationType::Trust
            } else {
                AttestationType::Vouch
            },
            weight: 1.0,
            created_at: 0,
            expires_at: u64::MAX,
        })
        .collect()
}

/// Pool on a manual clock with the default load-score balancer
pub fn manual_pool(
    transport: Arc<dyn WorkerTransport>,
) -> (WorkerPoolManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let pool = WorkerPoolManager::with_parts(
        PoolConfig::default(),
        transport,
        Box::new(LoadScoreBalancer),
        clock.clone() as Arc<dyn Clock>,
    );
    (pool, clock)
}

/// Transport whose `stalled` worker never answers; every other worker
/// proves in process.
pub struct StallingTransport {
    stalled: String,
    inner: Arc<InProcessTransport>,
}

impl StallingTransport {
    pub fn new(stalled: impl Into<String>, inner: Arc<InProcessTransport>) -> Self {
        Self {
            stalled: stalled.into(),
            inner,
        }
    }
}

#[async_trait]
impl WorkerTransport for StallingTransport {
    async fn dispatch(
        &self,
        worker: &WorkerNode,
        task: &WorkerTask,
    ) -> anyhow::Result<ProofSubmission> {
        if worker.id == self.stalled {
            std::future::pending::<()>().await;
        }
        self.inner.dispatch(worker, task).await
    }
}

/// Poll `condition` every few milliseconds for up to two seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
