//! Proof execution backends.
//!
//! A [`ProofExecutor`] runs one attempt of a proof request and returns an
//! untrusted [`ProofSubmission`]; the pipeline validates it either way.
//! [`LocalExecutor`] proves in-process, [`PoolExecutor`] hands the attempt to
//! the worker pool.

use crate::error::{ErrorClassifier, ErrorContext};
use crate::metrics::{ProofStage, ResourceSample};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use trustproof_core::{
    CircuitSize, Clock, Priority, ProofResult, ProofSubmission, ProofType, SystemClock,
    TrustAttestation,
};
use trustproof_fusion::{FusionError, TrustFusionEngine};
use trustproof_prover::{
    proof_words, public_inputs, CircuitStore, Prover, ProverError, WitnessInput,
};
use trustproof_workers::{
    TaskFailure, WorkerNode, WorkerPoolManager, WorkerTask, WorkerTransport,
};

/// One attempt of a proof request
#[derive(Debug, Clone, PartialEq)]
pub struct ProofJob {
    pub request_id: String,
    pub attestations: Vec<TrustAttestation>,
    pub proof_type: ProofType,
    pub threshold: Option<f64>,
    pub priority: Priority,
    pub circuit_size: CircuitSize,
    /// Zero-based
    pub attempt: u32,
}

impl ProofJob {
    /// Job for a pool task; picks a circuit when the task leaves it open
    pub fn from_task(task: &WorkerTask) -> Self {
        Self {
            request_id: task.id.clone(),
            attestations: task.attestations.clone(),
            proof_type: task.proof_type,
            threshold: task.threshold,
            priority: task.priority,
            circuit_size: task
                .circuit_size
                .unwrap_or_else(|| CircuitSize::for_attestation_count(task.attestations.len())),
            attempt: task.retries,
        }
    }
}

/// Progress observed while an attempt runs
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExecutionEvent {
    Stage(ProofStage),
    Resources(ResourceSample),
}

#[async_trait]
pub trait ProofExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(
        &self,
        job: &ProofJob,
        events: &(dyn Fn(ExecutionEvent) + Send + Sync),
    ) -> anyhow::Result<ProofSubmission>;
}

/// Proves in this process.
///
/// The prover runs on Tokio's blocking pool. If the caller gives up on the
/// attempt (timeout or cancellation) the blocking call still runs to
/// completion and its output is discarded.
pub struct LocalExecutor {
    engine: Arc<TrustFusionEngine>,
    store: Arc<CircuitStore>,
    prover: Arc<dyn Prover>,
    clock: Arc<dyn Clock>,
}

impl LocalExecutor {
    pub fn new(
        engine: Arc<TrustFusionEngine>,
        store: Arc<CircuitStore>,
        prover: Arc<dyn Prover>,
    ) -> Self {
        Self::with_clock(engine, store, prover, Arc::new(SystemClock))
    }

    pub fn with_clock(
        engine: Arc<TrustFusionEngine>,
        store: Arc<CircuitStore>,
        prover: Arc<dyn Prover>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            store,
            prover,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<CircuitStore> {
        &self.store
    }
}

#[async_trait]
impl ProofExecutor for LocalExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn execute(
        &self,
        job: &ProofJob,
        events: &(dyn Fn(ExecutionEvent) + Send + Sync),
    ) -> anyhow::Result<ProofSubmission> {
        // Proofs are about the subject of the first attestation
        let subject = job
            .attestations
            .first()
            .map(|a| a.target.clone())
            .ok_or_else(|| {
                FusionError::EmptyAttestations("proof request without attestations".to_string())
            })?;

        events(ExecutionEvent::Stage(ProofStage::Fusion));
        let reputation = self
            .engine
            .compute_reputation(&subject, &job.attestations, false)?;
        let evidence = self.engine.filter_attestations(&subject, &job.attestations);
        let membership = self
            .engine
            .compute_set_membership_inputs(&evidence, Some(&subject))?;

        events(ExecutionEvent::Stage(ProofStage::CircuitLoad));
        let bundle = self.store.load(job.circuit_size).await?;

        events(ExecutionEvent::Stage(ProofStage::Witness));
        let witness = WitnessInput::build(
            &membership,
            &reputation.opinion,
            job.proof_type,
            job.threshold,
            job.circuit_size,
        )?;
        let input = witness.to_bytes()?;
        let witness_bytes = {
            let prover = Arc::clone(&self.prover);
            let bundle = Arc::clone(&bundle);
            tokio::task::spawn_blocking(move || {
                prover.gen_witness(&input, &bundle.compiled_circuit)
            })
            .await
            .context("witness thread failed")??
        };

        events(ExecutionEvent::Stage(ProofStage::Proving));
        let artifact_bytes = bundle.compiled_circuit.len()
            + bundle.proving_key.len()
            + bundle.verifying_key.len()
            + bundle.srs.len();
        events(ExecutionEvent::Resources(ResourceSample {
            memory_bytes: (artifact_bytes + witness_bytes.len()) as u64,
            cpu_percent: single_core_share(),
        }));

        let proof_bytes = {
            let prover = Arc::clone(&self.prover);
            let bundle = Arc::clone(&bundle);
            tokio::task::spawn_blocking(move || -> Result<Vec<u8>, ProverError> {
                let proof = prover.prove(
                    &witness_bytes,
                    &bundle.proving_key,
                    &bundle.compiled_circuit,
                    &bundle.srs,
                )?;
                if !prover.verify(&proof, &bundle.verifying_key, &bundle.settings)? {
                    return Err(ProverError::VerificationFailed(
                        "prover output rejected by verifying key".to_string(),
                    ));
                }
                Ok(proof)
            })
            .await
            .context("prover thread failed")??
        };

        let result = ProofResult::new(
            proof_words(&proof_bytes),
            public_inputs(&witness),
            reputation.opinion,
            job.proof_type,
            job.circuit_size,
            self.clock.now_ms(),
        );
        debug!(
            request_id = %job.request_id,
            circuit = %job.circuit_size,
            hash = %result.hash,
            "Local proof generated"
        );
        Ok(ProofSubmission::from(&result))
    }
}

/// One blocking thread busy out of the host's parallelism
fn single_core_share() -> f64 {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    100.0 / cores as f64
}

/// Delegates attempts to the worker pool.
///
/// Dropping the future (pipeline timeout or cancellation) cancels the pool
/// task.
pub struct PoolExecutor {
    pool: WorkerPoolManager,
}

impl PoolExecutor {
    pub fn new(pool: WorkerPoolManager) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &WorkerPoolManager {
        &self.pool
    }
}

struct CancelOnDrop {
    pool: WorkerPoolManager,
    task_id: String,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed && self.pool.cancel_task(&self.task_id) {
            debug!(task_id = %self.task_id, "Cancelled abandoned pool task");
        }
    }
}

#[async_trait]
impl ProofExecutor for PoolExecutor {
    fn name(&self) -> &'static str {
        "pool"
    }

    async fn execute(
        &self,
        job: &ProofJob,
        events: &(dyn Fn(ExecutionEvent) + Send + Sync),
    ) -> anyhow::Result<ProofSubmission> {
        let mut task = WorkerTask::new(job.attestations.clone(), job.proof_type, job.priority)
            .with_id(format!("{}#{}", job.request_id, job.attempt))
            .with_circuit(job.circuit_size);
        if let Some(threshold) = job.threshold {
            task = task.with_threshold(threshold);
        }

        events(ExecutionEvent::Stage(ProofStage::Proving));
        let handle = self.pool.submit_task(task);
        let mut guard = CancelOnDrop {
            pool: self.pool.clone(),
            task_id: handle.task_id().to_string(),
            armed: true,
        };
        let outcome = handle.wait().await;
        guard.armed = false;

        let submission = outcome?;
        if let Some(worker) = &submission.worker_id {
            debug!(request_id = %job.request_id, worker_id = %worker, "Pool proof received");
        }
        Ok(submission)
    }
}

/// Worker transport that proves on a local executor, for single-host pools
/// and tests.
///
/// Failures reach the pool tagged with their proof error code; fatal ones are
/// not dispatched again.
pub struct InProcessTransport {
    executor: Arc<LocalExecutor>,
}

impl InProcessTransport {
    pub fn new(executor: Arc<LocalExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl WorkerTransport for InProcessTransport {
    async fn dispatch(
        &self,
        worker: &WorkerNode,
        task: &WorkerTask,
    ) -> anyhow::Result<ProofSubmission> {
        let job = ProofJob::from_task(task);
        let ignore = |_: ExecutionEvent| {};
        match self.executor.execute(&job, &ignore).await {
            Ok(mut submission) => {
                submission.worker_id = Some(worker.id.clone());
                Ok(submission)
            }
            Err(e) => {
                let classified = ErrorClassifier::new().classify(&e, &ErrorContext::default());
                warn!(
                    worker_id = %worker.id,
                    task_id = %task.id,
                    kind = %classified.kind,
                    error = %e,
                    "In-process worker failed"
                );
                let failure = if classified.is_fatal() {
                    TaskFailure::rejected(classified.kind.code(), format!("{:#}", e))
                } else {
                    TaskFailure::retryable(format!("{:#}", e)).with_code(classified.kind.code())
                };
                Err(failure.into())
            }
        }
    }
}
