//! Pool tasks and their result handles.

use crate::error::{PoolError, PoolResult};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use trustproof_core::{CircuitSize, Priority, ProofSubmission, ProofType, TrustAttestation};

/// Unit of work dispatched to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTask {
    pub id: String,
    pub attestations: Vec<TrustAttestation>,
    pub proof_type: ProofType,
    /// Required for threshold proofs
    pub threshold: Option<f64>,
    pub priority: Priority,
    /// Circuit the worker should prove with; workers choose when unset
    pub circuit_size: Option<CircuitSize>,
    /// Worker currently executing the task
    pub assigned_to: Option<String>,
    /// Dispatch time (Unix milliseconds)
    pub start_time: Option<u64>,
    /// Failed attempts so far
    pub retries: u32,
}

impl WorkerTask {
    pub fn new(
        attestations: Vec<TrustAttestation>,
        proof_type: ProofType,
        priority: Priority,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            attestations,
            proof_type,
            threshold: None,
            priority,
            circuit_size: None,
            assigned_to: None,
            start_time: None,
            retries: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_circuit(mut self, circuit_size: CircuitSize) -> Self {
        self.circuit_size = Some(circuit_size);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub(crate) fn unassign(&mut self) {
        self.assigned_to = None;
        self.start_time = None;
    }
}

/// Receives the outcome of one submitted task
#[derive(Debug)]
pub struct TaskHandle {
    task_id: String,
    rx: oneshot::Receiver<PoolResult<ProofSubmission>>,
}

impl TaskHandle {
    pub(crate) fn new(task_id: String, rx: oneshot::Receiver<PoolResult<ProofSubmission>>) -> Self {
        Self { task_id, rx }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Wait for the worker's submission
    pub async fn wait(self) -> PoolResult<ProofSubmission> {
        self.rx.await.unwrap_or(Err(PoolError::Shutdown))
    }
}
