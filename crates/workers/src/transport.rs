//! Network boundary to remote workers.

use crate::node::WorkerNode;
use crate::task::WorkerTask;
use async_trait::async_trait;
use trustproof_core::ProofSubmission;

/// Delivers a task to a worker and returns its proof.
///
/// Errors are raw transport or worker failures; the pool counts them against
/// the task's retry budget. A [`TaskFailure`](crate::TaskFailure) attached to
/// the error carries the caller's error code, and a non-retryable one fails
/// the task without another dispatch.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn dispatch(
        &self,
        worker: &WorkerNode,
        task: &WorkerTask,
    ) -> anyhow::Result<ProofSubmission>;
}
