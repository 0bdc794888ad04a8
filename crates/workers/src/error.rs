//! Worker pool errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for pool operations
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Failure reported by a worker for one dispatch.
///
/// Transports attach one to their error when they know more than the message:
/// `code` is the caller's own error code and `retryable: false` tells the pool
/// that another dispatch cannot succeed. Untagged errors are retryable.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message}")]
pub struct TaskFailure {
    pub code: Option<String>,
    pub message: String,
    pub retryable: bool,
}

impl TaskFailure {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Recover the tagged failure from a transport error, if any
    pub fn from_transport(error: &anyhow::Error) -> Self {
        match error.downcast_ref::<TaskFailure>() {
            Some(failure) => failure.clone(),
            None => Self::retryable(format!("{:#}", error)),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Worker already registered: {0}")]
    DuplicateWorker(String),

    #[error("Invalid worker: {0}")]
    InvalidWorker(String),

    /// Task failed on every allowed attempt
    #[error("Task {task_id} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        task_id: String,
        attempts: u32,
        last_error: TaskFailure,
    },

    /// Worker reported a failure no other dispatch can fix
    #[error("Task {task_id} rejected: {failure}")]
    TaskRejected { task_id: String, failure: TaskFailure },

    #[error("Task cancelled: {0}")]
    Cancelled(String),

    /// Pool dropped the task without resolving it
    #[error("Worker pool shut down")]
    Shutdown,
}

impl PoolError {
    /// Worker failure behind this error, when there is one
    pub fn task_failure(&self) -> Option<&TaskFailure> {
        match self {
            PoolError::RetriesExhausted { last_error, .. } => Some(last_error),
            PoolError::TaskRejected { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_failure_survives_anyhow() {
        let raw =
            anyhow::Error::new(TaskFailure::rejected("INVALID_INPUT", "score below threshold"));
        let failure = TaskFailure::from_transport(&raw);
        assert!(!failure.retryable);
        assert_eq!(failure.code.as_deref(), Some("INVALID_INPUT"));
        assert_eq!(failure.message, "score below threshold");
    }

    #[test]
    fn test_untagged_failure_is_retryable() {
        let raw = anyhow::anyhow!("connection reset").context("dispatch to w1");
        let failure = TaskFailure::from_transport(&raw);
        assert!(failure.retryable);
        assert_eq!(failure.code, None);
        assert_eq!(failure.message, "dispatch to w1: connection reset");
    }
}
