//! Bounded priority queue of proof requests.
//!
//! Requests are ordered by descending priority, FIFO within a priority band.
//! The queue also tracks requests being processed and keeps a capped history
//! of terminal requests for statistics.

use crate::config::QueueConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use trustproof_core::{Clock, CircuitSize, Priority, ProofResult, ProofType, TrustAttestation};

pub type QueueResult<T> = std::result::Result<T, QueueError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("Queue full: capacity {capacity}")]
    QueueFull { capacity: usize },

    #[error("Request not found: {0}")]
    NotFound(String),

    #[error("Duplicate request id: {0}")]
    DuplicateId(String),

    #[error("Request {id} is {status:?}")]
    InvalidTransition { id: String, status: RequestStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }
}

/// A proof job and its lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofRequest {
    pub id: String,
    pub priority: Priority,
    pub attestations: Vec<TrustAttestation>,
    pub proof_type: ProofType,
    pub threshold: Option<f64>,
    pub circuit_size: Option<CircuitSize>,
    pub user_id: Option<String>,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub status: RequestStatus,
    /// 0 to 100
    pub progress: u8,
    pub estimated_duration_ms: Option<u64>,
    pub result: Option<ProofResult>,
    pub error: Option<String>,
}

impl ProofRequest {
    pub fn new(
        id: impl Into<String>,
        attestations: Vec<TrustAttestation>,
        proof_type: ProofType,
        priority: Priority,
    ) -> Self {
        Self {
            id: id.into(),
            priority,
            attestations,
            proof_type,
            threshold: None,
            circuit_size: None,
            user_id: None,
            created_at: 0,
            started_at: None,
            completed_at: None,
            status: RequestStatus::Queued,
            progress: 0,
            estimated_duration_ms: None,
            result: None,
            error: None,
        }
    }

    /// `started_at - created_at`
    pub fn wait_time_ms(&self) -> Option<u64> {
        self.started_at.map(|s| s.saturating_sub(self.created_at))
    }

    /// `completed_at - started_at`
    pub fn processing_time_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(s), Some(c)) => Some(c.saturating_sub(s)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Mean over history entries that started
    pub avg_wait_ms: f64,
    /// Mean over history entries that started and finished
    pub avg_processing_ms: f64,
}

pub struct ProofQueue {
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    queued: VecDeque<ProofRequest>,
    processing: HashMap<String, ProofRequest>,
    history: VecDeque<ProofRequest>,
}

impl ProofQueue {
    pub fn new(config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            queued: VecDeque::new(),
            processing: HashMap::new(),
            history: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Insert behind every request of the same or higher priority.
    /// Returns the queue position.
    pub fn enqueue(&mut self, mut request: ProofRequest) -> QueueResult<usize> {
        if self.queued.len() >= self.config.max_queue_size {
            return Err(QueueError::QueueFull {
                capacity: self.config.max_queue_size,
            });
        }
        if self.contains(&request.id) {
            return Err(QueueError::DuplicateId(request.id));
        }

        request.status = RequestStatus::Queued;
        request.created_at = self.clock.now_ms();
        let position = self
            .queued
            .iter()
            .position(|queued| queued.priority < request.priority)
            .unwrap_or(self.queued.len());
        debug!(
            request_id = %request.id,
            priority = ?request.priority,
            position,
            "Request enqueued"
        );
        self.queued.insert(position, request);
        Ok(position)
    }

    /// Next request by priority, or `None` when empty or at the
    /// concurrency limit.
    pub fn dequeue(&mut self) -> Option<ProofRequest> {
        if self.processing.len() >= self.config.max_concurrent {
            return None;
        }
        let mut request = self.queued.pop_front()?;
        request.status = RequestStatus::Processing;
        request.started_at = Some(self.clock.now_ms());
        self.processing.insert(request.id.clone(), request.clone());
        Some(request)
    }

    pub fn update_progress(&mut self, id: &str, progress: u8) -> QueueResult<()> {
        let request = self.processing_mut(id)?;
        request.progress = progress.min(100);
        Ok(())
    }

    pub fn set_estimate(&mut self, id: &str, estimated_duration_ms: u64) -> QueueResult<()> {
        let request = self
            .queued
            .iter_mut()
            .chain(self.processing.values_mut())
            .find(|r| r.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        request.estimated_duration_ms = Some(estimated_duration_ms);
        Ok(())
    }

    pub fn complete(&mut self, id: &str, result: ProofResult) -> QueueResult<()> {
        self.processing_mut(id)?;
        let Some(mut request) = self.processing.remove(id) else {
            return Err(QueueError::NotFound(id.to_string()));
        };
        request.status = RequestStatus::Completed;
        request.progress = 100;
        request.result = Some(result);
        self.retire(request);
        Ok(())
    }

    pub fn fail(&mut self, id: &str, error: impl Into<String>) -> QueueResult<()> {
        self.processing_mut(id)?;
        let Some(mut request) = self.processing.remove(id) else {
            return Err(QueueError::NotFound(id.to_string()));
        };
        request.status = RequestStatus::Failed;
        request.error = Some(error.into());
        self.retire(request);
        Ok(())
    }

    /// Cancel a queued or processing request
    pub fn cancel(&mut self, id: &str) -> QueueResult<RequestStatus> {
        let queued_at = self.queued.iter().position(|r| r.id == id);
        let (mut request, previous) = if let Some(position) = queued_at {
            match self.queued.remove(position) {
                Some(request) => (request, RequestStatus::Queued),
                None => return Err(QueueError::NotFound(id.to_string())),
            }
        } else if let Some(request) = self.processing.remove(id) {
            (request, RequestStatus::Processing)
        } else if let Some(request) = self.history.iter().find(|r| r.id == id) {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                status: request.status,
            });
        } else {
            return Err(QueueError::NotFound(id.to_string()));
        };

        request.status = RequestStatus::Cancelled;
        self.retire(request);
        Ok(previous)
    }

    pub fn get(&self, id: &str) -> Option<&ProofRequest> {
        self.queued
            .iter()
            .find(|r| r.id == id)
            .or_else(|| self.processing.get(id))
            .or_else(|| self.history.iter().rev().find(|r| r.id == id))
    }

    /// Zero-based position among queued requests
    pub fn position(&self, id: &str) -> Option<usize> {
        self.queued.iter().position(|r| r.id == id)
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub fn active_count(&self) -> usize {
        self.processing.len()
    }

    pub fn history(&self) -> impl Iterator<Item = &ProofRequest> {
        self.history.iter()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn stats(&self) -> QueueStats {
        let count = |status: RequestStatus| {
            self.history
                .iter()
                .filter(|r| r.status == status)
                .count()
        };
        let waits: Vec<u64> = self.history.iter().filter_map(|r| r.wait_time_ms()).collect();
        let runs: Vec<u64> = self
            .history
            .iter()
            .filter_map(|r| r.processing_time_ms())
            .collect();

        QueueStats {
            queued: self.queued.len(),
            processing: self.processing.len(),
            completed: count(RequestStatus::Completed),
            failed: count(RequestStatus::Failed),
            cancelled: count(RequestStatus::Cancelled),
            avg_wait_ms: mean(&waits),
            avg_processing_ms: mean(&runs),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.queued.iter().any(|r| r.id == id) || self.processing.contains_key(id)
    }

    fn processing_mut(&mut self, id: &str) -> QueueResult<&mut ProofRequest> {
        if let Some(request) = self.queued.iter().find(|r| r.id == id) {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                status: request.status,
            });
        }
        self.processing
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    fn retire(&mut self, mut request: ProofRequest) {
        request.completed_at = Some(self.clock.now_ms());
        debug!(request_id = %request.id, status = ?request.status, "Request retired");
        self.history.push_back(request);
        while self.history.len() > self.config.history_size {
            self.history.pop_front();
        }
    }
}

fn mean(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<u64>() as f64 / values.len() as f64
}
