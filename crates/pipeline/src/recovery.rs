//! Recovery strategies consulted after a failed proof attempt.
//!
//! Strategies are tried in order and the first one that accepts the error
//! decides what the next attempt looks like. None of them is consulted once
//! the attempt budget is spent.

use crate::config::RetryConfig;
use crate::error::{ProofError, ProofErrorKind, Recoverability};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use trustproof_core::CircuitSize;
use trustproof_prover::{CircuitFallbackTable, CircuitStore};

/// What the next attempt should do differently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Retry,
    RetryWithCircuit(CircuitSize),
}

/// Position of a failed attempt within its request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptState {
    /// Zero-based index of the attempt that failed
    pub attempt: u32,
    pub max_attempts: u32,
    pub circuit_size: CircuitSize,
}

impl AttemptState {
    pub fn has_remaining(&self) -> bool {
        self.attempt.saturating_add(1) < self.max_attempts
    }
}

#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, error: &ProofError, state: &AttemptState) -> bool;

    /// Prepare the next attempt. May wait.
    async fn recover(&self, error: &ProofError, state: &AttemptState) -> RecoveryAction;
}

/// Exponential backoff for retryable errors
pub struct RetryStrategy {
    config: RetryConfig,
}

impl RetryStrategy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RecoveryStrategy for RetryStrategy {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn can_handle(&self, error: &ProofError, state: &AttemptState) -> bool {
        error.recoverability == Recoverability::Retryable && state.has_remaining()
    }

    async fn recover(&self, error: &ProofError, state: &AttemptState) -> RecoveryAction {
        let delay = self.config.backoff(state.attempt);
        debug!(
            kind = %error.kind,
            attempt = state.attempt,
            delay_ms = delay.as_millis() as u64,
            "Backing off before retry"
        );
        tokio::time::sleep(delay).await;
        RecoveryAction::Retry
    }
}

/// Step down to the next smaller circuit
pub struct CircuitFallbackStrategy {
    table: CircuitFallbackTable,
}

impl CircuitFallbackStrategy {
    pub fn new(table: CircuitFallbackTable) -> Self {
        Self { table }
    }
}

#[async_trait]
impl RecoveryStrategy for CircuitFallbackStrategy {
    fn name(&self) -> &'static str {
        "circuit_fallback"
    }

    fn can_handle(&self, error: &ProofError, state: &AttemptState) -> bool {
        error.recoverability == Recoverability::FallbackAvailable
            && state.has_remaining()
            && self.table.smaller_than(state.circuit_size).is_some()
    }

    async fn recover(&self, error: &ProofError, state: &AttemptState) -> RecoveryAction {
        match self.table.smaller_than(state.circuit_size) {
            Some(smaller) => {
                info!(
                    kind = %error.kind,
                    from = %state.circuit_size,
                    to = %smaller,
                    "Falling back to smaller circuit"
                );
                RecoveryAction::RetryWithCircuit(smaller)
            }
            None => RecoveryAction::Retry,
        }
    }
}

/// Free cached circuit artifacts and cool down on memory pressure
pub struct ResourceOptimizationStrategy {
    store: Option<Arc<CircuitStore>>,
    cooldown: Duration,
}

impl ResourceOptimizationStrategy {
    pub fn new(store: Option<Arc<CircuitStore>>, cooldown: Duration) -> Self {
        Self { store, cooldown }
    }
}

#[async_trait]
impl RecoveryStrategy for ResourceOptimizationStrategy {
    fn name(&self) -> &'static str {
        "resource_optimization"
    }

    fn can_handle(&self, error: &ProofError, state: &AttemptState) -> bool {
        matches!(
            error.kind,
            ProofErrorKind::OutOfMemory | ProofErrorKind::ResourceExhausted
        ) && state.has_remaining()
    }

    async fn recover(&self, error: &ProofError, _state: &AttemptState) -> RecoveryAction {
        let released = self.store.as_ref().map(|s| s.release_all()).unwrap_or(0);
        info!(
            kind = %error.kind,
            released,
            cooldown_ms = self.cooldown.as_millis() as u64,
            "Released resources before retry"
        );
        tokio::time::sleep(self.cooldown).await;
        RecoveryAction::Retry
    }
}

/// Ordered strategy list
pub struct RecoveryPlan {
    strategies: Vec<Box<dyn RecoveryStrategy>>,
}

impl RecoveryPlan {
    pub fn new(strategies: Vec<Box<dyn RecoveryStrategy>>) -> Self {
        Self { strategies }
    }

    /// Retry, then circuit fallback, then resource optimization
    pub fn standard(
        retry: &RetryConfig,
        fallback: CircuitFallbackTable,
        store: Option<Arc<CircuitStore>>,
    ) -> Self {
        Self::new(vec![
            Box::new(RetryStrategy::new(retry.clone())),
            Box::new(CircuitFallbackStrategy::new(fallback)),
            Box::new(ResourceOptimizationStrategy::new(
                store,
                Duration::from_millis(retry.resource_cooldown_ms),
            )),
        ])
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run the first applicable strategy, or `None` when the error surfaces
    pub async fn recover(
        &self,
        error: &ProofError,
        state: &AttemptState,
    ) -> Option<(&'static str, RecoveryAction)> {
        if error.is_fatal() || !state.has_remaining() {
            return None;
        }
        for strategy in &self.strategies {
            if strategy.can_handle(error, state) {
                let action = strategy.recover(error, state).await;
                return Some((strategy.name(), action));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustproof_prover::SyntheticCircuitSource;

    fn state(attempt: u32, circuit_size: CircuitSize) -> AttemptState {
        AttemptState {
            attempt,
            max_attempts: 3,
            circuit_size,
        }
    }

    fn plan(store: Option<Arc<CircuitStore>>) -> RecoveryPlan {
        RecoveryPlan::standard(&RetryConfig::default(), CircuitFallbackTable::standard(), store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_backoff() {
        let plan = plan(None);
        let error = ProofError::new(ProofErrorKind::ProofGenerationFailed, "boom");

        let started = tokio::time::Instant::now();
        let outcome = plan.recover(&error, &state(1, CircuitSize::Small)).await;
        assert_eq!(outcome, Some(("retry", RecoveryAction::Retry)));
        assert!(started.elapsed() >= Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_is_respected() {
        let plan = plan(None);
        let error = ProofError::new(ProofErrorKind::ProofGenerationFailed, "boom");
        assert_eq!(plan.recover(&error, &state(2, CircuitSize::Small)).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_errors_surface() {
        let plan = plan(None);
        let error = ProofError::new(ProofErrorKind::ProofTampered, "hash mismatch");
        assert_eq!(plan.recover(&error, &state(0, CircuitSize::Large)).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_steps_down() {
        let plan = plan(None);
        let error = ProofError::new(ProofErrorKind::CircuitLoadFailed, "integrity");
        assert_eq!(
            plan.recover(&error, &state(0, CircuitSize::Large)).await,
            Some(("circuit_fallback", RecoveryAction::RetryWithCircuit(CircuitSize::Medium)))
        );
        // Nothing smaller than Small, and a load failure is not a resource problem
        assert_eq!(plan.recover(&error, &state(0, CircuitSize::Small)).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_memory_on_smallest_circuit_releases_artifacts() {
        let store = Arc::new(CircuitStore::new(Arc::new(SyntheticCircuitSource::new())));
        store.load(CircuitSize::Small).await.unwrap();
        assert_eq!(store.cached_sizes(), vec![CircuitSize::Small]);

        let plan = plan(Some(Arc::clone(&store)));
        let error = ProofError::new(ProofErrorKind::OutOfMemory, "heap");
        assert_eq!(
            plan.recover(&error, &state(0, CircuitSize::Medium)).await,
            Some(("circuit_fallback", RecoveryAction::RetryWithCircuit(CircuitSize::Small)))
        );
        assert_eq!(
            plan.recover(&error, &state(1, CircuitSize::Small)).await,
            Some(("resource_optimization", RecoveryAction::Retry))
        );
        assert!(store.cached_sizes().is_empty());
    }
}
