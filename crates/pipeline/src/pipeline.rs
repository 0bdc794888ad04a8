//! Proof pipeline orchestrator.
//!
//! A request moves Queued → Processing → {Completed | Failed}, and may be
//! Cancelled from either non-terminal state. Each request runs in its own
//! Tokio task that waits for a dispatch slot, then loops over attempts:
//! execute under a hard timeout, validate, and on failure classify the error
//! and consult the recovery plan.
//!
//! All bookkeeping (queue, metrics, audit log, start signals, cancel flags)
//! sits behind one mutex that is never held across an await. Progress
//! callbacks always run with the lock released.

use crate::access::{AccessPolicy, AllowAll, RateLimiter};
use crate::audit::{AuditEntry, AuditEvent, AuditLog, ChainStatus};
use crate::cache::{request_cache_key, CacheStats, ProofCache};
use crate::config::PipelineConfig;
use crate::error::{ErrorClassifier, ErrorContext, PipelineResult, ProofError, ProofErrorKind};
use crate::executor::{ExecutionEvent, LocalExecutor, ProofExecutor, ProofJob};
use crate::metrics::{
    CircuitBenchmark, MetricsCollector, MetricsSnapshot, PerformancePrediction, ProofStage,
};
use crate::queue::{ProofQueue, ProofRequest, QueueError, QueueStats, RequestStatus};
use crate::recovery::{AttemptState, RecoveryAction, RecoveryPlan};
use crate::validator::ProofValidator;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use trustproof_core::{
    CircuitSize, Clock, Priority, ProofResult, ProofType, SystemClock, TrustAttestation,
};
use trustproof_prover::{CircuitFallbackTable, CircuitStore};

/// Progress notification for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub request_id: String,
    pub status: RequestStatus,
    pub progress: u8,
    pub stage: Option<ProofStage>,
    pub estimated_remaining_ms: Option<u64>,
    pub error: Option<String>,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Per-request options
#[derive(Clone)]
pub struct RequestOptions {
    pub priority: Priority,
    pub use_cache: bool,
    pub user_id: Option<String>,
    /// Required for threshold proofs
    pub threshold: Option<f64>,
    /// Overrides circuit selection by attestation count
    pub circuit_size: Option<CircuitSize>,
    pub on_progress: Option<ProgressCallback>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            use_cache: true,
            user_id: None,
            threshold: None,
            circuit_size: None,
            on_progress: None,
        }
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("priority", &self.priority)
            .field("use_cache", &self.use_cache)
            .field("user_id", &self.user_id)
            .field("threshold", &self.threshold)
            .field("circuit_size", &self.circuit_size)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Handle to a submitted request
#[derive(Debug)]
pub struct ProofTicket {
    request_id: String,
    handle: JoinHandle<PipelineResult<ProofResult>>,
}

impl ProofTicket {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub async fn wait(self) -> PipelineResult<ProofResult> {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(ProofError::new(
                ProofErrorKind::InternalError,
                format!("request task ended abnormally: {}", e),
            )),
        }
    }
}

#[derive(Default)]
struct Signals {
    /// Fired by the pump when the request gets a processing slot
    start: HashMap<String, oneshot::Sender<()>>,
    cancel: HashMap<String, watch::Sender<bool>>,
}

struct PipelineState {
    queue: ProofQueue,
    metrics: MetricsCollector,
    audit: AuditLog,
    signals: Signals,
}

struct PipelineInner {
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn ProofExecutor>,
    validator: ProofValidator,
    classifier: ErrorClassifier,
    recovery: RecoveryPlan,
    cache: Arc<ProofCache>,
    limiter: RateLimiter,
    policy: Arc<dyn AccessPolicy>,
    state: Mutex<PipelineState>,
}

/// Fields a request task carries besides its signals
struct RequestPlan {
    id: String,
    attestations: Vec<TrustAttestation>,
    proof_type: ProofType,
    threshold: Option<f64>,
    priority: Priority,
    circuit_size: CircuitSize,
    user_id: Option<String>,
    cache_key: Option<String>,
    on_progress: Option<ProgressCallback>,
}

impl RequestPlan {
    fn notify(&self, update: ProgressUpdate) {
        if let Some(callback) = &self.on_progress {
            callback(update);
        }
    }

    fn update(&self, status: RequestStatus, progress: u8) -> ProgressUpdate {
        ProgressUpdate {
            request_id: self.id.clone(),
            status,
            progress,
            stage: None,
            estimated_remaining_ms: None,
            error: None,
        }
    }
}

/// Builder for [`ProofPipeline`]
pub struct PipelineBuilder {
    executor: Arc<dyn ProofExecutor>,
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    policy: Arc<dyn AccessPolicy>,
    fallback: CircuitFallbackTable,
    store: Option<Arc<CircuitStore>>,
    recovery: Option<RecoveryPlan>,
}

impl PipelineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn access_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn fallback_table(mut self, fallback: CircuitFallbackTable) -> Self {
        self.fallback = fallback;
        self
    }

    /// Store released by the resource-optimization strategy
    pub fn circuit_store(mut self, store: Arc<CircuitStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the standard recovery plan
    pub fn recovery(mut self, plan: RecoveryPlan) -> Self {
        self.recovery = Some(plan);
        self
    }

    pub fn build(self) -> ProofPipeline {
        let config = self.config;
        let clock = self.clock;
        let recovery = self
            .recovery
            .unwrap_or_else(|| RecoveryPlan::standard(&config.retry, self.fallback, self.store));

        let state = PipelineState {
            queue: ProofQueue::new(config.queue.clone(), Arc::clone(&clock)),
            metrics: MetricsCollector::new(config.metrics.clone(), Arc::clone(&clock)),
            audit: AuditLog::new(config.audit.clone(), Arc::clone(&clock)),
            signals: Signals::default(),
        };

        info!(
            executor = self.executor.name(),
            max_concurrent = config.queue.max_concurrent,
            max_attempts = config.retry.max_attempts,
            strategies = ?recovery.strategy_names(),
            "Proof pipeline ready"
        );

        ProofPipeline {
            inner: Arc::new(PipelineInner {
                cache: Arc::new(ProofCache::new(config.cache.clone(), Arc::clone(&clock))),
                limiter: RateLimiter::new(config.rate_limit.clone(), Arc::clone(&clock)),
                validator: ProofValidator::new(),
                classifier: ErrorClassifier::new(),
                executor: self.executor,
                policy: self.policy,
                recovery,
                config,
                clock,
                state: Mutex::new(state),
            }),
        }
    }
}

/// Schedules, executes and recovers proof requests.
///
/// Cheap to clone; clones share state. Submission spawns Tokio tasks, so it
/// must happen inside a runtime.
#[derive(Clone)]
pub struct ProofPipeline {
    inner: Arc<PipelineInner>,
}

impl ProofPipeline {
    pub fn builder(executor: Arc<dyn ProofExecutor>) -> PipelineBuilder {
        PipelineBuilder {
            executor,
            config: PipelineConfig::default(),
            clock: Arc::new(SystemClock),
            policy: Arc::new(AllowAll),
            fallback: CircuitFallbackTable::standard(),
            store: None,
            recovery: None,
        }
    }

    /// In-process pipeline whose resource strategy can release the
    /// executor's circuit cache
    pub fn local(config: PipelineConfig, executor: Arc<LocalExecutor>) -> Self {
        let store = Arc::clone(executor.store());
        let executor: Arc<dyn ProofExecutor> = executor;
        Self::builder(executor)
            .config(config)
            .circuit_store(store)
            .build()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Submit a request and wait for its proof
    pub async fn generate_proof(
        &self,
        attestations: Vec<TrustAttestation>,
        proof_type: ProofType,
        options: RequestOptions,
    ) -> PipelineResult<ProofResult> {
        self.request_proof(attestations, proof_type, options)?
            .wait()
            .await
    }

    /// Submit a request. Admission errors (access, rate limit, invalid
    /// input, full queue) are returned immediately.
    pub fn request_proof(
        &self,
        attestations: Vec<TrustAttestation>,
        proof_type: ProofType,
        options: RequestOptions,
    ) -> PipelineResult<ProofTicket> {
        let inner = &self.inner;
        let request_id = uuid::Uuid::new_v4().to_string();
        let user_id = options.user_id.as_deref();

        let admitted = inner
            .policy
            .authorize(user_id, &attestations, proof_type)
            .and_then(|_| inner.limiter.check(user_id));
        if let Err(denied) = admitted {
            warn!(
                request_id = %request_id,
                user_id = ?user_id,
                kind = %denied.kind,
                "Proof request denied"
            );
            inner.audit(&request_id, user_id, AuditEvent::Denied, denied.to_string());
            return Err(denied);
        }

        if let Err(invalid) = check_request(&attestations, proof_type, options.threshold) {
            inner.audit(&request_id, user_id, AuditEvent::Failed, invalid.to_string());
            return Err(invalid);
        }

        let cache_key = (options.use_cache && inner.config.cache.enabled)
            .then(|| request_cache_key(&attestations, proof_type, options.threshold));
        if let Some(hit) = cache_key.as_deref().and_then(|key| inner.cache.get(key)) {
            debug!(request_id = %request_id, hash = %hit.hash, "Proof served from cache");
            inner.audit(&request_id, user_id, AuditEvent::CacheHit, hit.hash.clone());
            if let Some(callback) = &options.on_progress {
                callback(ProgressUpdate {
                    request_id: request_id.clone(),
                    status: RequestStatus::Completed,
                    progress: 100,
                    stage: None,
                    estimated_remaining_ms: Some(0),
                    error: None,
                });
            }
            return Ok(ProofTicket {
                request_id,
                handle: tokio::spawn(async move { Ok(hit) }),
            });
        }

        let circuit_size = options
            .circuit_size
            .unwrap_or_else(|| CircuitSize::for_attestation_count(attestations.len()));
        let plan = RequestPlan {
            id: request_id.clone(),
            attestations,
            proof_type,
            threshold: options.threshold,
            priority: options.priority,
            circuit_size,
            user_id: options.user_id.clone(),
            cache_key,
            on_progress: options.on_progress,
        };

        let mut request = ProofRequest::new(
            request_id.clone(),
            plan.attestations.clone(),
            proof_type,
            plan.priority,
        );
        request.threshold = plan.threshold;
        request.circuit_size = options.circuit_size;
        request.user_id = plan.user_id.clone();

        let (start_tx, start_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let estimate = {
            let mut state = inner.lock();
            let position = match state.queue.enqueue(request) {
                Ok(position) => position,
                Err(e) => {
                    drop(state);
                    let error = queue_error(e);
                    warn!(request_id = %request_id, "Proof queue full");
                    inner.audit(
                        &request_id,
                        plan.user_id.as_deref(),
                        AuditEvent::Failed,
                        error.to_string(),
                    );
                    return Err(error);
                }
            };

            let prediction = state
                .metrics
                .predict_duration(circuit_size, plan.attestations.len());
            let _ = state
                .queue
                .set_estimate(&request_id, prediction.estimated_duration_ms);
            state.signals.start.insert(request_id.clone(), start_tx);
            state.signals.cancel.insert(request_id.clone(), cancel_tx);
            state.audit.record(
                &request_id,
                plan.user_id.as_deref(),
                AuditEvent::Requested,
                format!(
                    "{} over {} attestations on {}",
                    proof_type.as_str(),
                    plan.attestations.len(),
                    circuit_size
                ),
            );
            info!(
                request_id = %request_id,
                priority = ?plan.priority,
                position,
                circuit = %circuit_size,
                "Proof request queued"
            );
            prediction.estimated_duration_ms
        };

        plan.notify(ProgressUpdate {
            estimated_remaining_ms: Some(estimate),
            ..plan.update(RequestStatus::Queued, 0)
        });

        let handle = tokio::spawn(Arc::clone(inner).run(plan, start_rx, cancel_rx));
        inner.pump();

        Ok(ProofTicket { request_id, handle })
    }

    /// Cancel a queued or in-flight request. Work already done is not
    /// refunded; an in-flight attempt is abandoned.
    pub fn cancel(&self, request_id: &str) -> bool {
        let inner = &self.inner;
        let mut state = inner.lock();
        let previous = match state.queue.cancel(request_id) {
            Ok(previous) => previous,
            Err(e) => {
                debug!(request_id, error = %e, "Nothing to cancel");
                return false;
            }
        };

        state.signals.start.remove(request_id);
        if let Some(flag) = state.signals.cancel.remove(request_id) {
            let _ = flag.send(true);
        }
        if previous == RequestStatus::Processing {
            let code = ProofErrorKind::Cancelled.code().to_string();
            state.metrics.complete_proof(request_id, false, Some(code));
        }
        let user_id = state.queue.get(request_id).and_then(|r| r.user_id.clone());
        state.audit.record(
            request_id,
            user_id.as_deref(),
            AuditEvent::Cancelled,
            format!("cancelled while {:?}", previous),
        );
        info!(request_id, previous = ?previous, "Proof request cancelled");
        inner.pump_locked(&mut state);
        true
    }

    pub fn request(&self, request_id: &str) -> Option<ProofRequest> {
        self.inner.lock().queue.get(request_id).cloned()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.inner.lock().queue.stats()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().metrics.snapshot()
    }

    pub fn circuit_benchmarks(&self) -> Vec<CircuitBenchmark> {
        self.inner.lock().metrics.circuit_benchmarks()
    }

    pub fn predict_duration(
        &self,
        circuit_size: CircuitSize,
        attestation_count: usize,
    ) -> PerformancePrediction {
        self.inner
            .lock()
            .metrics
            .predict_duration(circuit_size, attestation_count)
    }

    pub fn cache(&self) -> &Arc<ProofCache> {
        &self.inner.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().audit.entries().cloned().collect()
    }

    pub fn verify_audit_chain(&self) -> ChainStatus {
        self.inner.lock().audit.verify_chain()
    }

    /// Start the periodic cache sweep
    pub fn start_maintenance(&self) -> JoinHandle<()> {
        self.inner.cache.start_cleanup()
    }
}

/// Cheap admission checks done before a request is queued
fn check_request(
    attestations: &[TrustAttestation],
    proof_type: ProofType,
    threshold: Option<f64>,
) -> PipelineResult<()> {
    if attestations.is_empty() {
        return Err(ProofError::new(
            ProofErrorKind::InvalidInput,
            "proof request without attestations",
        ));
    }
    match (proof_type, threshold) {
        (ProofType::Threshold, None) => Err(ProofError::new(
            ProofErrorKind::InvalidInput,
            "threshold proof without threshold",
        )),
        (_, Some(t)) if !t.is_finite() || !(0.0..=1.0).contains(&t) => Err(ProofError::new(
            ProofErrorKind::InvalidInput,
            format!("threshold {} outside [0,1]", t),
        )),
        _ => Ok(()),
    }
}

fn queue_error(error: QueueError) -> ProofError {
    match error {
        QueueError::QueueFull { .. } => {
            ProofError::new(ProofErrorKind::QueueFull, error.to_string())
        }
        other => ProofError::new(ProofErrorKind::InternalError, other.to_string()),
    }
}

fn cancelled_error(request_id: &str) -> ProofError {
    ProofError::new(ProofErrorKind::Cancelled, format!("request {} cancelled", request_id))
}

/// Resolves once the flag is raised; never resolves if it never is
async fn cancellation(flag: &mut watch::Receiver<bool>) {
    let closed = flag.wait_for(|cancelled| *cancelled).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

impl PipelineInner {
    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn audit(&self, request_id: &str, user_id: Option<&str>, event: AuditEvent, detail: String) {
        self.lock().audit.record(request_id, user_id, event, detail);
    }

    fn pump(&self) {
        let mut state = self.lock();
        self.pump_locked(&mut state);
    }

    /// Hand free processing slots to queued requests in priority order
    fn pump_locked(&self, state: &mut PipelineState) {
        while let Some(request) = state.queue.dequeue() {
            let started = state
                .signals
                .start
                .remove(&request.id)
                .map(|start| start.send(()).is_ok())
                .unwrap_or(false);
            if !started {
                warn!(request_id = %request.id, "Request task is gone, failing request");
                state.signals.cancel.remove(&request.id);
                let _ = state.queue.fail(&request.id, "request task is gone");
            }
        }
    }

    /// Move a freshly started request into metrics. False when it was
    /// cancelled in the meantime.
    fn begin(&self, plan: &RequestPlan) -> bool {
        let mut state = self.lock();
        let processing = state
            .queue
            .get(&plan.id)
            .map(|r| r.status == RequestStatus::Processing)
            .unwrap_or(false);
        if processing {
            state
                .metrics
                .start_proof(&plan.id, plan.circuit_size, plan.attestations.len());
        }
        processing
    }

    fn on_execution_event(&self, plan_id: &str, event: ExecutionEvent) -> Option<ProgressUpdate> {
        let mut state = self.lock();
        match event {
            ExecutionEvent::Stage(stage) => {
                state.metrics.record_stage(plan_id, stage);
                state.queue.update_progress(plan_id, stage.progress()).ok()?;
                let request = state.queue.get(plan_id)?;
                let estimated_remaining_ms =
                    match (request.estimated_duration_ms, request.started_at) {
                        (Some(estimate), Some(started)) => {
                            let elapsed = self.clock.now_ms().saturating_sub(started);
                            Some(estimate.saturating_sub(elapsed))
                        }
                        _ => None,
                    };
                Some(ProgressUpdate {
                    request_id: plan_id.to_string(),
                    status: RequestStatus::Processing,
                    progress: stage.progress(),
                    stage: Some(stage),
                    estimated_remaining_ms,
                    error: None,
                })
            }
            ExecutionEvent::Resources(sample) => {
                state.metrics.record_resources(plan_id, sample);
                None
            }
        }
    }

    /// Body of a request task
    async fn run(
        self: Arc<Self>,
        plan: RequestPlan,
        start: oneshot::Receiver<()>,
        mut cancel: watch::Receiver<bool>,
    ) -> PipelineResult<ProofResult> {
        let cancelled = tokio::select! {
            started = start => started.is_err(),
            _ = cancellation(&mut cancel) => true,
        };
        if cancelled || !self.begin(&plan) {
            plan.notify(plan.update(RequestStatus::Cancelled, 0));
            return Err(cancelled_error(&plan.id));
        }
        plan.notify(plan.update(RequestStatus::Processing, 0));

        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut circuit_size = plan.circuit_size;
        let mut attempt = 0u32;

        loop {
            let job = ProofJob {
                request_id: plan.id.clone(),
                attestations: plan.attestations.clone(),
                proof_type: plan.proof_type,
                threshold: plan.threshold,
                priority: plan.priority,
                circuit_size,
                attempt,
            };

            let events = {
                let inner = Arc::clone(&self);
                let plan_id = plan.id.clone();
                let callback = plan.on_progress.clone();
                move |event: ExecutionEvent| {
                    if let Some(update) = inner.on_execution_event(&plan_id, event) {
                        if let Some(callback) = &callback {
                            callback(update);
                        }
                    }
                }
            };

            let timeout = self.config.proof_timeout();
            let outcome = tokio::select! {
                outcome = tokio::time::timeout(timeout, self.executor.execute(&job, &events)) => {
                    Some(outcome)
                }
                _ = cancellation(&mut cancel) => None,
            };
            let Some(outcome) = outcome else {
                plan.notify(plan.update(RequestStatus::Cancelled, 0));
                return Err(cancelled_error(&plan.id));
            };

            let raw = match outcome {
                Ok(Ok(submission)) => {
                    events(ExecutionEvent::Stage(ProofStage::Validation));
                    self.validator
                        .validate_submission(&submission)
                        .map_err(anyhow::Error::new)
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(anyhow::Error::new(ProofError::new(
                    ProofErrorKind::ProofGenerationTimeout,
                    format!("attempt exceeded {} ms", timeout.as_millis()),
                ))),
            };

            let raw = match raw {
                Ok(result) => return self.succeed(&plan, result, attempt + 1),
                Err(raw) => raw,
            };

            let classified = self
                .classifier
                .classify(&raw, &ErrorContext::for_attempt(&plan.id, circuit_size, attempt));
            warn!(
                request_id = %plan.id,
                attempt,
                circuit = %circuit_size,
                kind = %classified.kind,
                recoverability = ?classified.recoverability,
                error = %classified.message,
                "Proof attempt failed"
            );

            let state = AttemptState {
                attempt,
                max_attempts,
                circuit_size,
            };
            let recovery = tokio::select! {
                recovery = self.recovery.recover(&classified, &state) => Some(recovery),
                _ = cancellation(&mut cancel) => None,
            };
            match recovery {
                None => {
                    plan.notify(plan.update(RequestStatus::Cancelled, 0));
                    return Err(cancelled_error(&plan.id));
                }
                Some(Some((strategy, action))) => {
                    if let RecoveryAction::RetryWithCircuit(smaller) = action {
                        circuit_size = smaller;
                        self.lock().metrics.set_circuit(&plan.id, smaller);
                    }
                    debug!(
                        request_id = %plan.id,
                        strategy,
                        next_attempt = attempt + 1,
                        "Recovering"
                    );
                    attempt += 1;
                }
                Some(None) => return self.fail(&plan, classified, attempt + 1),
            }
        }
    }

    fn succeed(
        &self,
        plan: &RequestPlan,
        result: ProofResult,
        attempts: u32,
    ) -> PipelineResult<ProofResult> {
        {
            let mut state = self.lock();
            if state.queue.complete(&plan.id, result.clone()).is_err() {
                drop(state);
                debug!(request_id = %plan.id, "Discarding proof of cancelled request");
                plan.notify(plan.update(RequestStatus::Cancelled, 0));
                return Err(cancelled_error(&plan.id));
            }
            let metrics = state.metrics.complete_proof(&plan.id, true, None);
            state.audit.record(
                &plan.id,
                plan.user_id.as_deref(),
                AuditEvent::Completed,
                format!("{} on {} after {} attempt(s)", result.hash, result.circuit_size, attempts),
            );
            state.signals.cancel.remove(&plan.id);
            self.pump_locked(&mut state);
            info!(
                request_id = %plan.id,
                hash = %result.hash,
                circuit = %result.circuit_size,
                attempts,
                duration_ms = ?metrics.and_then(|m| m.duration_ms),
                "Proof completed"
            );
        }

        if let Some(key) = &plan.cache_key {
            self.cache.set(key.clone(), result.clone());
        }
        plan.notify(ProgressUpdate {
            estimated_remaining_ms: Some(0),
            ..plan.update(RequestStatus::Completed, 100)
        });
        Ok(result)
    }

    fn fail(
        &self,
        plan: &RequestPlan,
        failure: ProofError,
        attempts: u32,
    ) -> PipelineResult<ProofResult> {
        let progress = {
            let mut state = self.lock();
            let progress = state.queue.get(&plan.id).map(|r| r.progress).unwrap_or(0);
            if state.queue.fail(&plan.id, failure.to_string()).is_err() {
                drop(state);
                plan.notify(plan.update(RequestStatus::Cancelled, 0));
                return Err(cancelled_error(&plan.id));
            }
            state
                .metrics
                .complete_proof(&plan.id, false, Some(failure.kind.code().to_string()));
            state.audit.record(
                &plan.id,
                plan.user_id.as_deref(),
                AuditEvent::Failed,
                format!("{} after {} attempt(s)", failure, attempts),
            );
            state.signals.cancel.remove(&plan.id);
            self.pump_locked(&mut state);
            progress
        };

        error!(
            request_id = %plan.id,
            kind = %failure.kind,
            severity = ?failure.severity,
            attempts,
            "Proof request failed"
        );
        plan.notify(ProgressUpdate {
            error: Some(failure.to_string()),
            ..plan.update(RequestStatus::Failed, progress)
        });
        Err(failure)
    }
}
