//! Worker pool manager.
//!
//! All worker and task bookkeeping lives behind one mutex that is never held
//! across an await. Each dispatch runs as its own Tokio task and reports back
//! through [`PoolInner::finish`]; its `JoinHandle` is kept so reassignment and
//! cancellation can abort it.

use crate::balancer::{LoadBalancer, LoadScoreBalancer};
use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult, TaskFailure};
use crate::node::{WorkerNode, WorkerStatus};
use crate::task::{TaskHandle, WorkerTask};
use crate::transport::WorkerTransport;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trustproof_core::{Clock, ProofSubmission, SystemClock};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Operational events. Task results are delivered through [`TaskHandle`]s,
/// never through this channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
    WorkerRegistered { worker_id: String },
    WorkerUnregistered { worker_id: String },
    WorkerOffline { worker_id: String, silent_ms: u64 },
    WorkerOnline { worker_id: String },
    TaskQueued { task_id: String },
    TaskAssigned { task_id: String, worker_id: String },
    TaskCompleted { task_id: String, worker_id: String, duration_ms: u64 },
    TaskRetrying { task_id: String, retries: u32, error: String },
    TaskFailed { task_id: String, error: String },
    TaskReassigned { task_id: String, from_worker: String },
    TaskCancelled { task_id: String },
    ScalingRecommended(ScalingRecommendation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    Hold,
}

/// Advice only; the pool never provisions workers itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingRecommendation {
    pub action: ScalingAction,
    pub online_workers: usize,
    pub target_workers: usize,
    /// Busy / online
    pub utilization: f64,
    pub reason: String,
}

/// Read-only pool snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total_workers: usize,
    pub idle_workers: usize,
    pub busy_workers: usize,
    pub offline_workers: usize,
    pub pending_tasks: usize,
    pub in_flight_tasks: usize,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub reassigned_tasks: u64,
    pub utilization: f64,
    pub avg_duration_ms: f64,
    pub balancer: String,
}

struct InFlight {
    task: WorkerTask,
    worker_id: String,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct PoolState {
    workers: BTreeMap<String, WorkerNode>,
    pending: VecDeque<WorkerTask>,
    in_flight: HashMap<String, InFlight>,
    waiters: HashMap<String, oneshot::Sender<PoolResult<ProofSubmission>>>,
    completed: u64,
    failed: u64,
    reassigned: u64,
}

struct PoolInner {
    config: PoolConfig,
    balancer: Box<dyn LoadBalancer>,
    transport: Arc<dyn WorkerTransport>,
    clock: Arc<dyn Clock>,
    state: Mutex<PoolState>,
    events: broadcast::Sender<PoolEvent>,
}

/// Distributes proof tasks across registered workers.
///
/// Cheap to clone; clones share the same pool. Methods that may dispatch work
/// must run inside a Tokio runtime.
#[derive(Clone)]
pub struct WorkerPoolManager {
    inner: Arc<PoolInner>,
}

impl WorkerPoolManager {
    /// Pool with the default load-score balancer and system clock
    pub fn new(config: PoolConfig, transport: Arc<dyn WorkerTransport>) -> Self {
        Self::with_parts(
            config,
            transport,
            Box::new(LoadScoreBalancer),
            Arc::new(SystemClock),
        )
    }

    pub fn with_parts(
        config: PoolConfig,
        transport: Arc<dyn WorkerTransport>,
        balancer: Box<dyn LoadBalancer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(PoolInner {
                config,
                balancer,
                transport,
                clock,
                state: Mutex::new(PoolState::default()),
                events,
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    /// Register a worker; it is eligible for work immediately.
    pub fn register_worker(
        &self,
        id: impl Into<String>,
        endpoint: impl Into<String>,
        max_concurrency: usize,
    ) -> PoolResult<()> {
        let id = id.into();
        if max_concurrency == 0 {
            return Err(PoolError::InvalidWorker(format!(
                "{} has zero concurrency",
                id
            )));
        }

        let mut state = self.inner.lock();
        if state.workers.contains_key(&id) {
            return Err(PoolError::DuplicateWorker(id));
        }
        let now = self.inner.clock.now_ms();
        let node = WorkerNode::new(id.clone(), endpoint, max_concurrency, now);
        info!(worker_id = %id, endpoint = %node.endpoint, max_concurrency, "Worker registered");
        state.workers.insert(id.clone(), node);
        self.inner.emit(PoolEvent::WorkerRegistered { worker_id: id });
        self.inner.dispatch_locked(&mut state);
        Ok(())
    }

    /// Remove a worker, returning its in-flight tasks to the front of the
    /// pending list.
    pub fn unregister_worker(&self, id: &str) -> PoolResult<WorkerNode> {
        let mut state = self.inner.lock();
        let node = state
            .workers
            .remove(id)
            .ok_or_else(|| PoolError::WorkerNotFound(id.to_string()))?;
        self.inner.requeue_worker_tasks(&mut state, id);
        info!(worker_id = %id, "Worker unregistered");
        self.inner.emit(PoolEvent::WorkerUnregistered {
            worker_id: id.to_string(),
        });
        self.inner.dispatch_locked(&mut state);
        Ok(node)
    }

    /// Record a heartbeat. An offline worker comes back idle.
    pub fn record_heartbeat(&self, id: &str) -> PoolResult<()> {
        let mut state = self.inner.lock();
        let now = self.inner.clock.now_ms();
        let worker = state
            .workers
            .get_mut(id)
            .ok_or_else(|| PoolError::WorkerNotFound(id.to_string()))?;
        worker.last_heartbeat = now;
        if worker.status == WorkerStatus::Offline {
            worker.status = WorkerStatus::Idle;
            worker.refresh_status();
            info!(worker_id = %id, "Worker back online");
            self.inner.emit(PoolEvent::WorkerOnline {
                worker_id: id.to_string(),
            });
            self.inner.dispatch_locked(&mut state);
        }
        Ok(())
    }

    /// Queue a task and try to assign it right away.
    pub fn submit_task(&self, task: WorkerTask) -> TaskHandle {
        let (tx, rx) = oneshot::channel();
        let task_id = task.id.clone();

        let mut state = self.inner.lock();
        state.waiters.insert(task_id.clone(), tx);
        state.pending.push_back(task);
        debug!(task_id = %task_id, pending = state.pending.len(), "Task queued");
        self.inner.emit(PoolEvent::TaskQueued {
            task_id: task_id.clone(),
        });
        self.inner.dispatch_locked(&mut state);

        TaskHandle::new(task_id, rx)
    }

    /// Cancel a pending or in-flight task. Returns false for unknown tasks.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        let mut state = self.inner.lock();

        let found = if let Some(position) = state.pending.iter().position(|t| t.id == task_id) {
            state.pending.remove(position);
            true
        } else if let Some(in_flight) = state.in_flight.remove(task_id) {
            in_flight.handle.abort();
            if let Some(worker) = state.workers.get_mut(&in_flight.worker_id) {
                worker.active_jobs = worker.active_jobs.saturating_sub(1);
                worker.refresh_status();
            }
            true
        } else {
            false
        };

        if found {
            if let Some(waiter) = state.waiters.remove(task_id) {
                let _ = waiter.send(Err(PoolError::Cancelled(task_id.to_string())));
            }
            info!(task_id, "Task cancelled");
            self.inner.emit(PoolEvent::TaskCancelled {
                task_id: task_id.to_string(),
            });
            self.inner.dispatch_locked(&mut state);
        }
        found
    }

    /// Mark silent workers offline and move their tasks to the front of the
    /// pending list. Returns the ids of workers that went offline.
    pub fn check_heartbeats(&self) -> Vec<String> {
        let now = self.inner.clock.now_ms();
        let limit = self.inner.config.offline_after_ms();

        let mut state = self.inner.lock();
        let silent: Vec<(String, u64)> = state
            .workers
            .values()
            .filter(|w| w.is_online())
            .map(|w| (w.id.clone(), now.saturating_sub(w.last_heartbeat)))
            .filter(|(_, silent_ms)| *silent_ms > limit)
            .collect();

        for (worker_id, silent_ms) in &silent {
            if let Some(worker) = state.workers.get_mut(worker_id) {
                worker.go_offline();
            }
            warn!(worker_id = %worker_id, silent_ms, "Worker missed heartbeats, marking offline");
            self.inner.emit(PoolEvent::WorkerOffline {
                worker_id: worker_id.clone(),
                silent_ms: *silent_ms,
            });
            self.inner.requeue_worker_tasks(&mut state, worker_id);
        }

        if !silent.is_empty() {
            self.inner.dispatch_locked(&mut state);
        }
        silent.into_iter().map(|(id, _)| id).collect()
    }

    /// Compare busy/online against the scaling thresholds.
    pub fn check_scaling(&self) -> ScalingRecommendation {
        let config = &self.inner.config;
        let (online, busy) = {
            let state = self.inner.lock();
            let online = state.workers.values().filter(|w| w.is_online()).count();
            let busy = state
                .workers
                .values()
                .filter(|w| w.status == WorkerStatus::Busy)
                .count();
            (online, busy)
        };
        let utilization = if online == 0 {
            0.0
        } else {
            busy as f64 / online as f64
        };

        let (action, target_workers, reason) = if online < config.min_workers {
            (
                ScalingAction::ScaleUp,
                config.min_workers,
                format!("{} online workers below minimum {}", online, config.min_workers),
            )
        } else if utilization >= config.scale_up_threshold && online < config.max_workers {
            (
                ScalingAction::ScaleUp,
                online + 1,
                format!(
                    "utilization {:.2} at or above {:.2}",
                    utilization, config.scale_up_threshold
                ),
            )
        } else if utilization <= config.scale_down_threshold && online > config.min_workers {
            (
                ScalingAction::ScaleDown,
                online - 1,
                format!(
                    "utilization {:.2} at or below {:.2}",
                    utilization, config.scale_down_threshold
                ),
            )
        } else {
            (ScalingAction::Hold, online, "within thresholds".to_string())
        };

        let recommendation = ScalingRecommendation {
            action,
            online_workers: online,
            target_workers,
            utilization,
            reason,
        };
        if action != ScalingAction::Hold {
            info!(?action, online, target_workers, utilization, "Scaling recommended");
            self.inner
                .emit(PoolEvent::ScalingRecommended(recommendation.clone()));
        }
        recommendation
    }

    /// Periodic heartbeat and scaling check. Abort the handle to stop it.
    pub fn start_heartbeat_monitor(&self) -> JoinHandle<()> {
        let pool = self.clone();
        let period = self.inner.config.heartbeat_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                pool.check_heartbeats();
                pool.check_scaling();
            }
        })
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        let count = |status: WorkerStatus| {
            state
                .workers
                .values()
                .filter(|w| w.status == status)
                .count()
        };
        let idle = count(WorkerStatus::Idle);
        let busy = count(WorkerStatus::Busy);
        let online = idle + busy;

        let processed: u64 = state.workers.values().map(|w| w.total_processed).sum();
        let avg_duration_ms = if processed == 0 {
            0.0
        } else {
            state
                .workers
                .values()
                .map(|w| w.avg_duration_ms * w.total_processed as f64)
                .sum::<f64>()
                / processed as f64
        };

        PoolStats {
            total_workers: state.workers.len(),
            idle_workers: idle,
            busy_workers: busy,
            offline_workers: count(WorkerStatus::Offline),
            pending_tasks: state.pending.len(),
            in_flight_tasks: state.in_flight.len(),
            completed_tasks: state.completed,
            failed_tasks: state.failed,
            reassigned_tasks: state.reassigned,
            utilization: if online == 0 {
                0.0
            } else {
                busy as f64 / online as f64
            },
            avg_duration_ms,
            balancer: self.inner.balancer.name().to_string(),
        }
    }

    /// Pending tasks, front first
    pub fn pending_tasks(&self) -> Vec<WorkerTask> {
        self.inner.lock().pending.iter().cloned().collect()
    }

    pub fn workers(&self) -> Vec<WorkerNode> {
        self.inner.lock().workers.values().cloned().collect()
    }

    pub fn worker(&self, id: &str) -> Option<WorkerNode> {
        self.inner.lock().workers.get(id).cloned()
    }

    /// Id of the worker the balancer would pick now
    pub fn select_worker(&self) -> Option<String> {
        let state = self.inner.lock();
        self.inner.select_locked(&state)
    }
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: PoolEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn select_locked(&self, state: &PoolState) -> Option<String> {
        let candidates: Vec<&WorkerNode> =
            state.workers.values().filter(|w| w.can_accept()).collect();
        self.balancer
            .select(&candidates)
            .and_then(|index| candidates.get(index))
            .map(|worker| worker.id.clone())
    }

    /// Assign pending tasks front-first while some worker can accept.
    fn dispatch_locked(self: &Arc<Self>, state: &mut PoolState) {
        while !state.pending.is_empty() {
            let Some(worker_id) = self.select_locked(state) else {
                break;
            };
            let Some(mut task) = state.pending.pop_front() else {
                break;
            };
            let Some(worker) = state.workers.get_mut(&worker_id) else {
                state.pending.push_front(task);
                break;
            };

            worker.begin_job();
            task.assigned_to = Some(worker_id.clone());
            task.start_time = Some(self.clock.now_ms());
            let worker_snapshot = worker.clone();
            let task_snapshot = task.clone();

            debug!(task_id = %task.id, worker_id = %worker_id, "Task assigned");
            self.emit(PoolEvent::TaskAssigned {
                task_id: task.id.clone(),
                worker_id: worker_id.clone(),
            });

            let pool = Arc::clone(self);
            let handle = tokio::spawn(async move {
                let started = Instant::now();
                let outcome = match tokio::time::timeout(
                    pool.config.task_timeout(),
                    pool.transport.dispatch(&worker_snapshot, &task_snapshot),
                )
                .await
                {
                    Ok(Ok(submission)) => Ok(submission),
                    Ok(Err(e)) => Err(TaskFailure::from_transport(&e)),
                    Err(_) => Err(TaskFailure::retryable(format!(
                        "worker timeout after {}ms",
                        pool.config.task_timeout_ms
                    ))),
                };
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                pool.finish(&task_snapshot.id, &worker_snapshot.id, outcome, elapsed_ms);
            });

            state.in_flight.insert(
                task.id.clone(),
                InFlight {
                    task,
                    worker_id,
                    handle,
                },
            );
        }
    }

    fn finish(
        self: &Arc<Self>,
        task_id: &str,
        worker_id: &str,
        outcome: Result<ProofSubmission, TaskFailure>,
        elapsed_ms: f64,
    ) {
        let mut state = self.lock();

        // Reassigned or cancelled while running
        let matches = state
            .in_flight
            .get(task_id)
            .map(|f| f.worker_id == worker_id)
            .unwrap_or(false);
        if !matches {
            debug!(task_id, worker_id, "Dropping result of detached task");
            return;
        }
        let Some(InFlight { mut task, .. }) = state.in_flight.remove(task_id) else {
            return;
        };

        if let Some(worker) = state.workers.get_mut(worker_id) {
            worker.end_job(outcome.as_ref().map(|_| elapsed_ms).map_err(|_| ()));
        }

        match outcome {
            Ok(mut submission) => {
                submission.worker_id.get_or_insert_with(|| worker_id.to_string());
                state.completed += 1;
                if let Some(waiter) = state.waiters.remove(task_id) {
                    let _ = waiter.send(Ok(submission));
                }
                info!(task_id, worker_id, duration_ms = elapsed_ms as u64, "Task completed");
                self.emit(PoolEvent::TaskCompleted {
                    task_id: task_id.to_string(),
                    worker_id: worker_id.to_string(),
                    duration_ms: elapsed_ms as u64,
                });
            }
            Err(failure) if failure.retryable && task.retries < self.config.max_task_retries => {
                task.retries += 1;
                task.unassign();
                warn!(
                    task_id,
                    worker_id,
                    retries = task.retries,
                    error = %failure,
                    "Task failed, retrying"
                );
                self.emit(PoolEvent::TaskRetrying {
                    task_id: task_id.to_string(),
                    retries: task.retries,
                    error: failure.message,
                });
                state.pending.push_front(task);
            }
            Err(failure) => {
                state.failed += 1;
                let attempts = task.retries + 1;
                let message = failure.message.clone();
                let error = if failure.retryable {
                    warn!(task_id, attempts, error = %failure, "Task failed, retries exhausted");
                    PoolError::RetriesExhausted {
                        task_id: task_id.to_string(),
                        attempts,
                        last_error: failure,
                    }
                } else {
                    warn!(
                        task_id,
                        attempts,
                        error = %failure,
                        code = ?failure.code,
                        "Task rejected by worker"
                    );
                    PoolError::TaskRejected {
                        task_id: task_id.to_string(),
                        failure,
                    }
                };
                if let Some(waiter) = state.waiters.remove(task_id) {
                    let _ = waiter.send(Err(error));
                }
                self.emit(PoolEvent::TaskFailed {
                    task_id: task_id.to_string(),
                    error: message,
                });
            }
        }

        self.dispatch_locked(&mut state);
    }

    /// Abort a worker's in-flight tasks and push them to the front of the
    /// pending list in their original dispatch order.
    fn requeue_worker_tasks(&self, state: &mut PoolState, worker_id: &str) {
        let ids: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, f)| f.worker_id == worker_id)
            .map(|(id, _)| id.clone())
            .collect();

        let mut orphaned: Vec<WorkerTask> = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(in_flight) = state.in_flight.remove(&id) {
                in_flight.handle.abort();
                let mut task = in_flight.task;
                task.unassign();
                orphaned.push(task);
            }
        }
        orphaned.sort_by(|a, b| a.id.cmp(&b.id));
        orphaned.sort_by_key(|t| t.start_time.unwrap_or(0));

        for task in orphaned.into_iter().rev() {
            state.reassigned += 1;
            info!(task_id = %task.id, from_worker = %worker_id, "Task returned to pending");
            self.emit(PoolEvent::TaskReassigned {
                task_id: task.id.clone(),
                from_worker: worker_id.to_string(),
            });
            state.pending.push_front(task);
        }
    }
}
