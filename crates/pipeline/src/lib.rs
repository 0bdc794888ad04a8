//! Proof generation pipeline.
//!
//! Turns fused reputation into proofs and executes them reliably:
//! - Bounded priority queue with concurrency limits and request history
//! - Typed error classification with retry, circuit fallback and resource
//!   recovery strategies
//! - Local or worker-pool execution behind [`ProofExecutor`]
//! - Submission validation and tamper detection
//! - Result cache, per-user rate limiting and a hash-chained audit log
//! - Stage timings, percentiles and duration predictions

pub mod access;
pub mod audit;
pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod recovery;
pub mod validator;

pub use access::{AccessPolicy, AllowAll, RateLimiter};
pub use audit::{AuditEntry, AuditEvent, AuditLog, ChainStatus};
pub use cache::{cache_key, request_cache_key, CacheStats, ProofCache};
pub use config::{
    AuditConfig, CacheConfig, MetricsConfig, NodeConfig, PipelineConfig, QueueConfig,
    RateLimitConfig, RetryConfig,
};
pub use error::{
    ErrorClassifier, ErrorContext, PipelineResult, ProofError, ProofErrorKind, Recoverability,
    Severity,
};
pub use executor::{
    ExecutionEvent, InProcessTransport, LocalExecutor, PoolExecutor, ProofExecutor, ProofJob,
};
pub use metrics::{
    CircuitBenchmark, MetricsCollector, MetricsSnapshot, PerformancePrediction, ProofStage,
};
pub use pipeline::{
    PipelineBuilder, ProgressCallback, ProgressUpdate, ProofPipeline, ProofTicket, RequestOptions,
};
pub use queue::{ProofQueue, ProofRequest, QueueError, QueueStats, RequestStatus};
pub use recovery::{
    AttemptState, CircuitFallbackStrategy, RecoveryAction, RecoveryPlan, RecoveryStrategy,
    ResourceOptimizationStrategy, RetryStrategy,
};
pub use validator::{ProofValidator, ValidationReport};
