//! Distributed proof execution across remote workers.
//!
//! The [`WorkerPoolManager`] owns all worker state: registration, load-balanced
//! assignment, retries, heartbeat-based failure detection with reassignment,
//! and scaling recommendations. Callers receive a per-task [`TaskHandle`]
//! resolved exactly once with the worker's proof submission or a typed error.

pub mod balancer;
pub mod config;
pub mod error;
pub mod node;
pub mod pool;
pub mod task;
pub mod transport;

pub use balancer::{LeastConnectionsBalancer, LoadBalancer, LoadScoreBalancer, RoundRobinBalancer};
pub use config::PoolConfig;
pub use error::{PoolError, PoolResult, TaskFailure};
pub use node::{WorkerNode, WorkerStatus};
pub use pool::{PoolEvent, PoolStats, ScalingAction, ScalingRecommendation, WorkerPoolManager};
pub use task::{TaskHandle, WorkerTask};
pub use transport::WorkerTransport;
