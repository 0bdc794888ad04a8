//! Structured logging infrastructure for TrustProof.
//!
//! Centralized logging initialization with support for structured JSON output
//! and environment-based configuration.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Initialize the logging system with human-readable output.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use trustproof_core::logging;
///
/// logging::init();
/// tracing::info!("Pipeline started");
/// ```
pub fn init() {
    init_with_filter(DEFAULT_FILTER);
}

/// Same as [`init`] with an explicit fallback filter (used by the node config).
pub fn init_with_filter(fallback: &str) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(fallback))
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}

/// Initialize the logging system with JSON output for production environments.
///
/// This format is suitable for log aggregation systems and structured log analysis.
///
/// # Example
/// ```no_run
/// use trustproof_core::logging;
///
/// logging::init_json();
/// tracing::info!(service = "proof-node", "Service started");
/// ```
pub fn init_json() {
    init_json_with_filter(DEFAULT_FILTER);
}

/// Same as [`init_json`] with an explicit fallback filter.
pub fn init_json_with_filter(fallback: &str) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(fallback))
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .try_init();
}
