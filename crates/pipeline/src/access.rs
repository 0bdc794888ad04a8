//! Access control and per-user rate limiting for proof requests.

use crate::config::RateLimitConfig;
use crate::error::{ProofError, ProofErrorKind};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::warn;
use trustproof_core::{Clock, ProofType, TrustAttestation};

/// Bucket for requests without a user id
pub const ANONYMOUS_USER: &str = "anonymous";

/// Decides whether a caller may request a proof over the given evidence.
pub trait AccessPolicy: Send + Sync {
    fn authorize(
        &self,
        user_id: Option<&str>,
        attestations: &[TrustAttestation],
        proof_type: ProofType,
    ) -> Result<(), ProofError>;
}

/// Permits everything
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn authorize(
        &self,
        _: Option<&str>,
        _: &[TrustAttestation],
        _: ProofType,
    ) -> Result<(), ProofError> {
        Ok(())
    }
}

/// Sliding-window request limiter keyed by user id.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, VecDeque<u64>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admit and record one request, or fail with `RateLimited`
    pub fn check(&self, user_id: Option<&str>) -> Result<(), ProofError> {
        if !self.config.enabled {
            return Ok(());
        }
        let user = user_id.unwrap_or(ANONYMOUS_USER);
        let now = self.clock.now_ms();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows.entry(user.to_string()).or_default();

        while window
            .front()
            .is_some_and(|t| now.saturating_sub(*t) >= self.config.window_ms)
        {
            window.pop_front();
        }

        if window.len() >= self.config.max_requests {
            warn!(user_id = user, limit = self.config.max_requests, "Rate limit exceeded");
            return Err(ProofError::new(
                ProofErrorKind::RateLimited,
                format!(
                    "{} exceeded {} requests per {} ms",
                    user, self.config.max_requests, self.config.window_ms
                ),
            ));
        }
        window.push_back(now);
        Ok(())
    }

    /// Requests still admitted for `user_id` in the current window
    pub fn remaining(&self, user_id: Option<&str>) -> usize {
        let user = user_id.unwrap_or(ANONYMOUS_USER);
        let now = self.clock.now_ms();
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let used = windows
            .get(user)
            .map(|w| {
                w.iter()
                    .filter(|t| now.saturating_sub(**t) < self.config.window_ms)
                    .count()
            })
            .unwrap_or(0);
        self.config.max_requests.saturating_sub(used)
    }
}
