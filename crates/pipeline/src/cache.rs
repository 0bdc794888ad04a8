//! Memoization of completed proofs keyed by request content.

use crate::config::CacheConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;
use trustproof_core::{prefixed_hex, Clock, ProofResult, ProofType, TrustAttestation};

/// Order-independent fingerprint of an attestation set and proof type.
///
/// Each attestation contributes `source-target-belief-disbelief`; the tuples
/// are sorted before hashing.
pub fn cache_key(attestations: &[TrustAttestation], proof_type: ProofType) -> String {
    let mut tuples: Vec<String> = attestations
        .iter()
        .map(|a| {
            format!(
                "{}-{}-{}-{}",
                a.source, a.target, a.opinion.belief, a.opinion.disbelief
            )
        })
        .collect();
    tuples.sort();

    let mut hasher = blake3::Hasher::new();
    for tuple in &tuples {
        hasher.update(&(tuple.len() as u64).to_le_bytes());
        hasher.update(tuple.as_bytes());
    }
    hasher.update(proof_type.as_str().as_bytes());
    prefixed_hex(hasher.finalize().as_bytes())
}

/// Key for a full request. Threshold proofs also commit to their threshold,
/// since a proof for one threshold says nothing about another.
pub fn request_cache_key(
    attestations: &[TrustAttestation],
    proof_type: ProofType,
    threshold: Option<f64>,
) -> String {
    let base = cache_key(attestations, proof_type);
    match threshold {
        None => base,
        Some(threshold) => {
            let mut hasher = blake3::Hasher::new();
            hasher.update(base.as_bytes());
            hasher.update(&threshold.to_le_bytes());
            prefixed_hex(hasher.finalize().as_bytes())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
}

struct CacheEntry {
    result: ProofResult,
    inserted_at: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

/// TTL and capacity bounded proof cache. Safe to share across tasks.
pub struct ProofCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
}

impl ProofCache {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Live entry for `key`; expired entries are dropped on access.
    pub fn get(&self, key: &str) -> Option<ProofResult> {
        let now = self.clock.now_ms();
        let mut state = self.lock();

        let expired = match state.entries.get(key) {
            Some(entry) if self.is_expired(entry, now) => true,
            Some(entry) => {
                let result = entry.result.clone();
                state.hits += 1;
                return Some(result);
            }
            None => false,
        };
        if expired {
            state.entries.remove(key);
            state.expirations += 1;
        }
        state.misses += 1;
        None
    }

    /// Insert, evicting the oldest entry when full
    pub fn set(&self, key: impl Into<String>, result: ProofResult) {
        let key = key.into();
        let now = self.clock.now_ms();
        let mut state = self.lock();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.config.max_entries {
            let oldest = state
                .entries
                .iter()
                .min_by(|(ka, a), (kb, b)| {
                    a.inserted_at.cmp(&b.inserted_at).then_with(|| ka.cmp(kb))
                })
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
                state.evictions += 1;
                debug!(key = %oldest, "Evicted cached proof");
            }
        }
        state.entries.insert(
            key,
            CacheEntry {
                result,
                inserted_at: now,
            },
        );
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired entries, returning how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut state = self.lock();
        let before = state.entries.len();
        let ttl = self.config.ttl_ms;
        state
            .entries
            .retain(|_, entry| now.saturating_sub(entry.inserted_at) < ttl);
        let removed = before - state.entries.len();
        state.expirations += removed as u64;
        if removed > 0 {
            debug!(removed, "Swept expired proofs");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let lookups = state.hits + state.misses;
        CacheStats {
            entries: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }

    /// Periodic sweep. Abort the handle to stop it.
    pub fn start_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = Duration::from_millis(self.config.cleanup_interval_ms.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.cleanup_expired();
            }
        })
    }

    fn is_expired(&self, entry: &CacheEntry, now: u64) -> bool {
        now.saturating_sub(entry.inserted_at) >= self.config.ttl_ms
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
