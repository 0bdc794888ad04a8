//! Circuit artifacts: source interface, integrity-checked store and the
//! size fallback table.

use crate::error::{ProverError, ProverResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use trustproof_core::{prefixed_hex, CircuitSize};

/// Compiled circuit and key material for one circuit size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBundle {
    pub size: CircuitSize,
    pub compiled_circuit: Vec<u8>,
    pub settings: Vec<u8>,
    pub verifying_key: Vec<u8>,
    pub proving_key: Vec<u8>,
    /// Structured reference string
    pub srs: Vec<u8>,
    /// Integrity hash declared by the manifest
    pub manifest_hash: String,
}

impl CircuitBundle {
    /// Hash recomputed from the artifact bytes
    pub fn computed_hash(&self) -> String {
        bundle_hash(
            &self.compiled_circuit,
            &self.settings,
            &self.verifying_key,
            &self.proving_key,
            &self.srs,
        )
    }
}

/// BLAKE3 over the length-prefixed artifacts
pub fn bundle_hash(
    compiled_circuit: &[u8],
    settings: &[u8],
    verifying_key: &[u8],
    proving_key: &[u8],
    srs: &[u8],
) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [compiled_circuit, settings, verifying_key, proving_key, srs] {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    prefixed_hex(hasher.finalize().as_bytes())
}

/// External supplier of circuit artifacts
#[async_trait]
pub trait CircuitSource: Send + Sync {
    /// Fetch the artifacts for `size` together with their manifest hash
    async fn fetch(&self, size: CircuitSize) -> ProverResult<CircuitBundle>;
}

/// Caches circuit bundles that passed integrity verification.
pub struct CircuitStore {
    source: Arc<dyn CircuitSource>,
    verified: Mutex<HashMap<CircuitSize, Arc<CircuitBundle>>>,
}

impl CircuitStore {
    pub fn new(source: Arc<dyn CircuitSource>) -> Self {
        Self {
            source,
            verified: Mutex::new(HashMap::new()),
        }
    }

    /// Return a verified bundle, fetching and re-hashing it on first use.
    pub async fn load(&self, size: CircuitSize) -> ProverResult<Arc<CircuitBundle>> {
        if let Some(bundle) = self.cached(size) {
            return Ok(bundle);
        }

        let bundle = self.source.fetch(size).await?;
        if bundle.size != size {
            return Err(ProverError::CircuitLoadFailed {
                size,
                reason: format!("source returned {} artifacts", bundle.size),
            });
        }

        let actual = bundle.computed_hash();
        if actual != bundle.manifest_hash {
            warn!(
                circuit = %size,
                expected = %bundle.manifest_hash,
                actual = %actual,
                "Circuit integrity mismatch"
            );
            return Err(ProverError::IntegrityMismatch {
                size,
                expected: bundle.manifest_hash,
                actual,
            });
        }

        let bundle = Arc::new(bundle);
        self.lock().insert(size, Arc::clone(&bundle));
        info!(circuit = %size, "Circuit artifacts verified and cached");
        Ok(bundle)
    }

    /// Drop every cached bundle, returning how many were released
    pub fn release_all(&self) -> usize {
        let mut verified = self.lock();
        let released = verified.len();
        verified.clear();
        debug!(released, "Released cached circuit artifacts");
        released
    }

    pub fn cached_sizes(&self) -> Vec<CircuitSize> {
        let mut sizes: Vec<CircuitSize> = self.lock().keys().copied().collect();
        sizes.sort();
        sizes
    }

    fn cached(&self, size: CircuitSize) -> Option<Arc<CircuitBundle>> {
        self.lock().get(&size).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CircuitSize, Arc<CircuitBundle>>> {
        self.verified.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Statically validated mapping from a circuit size to the next smaller one.
///
/// Every step must strictly decrease capacity, so following the table always
/// terminates.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitFallbackTable {
    next: BTreeMap<CircuitSize, CircuitSize>,
}

impl CircuitFallbackTable {
    /// Validate and build a table from `(from, to)` entries.
    pub fn new(entries: &[(CircuitSize, CircuitSize)]) -> ProverResult<Self> {
        let mut next = BTreeMap::new();
        for (from, to) in entries {
            if to.capacity() >= from.capacity() {
                return Err(ProverError::InvalidFallbackTable(format!(
                    "{} -> {} does not reduce capacity",
                    from, to
                )));
            }
            if next.insert(*from, *to).is_some() {
                return Err(ProverError::InvalidFallbackTable(format!(
                    "duplicate entry for {}",
                    from
                )));
            }
        }

        let table = Self { next };
        for start in table.next.keys() {
            let mut seen = HashSet::new();
            let mut current = Some(*start);
            while let Some(size) = current {
                if !seen.insert(size) {
                    return Err(ProverError::InvalidFallbackTable(format!(
                        "cycle through {}",
                        size
                    )));
                }
                current = table.smaller_than(size);
            }
        }
        Ok(table)
    }

    /// Large → Medium → Small
    pub fn standard() -> Self {
        let mut next = BTreeMap::new();
        next.insert(CircuitSize::Large, CircuitSize::Medium);
        next.insert(CircuitSize::Medium, CircuitSize::Small);
        Self { next }
    }

    /// Next smaller circuit, if any
    pub fn smaller_than(&self, size: CircuitSize) -> Option<CircuitSize> {
        self.next.get(&size).copied()
    }

    /// Every size reachable from `size`, in fallback order
    pub fn chain(&self, size: CircuitSize) -> Vec<CircuitSize> {
        let mut chain = Vec::new();
        let mut current = self.smaller_than(size);
        while let Some(next) = current {
            chain.push(next);
            current = self.smaller_than(next);
        }
        chain
    }
}

impl Default for CircuitFallbackTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Deterministic in-process circuit source for tests and the demo node.
///
/// Artifacts are derived from the size label; sizes marked corrupt are served
/// with a manifest hash that does not match their bytes.
#[derive(Debug, Default)]
pub struct SyntheticCircuitSource {
    corrupt: Mutex<HashSet<CircuitSize>>,
    missing: Mutex<HashSet<CircuitSize>>,
    fetches: AtomicUsize,
}

impl SyntheticCircuitSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `size` with a wrong manifest hash
    pub fn corrupt(&self, size: CircuitSize) {
        self.corrupt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(size);
    }

    /// Report `size` as unavailable
    pub fn remove(&self, size: CircuitSize) {
        self.missing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(size);
    }

    /// Number of fetches served so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn artifact(size: CircuitSize, kind: &str, len: usize) -> Vec<u8> {
        let mut reader = blake3::Hasher::new()
            .update(size.label().as_bytes())
            .update(kind.as_bytes())
            .finalize_xof();
        let mut bytes = vec![0u8; len];
        reader.fill(&mut bytes);
        bytes
    }
}

#[async_trait]
impl CircuitSource for SyntheticCircuitSource {
    async fn fetch(&self, size: CircuitSize) -> ProverResult<CircuitBundle> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self
            .missing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&size)
        {
            return Err(ProverError::CircuitNotFound(size));
        }

        let scale = size.capacity();
        let compiled_circuit = Self::artifact(size, "compiled", 64 * scale);
        let settings = serde_json::to_vec(&serde_json::json!({
            "circuit": size.label(),
            "capacity": size.capacity(),
        }))
        .map_err(|e| ProverError::CircuitLoadFailed {
            size,
            reason: e.to_string(),
        })?;
        let verifying_key = Self::artifact(size, "vk", 256);
        let proving_key = Self::artifact(size, "pk", 32 * scale);
        let srs = Self::artifact(size, "srs", 128);

        let mut manifest_hash = bundle_hash(
            &compiled_circuit,
            &settings,
            &verifying_key,
            &proving_key,
            &srs,
        );
        if self
            .corrupt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&size)
        {
            manifest_hash = prefixed_hex(&[0u8; 32]);
        }

        Ok(CircuitBundle {
            size,
            compiled_circuit,
            settings,
            verifying_key,
            proving_key,
            srs,
            manifest_hash,
        })
    }
}
