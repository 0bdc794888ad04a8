//! Hash-chained audit log of proof requests.
//!
//! Each entry commits to its predecessor through a BLAKE3 hash, so any
//! in-place edit breaks verification from that index on. The log is capped;
//! once the oldest entries are dropped, verification starts from the
//! retained entry's recorded predecessor hash instead of genesis.
//!
//! When `sign_entries` is set, every entry hash is also signed with an
//! ephemeral ed25519 key held by the log.

use crate::config::AuditConfig;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};
use trustproof_core::Clock;

/// 32-byte BLAKE3 digest
pub type AuditHash = [u8; 32];

/// Predecessor of the first entry ever written
pub const GENESIS_HASH: AuditHash = [0u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Requested,
    CacheHit,
    Completed,
    Failed,
    Cancelled,
    Denied,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::Requested => "requested",
            AuditEvent::CacheHit => "cache_hit",
            AuditEvent::Completed => "completed",
            AuditEvent::Failed => "failed",
            AuditEvent::Cancelled => "cancelled",
            AuditEvent::Denied => "denied",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic across the log's lifetime, including dropped entries
    pub seq_no: u64,
    pub timestamp: u64,
    pub request_id: String,
    pub user_id: Option<String>,
    pub event: AuditEvent,
    pub detail: String,
    pub prev_hash: AuditHash,
    pub entry_hash: AuditHash,
    /// Hex-encoded ed25519 signature over `entry_hash`
    pub signature: Option<String>,
}

impl AuditEntry {
    pub fn compute_hash(&self) -> AuditHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"trustproof/audit/v1");
        hasher.update(&self.seq_no.to_le_bytes());
        hasher.update(&self.timestamp.to_le_bytes());
        update_field(&mut hasher, self.request_id.as_bytes());
        match &self.user_id {
            Some(user) => {
                hasher.update(&[1]);
                update_field(&mut hasher, user.as_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
        update_field(&mut hasher, self.event.as_str().as_bytes());
        update_field(&mut hasher, self.detail.as_bytes());
        hasher.update(&self.prev_hash);
        *hasher.finalize().as_bytes()
    }
}

fn update_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChainStatus {
    Intact,
    /// First offending position among retained entries
    Broken { index: usize, reason: String },
}

impl ChainStatus {
    pub fn is_intact(&self) -> bool {
        matches!(self, ChainStatus::Intact)
    }
}

pub struct AuditLog {
    config: AuditConfig,
    clock: Arc<dyn Clock>,
    entries: VecDeque<AuditEntry>,
    /// Predecessor hash of the oldest retained entry
    anchor: AuditHash,
    head: AuditHash,
    next_seq: u64,
    signing_key: Option<SigningKey>,
}

impl AuditLog {
    pub fn new(config: AuditConfig, clock: Arc<dyn Clock>) -> Self {
        let signing_key = config
            .sign_entries
            .then(|| SigningKey::generate(&mut OsRng));
        Self {
            config,
            clock,
            entries: VecDeque::new(),
            anchor: GENESIS_HASH,
            head: GENESIS_HASH,
            next_seq: 0,
            signing_key,
        }
    }

    /// Key that verifies entry signatures, when signing is enabled
    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        self.signing_key.as_ref().map(|k| k.verifying_key())
    }

    pub fn record(
        &mut self,
        request_id: &str,
        user_id: Option<&str>,
        event: AuditEvent,
        detail: impl Into<String>,
    ) -> &AuditEntry {
        let mut entry = AuditEntry {
            seq_no: self.next_seq,
            timestamp: self.clock.now_ms(),
            request_id: request_id.to_string(),
            user_id: user_id.map(str::to_string),
            event,
            detail: detail.into(),
            prev_hash: self.head,
            entry_hash: GENESIS_HASH,
            signature: None,
        };
        entry.entry_hash = entry.compute_hash();
        entry.signature = self
            .signing_key
            .as_ref()
            .map(|key| hex::encode(key.sign(&entry.entry_hash).to_bytes()));

        debug!(request_id, event = event.as_str(), seq_no = entry.seq_no, "Audit entry recorded");
        self.head = entry.entry_hash;
        self.next_seq += 1;
        self.entries.push_back(entry);

        while self.entries.len() > self.config.max_entries.max(1) {
            if let Some(dropped) = self.entries.pop_front() {
                self.anchor = dropped.entry_hash;
            }
        }
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter()
    }

    pub fn entries_for(&self, request_id: &str) -> Vec<AuditEntry> {
        self.entries
            .iter()
            .filter(|e| e.request_id == request_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn head(&self) -> AuditHash {
        self.head
    }

    /// Recompute every retained hash and link, and check signatures
    pub fn verify_chain(&self) -> ChainStatus {
        let verifying_key = self.verifying_key();
        let mut expected_prev = self.anchor;

        for (index, entry) in self.entries.iter().enumerate() {
            if entry.prev_hash != expected_prev {
                return broken(index, "broken link");
            }
            if entry.compute_hash() != entry.entry_hash {
                return broken(index, "hash mismatch");
            }
            if let Some(key) = &verifying_key {
                if !signature_matches(key, entry) {
                    return broken(index, "bad signature");
                }
            }
            expected_prev = entry.entry_hash;
        }
        ChainStatus::Intact
    }

    #[cfg(test)]
    pub(crate) fn entry_mut(&mut self, index: usize) -> Option<&mut AuditEntry> {
        self.entries.get_mut(index)
    }
}

fn broken(index: usize, reason: &str) -> ChainStatus {
    warn!(index, reason, "Audit chain verification failed");
    ChainStatus::Broken {
        index,
        reason: reason.to_string(),
    }
}

fn signature_matches(key: &VerifyingKey, entry: &AuditEntry) -> bool {
    let Some(encoded) = &entry.signature else {
        return false;
    };
    let Ok(bytes) = hex::decode(encoded) else {
        return false;
    };
    let Ok(bytes) = <[u8; 64]>::try_from(bytes.as_slice()) else {
        return false;
    };
    key.verify(&entry.entry_hash, &Signature::from_bytes(&bytes))
        .is_ok()
}
