//! BLAKE3 content hashing for proof results.

use crate::types::SubjectiveOpinion;

/// Length of a well-formed hash string: `0x` followed by 64 hex digits.
pub const HASH_STRING_LEN: usize = 66;

/// Render a 32-byte digest as a `0x`-prefixed lowercase hex string.
pub fn prefixed_hex(digest: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(digest))
}

/// Content hash binding a proof to the fused opinion it attests.
///
/// Proof words are hashed little-endian, followed by the four opinion fields as
/// IEEE-754 little-endian bytes in `b, d, u, a` order.
pub fn content_hash(proof: &[u64], opinion: &SubjectiveOpinion) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"trustproof/proof-content/v1");
    hasher.update(&(proof.len() as u64).to_le_bytes());
    for word in proof {
        hasher.update(&word.to_le_bytes());
    }
    for field in [
        opinion.belief,
        opinion.disbelief,
        opinion.uncertainty,
        opinion.base_rate,
    ] {
        hasher.update(&field.to_le_bytes());
    }
    prefixed_hex(hasher.finalize().as_bytes())
}

/// `0x` + 64 hex digits.
pub fn is_well_formed_hash(value: &str) -> bool {
    let Some(digits) = value.strip_prefix("0x") else {
        return false;
    };
    digits.len() == 64 && digits.chars().all(|c| c.is_ascii_hexdigit())
}
