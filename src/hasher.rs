//! Key hashing and generation.
//!
//! Only the SHA-256 of a key is persisted. The first 12 characters are kept
//! as a non-secret display prefix.

use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::models::api_key::Environment;

/// Length of the non-secret display prefix, e.g. `crb_LIVE_abc`.
pub const KEY_PREFIX_LEN: usize = 12;

/// Random bytes in a generated key (rendered as 32 hex characters).
const KEY_ENTROPY_BYTES: usize = 16;

/// Result of hashing a presented key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedKey {
    /// 64 lowercase hex characters
    pub key_hash: String,
    pub key_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    /// Nothing left after trimming.
    #[error("empty key")]
    Empty,

    /// The key contains a non-ASCII byte.
    #[error("key contains non-ASCII bytes")]
    NonAscii,
}

/// Hash a raw key as presented in a request header.
///
/// Surrounding ASCII whitespace is trimmed first. Any non-ASCII byte is
/// rejected, so the prefix can always be cut on a character boundary.
pub fn hash_key(raw_key: &[u8]) -> Result<HashedKey, HashError> {
    let trimmed = raw_key.trim_ascii();
    if trimmed.is_empty() {
        return Err(HashError::Empty);
    }
    if !trimmed.is_ascii() {
        return Err(HashError::NonAscii);
    }

    let key_hash = hex::encode(Sha256::digest(trimmed));
    let prefix_len = trimmed.len().min(KEY_PREFIX_LEN);
    // ASCII was checked above, each byte is one char
    let key_prefix = trimmed[..prefix_len].iter().map(|&b| b as char).collect();

    Ok(HashedKey {
        key_hash,
        key_prefix,
    })
}

/// Generate a new raw key: `crb_<ENV>_` followed by 32 lowercase hex characters.
pub fn generate_key(environment: Environment) -> String {
    let mut bytes = [0u8; KEY_ENTROPY_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    format!("crb_{}_{}", environment.as_str(), hex::encode(bytes))
}

/// Constant-time comparison of two stored hashes.
pub fn hashes_match(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}
