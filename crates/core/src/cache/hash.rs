//! Content-addressed cache key generation.

use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 key.
pub const KEY_LEN: usize = 64;

/// Derive the storage key for a remote identifier.
///
/// The key depends on the identifier only, never on the blob bytes, so a
/// lookup can be answered before anything is downloaded.
pub fn derive_key(identifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identifier.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check that a string has the shape of a derived key.
///
/// Keys double as file stems in the blob directory; anything else is rejected.
pub fn is_valid_key(key: &str) -> bool {
    key.len() == KEY_LEN && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
