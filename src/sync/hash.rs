//! Content hashing for collision screening.
//!
//! By hashing the serialized JSON of a payload we can detect that two
//! "conflicting" versions are in fact identical (clock skew or a redundant
//! write on both sides) without comparing every field.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Compute a SHA256 hash of a serializable value.
///
/// # Panics
///
/// Panics if the value cannot be serialized to JSON. This should never
/// happen for payload maps, which are JSON by construction.
#[must_use]
pub fn content_hash<T: Serialize>(value: &T) -> String {
    let json = serde_json::to_string(value).expect("serialization should not fail");
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}
