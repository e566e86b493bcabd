//! Content hashing over canonical encodings.

use crate::encoder::to_canonical_json;
use crate::value::Value;
use sha2::{Digest, Sha256};

/// Computes the SHA-256 content hash of a value's canonical encoding.
///
/// Because the canonical encoding is independent of map insertion order,
/// two semantically equal trees always hash identically. The sync engine
/// uses this for dirty-change detection and in-flight echo detection.
pub fn content_hash(value: &Value) -> String {
    let canonical = to_canonical_json(value);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
