//! FR-014: BLAKE3 fingerprints for step declarations and results.

use serde_json::Value;

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash a JSON value in canonical form (object keys sorted).
pub fn hash_json(value: &Value) -> String {
    // serde_json's default map is ordered by key, so to_string is canonical
    hash_string(&value.to_string())
}
