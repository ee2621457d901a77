//! Input fingerprinting for pipeline artifacts
//!
//! Every artifact records a fingerprint of the inputs that produced it so a
//! caller can tell whether a stage is stale relative to its inputs without
//! diffing content.

use serde_json::Value;

/// Stable hex fingerprint over an ordered set of named inputs.
///
/// Inputs hash as `name\0canonical-json\0` in the order given; callers pass
/// the same names in the same order to get comparable fingerprints.
pub fn fingerprint_inputs(inputs: &[(&str, &Value)]) -> String {
    let mut hasher = blake3::Hasher::new();
    for (name, value) in inputs {
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        // serde_json emits object keys in map order; Value maps are sorted
        hasher.update(value.to_string().as_bytes());
        hasher.update(b"\0");
    }
    hasher.finalize().to_hex().to_string()
}

/// Fingerprint a single text input (Dockerfile bytes, manifest bundle).
pub fn fingerprint_text(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}
