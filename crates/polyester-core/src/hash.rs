//! Canonical JSON encoding and the cache-key derivation used to address
//! persisted operation state.

use base64::Engine;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serialises `value` to JSON with sorted object keys, so that two
/// semantically identical argument records always produce byte-identical
/// output regardless of field declaration order. `serde_json::Value`'s map
/// type is a `BTreeMap` (the `preserve_order` feature is not enabled
/// anywhere in this workspace), so a round-trip through `Value` is
/// sufficient to canonicalise.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v = serde_json::to_value(value)?;
    serde_json::to_string(&v)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Derives the filesystem-safe cache key for an operation: SHA-256 over
/// `op_name` bytes followed directly by the canonical-JSON-encoded argument
/// bytes (no delimiter between the two — see DESIGN.md's Open Question
/// resolution #4), base64-URL encoded, then every non-alphanumeric
/// character stripped.
pub fn cache_key(op_name: &str, args: &serde_json::Value) -> Result<String, serde_json::Error> {
    let args_json = serde_json::to_string(args)?;
    let mut hasher = Sha256::new();
    hasher.update(op_name.as_bytes());
    hasher.update(args_json.as_bytes());
    let digest = hasher.finalize();
    let encoded = base64::engine::general_purpose::URL_SAFE.encode(digest);
    Ok(encoded.chars().filter(|c| c.is_ascii_alphanumeric()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cache_key_is_pure_function_of_name_and_args() {
        let a = cache_key("touch", &json!({"path": "/tmp/a"})).unwrap();
        let b = cache_key("touch", &json!({"path": "/tmp/a"})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_differs_on_args_change() {
        let a = cache_key("touch", &json!({"path": "/tmp/a"})).unwrap();
        let b = cache_key("touch", &json!({"path": "/tmp/b"})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn cache_key_is_alphanumeric_only() {
        let k = cache_key("copy", &json!({"sources": ["a", "b"], "dest": "/x"})).unwrap();
        assert!(k.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn canonical_json_sorts_keys() {
        #[derive(Serialize)]
        struct A {
            z: u32,
            a: u32,
        }
        let s = canonical_json(&A { z: 1, a: 2 }).unwrap();
        assert_eq!(s, r#"{"a":2,"z":1}"#);
    }
}
