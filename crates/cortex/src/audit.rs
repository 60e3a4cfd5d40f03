//! Canonical JSON + SHA-256 hashing used for tamper-evident auditing.
//!
//! "Canonical" here means: UTF-8, ASCII-escaped, object keys sorted, no
//! insignificant whitespace — the same representation on every run so a
//! `reasoning_hash` recomputed from a persisted record matches the one
//! emitted on the wire.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Recursively sort object keys so serialization order is deterministic.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(String, Value)> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Render `value` as canonical JSON text: sorted keys, ASCII-escaped,
/// no whitespace.
pub fn canonical_json<T: Serialize>(value: &T) -> String {
    let raw = serde_json::to_value(value).expect("value must be JSON-representable");
    let sorted = canonicalize(&raw);
    ascii_escape(&serde_json::to_string(&sorted).expect("canonical value must serialize"))
}

/// `serde_json` already escapes control characters and quotes; this pass
/// additionally escapes any remaining non-ASCII byte sequences so the output
/// matches `ensure_ascii=True` canonicalization used by the wire's other
/// producer.
fn ascii_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut buf = [0u16; 2];
            for unit in c.encode_utf16(&mut buf) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

pub fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash an arbitrary envelope value: canonicalize then SHA-256.
pub fn hash_envelope<T: Serialize>(envelope: &T) -> String {
    sha256_hex(&canonical_json(envelope))
}

/// Hash a tool call's arguments for the audit trail.
pub fn hash_tool_call(name: &str, arguments: &Value) -> String {
    let envelope = serde_json::json!({ "name": name, "arguments": arguments });
    hash_envelope(&envelope)
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        let value = json!({ "b": 1, "a": 2 });
        assert_eq!(canonical_json(&value), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn canonical_json_has_no_whitespace() {
        let value = json!({ "a": [1, 2, 3], "b": "x" });
        let out = canonical_json(&value);
        assert!(!out.contains(' '));
    }

    #[test]
    fn hash_is_stable_across_key_order() {
        let a = json!({ "a": 1, "b": 2 });
        let b = json!({ "b": 2, "a": 1 });
        assert_eq!(hash_envelope(&a), hash_envelope(&b));
    }

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85"
        );
    }
}
