use serde_json::Value;
use sha2::{Digest, Sha256};

/// Length of the truncated integrity digest stored on every record.
const INTEGRITY_HASH_LEN: usize = 11;

/// Canonical JSON rendering: object keys sorted recursively, arrays in
/// order, no whitespace. Two payloads that differ only in key order hash
/// identically.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Derived integrity marker the platform stores alongside each record:
/// truncated hex SHA-256 over canonical payload + record id + timestamp
/// millis. Non-cryptographic use — collisions are acceptable, staleness
/// detection is the point.
pub fn integrity_hash(payload: &Value, record_id: &str, timestamp_millis: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(payload).as_bytes());
    hasher.update(record_id.as_bytes());
    hasher.update(timestamp_millis.to_string().as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(INTEGRITY_HASH_LEN);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let value = json!({"b": 1, "a": {"d": 2, "c": [3, {"f": 4, "e": 5}]}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"c":[3,{"e":5,"f":4}],"d":2},"b":1}"#
        );
    }

    #[test]
    fn canonical_json_escapes_keys_and_strings() {
        let value = json!({"we\"ird": "va\nlue"});
        assert_eq!(canonical_json(&value), r#"{"we\"ird":"va\nlue"}"#);
    }

    #[test]
    fn hash_is_eleven_lowercase_hex_chars() {
        let hash = integrity_hash(&json!({"title": "x"}), "rec-1", 1_700_000_000_000);
        assert_eq!(hash.len(), 11);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_ignores_key_order_but_not_content() {
        let a = integrity_hash(&json!({"x": 1, "y": 2}), "id", 1);
        let b = integrity_hash(&json!({"y": 2, "x": 1}), "id", 1);
        let c = integrity_hash(&json!({"x": 1, "y": 3}), "id", 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn hash_binds_record_id_and_timestamp() {
        let payload = json!({"title": "x"});
        assert_ne!(
            integrity_hash(&payload, "id-a", 1),
            integrity_hash(&payload, "id-b", 1)
        );
        assert_ne!(
            integrity_hash(&payload, "id-a", 1),
            integrity_hash(&payload, "id-a", 2)
        );
    }
}
