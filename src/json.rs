//! JSON helpers
//!
//! Canonical serialization for values that feed hashes: object keys are
//! sorted recursively so the same logical value always produces the same
//! bytes, regardless of insertion order.

use serde_json::Value;

/// Serialize a value to canonical JSON (sorted keys, compact separators).
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serializes"));
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
        other => out.push_str(&serde_json::to_string(other).expect("scalar serializes")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sorts_keys_recursively() {
        let value = json!({"b": 1, "a": {"d": 2, "c": 3}});
        assert_eq!(canonical_json(&value), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let first = json!({"x": 1, "y": [1, 2]});
        let second = json!({"y": [1, 2], "x": 1});
        assert_eq!(canonical_json(&first), canonical_json(&second));
    }

    #[test]
    fn test_scalars_and_arrays() {
        assert_eq!(canonical_json(&json!(["b", "a"])), r#"["b","a"]"#);
        assert_eq!(canonical_json(&json!("s")), r#""s""#);
        assert_eq!(canonical_json(&json!(null)), "null");
    }
}
