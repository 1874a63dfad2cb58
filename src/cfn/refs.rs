//! Template reference utilities
//!
//! CloudFormation intrinsics appear in configuration values as single-key
//! objects (`{"Ref": ...}`, `{"Fn::GetAtt": ...}`). These helpers extract
//! the resource names a value depends on and build the canonical byte
//! representation used for assignment fingerprints.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use crate::json::canonical_json;

/// Build a `Ref` intrinsic.
pub fn ref_value(name: &str) -> Value {
    json!({ "Ref": name })
}

/// Build a `Fn::GetAtt` intrinsic.
pub fn getatt_value(name: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [name, attribute] })
}

/// True if the value is a single intrinsic reference.
pub fn is_reference(value: &Value) -> bool {
    match value.as_object() {
        Some(map) => map.len() == 1 && (map.contains_key("Ref") || map.contains_key("Fn::GetAtt")),
        None => false,
    }
}

/// Collect the resource names a value references, recursively.
pub fn get_references(value: &Value) -> BTreeSet<String> {
    let mut references = BTreeSet::new();
    collect_references(value, &mut references);
    references
}

fn collect_references(value: &Value, references: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(target)) = map.get("Ref") {
                    references.insert(target.split('.').next().unwrap_or(target).to_string());
                    return;
                }
                if let Some(target) = map.get("Fn::GetAtt") {
                    match target {
                        Value::String(s) => {
                            references.insert(s.split('.').next().unwrap_or(s).to_string());
                        }
                        Value::Array(parts) => {
                            if let Some(Value::String(name)) = parts.first() {
                                references.insert(name.clone());
                            }
                        }
                        _ => {}
                    }
                    return;
                }
            }
            for nested in map.values() {
                collect_references(nested, references);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, references);
            }
        }
        _ => {}
    }
}

/// The byte representation of a value for hashing: strings hash as their
/// raw bytes, everything else as canonical JSON.
pub fn hash_key(value: &Value) -> Vec<u8> {
    match value.as_str() {
        Some(s) => s.as_bytes().to_vec(),
        None => canonical_json(value).into_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_reference() {
        assert!(is_reference(&json!({"Ref": "Foo"})));
        assert!(is_reference(&json!({"Fn::GetAtt": ["Foo", "Arn"]})));
        assert!(!is_reference(&json!({"Ref": "Foo", "Other": 1})));
        assert!(!is_reference(&json!("Foo")));
    }

    #[test]
    fn test_get_references_ref_and_getatt() {
        assert_eq!(
            get_references(&json!({"Ref": "PermSetA"})),
            BTreeSet::from(["PermSetA".to_string()])
        );
        assert_eq!(
            get_references(&json!({"Fn::GetAtt": "PermSetA.PermissionSetArn"})),
            BTreeSet::from(["PermSetA".to_string()])
        );
        assert_eq!(
            get_references(&json!({"Fn::GetAtt": ["PermSetA", "PermissionSetArn"]})),
            BTreeSet::from(["PermSetA".to_string()])
        );
    }

    #[test]
    fn test_get_references_recurses() {
        let value = json!({
            "a": [{"Ref": "One"}, "literal"],
            "b": {"nested": {"Fn::GetAtt": ["Two", "Arn"]}}
        });
        assert_eq!(
            get_references(&value),
            BTreeSet::from(["One".to_string(), "Two".to_string()])
        );
    }

    #[test]
    fn test_hash_key_strings_are_raw() {
        assert_eq!(hash_key(&json!("abc")), b"abc".to_vec());
        // Objects hash canonically, so key order is irrelevant
        assert_eq!(
            hash_key(&json!({"b": 1, "a": 2})),
            hash_key(&json!({"a": 2, "b": 1}))
        );
    }
}
