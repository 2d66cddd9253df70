//! Canonical JSON normalization and digest computation.
//!
//! Object keys are ordered by UTF-16 code units, integer-valued floats are
//! written as integers and non-finite numbers are rejected. Two values with
//! the same canonical form are structurally equal regardless of key order.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{PostureError, Result};

fn sort_keys_utf16(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), sort_keys_utf16(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys_utf16).collect()),
        other => other.clone(),
    }
}

fn normalize_value(value: &Value) -> Result<Value> {
    match value {
        Value::Object(map) => {
            let mut normalized = serde_json::Map::new();
            for (k, v) in map {
                normalized.insert(k.clone(), normalize_value(v)?);
            }
            Ok(Value::Object(normalized))
        }
        Value::Array(arr) => Ok(Value::Array(
            arr.iter().map(normalize_value).collect::<Result<Vec<_>>>()?,
        )),
        Value::Number(n) if n.is_f64() => {
            let f = n.as_f64().unwrap_or(f64::NAN);
            if !f.is_finite() {
                return Err(PostureError::Canonicalization(
                    "NaN/Infinity not permitted in canonical JSON".to_string(),
                ));
            }
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                Ok(Value::Number(serde_json::Number::from(f as i64)))
            } else {
                Ok(Value::Number(n.clone()))
            }
        }
        other => Ok(other.clone()),
    }
}

/// Canonical value tree: normalized numbers, sorted keys.
pub fn canonical_value(value: &Value) -> Result<Value> {
    Ok(sort_keys_utf16(&normalize_value(value)?))
}

/// Compact canonical JSON text.
pub fn canonical_json(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(&canonical_value(value)?)?)
}

/// SHA-256 hex digest of the canonical JSON text.
pub fn compute_digest(value: &Value) -> Result<String> {
    let canonical = canonical_json(value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// RFC 6901 JSON pointer of the first structural difference between two
/// canonical trees, or `None` when they are equal.
///
/// Object keys are visited in sorted order and array elements by index, so
/// the reported pointer is stable for a given pair of values.
pub fn first_difference(a: &Value, b: &Value) -> Option<String> {
    fn escape(token: &str) -> String {
        token.replace('~', "~0").replace('/', "~1")
    }

    fn walk(a: &Value, b: &Value, path: &mut String) -> bool {
        match (a, b) {
            (Value::Object(ma), Value::Object(mb)) => {
                let mut keys: Vec<&String> = ma.keys().chain(mb.keys()).collect();
                keys.sort();
                keys.dedup();
                for key in keys {
                    let len = path.len();
                    path.push('/');
                    path.push_str(&escape(key));
                    match (ma.get(key.as_str()), mb.get(key.as_str())) {
                        (Some(va), Some(vb)) => {
                            if walk(va, vb, path) {
                                return true;
                            }
                        }
                        _ => return true,
                    }
                    path.truncate(len);
                }
                false
            }
            (Value::Array(xa), Value::Array(xb)) => {
                for i in 0..xa.len().max(xb.len()) {
                    let len = path.len();
                    path.push('/');
                    path.push_str(&i.to_string());
                    match (xa.get(i), xb.get(i)) {
                        (Some(va), Some(vb)) => {
                            if walk(va, vb, path) {
                                return true;
                            }
                        }
                        _ => return true,
                    }
                    path.truncate(len);
                }
                false
            }
            _ => a != b,
        }
    }

    let mut path = String::new();
    if walk(a, b, &mut path) {
        Some(path)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_field_order_invariant() {
        let a = json!({"a": 1, "b": {"y": 2, "x": 3}});
        let b = json!({"b": {"x": 3, "y": 2}, "a": 1});
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }

    #[test]
    fn canonical_json_integer_valued_float() {
        let input = json!({"value": 9.0});
        assert_eq!(canonical_json(&input).unwrap(), r#"{"value":9}"#);
    }

    #[test]
    fn canonical_json_array_order_preserved() {
        let a = json!([3, 1, 2]);
        let b = json!([1, 2, 3]);
        assert_ne!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }

    #[test]
    fn digest_is_64_hex_chars_and_stable() {
        let input = json!({"pack": "alz/v1.0", "controls": 18});
        let d1 = compute_digest(&input).unwrap();
        let d2 = compute_digest(&input).unwrap();
        assert_eq!(d1.len(), 64);
        assert!(d1.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(d1, d2);
    }

    #[test]
    fn first_difference_finds_nested_pointer() {
        let a = json!({"section_scores": [{"score": 40.0, "area": "security"}]});
        let b = json!({"section_scores": [{"score": 100.0, "area": "security"}]});
        assert_eq!(
            first_difference(&a, &b).as_deref(),
            Some("/section_scores/0/score")
        );
    }

    #[test]
    fn first_difference_reports_missing_key() {
        let a = json!({"composite": 9.0, "coverage": 1.0});
        let b = json!({"composite": 9.0});
        assert_eq!(first_difference(&a, &b).as_deref(), Some("/coverage"));
    }

    #[test]
    fn first_difference_escapes_pointer_tokens() {
        let a = json!({"a/b": 1});
        let b = json!({"a/b": 2});
        assert_eq!(first_difference(&a, &b).as_deref(), Some("/a~1b"));
    }

    #[test]
    fn first_difference_equal_values() {
        let v = json!({"x": [1, {"y": null}]});
        assert_eq!(first_difference(&v, &v.clone()), None);
    }

    #[test]
    fn first_difference_type_change_at_root() {
        assert_eq!(first_difference(&json!(1), &json!("1")).as_deref(), Some(""));
    }
}
