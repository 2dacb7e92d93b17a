//! Deterministic JSON canonicalization
//!
//! Canonical form: object keys sorted ascending byte-wise, arrays preserved,
//! strings/booleans/null passed through, numbers finite with `-0`
//! normalized to `0` and integral floats written without a fraction. The
//! canonical byte string is the signing and hashing input for every domain
//! artifact, so two implementations must agree byte-for-byte.

use crate::{CryptoError, CryptoResult};
use serde_json::{Map, Number, Value};

/// Largest integer exactly representable in a JSON float
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Return the canonical form of a value: maps rebuilt with sorted keys,
/// numbers normalized. Rejects non-finite numbers.
pub fn canonicalize(value: &Value) -> CryptoResult<Value> {
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => Ok(value.clone()),
        Value::Number(n) => canonical_number(n).map(Value::Number),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(canonicalize(item)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            let mut out = Map::with_capacity(map.len());
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key])?);
            }
            Ok(Value::Object(out))
        }
    }
}

/// Serialize a value into its canonical UTF-8 string
pub fn canonical_json_string(value: &Value) -> CryptoResult<String> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

/// Canonical bytes, the hashing and signing input
pub fn canonical_json_bytes(value: &Value) -> CryptoResult<Vec<u8>> {
    canonical_json_string(value).map(String::into_bytes)
}

fn write_canonical(value: &Value, out: &mut String) -> CryptoResult<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => {
            let normalized = canonical_number(n)?;
            out.push_str(&normalized.to_string());
        }
        Value::String(s) => {
            // serde_json's escaping is deterministic
            out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(
                    &serde_json::to_string(key).expect("string serialization is infallible"),
                );
                out.push(':');
                write_canonical(&map[key], out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn canonical_number(n: &Number) -> CryptoResult<Number> {
    if n.is_i64() || n.is_u64() {
        return Ok(n.clone());
    }
    let f = n
        .as_f64()
        .ok_or_else(|| CryptoError::UnsupportedCanonicalValue(format!("number {n}")))?;
    if !f.is_finite() {
        return Err(CryptoError::UnsupportedCanonicalValue(format!(
            "non-finite number {f}"
        )));
    }
    if f == 0.0 {
        // normalizes -0
        return Ok(Number::from(0));
    }
    if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER {
        return Ok(Number::from(f as i64));
    }
    Number::from_f64(f)
        .ok_or_else(|| CryptoError::UnsupportedCanonicalValue(format!("number {f}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_byte_wise() {
        let v = json!({"b": 1, "a": 2, "B": 3});
        let s = canonical_json_string(&v).unwrap();
        assert_eq!(s, r#"{"B":3,"a":2,"b":1}"#);
    }

    #[test]
    fn nested_objects_are_sorted() {
        let v = json!({"outer": {"z": 1, "a": {"y": 2, "b": 3}}});
        let s = canonical_json_string(&v).unwrap();
        assert_eq!(s, r#"{"outer":{"a":{"b":3,"y":2},"z":1}}"#);
    }

    #[test]
    fn arrays_preserve_order() {
        let v = json!([3, 1, 2, {"b": 1, "a": 2}]);
        let s = canonical_json_string(&v).unwrap();
        assert_eq!(s, r#"[3,1,2,{"a":2,"b":1}]"#);
    }

    #[test]
    fn negative_zero_normalizes() {
        let v = json!(-0.0);
        let s = canonical_json_string(&v).unwrap();
        assert_eq!(s, "0");
    }

    #[test]
    fn integral_floats_write_as_integers() {
        let v = json!(1250.0);
        assert_eq!(canonical_json_string(&v).unwrap(), "1250");
    }

    #[test]
    fn fractional_floats_survive() {
        let v = json!(0.5);
        assert_eq!(canonical_json_string(&v).unwrap(), "0.5");
    }

    #[test]
    fn canonical_roundtrip_is_stable() {
        let v = json!({"b": [1, {"d": 4, "c": 3.0}], "a": "x"});
        let once = canonical_json_string(&v).unwrap();
        let reparsed: Value = serde_json::from_str(&once).unwrap();
        let twice = canonical_json_string(&reparsed).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn strings_escape_deterministically() {
        let v = json!({"k": "line\nbreak \"quoted\""});
        let s = canonical_json_string(&v).unwrap();
        assert_eq!(s, r#"{"k":"line\nbreak \"quoted\""}"#);
    }
}
