//! SHA-256 fingerprinting over canonical JSON

use crate::{canonical_json_bytes, CryptoError, CryptoResult};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compute SHA-256 of raw bytes
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 as lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Hash the canonical form of a JSON value
pub fn hash_canonical(value: &Value) -> CryptoResult<String> {
    Ok(sha256_hex(&canonical_json_bytes(value)?))
}

/// Hash any serializable value through its canonical JSON form
pub fn hash_serializable<T: Serialize>(value: &T) -> CryptoResult<String> {
    let v = serde_json::to_value(value)
        .map_err(|e| CryptoError::UnsupportedCanonicalValue(e.to_string()))?;
    hash_canonical(&v)
}

/// The hash-over-omit-field rule: hash the canonical form of the object
/// with `hash_field` removed. Every signed artifact stores its own hash
/// under that field.
pub fn hash_artifact(value: &Value, hash_field: &str) -> CryptoResult<String> {
    let Value::Object(map) = value else {
        return Err(CryptoError::ArtifactNotAnObject);
    };
    let mut core = map.clone();
    core.remove(hash_field);
    hash_canonical(&Value::Object(core))
}

/// Hash a serializable artifact with its hash field omitted
pub fn hash_artifact_of<T: Serialize>(artifact: &T, hash_field: &str) -> CryptoResult<String> {
    let v = serde_json::to_value(artifact)
        .map_err(|e| CryptoError::UnsupportedCanonicalValue(e.to_string()))?;
    hash_artifact(&v, hash_field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_lowercase_hex() {
        let h = sha256_hex(b"settld");
        assert_eq!(h.len(), 64);
        assert_eq!(h, h.to_lowercase());
    }

    #[test]
    fn key_order_does_not_change_the_hash() {
        let a = json!({"x": 1, "y": [true, null]});
        let b = json!({"y": [true, null], "x": 1});
        assert_eq!(hash_canonical(&a).unwrap(), hash_canonical(&b).unwrap());
    }

    #[test]
    fn canonical_roundtrip_hash_is_stable() {
        let o = json!({"b": 2, "a": {"nested": [1, 2.0, "three"]}});
        let canon = crate::canonical_json_string(&o).unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&canon).unwrap();
        assert_eq!(hash_canonical(&o).unwrap(), hash_canonical(&reparsed).unwrap());
    }

    #[test]
    fn artifact_hash_omits_the_hash_field() {
        let without = json!({"amount": 100, "currency": "USD"});
        let with = json!({
            "amount": 100,
            "currency": "USD",
            "agreementHash": "deadbeef",
        });
        assert_eq!(
            hash_artifact(&with, "agreementHash").unwrap(),
            hash_canonical(&without).unwrap()
        );
    }

    #[test]
    fn non_object_artifacts_are_rejected() {
        assert!(hash_artifact(&json!([1, 2]), "h").is_err());
    }
}
