//! Receiver-side webhook signature verification
//!
//! Framework-free so receivers can call it from any HTTP stack: the caller
//! hands over a header lookup and the raw body bytes. Parsed-object input
//! is rejected; the signature only ever covers the exact bytes on the
//! wire.

use crate::{sign_body, strip_version_prefix, BRAND, BRAND_ALIAS};
use chrono::{DateTime, Utc};
use serde_json::Value;
use settld_crypto::hash_artifact;
use settld_types::{Result, SettldError};
use subtle::ConstantTimeEq;

/// Default timestamp tolerance in seconds
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Extracted signature headers, brand-alias aware
#[derive(Debug, Clone, Default)]
pub struct SignatureHeaders {
    pub signature: Option<String>,
    pub timestamp: Option<String>,
}

impl SignatureHeaders {
    /// Pull the branded headers out of any header map. The alias brand is
    /// accepted wherever the primary is.
    pub fn from_lookup<'a, F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let get = |suffix: &str| {
            lookup(&format!("x-{BRAND}-{suffix}"))
                .or_else(|| lookup(&format!("x-{BRAND_ALIAS}-{suffix}")))
                .map(str::to_string)
        };
        Self {
            signature: get("signature"),
            timestamp: get("timestamp"),
        }
    }
}

/// Receiver-side verifier
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    tolerance_secs: i64,
}

impl Default for WebhookVerifier {
    fn default() -> Self {
        Self {
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }
}

impl WebhookVerifier {
    pub fn new(tolerance_secs: i64) -> Self {
        Self { tolerance_secs }
    }

    /// Verify a delivery. `raw_body` must be the exact wire bytes; passing
    /// `None` (a parsed object upstream) is rejected outright.
    pub fn verify(
        &self,
        headers: &SignatureHeaders,
        raw_body: Option<&[u8]>,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(body) = raw_body else {
            return Err(SettldError::WebhookRawBodyRequired);
        };
        let (Some(signature), Some(timestamp)) =
            (headers.signature.as_deref(), headers.timestamp.as_deref())
        else {
            return Err(SettldError::WebhookSignatureHeaderInvalid);
        };
        if signature.trim().is_empty() || timestamp.trim().is_empty() {
            return Err(SettldError::WebhookSignatureHeaderInvalid);
        }

        let ts: DateTime<Utc> = timestamp
            .parse()
            .map_err(|_| SettldError::WebhookSignatureHeaderInvalid)?;
        if (now - ts).num_seconds().abs() > self.tolerance_secs {
            return Err(SettldError::WebhookTimestampTolerance {
                tolerance_secs: self.tolerance_secs,
            });
        }

        let expected = sign_body(secret, timestamp, body);
        let matched = signature
            .split(',')
            .map(str::trim)
            .map(strip_version_prefix)
            .any(|candidate| {
                bool::from(expected.as_bytes().ct_eq(candidate.as_bytes()))
            });
        if !matched {
            return Err(SettldError::WebhookSignatureNoMatch);
        }
        Ok(())
    }
}

/// Receiver-side artifact recheck: recompute the hash-over-omit-field
/// binding of a delivered artifact against its stored hash. A mismatch is
/// a tamper signal (422); the receiver must neither store nor ACK it.
pub fn verify_artifact_hash(
    artifact: &Value,
    artifact_type: &str,
    hash_field: &str,
) -> Result<()> {
    let stored = artifact
        .get(hash_field)
        .and_then(Value::as_str)
        .ok_or_else(|| SettldError::validation(
            "VALIDATION_ARTIFACT_HASH_REQUIRED",
            format!("{hash_field} is required on {artifact_type}"),
        ))?
        .to_string();
    let recomputed = hash_artifact(artifact, hash_field)?;
    if recomputed != stored {
        return Err(SettldError::ArtifactHashMismatch {
            artifact_type: artifact_type.to_string(),
            expected: stored,
            actual: recomputed,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature_header;

    fn signed(secret: &str, at: DateTime<Utc>, body: &[u8]) -> SignatureHeaders {
        let timestamp = at.to_rfc3339();
        SignatureHeaders {
            signature: Some(signature_header(secret, &timestamp, body)),
            timestamp: Some(timestamp),
        }
    }

    #[test]
    fn valid_signature_verifies() {
        let now = Utc::now();
        let headers = signed("secret", now, b"{\"ok\":true}");
        WebhookVerifier::default()
            .verify(&headers, Some(b"{\"ok\":true}"), "secret", now)
            .unwrap();
    }

    #[test]
    fn missing_headers_are_400() {
        let err = WebhookVerifier::default()
            .verify(&SignatureHeaders::default(), Some(b"{}"), "secret", Utc::now())
            .unwrap_err();
        assert_eq!(err.code(), "WEBHOOK_SIGNATURE_HEADER_INVALID");
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn parsed_body_is_rejected() {
        let now = Utc::now();
        let headers = signed("secret", now, b"{}");
        let err = WebhookVerifier::default()
            .verify(&headers, None, "secret", now)
            .unwrap_err();
        assert_eq!(err.code(), "WEBHOOK_RAW_BODY_REQUIRED");
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let sent = Utc::now() - chrono::Duration::seconds(600);
        let headers = signed("secret", sent, b"{}");
        let err = WebhookVerifier::default()
            .verify(&headers, Some(b"{}"), "secret", Utc::now())
            .unwrap_err();
        assert_eq!(err.code(), "WEBHOOK_TIMESTAMP_TOLERANCE");
    }

    #[test]
    fn tampered_body_is_401() {
        let now = Utc::now();
        let headers = signed("secret", now, b"{\"amount\":100}");
        let err = WebhookVerifier::default()
            .verify(&headers, Some(b"{\"amount\":999}"), "secret", now)
            .unwrap_err();
        assert_eq!(err.code(), "WEBHOOK_SIGNATURE_NO_MATCH");
        assert_eq!(err.http_status(), 401);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let now = Utc::now();
        let headers = signed("secret", now, b"{}");
        let err = WebhookVerifier::default()
            .verify(&headers, Some(b"{}"), "other", now)
            .unwrap_err();
        assert_eq!(err.code(), "WEBHOOK_SIGNATURE_NO_MATCH");
    }

    #[test]
    fn any_matching_candidate_in_a_list_passes() {
        let now = Utc::now();
        let timestamp = now.to_rfc3339();
        let good = signature_header("secret", &timestamp, b"{}");
        let headers = SignatureHeaders {
            signature: Some(format!("v1=badbadbad, {good}")),
            timestamp: Some(timestamp),
        };
        WebhookVerifier::default()
            .verify(&headers, Some(b"{}"), "secret", now)
            .unwrap();
    }

    #[test]
    fn artifact_hash_recheck_catches_tampering() {
        let mut artifact = serde_json::json!({
            "schemaVersion": "CompletionReceipt.v1",
            "summary": "done",
            "outputRefs": ["s3://bucket/out"],
        });
        let hash = settld_crypto::hash_artifact(&artifact, "receiptHash").unwrap();
        artifact["receiptHash"] = serde_json::json!(hash);

        verify_artifact_hash(&artifact, "CompletionReceipt", "receiptHash").unwrap();

        // mutate the payload: the recheck fails closed with a 422
        artifact["summary"] = serde_json::json!("tampered");
        let err = verify_artifact_hash(&artifact, "CompletionReceipt", "receiptHash").unwrap_err();
        assert_eq!(err.code(), "ARTIFACT_HASH_MISMATCH");
        assert_eq!(err.http_status(), 422);
    }

    #[test]
    fn alias_brand_headers_are_accepted() {
        let now = Utc::now();
        let timestamp = now.to_rfc3339();
        let sig = signature_header("secret", &timestamp, b"{}");
        let headers = SignatureHeaders::from_lookup(|name| match name {
            "x-nooterra-signature" => Some(sig.as_str()),
            "x-nooterra-timestamp" => Some(timestamp.as_str()),
            _ => None,
        });
        WebhookVerifier::default()
            .verify(&headers, Some(b"{}"), "secret", now)
            .unwrap();
    }
}
