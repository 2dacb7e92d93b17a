//! Webhook body signing
//!
//! `signature = HMAC_SHA256(secret, timestamp + "." + bodyBytes)`, carried
//! hex-encoded with a `v1=` version prefix. Both the delivery worker and
//! the receiver-side verifier go through these helpers so the two sides
//! cannot drift.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the webhook signature over `timestamp + "." + body`
pub fn sign_body(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// The signature header value for outgoing deliveries
pub fn signature_header(secret: &str, timestamp: &str, body: &[u8]) -> String {
    format!("v1={}", sign_body(secret, timestamp, body))
}

/// Strip an optional `v1=` style version prefix from a candidate
pub fn strip_version_prefix(candidate: &str) -> &str {
    match candidate.split_once('=') {
        Some((version, rest)) if version.len() <= 4 && !version.contains(',') => rest,
        _ => candidate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_is_deterministic() {
        let a = sign_body("secret", "2026-01-01T00:00:00Z", b"{}");
        let b = sign_body("secret", "2026-01-01T00:00:00Z", b"{}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn timestamp_is_bound_into_the_signature() {
        let a = sign_body("secret", "2026-01-01T00:00:00Z", b"{}");
        let b = sign_body("secret", "2026-01-01T00:00:01Z", b"{}");
        assert_ne!(a, b);
    }

    #[test]
    fn version_prefix_strips() {
        assert_eq!(strip_version_prefix("v1=abc"), "abc");
        assert_eq!(strip_version_prefix("abc"), "abc");
    }
}
