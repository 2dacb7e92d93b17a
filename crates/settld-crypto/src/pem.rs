//! PEM armor for ed25519 verifying keys
//!
//! Keys travel as SubjectPublicKeyInfo PEM (`-----BEGIN PUBLIC KEY-----`).
//! The DER body for ed25519 is a fixed 12-byte prefix followed by the raw
//! 32-byte key.

use crate::{CryptoError, CryptoResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

const PEM_HEADER: &str = "-----BEGIN PUBLIC KEY-----";
const PEM_FOOTER: &str = "-----END PUBLIC KEY-----";

/// ASN.1 SPKI prefix for an ed25519 public key (OID 1.3.101.112)
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Armor a raw 32-byte ed25519 verifying key as SPKI PEM
pub fn encode_public_key_pem(key: &[u8; 32]) -> String {
    let mut der = Vec::with_capacity(44);
    der.extend_from_slice(&ED25519_SPKI_PREFIX);
    der.extend_from_slice(key);
    let body = BASE64.encode(der);
    format!("{PEM_HEADER}\n{body}\n{PEM_FOOTER}\n")
}

/// Recover the raw 32-byte key from SPKI PEM armor
pub fn decode_public_key_pem(pem: &str) -> CryptoResult<[u8; 32]> {
    let body: String = pem
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-----"))
        .collect();
    let der = BASE64
        .decode(body.as_bytes())
        .map_err(|e| CryptoError::InvalidKeyFormat(format!("pem base64: {e}")))?;
    if der.len() != 44 || der[..12] != ED25519_SPKI_PREFIX {
        return Err(CryptoError::InvalidKeyFormat(
            "not an ed25519 SubjectPublicKeyInfo".to_string(),
        ));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&der[12..]);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pem_roundtrip() {
        let key = [7u8; 32];
        let pem = encode_public_key_pem(&key);
        assert!(pem.starts_with(PEM_HEADER));
        assert!(pem.trim_end().ends_with(PEM_FOOTER));
        assert_eq!(decode_public_key_pem(&pem).unwrap(), key);
    }

    #[test]
    fn garbage_pem_is_rejected() {
        assert!(decode_public_key_pem("not a key").is_err());
        let wrong = format!("{PEM_HEADER}\nAAAA\n{PEM_FOOTER}\n");
        assert!(decode_public_key_pem(&wrong).is_err());
    }
}
