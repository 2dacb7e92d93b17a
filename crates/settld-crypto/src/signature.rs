//! Ed25519 signing over raw SHA-256 digest bytes
//!
//! The message input to sign/verify is always the 32-byte digest, never the
//! original document. Domain code carries digests as lowercase hex, so the
//! helpers here decode hex before touching the curve.

use crate::{CryptoError, CryptoResult, KeyPair};
use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};

/// Sign a raw 32-byte digest; returns the signature as hex
pub fn sign_digest(keypair: &KeyPair, digest: &[u8; 32]) -> String {
    let sig = keypair.signing_key().sign(digest);
    hex::encode(sig.to_bytes())
}

/// Sign a digest carried as lowercase hex (e.g. a chain hash)
pub fn sign_hash_hex(keypair: &KeyPair, hash_hex: &str) -> CryptoResult<String> {
    let digest = decode_digest(hash_hex)?;
    Ok(sign_digest(keypair, &digest))
}

/// Verify a hex signature over a raw digest
pub fn verify_digest(
    key: &VerifyingKey,
    digest: &[u8; 32],
    signature_hex: &str,
) -> CryptoResult<bool> {
    let sig_bytes = hex::decode(signature_hex)
        .map_err(|e| CryptoError::InvalidSignatureFormat(e.to_string()))?;
    let sig_array: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidSignatureFormat("signature must be 64 bytes".into()))?;
    let sig = Signature::from_bytes(&sig_array);
    Ok(key.verify(digest, &sig).is_ok())
}

/// Verify a hex signature over a hex-carried digest
pub fn verify_hash_hex(
    key: &VerifyingKey,
    hash_hex: &str,
    signature_hex: &str,
) -> CryptoResult<bool> {
    let digest = decode_digest(hash_hex)?;
    verify_digest(key, &digest, signature_hex)
}

fn decode_digest(hash_hex: &str) -> CryptoResult<[u8; 32]> {
    let bytes =
        hex::decode(hash_hex).map_err(|e| CryptoError::InvalidSignatureFormat(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidSignatureFormat("digest must be 32 bytes".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sha256_hex;

    #[test]
    fn sign_and_verify_roundtrip() {
        let kp = KeyPair::generate();
        let hash = sha256_hex(b"payload");
        let sig = sign_hash_hex(&kp, &hash).unwrap();
        assert!(verify_hash_hex(kp.verifying_key(), &hash, &sig).unwrap());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let kp = KeyPair::generate();
        let other = KeyPair::generate();
        let hash = sha256_hex(b"payload");
        let sig = sign_hash_hex(&kp, &hash).unwrap();
        assert!(!verify_hash_hex(other.verifying_key(), &hash, &sig).unwrap());
    }

    #[test]
    fn tampered_digest_fails_verification() {
        let kp = KeyPair::generate();
        let sig = sign_hash_hex(&kp, &sha256_hex(b"original")).unwrap();
        assert!(!verify_hash_hex(kp.verifying_key(), &sha256_hex(b"tampered"), &sig).unwrap());
    }

    #[test]
    fn malformed_signature_is_an_error() {
        let kp = KeyPair::generate();
        let hash = sha256_hex(b"payload");
        assert!(verify_hash_hex(kp.verifying_key(), &hash, "zz").is_err());
    }
}
