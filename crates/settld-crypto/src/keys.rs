//! Ed25519 key pairs

use crate::{decode_public_key_pem, encode_public_key_pem, CryptoError, CryptoResult};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;

/// A key pair for signing operations
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Create from existing signing key bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Derive deterministically from a seed string (hashed to 32 bytes)
    pub fn from_seed(seed: &str) -> Self {
        Self::from_bytes(&crate::sha256(seed.as_bytes()))
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Public key as SPKI PEM armor
    pub fn public_key_pem(&self) -> String {
        encode_public_key_pem(self.verifying_key.as_bytes())
    }

    /// Signing key bytes, for secure storage only
    pub fn signing_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print private material
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(self.verifying_key.as_bytes()))
            .finish()
    }
}

/// Parse a verifying key out of PEM armor
pub fn verifying_key_from_pem(pem: &str) -> CryptoResult<VerifyingKey> {
    let bytes = decode_public_key_pem(pem)?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_pem_roundtrip() {
        let kp = KeyPair::generate();
        let pem = kp.public_key_pem();
        let vk = verifying_key_from_pem(&pem).unwrap();
        assert_eq!(kp.verifying_key(), &vk);
    }

    #[test]
    fn seeded_keypair_is_deterministic() {
        let a = KeyPair::from_seed("settld-test-seed");
        let b = KeyPair::from_seed("settld-test-seed");
        assert_eq!(a.public_key_pem(), b.public_key_pem());
    }

    #[test]
    fn debug_never_prints_private_material() {
        let kp = KeyPair::generate();
        let private_hex = hex::encode(kp.signing_key_bytes());
        let debug = format!("{kp:?}");
        assert!(!debug.contains(&private_hex));
    }
}
