//! Platform signer ring with active/previous rotation
//!
//! The ring is process-scoped. Rotation is copy-on-write: readers hold a
//! consistent snapshot while a rotation swaps in the new state. Tokens
//! minted under a previous key verify while that key remains published;
//! once evicted from the bounded history, verification fails closed.

use crate::{
    sign_digest, verify_digest, verifying_key_from_pem, CryptoError, CryptoResult, KeyPair,
};
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use settld_types::{KeysetKey, KeysetKeyStatus, KeysetStore, PublishedKeyset};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Default bound on the previous-key history
pub const DEFAULT_PREVIOUS_LIMIT: usize = 3;

#[derive(Clone)]
struct RingState {
    active_kid: String,
    active: KeyPair,
    previous: Vec<(String, VerifyingKey)>,
    previous_limit: usize,
    rotated_at: DateTime<Utc>,
}

/// The platform key ring
#[derive(Clone)]
pub struct SignerRing {
    state: Arc<RwLock<Arc<RingState>>>,
}

impl SignerRing {
    /// Create a ring with a fresh active key
    pub fn new(active: KeyPair) -> Self {
        Self::with_limit(active, DEFAULT_PREVIOUS_LIMIT)
    }

    pub fn with_limit(active: KeyPair, previous_limit: usize) -> Self {
        let state = RingState {
            active_kid: new_kid(),
            active,
            previous: Vec::new(),
            previous_limit,
            rotated_at: Utc::now(),
        };
        Self {
            state: Arc::new(RwLock::new(Arc::new(state))),
        }
    }

    /// Kid of the active key
    pub fn active_kid(&self) -> String {
        self.snapshot().active_kid.clone()
    }

    /// Sign a raw digest with the active key; returns (kid, signature hex)
    pub fn sign(&self, digest: &[u8; 32]) -> (String, String) {
        let state = self.snapshot();
        (state.active_kid.clone(), sign_digest(&state.active, digest))
    }

    /// Verify a signature under a specific kid. Evicted kids fail closed.
    pub fn verify(&self, kid: &str, digest: &[u8; 32], signature_hex: &str) -> CryptoResult<bool> {
        let state = self.snapshot();
        if kid == state.active_kid {
            return verify_digest(state.active.verifying_key(), digest, signature_hex);
        }
        for (prev_kid, key) in &state.previous {
            if prev_kid == kid {
                return verify_digest(key, digest, signature_hex);
            }
        }
        Err(CryptoError::VerificationFailed(format!(
            "kid {kid} is not published"
        )))
    }

    /// Rotate to a new active key. The old active becomes `previous`; the
    /// history is truncated to the configured bound.
    pub fn rotate(&self, next: KeyPair) -> KeysetStore {
        let mut guard = self.state.write().expect("signer ring lock poisoned");
        let old = guard.as_ref();
        let mut previous = Vec::with_capacity(old.previous.len() + 1);
        previous.push((old.active_kid.clone(), *old.active.verifying_key()));
        previous.extend(old.previous.iter().cloned());
        previous.truncate(old.previous_limit);
        let state = RingState {
            active_kid: new_kid(),
            active: next,
            previous,
            previous_limit: old.previous_limit,
            rotated_at: Utc::now(),
        };
        *guard = Arc::new(state);
        drop(guard);
        self.to_store()
    }

    /// The document served at the well-known keys endpoint
    pub fn published(&self) -> PublishedKeyset {
        let state = self.snapshot();
        let mut keys = Vec::with_capacity(1 + state.previous.len());
        keys.push(KeysetKey {
            kid: state.active_kid.clone(),
            public_key_pem: state.active.public_key_pem(),
            algorithm: "ed25519".into(),
            status: KeysetKeyStatus::Active,
        });
        for (kid, key) in &state.previous {
            keys.push(KeysetKey {
                kid: kid.clone(),
                public_key_pem: crate::encode_public_key_pem(key.as_bytes()),
                algorithm: "ed25519".into(),
                status: KeysetKeyStatus::Previous,
            });
        }
        PublishedKeyset {
            schema_version: PublishedKeyset::SCHEMA_VERSION.into(),
            keys,
        }
    }

    /// Persisted form (public material only)
    pub fn to_store(&self) -> KeysetStore {
        let state = self.snapshot();
        KeysetStore {
            schema_version: KeysetStore::SCHEMA_VERSION.into(),
            active: KeysetKey {
                kid: state.active_kid.clone(),
                public_key_pem: state.active.public_key_pem(),
                algorithm: "ed25519".into(),
                status: KeysetKeyStatus::Active,
            },
            previous: state
                .previous
                .iter()
                .map(|(kid, key)| KeysetKey {
                    kid: kid.clone(),
                    public_key_pem: crate::encode_public_key_pem(key.as_bytes()),
                    algorithm: "ed25519".into(),
                    status: KeysetKeyStatus::Previous,
                })
                .collect(),
            rotated_at: state.rotated_at,
        }
    }

    /// Rebuild the previous-key history from a persisted keyset. The active
    /// signing key itself must come from the seed; only public history is
    /// restored.
    pub fn restore_previous(&self, stored: &KeysetStore) -> CryptoResult<()> {
        let mut previous = Vec::with_capacity(stored.previous.len());
        for entry in &stored.previous {
            previous.push((entry.kid.clone(), verifying_key_from_pem(&entry.public_key_pem)?));
        }
        let mut guard = self.state.write().expect("signer ring lock poisoned");
        let old = guard.as_ref();
        previous.truncate(old.previous_limit);
        *guard = Arc::new(RingState {
            active_kid: old.active_kid.clone(),
            active: old.active.clone(),
            previous,
            previous_limit: old.previous_limit,
            rotated_at: stored.rotated_at,
        });
        Ok(())
    }

    fn snapshot(&self) -> Arc<RingState> {
        self.state.read().expect("signer ring lock poisoned").clone()
    }
}

fn new_kid() -> String {
    format!("kid_{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sha256;

    #[test]
    fn active_key_signs_and_verifies() {
        let ring = SignerRing::new(KeyPair::generate());
        let digest = sha256(b"token");
        let (kid, sig) = ring.sign(&digest);
        assert!(ring.verify(&kid, &digest, &sig).unwrap());
    }

    #[test]
    fn previous_key_verifies_until_evicted() {
        let ring = SignerRing::with_limit(KeyPair::generate(), 1);
        let digest = sha256(b"token");
        let (old_kid, sig) = ring.sign(&digest);

        // first rotation keeps the old key published
        ring.rotate(KeyPair::generate());
        assert!(ring.verify(&old_kid, &digest, &sig).unwrap());
        let published = ring.published();
        assert_eq!(published.keys.len(), 2);
        assert_eq!(published.keys[1].status, KeysetKeyStatus::Previous);

        // second rotation evicts it (limit 1); verification fails closed
        ring.rotate(KeyPair::generate());
        assert!(ring.verify(&old_kid, &digest, &sig).is_err());
    }

    #[test]
    fn rotation_bounds_history() {
        let ring = SignerRing::with_limit(KeyPair::generate(), 3);
        for _ in 0..5 {
            ring.rotate(KeyPair::generate());
        }
        let stored = ring.to_store();
        assert_eq!(stored.previous.len(), 3);
        assert_eq!(stored.active.status, KeysetKeyStatus::Active);
    }

    #[test]
    fn restore_rebuilds_public_history() {
        let seed_pair = KeyPair::from_seed("ring-seed");
        let ring = SignerRing::new(seed_pair.clone());
        ring.rotate(KeyPair::generate());
        let stored = ring.to_store();

        let rebuilt = SignerRing::new(KeyPair::from_seed("ring-seed"));
        rebuilt.restore_previous(&stored).unwrap();
        assert_eq!(rebuilt.published().keys.len(), stored.previous.len() + 1);
    }
}
