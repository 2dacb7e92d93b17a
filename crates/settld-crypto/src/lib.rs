//! Settld Crypto - Canonical serialization and signing primitives
//!
//! This crate provides:
//! - Deterministic JSON canonicalization (sorted keys, finite numbers)
//! - SHA-256 fingerprinting and the hash-over-omit-field artifact rule
//! - Ed25519 signing over raw SHA-256 digest bytes
//! - PEM armor for ed25519 verifying keys
//! - The platform keyset ring with active/previous rotation
//!
//! # Security Invariant
//!
//! Signing keys never leave this crate's `KeyPair`; everything persisted or
//! published is public-key material only.

pub mod canonical;
pub mod hash;
pub mod keys;
pub mod pem;
pub mod signature;
pub mod keyring;

pub use canonical::*;
pub use hash::*;
pub use keys::*;
pub use pem::*;
pub use signature::*;
pub use keyring::*;

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unsupported canonical value: {0}")]
    UnsupportedCanonicalValue(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("invalid signature format: {0}")]
    InvalidSignatureFormat(String),

    #[error("artifact is not a JSON object")]
    ArtifactNotAnObject,
}

impl From<CryptoError> for settld_types::SettldError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::UnsupportedCanonicalValue(message) => {
                settld_types::SettldError::UnsupportedCanonicalValue { message }
            }
            other => settld_types::SettldError::internal(other.to_string()),
        }
    }
}

pub type CryptoResult<T> = Result<T, CryptoError>;
