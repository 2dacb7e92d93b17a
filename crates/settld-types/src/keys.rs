//! Signer keys, API keys and the published keyset

use crate::{AgentId, KeyId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an agent signer key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerKeyStatus {
    Active,
    Revoked,
    Rotated,
}

/// A signer key registered for an agent, checked by the authority verifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerKey {
    pub key_id: KeyId,
    pub tenant_id: TenantId,
    pub agent_id: AgentId,
    pub public_key_pem: String,
    pub status: SignerKeyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Publication status of a platform keyset entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeysetKeyStatus {
    Active,
    Previous,
}

/// One entry of the published keyset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeysetKey {
    pub kid: String,
    pub public_key_pem: String,
    pub algorithm: String,
    pub status: KeysetKeyStatus,
}

/// The document served at `/.well-known/settld-keys.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedKeyset {
    pub schema_version: String,
    pub keys: Vec<KeysetKey>,
}

impl PublishedKeyset {
    pub const SCHEMA_VERSION: &'static str = "Keyset.v1";
}

/// Persisted form of the platform key ring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeysetStore {
    pub schema_version: String,
    pub active: KeysetKey,
    pub previous: Vec<KeysetKey>,
    pub rotated_at: DateTime<Utc>,
}

impl KeysetStore {
    pub const SCHEMA_VERSION: &'static str = "KeysetStore.v1";
}

/// An API key credential for the HTTP surface
///
/// The secret is stored hashed; `Authorization: Bearer <keyId>.<secret>`
/// is checked against `secret_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub key_id: KeyId,
    pub tenant_id: TenantId,
    pub label: String,
    /// SHA-256 hex of the secret
    pub secret_hash: String,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub revoked: bool,
}
