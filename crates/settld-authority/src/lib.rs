//! Settld Authority - grant DAG verification
//!
//! Given a leaf grant (authority or delegation) and an operation
//! descriptor, the verifier resolves the chain back to its root authority
//! grant and checks, at every link: schema, validity window, revocation,
//! scope subsets, spend envelope ceilings, the delegation depth rule, the
//! grantee's signer key lifecycle and the grantee agent's lifecycle.
//!
//! Each failure maps to a distinct stable error code so callers can act on
//! the exact rejection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use settld_types::{
    AgentId, AgentIdentity, AgentLifecycle, AuthorityCode, Grant, SettldError, SignerKey,
    SignerKeyReason, SignerKeyStatus, TenantId,
};

mod verify;
pub use verify::*;

/// Role the grantee plays in the requested operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationRole {
    Grantor,
    Grantee,
    Payer,
    Payee,
}

impl OperationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grantor => "grantor",
            Self::Grantee => "grantee",
            Self::Payer => "payer",
            Self::Payee => "payee",
        }
    }
}

/// What the caller is trying to do under the leaf grant
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    pub role: OperationRole,
    pub operation: String,
    pub tool_id: Option<String>,
    pub provider_id: Option<String>,
    pub risk_class: Option<String>,
    pub side_effecting: bool,
    pub amount_cents: Option<i64>,
}

impl OperationDescriptor {
    /// A non-side-effecting read under the grant
    pub fn read(operation: impl Into<String>) -> Self {
        Self {
            role: OperationRole::Grantee,
            operation: operation.into(),
            tool_id: None,
            provider_id: None,
            risk_class: None,
            side_effecting: false,
            amount_cents: None,
        }
    }

    /// A side-effecting spend under the grant
    pub fn spend(operation: impl Into<String>, amount_cents: i64) -> Self {
        Self {
            role: OperationRole::Payer,
            operation: operation.into(),
            tool_id: None,
            provider_id: None,
            risk_class: None,
            side_effecting: true,
            amount_cents: Some(amount_cents),
        }
    }
}

/// Resolver failure distinct from "not found"
#[derive(Debug)]
pub struct DirectoryError(pub String);

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "directory unavailable: {}", self.0)
    }
}

impl std::error::Error for DirectoryError {}

/// Lookup seam the verifier walks the DAG through. The store is the
/// authoritative implementation; tests use in-memory maps.
#[async_trait]
pub trait AuthorityDirectory: Send + Sync {
    /// All grants carrying this hash. More than one is an ambiguity the
    /// verifier rejects.
    async fn grants_by_hash(
        &self,
        tenant: &TenantId,
        grant_hash: &str,
    ) -> Result<Vec<Grant>, DirectoryError>;

    async fn agent(
        &self,
        tenant: &TenantId,
        agent_id: &AgentId,
    ) -> Result<Option<AgentIdentity>, DirectoryError>;

    /// The grantee's current signer key, if any is registered
    async fn signer_key(
        &self,
        tenant: &TenantId,
        agent_id: &AgentId,
    ) -> Result<Option<SignerKey>, DirectoryError>;
}

/// Result of a successful chain verification
#[derive(Debug, Clone)]
pub struct VerifiedChain {
    /// Root-first ancestry, leaf last
    pub chain: Vec<Grant>,
    pub root_grant_hash: String,
    pub leaf_grant_hash: String,
    pub verified_at: DateTime<Utc>,
}

impl VerifiedChain {
    pub fn root(&self) -> &Grant {
        &self.chain[0]
    }

    pub fn leaf(&self) -> &Grant {
        self.chain.last().expect("verified chain is never empty")
    }
}

/// Compute and stamp `grantHash` over the canonical grant core. The core
/// excludes the hash field itself and the mutable revocation block, so a
/// later revocation cannot break the DAG links children hold by hash.
pub fn finalize_grant_hash(grant: &mut Grant) -> Result<(), SettldError> {
    grant.grant_hash = String::new();
    let mut value = serde_json::to_value(&*grant)
        .map_err(|e| SettldError::internal(format!("grant serialization: {e}")))?;
    if let serde_json::Value::Object(ref mut map) = value {
        map.remove("grantHash");
        map.remove("revocation");
    }
    grant.grant_hash = settld_crypto::hash_canonical(&value).map_err(SettldError::from)?;
    Ok(())
}

pub(crate) fn schema_valid(grant: &Grant) -> bool {
    grant.schema_version == Grant::schema_version_for(grant.kind)
}

pub(crate) fn authority_error(code: AuthorityCode, message: impl Into<String>) -> SettldError {
    SettldError::Authority {
        code,
        message: message.into(),
    }
}

pub(crate) fn lifecycle_gate(identity: &AgentIdentity) -> Result<(), SettldError> {
    match identity.status {
        AgentLifecycle::Active => Ok(()),
        AgentLifecycle::Throttled => Err(SettldError::AgentThrottled {
            agent_id: identity.agent_id.to_string(),
        }),
        AgentLifecycle::Suspended | AgentLifecycle::Retired => Err(SettldError::AgentSuspended {
            agent_id: identity.agent_id.to_string(),
        }),
    }
}

pub(crate) fn signer_key_gate(
    key: Option<&SignerKey>,
    role: OperationRole,
) -> Result<(), SettldError> {
    let reason = match key {
        None => SignerKeyReason::Missing,
        Some(k) => match k.status {
            SignerKeyStatus::Active => return Ok(()),
            SignerKeyStatus::Revoked => SignerKeyReason::Revoked,
            SignerKeyStatus::Rotated => SignerKeyReason::Rotated,
        },
    };
    Err(SettldError::SignerKeyInvalid {
        reason,
        role: role.as_str().to_string(),
    })
}

