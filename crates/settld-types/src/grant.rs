//! Authority and delegation grants
//!
//! Authority grants are issued principal→agent; delegation grants are issued
//! agent→agent and always point back into the authority DAG through
//! `parentGrantHash` / `rootGrantHash`. `grantHash` is the SHA-256 of the
//! canonical grant core (the grant with the hash field omitted).

use crate::{AgentId, GrantId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a grant allows the grantee to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GrantScope {
    pub side_effecting_allowed: bool,
    /// Absent list means unrestricted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_risk_classes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_provider_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tool_ids: Option<Vec<String>>,
}

/// Monetary ceiling on what the grant can spend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SpendEnvelope {
    pub currency: String,
    pub max_per_call_cents: i64,
    pub max_total_cents: i64,
}

/// Position of the grant within the delegation DAG
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChainBinding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_grant_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_grant_hash: Option<String>,
    pub depth: u32,
    pub max_delegation_depth: u32,
}

/// Temporal validity window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GrantValidity {
    pub issued_at: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Revocation state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GrantRevocation {
    pub revocable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_reason_code: Option<String>,
}

impl GrantRevocation {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Which side of the DAG issued this grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    Authority,
    Delegation,
}

/// A scoped capability grant, either authority (principal→agent) or
/// delegation (agent→agent)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    pub schema_version: String,
    pub tenant_id: TenantId,
    pub grant_id: GrantId,
    pub kind: GrantKind,
    /// Principal id for authority grants, grantor agent id for delegations
    pub grantor_id: String,
    pub grantee_agent_id: AgentId,
    pub scope: GrantScope,
    pub spend_envelope: SpendEnvelope,
    pub chain_binding: ChainBinding,
    pub validity: GrantValidity,
    pub revocation: GrantRevocation,
    /// SHA-256 of the canonical grant core (hash field omitted)
    pub grant_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Grant {
    pub const AUTHORITY_SCHEMA_VERSION: &'static str = "AuthorityGrant.v1";
    pub const DELEGATION_SCHEMA_VERSION: &'static str = "DelegationGrant.v1";

    pub fn schema_version_for(kind: GrantKind) -> &'static str {
        match kind {
            GrantKind::Authority => Self::AUTHORITY_SCHEMA_VERSION,
            GrantKind::Delegation => Self::DELEGATION_SCHEMA_VERSION,
        }
    }

    /// A root grant has no parent in the DAG
    pub fn is_root(&self) -> bool {
        self.chain_binding.parent_grant_hash.is_none()
    }

    /// True iff `now` is inside the validity window
    pub fn is_within_validity(&self, now: DateTime<Utc>) -> bool {
        self.validity.not_before <= now && now < self.validity.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_grant() -> Grant {
        let now = Utc::now();
        Grant {
            schema_version: Grant::AUTHORITY_SCHEMA_VERSION.to_string(),
            tenant_id: TenantId::new(),
            grant_id: GrantId::new(),
            kind: GrantKind::Authority,
            grantor_id: "org_1".into(),
            grantee_agent_id: AgentId::new(),
            scope: GrantScope {
                side_effecting_allowed: true,
                allowed_risk_classes: None,
                allowed_provider_ids: None,
                allowed_tool_ids: None,
            },
            spend_envelope: SpendEnvelope {
                currency: "USD".into(),
                max_per_call_cents: 10_000,
                max_total_cents: 100_000,
            },
            chain_binding: ChainBinding {
                root_grant_hash: None,
                parent_grant_hash: None,
                depth: 0,
                max_delegation_depth: 3,
            },
            validity: GrantValidity {
                issued_at: now,
                not_before: now,
                expires_at: now + Duration::days(30),
            },
            revocation: GrantRevocation {
                revocable: true,
                revoked_at: None,
                revocation_reason_code: None,
            },
            grant_hash: String::new(),
            created_at: now,
        }
    }

    #[test]
    fn root_grant_detection() {
        let grant = sample_grant();
        assert!(grant.is_root());
        assert!(grant.is_within_validity(Utc::now()));
    }

    #[test]
    fn expired_grant_is_outside_validity() {
        let mut grant = sample_grant();
        grant.validity.expires_at = Utc::now() - Duration::hours(1);
        assert!(!grant.is_within_validity(Utc::now()));
    }
}
