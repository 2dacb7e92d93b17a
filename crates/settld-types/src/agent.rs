//! Agent identities, lifecycle and public agent cards

use crate::{AgentId, KeyId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an agent identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLifecycle {
    Active,
    Throttled,
    Suspended,
    Retired,
}

impl AgentLifecycle {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// The principal that owns an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOwner {
    /// Owner kind, e.g. "organization" or "user"
    #[serde(rename = "type")]
    pub owner_type: String,
    pub id: String,
}

/// A public key registered for an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentKey {
    pub key_id: KeyId,
    pub public_key_pem: String,
}

/// An agent identity, created once and mutated only by lifecycle or
/// capability updates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    pub schema_version: String,
    pub tenant_id: TenantId,
    pub agent_id: AgentId,
    pub display_name: String,
    pub owner: AgentOwner,
    pub capabilities: Vec<String>,
    pub keys: Vec<AgentKey>,
    pub status: AgentLifecycle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentIdentity {
    pub const SCHEMA_VERSION: &'static str = "AgentIdentity.v1";
}

/// Visibility of an agent card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardVisibility {
    Public,
    Tenant,
}

/// A discovery document describing what an agent offers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub schema_version: String,
    pub tenant_id: TenantId,
    pub agent_id: AgentId,
    pub display_name: String,
    pub visibility: CardVisibility,
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AgentCard {
    pub const SCHEMA_VERSION: &'static str = "AgentCard.v1";
}
