//! Runs, settlements and run-settlement disputes

use crate::{AgentId, DisputeId, RunId, SettlementId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Run lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Started,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// An auditable unit of work with a chained event log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub schema_version: String,
    pub tenant_id: TenantId,
    pub run_id: RunId,
    /// The payee agent performing the work
    pub agent_id: AgentId,
    pub status: RunStatus,
    /// Head of the run's event chain
    pub last_chain_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_id: Option<SettlementId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub const SCHEMA_VERSION: &'static str = "AgentRun.v1";
}

/// Settlement escrow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Locked,
    Released,
    Refunded,
    Split,
    ManualReviewRequired,
    ManualResolved,
    Disputed,
}

impl SettlementStatus {
    /// Terminal statuses reject further resolution
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            Self::Released | Self::Refunded | Self::Split | Self::ManualResolved
        )
    }
}

/// How the settlement decision was (or will be) made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Pending,
    AutoResolved,
    ManualReviewRequired,
    ManualResolved,
}

/// Verification outcome attached to a run's evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Green,
    Amber,
    Red,
}

/// Output of replaying the bound policy over verification outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementDecision {
    pub should_auto_resolve: bool,
    /// Share of the locked amount released to the payee, 0..=100
    pub release_rate_pct: u8,
    pub verification_status: VerificationStatus,
    pub reason_code: String,
    pub matches_stored_decision: bool,
    pub policy_version: String,
}

/// An escrow-backed resolution of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub schema_version: String,
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub run_id: RunId,
    pub payer_agent_id: AgentId,
    pub payee_agent_id: AgentId,
    pub amount_cents: i64,
    pub currency: String,
    pub status: SettlementStatus,
    pub released_amount_cents: i64,
    pub refunded_amount_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispute_window_days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispute_window_ends_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispute_status: Option<DisputeStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispute_id: Option<DisputeId>,
    pub decision_status: DecisionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
    /// Decision recorded by policy replay, executed at resolution time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<SettlementDecision>,
    /// Hash of the verdict artifact that closed a dispute, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Settlement {
    pub const SCHEMA_VERSION: &'static str = "AgentRunSettlement.v1";

    /// Terminal conservation: released + refunded must equal the lock
    pub fn conserves_escrow(&self) -> bool {
        if self.status.is_resolved() {
            self.released_amount_cents + self.refunded_amount_cents == self.amount_cents
        } else {
            true
        }
    }
}

/// Dispute lifecycle over a settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    Escalated,
    Closed,
}

/// Escalation ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeLevel {
    L1Counterparty,
    L2Arbiter,
    L3Platform,
}

/// Outcome of a closed dispute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    Accepted,
    Rejected,
    Partial,
}

/// A single piece of evidence attached to a dispute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputeEvidence {
    pub submitted_by: AgentId,
    pub payload: Value,
    pub payload_hash: String,
    pub submitted_at: DateTime<Utc>,
}

/// A dispute opened against a run settlement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispute {
    pub schema_version: String,
    pub tenant_id: TenantId,
    pub dispute_id: DisputeId,
    pub settlement_id: SettlementId,
    pub run_id: RunId,
    pub opened_by: AgentId,
    pub status: DisputeStatus,
    pub level: DisputeLevel,
    pub reason_code: String,
    pub evidence: Vec<DisputeEvidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<DisputeOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_rate_pct: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict_hash: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Dispute {
    pub const SCHEMA_VERSION: &'static str = "AgentRunDispute.v1";
}

/// Artifact recording the wallet deltas a verdict produced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettlementAdjustment {
    pub schema_version: String,
    pub settlement_id: SettlementId,
    pub dispute_id: DisputeId,
    pub released_delta_cents: i64,
    pub refunded_delta_cents: i64,
    pub release_rate_pct: u8,
    pub verdict_hash: String,
    pub adjusted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjustment_hash: Option<String>,
}

impl SettlementAdjustment {
    pub const SCHEMA_VERSION: &'static str = "AgentRunSettlementAdjustment.v1";
}
