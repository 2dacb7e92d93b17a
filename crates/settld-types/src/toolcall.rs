//! Tool-call kernel artifacts
//!
//! Agreements, evidence, funding holds, dispute envelopes and arbitration
//! cases are hash-bound: each artifact's `*Hash` equals the SHA-256 of its
//! canonical core (the artifact with the hash field omitted).

use crate::{AgentId, CaseId, KeyId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Commercial terms bound into a tool-call agreement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgreementTerms {
    pub payer_agent_id: AgentId,
    pub payee_agent_id: AgentId,
    pub amount_cents: i64,
    pub currency: String,
    /// Basis points of the amount retained through the challenge window
    pub holdback_bps: u32,
    pub challenge_window_ms: i64,
}

/// A hash-bound agreement covering one tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolCallAgreement {
    pub schema_version: String,
    pub tenant_id: TenantId,
    pub tool_id: String,
    pub manifest_hash: String,
    pub call_id: String,
    pub input_hash: String,
    pub terms: AgreementTerms,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agreement_hash: Option<String>,
}

impl ToolCallAgreement {
    pub const SCHEMA_VERSION: &'static str = "ToolCallAgreement.v1";
}

/// Signed evidence that a tool call executed under an agreement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolCallEvidence {
    pub schema_version: String,
    pub tenant_id: TenantId,
    pub agreement_hash: String,
    pub output_hash: String,
    pub metrics: Value,
    pub signer_key_id: KeyId,
    pub signature: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_hash: Option<String>,
}

impl ToolCallEvidence {
    pub const SCHEMA_VERSION: &'static str = "ToolCallEvidence.v1";
}

/// Funding hold lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    Locked,
    Released,
    Refunded,
    Disputed,
    Settled,
}

impl HoldStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded | Self::Settled)
    }
}

/// Funds pinned under a tool-call agreement for a challenge window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingHold {
    pub schema_version: String,
    pub tenant_id: TenantId,
    pub agreement_hash: String,
    pub receipt_hash: String,
    pub payer_agent_id: AgentId,
    pub payee_agent_id: AgentId,
    pub amount_cents: i64,
    /// `amount_cents * holdback_bps / 10000`
    pub held_amount_cents: i64,
    pub currency: String,
    pub holdback_bps: u32,
    pub challenge_window_ms: i64,
    pub status: HoldStatus,
    pub created_at: DateTime<Utc>,
    pub challenge_window_ends_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispute_envelope_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_hash: Option<String>,
}

impl FundingHold {
    pub const SCHEMA_VERSION: &'static str = "FundingHold.v1";
}

/// Signed envelope opening a dispute against a hold during its window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DisputeOpenEnvelope {
    pub schema_version: String,
    pub tenant_id: TenantId,
    pub hold_hash: String,
    pub disputant_agent_id: AgentId,
    pub reason_code: String,
    pub evidence_refs: Vec<String>,
    pub signer_key_id: KeyId,
    pub signature: String,
    pub opened_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub envelope_hash: Option<String>,
}

impl DisputeOpenEnvelope {
    pub const SCHEMA_VERSION: &'static str = "DisputeOpenEnvelope.v1";
}

/// Arbitration case status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Open,
    VerdictIssued,
}

/// Outcome issued by an arbiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictOutcome {
    Accepted,
    Rejected,
    Partial,
}

/// The arbiter's verdict, hash-bound and stored on the case
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ArbitrationVerdict {
    pub outcome: VerdictOutcome,
    /// Share of the held amount released to the payee, 0..=100
    pub release_rate_pct: u8,
    pub reason: String,
    pub arbiter_id: String,
    pub issued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict_hash: Option<String>,
}

/// An arbitration case over a frozen hold
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbitrationCase {
    pub schema_version: String,
    pub tenant_id: TenantId,
    pub case_id: CaseId,
    pub hold_hash: String,
    pub envelope_hash: String,
    pub status: CaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<ArbitrationVerdict>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ArbitrationCase {
    pub const SCHEMA_VERSION: &'static str = "ArbitrationCase.v1";
}
