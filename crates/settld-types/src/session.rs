//! Sessions, work orders and x402 gate artifacts

use crate::{
    AgentId, AttestationId, AuthorizationId, GateId, ReceiptId, SessionId, TenantId, WorkOrderId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Closed,
}

/// A long-lived interaction stream between agents with a chained event log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub schema_version: String,
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub participants: Vec<AgentId>,
    pub last_chain_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub const SCHEMA_VERSION: &'static str = "AgentSession.v1";
}

/// Work order lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    Created,
    Accepted,
    InProgress,
    Completed,
    Settled,
    Cancelled,
}

/// A metering entry recorded while a work order runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeteringRecord {
    pub recorded_at: DateTime<Utc>,
    pub units: i64,
    pub unit_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A negotiated unit of paid work between a buyer and seller agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrder {
    pub schema_version: String,
    pub tenant_id: TenantId,
    pub work_order_id: WorkOrderId,
    pub buyer_agent_id: AgentId,
    pub seller_agent_id: AgentId,
    pub status: WorkOrderStatus,
    pub description: String,
    /// Total escrowed so far (initial amount plus top-ups)
    pub escrowed_cents: i64,
    pub currency: String,
    pub metering: Vec<MeteringRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_released_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_refunded_cents: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkOrder {
    pub const SCHEMA_VERSION: &'static str = "WorkOrder.v1";
}

/// Receipt issued when a work order completes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CompletionReceipt {
    pub schema_version: String,
    pub tenant_id: TenantId,
    pub receipt_id: ReceiptId,
    pub work_order_id: WorkOrderId,
    pub seller_agent_id: AgentId,
    pub summary: String,
    pub output_refs: Vec<String>,
    pub issued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_hash: Option<String>,
}

impl CompletionReceipt {
    pub const SCHEMA_VERSION: &'static str = "CompletionReceipt.v1";
}

/// A third-party attestation over a work order or run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Attestation {
    pub schema_version: String,
    pub tenant_id: TenantId,
    pub attestation_id: AttestationId,
    pub subject_type: String,
    pub subject_id: String,
    pub attestor_id: String,
    pub payload: Value,
    pub issued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation_hash: Option<String>,
}

impl Attestation {
    pub const SCHEMA_VERSION: &'static str = "Attestation.v1";
}

/// An x402 payment gate created ahead of an authorized payment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Gate {
    pub schema_version: String,
    pub tenant_id: TenantId,
    pub gate_id: GateId,
    pub payer_agent_id: AgentId,
    pub payee_agent_id: AgentId,
    pub amount_cents: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_hash: Option<String>,
}

impl Gate {
    pub const SCHEMA_VERSION: &'static str = "PaymentGate.v1";
}

/// The verifier's answer to an authorize-payment request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorization {
    pub schema_version: String,
    pub tenant_id: TenantId,
    pub authorization_id: AuthorizationId,
    pub gate_id: GateId,
    pub grant_hash: String,
    pub amount_cents: i64,
    pub authorized: bool,
    pub issued_at: DateTime<Utc>,
}

impl PaymentAuthorization {
    pub const SCHEMA_VERSION: &'static str = "PaymentAuthorization.v1";
}
