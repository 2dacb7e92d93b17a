//! Settld Store - tenant-scoped persistence
//!
//! A single `Store` trait fronts every aggregate with typed
//! get/put/list/delete operations, plus a `WriteBatch` commit that applies
//! multi-aggregate writes atomically. Chain appends ride inside the batch
//! so the head precondition, the event insert and the aggregate update
//! commit together.
//!
//! Every key is `(tenantId, aggregateId)`; cross-tenant reads fail closed
//! by construction. Two back-ends: `MemStore` (tokio RwLock maps, no
//! migrations) and `PgStore` (sqlx/Postgres, JSONB document rows, embedded
//! forward-only migrations).

pub mod batch;
pub mod mem;
pub mod pg;

pub use batch::{EventScope, WriteBatch, WriteOp};
pub use mem::MemStore;
pub use pg::{PgStore, PgStoreConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use settld_types::*;

/// Store operations return domain errors directly; infrastructure faults
/// surface as `INTERNAL`.
pub type StoreResult<T> = settld_types::Result<T>;

/// Filter for delivery listings on the ops surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFilter {
    Pending,
    Processed,
    Dlq,
    All,
}

impl DeliveryFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processed" => Some(Self::Processed),
            "dlq" => Some(Self::Dlq),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

/// The tenant-scoped store contract
#[async_trait]
pub trait Store: Send + Sync {
    /// Liveness probe for health checks
    async fn ping(&self) -> StoreResult<()>;

    /// Apply a batch of writes atomically. Chain-head preconditions inside
    /// the batch abort the whole commit with `CHAIN_HASH_MISMATCH`.
    async fn commit(&self, tenant: &TenantId, batch: WriteBatch) -> StoreResult<()>;

    /// Known tenants, for scheduler sweeps
    async fn list_tenants(&self) -> StoreResult<Vec<TenantId>>;

    // ---- agent identities -------------------------------------------------

    async fn get_agent(&self, tenant: &TenantId, id: &AgentId) -> StoreResult<Option<AgentIdentity>>;
    async fn list_agents(&self, tenant: &TenantId) -> StoreResult<Vec<AgentIdentity>>;

    // ---- wallets ----------------------------------------------------------

    async fn get_wallet(&self, tenant: &TenantId, agent: &AgentId) -> StoreResult<Option<AgentWallet>>;

    // ---- grants -----------------------------------------------------------

    async fn get_grant(&self, tenant: &TenantId, id: &GrantId) -> StoreResult<Option<Grant>>;
    async fn list_grants(&self, tenant: &TenantId, kind: GrantKind) -> StoreResult<Vec<Grant>>;
    async fn grants_by_hash(&self, tenant: &TenantId, grant_hash: &str) -> StoreResult<Vec<Grant>>;

    // ---- runs and chained events ------------------------------------------

    async fn get_run(&self, tenant: &TenantId, id: &RunId) -> StoreResult<Option<Run>>;
    async fn list_runs_for_agent(&self, tenant: &TenantId, agent: &AgentId) -> StoreResult<Vec<Run>>;
    async fn list_events(
        &self,
        tenant: &TenantId,
        scope: EventScope,
        stream_id: &str,
    ) -> StoreResult<Vec<ChainedEvent>>;
    /// Current chain head for a stream; `"null"` when the stream is empty
    async fn stream_head(
        &self,
        tenant: &TenantId,
        scope: EventScope,
        stream_id: &str,
    ) -> StoreResult<String>;

    // ---- settlements and disputes -----------------------------------------

    async fn get_settlement(
        &self,
        tenant: &TenantId,
        id: &SettlementId,
    ) -> StoreResult<Option<Settlement>>;
    async fn get_settlement_for_run(
        &self,
        tenant: &TenantId,
        run_id: &RunId,
    ) -> StoreResult<Option<Settlement>>;
    /// Settlements whose dispute window has ended and still await execution
    async fn list_settlements_due_window_close(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Settlement>>;
    async fn get_dispute(&self, tenant: &TenantId, id: &DisputeId) -> StoreResult<Option<Dispute>>;

    // ---- tool-call kernel --------------------------------------------------

    async fn get_agreement(
        &self,
        tenant: &TenantId,
        agreement_hash: &str,
    ) -> StoreResult<Option<ToolCallAgreement>>;
    async fn list_evidence(
        &self,
        tenant: &TenantId,
        agreement_hash: &str,
    ) -> StoreResult<Vec<ToolCallEvidence>>;
    async fn get_hold(&self, tenant: &TenantId, hold_hash: &str) -> StoreResult<Option<FundingHold>>;
    async fn list_holds(&self, tenant: &TenantId) -> StoreResult<Vec<FundingHold>>;
    /// Locked holds whose challenge window has passed
    async fn list_holds_due_release(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<FundingHold>>;
    async fn get_case(&self, tenant: &TenantId, id: &CaseId) -> StoreResult<Option<ArbitrationCase>>;
    async fn get_case_for_hold(
        &self,
        tenant: &TenantId,
        hold_hash: &str,
    ) -> StoreResult<Option<ArbitrationCase>>;

    // ---- sessions, work orders, cards --------------------------------------

    async fn get_session(&self, tenant: &TenantId, id: &SessionId) -> StoreResult<Option<Session>>;
    async fn get_work_order(
        &self,
        tenant: &TenantId,
        id: &WorkOrderId,
    ) -> StoreResult<Option<WorkOrder>>;
    async fn list_receipts_for_work_order(
        &self,
        tenant: &TenantId,
        id: &WorkOrderId,
    ) -> StoreResult<Vec<CompletionReceipt>>;
    async fn list_attestations_for(
        &self,
        tenant: &TenantId,
        subject_type: &str,
        subject_id: &str,
    ) -> StoreResult<Vec<Attestation>>;
    async fn get_agent_card(&self, tenant: &TenantId, agent: &AgentId) -> StoreResult<Option<AgentCard>>;
    async fn list_public_agent_cards(&self, tenant: &TenantId) -> StoreResult<Vec<AgentCard>>;

    // ---- gates and keys ----------------------------------------------------

    async fn get_gate(&self, tenant: &TenantId, id: &GateId) -> StoreResult<Option<Gate>>;
    async fn get_signer_key(
        &self,
        tenant: &TenantId,
        agent: &AgentId,
    ) -> StoreResult<Option<SignerKey>>;
    async fn get_api_key(&self, tenant: &TenantId, key_id: &KeyId) -> StoreResult<Option<ApiKey>>;
    async fn get_keyset(&self, tenant: &TenantId) -> StoreResult<Option<KeysetStore>>;

    // ---- idempotency -------------------------------------------------------

    async fn get_idempotency(
        &self,
        tenant: &TenantId,
        key: &str,
    ) -> StoreResult<Option<IdempotencyRecord>>;
    /// Insert-if-absent. Returns the already-stored record when one exists.
    async fn put_idempotency_if_absent(
        &self,
        tenant: &TenantId,
        record: IdempotencyRecord,
    ) -> StoreResult<Option<IdempotencyRecord>>;
    async fn delete_expired_idempotency(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    // ---- outbox and deliveries ---------------------------------------------

    /// Claim due pending rows, oldest first, with a short redelivery lease
    /// (skip-locked semantics). Claimed rows stay `pending` until marked.
    async fn claim_due_outbox(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<OutboxMessage>>;
    async fn mark_outbox_processed(
        &self,
        tenant: &TenantId,
        id: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;
    async fn record_outbox_failure(
        &self,
        tenant: &TenantId,
        id: i64,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;
    async fn list_outbox(
        &self,
        tenant: &TenantId,
        status: Option<OutboxStatus>,
    ) -> StoreResult<Vec<OutboxMessage>>;
    /// Earliest pending outbox row for an aggregate, for FIFO gating
    async fn earliest_pending_for_aggregate(
        &self,
        tenant: &TenantId,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> StoreResult<Option<i64>>;
    async fn tenants_with_pending_outbox(&self) -> StoreResult<Vec<TenantId>>;

    async fn get_delivery(
        &self,
        tenant: &TenantId,
        id: &DeliveryId,
    ) -> StoreResult<Option<DeliveryRecord>>;
    async fn put_delivery(&self, tenant: &TenantId, record: &DeliveryRecord) -> StoreResult<()>;
    async fn list_deliveries(
        &self,
        tenant: &TenantId,
        filter: DeliveryFilter,
    ) -> StoreResult<Vec<DeliveryRecord>>;
    /// Mark a delivery acked; duplicate ACKs are a no-op
    async fn ack_delivery(
        &self,
        tenant: &TenantId,
        id: &DeliveryId,
        at: DateTime<Utc>,
    ) -> StoreResult<DeliveryRecord>;

    async fn list_destinations(&self, tenant: &TenantId) -> StoreResult<Vec<WebhookDestination>>;
    async fn put_destination(
        &self,
        tenant: &TenantId,
        destination: &WebhookDestination,
    ) -> StoreResult<()>;
}

pub(crate) fn matches_delivery_filter(record: &DeliveryRecord, filter: DeliveryFilter) -> bool {
    match filter {
        DeliveryFilter::All => true,
        DeliveryFilter::Pending => matches!(
            record.state,
            DeliveryState::Queued | DeliveryState::Delivered | DeliveryState::Failed
        ),
        DeliveryFilter::Processed => matches!(record.state, DeliveryState::Acked),
        DeliveryFilter::Dlq => matches!(record.state, DeliveryState::Dlq),
    }
}
