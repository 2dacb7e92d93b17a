//! In-memory back-end
//!
//! Per-tenant maps behind one tokio `RwLock`. A batch commit takes the
//! write lock once: preconditions are validated before any mutation, so a
//! failed commit leaves the state untouched. Stateless across processes;
//! no migrations.

use crate::{
    matches_delivery_filter, DeliveryFilter, EventScope, Store, StoreResult, WriteBatch, WriteOp,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use settld_types::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Redelivery lease applied to claimed outbox rows
const CLAIM_LEASE_SECS: i64 = 30;

#[derive(Default)]
struct TenantState {
    agents: HashMap<String, AgentIdentity>,
    wallets: HashMap<String, AgentWallet>,
    grants: HashMap<String, Grant>,
    runs: HashMap<String, Run>,
    events: HashMap<(EventScope, String), Vec<ChainedEvent>>,
    settlements: HashMap<String, Settlement>,
    disputes: HashMap<String, Dispute>,
    agreements: HashMap<String, ToolCallAgreement>,
    evidence: HashMap<String, Vec<ToolCallEvidence>>,
    holds: HashMap<String, FundingHold>,
    cases: HashMap<String, ArbitrationCase>,
    sessions: HashMap<String, Session>,
    work_orders: HashMap<String, WorkOrder>,
    receipts: HashMap<String, CompletionReceipt>,
    attestations: HashMap<String, Attestation>,
    cards: HashMap<String, AgentCard>,
    gates: HashMap<String, Gate>,
    signer_keys: HashMap<String, SignerKey>,
    api_keys: HashMap<String, ApiKey>,
    keyset: Option<KeysetStore>,
    idempotency: HashMap<String, IdempotencyRecord>,
    outbox: BTreeMap<i64, OutboxMessage>,
    deliveries: HashMap<String, DeliveryRecord>,
    destinations: HashMap<String, WebhookDestination>,
}

struct Inner {
    tenants: HashMap<String, TenantState>,
    next_outbox_id: i64,
}

/// The in-memory store
#[derive(Clone)]
pub struct MemStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                tenants: HashMap::new(),
                next_outbox_id: 1,
            })),
        }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

fn head_of(events: Option<&Vec<ChainedEvent>>) -> String {
    events
        .and_then(|v| v.last())
        .map(|e| e.chain_hash.clone())
        .unwrap_or_else(|| GENESIS_PREV_CHAIN_HASH.to_string())
}

impl Inner {
    fn tenant(&self, tenant: &TenantId) -> Option<&TenantState> {
        self.tenants.get(tenant.as_str())
    }

    fn tenant_mut(&mut self, tenant: &TenantId) -> &mut TenantState {
        self.tenants.entry(tenant.as_str().to_string()).or_default()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn commit(&self, tenant: &TenantId, batch: WriteBatch) -> StoreResult<()> {
        let mut inner = self.inner.write().await;

        // validate every chain precondition before mutating anything,
        // tracking heads that earlier ops in this batch will move
        {
            let state = inner.tenant(tenant);
            let mut pending_heads: HashMap<(EventScope, String), String> = HashMap::new();
            for op in batch.ops() {
                if let WriteOp::AppendEvent {
                    scope,
                    expected_prev,
                    event,
                } = op
                {
                    let key = (*scope, event.stream_id.clone());
                    let head = pending_heads.get(&key).cloned().unwrap_or_else(|| {
                        head_of(state.and_then(|s| s.events.get(&key)))
                    });
                    if &head != expected_prev {
                        return Err(SettldError::ChainHashMismatch {
                            stream_id: event.stream_id.clone(),
                            expected: expected_prev.clone(),
                            actual: head,
                        });
                    }
                    pending_heads.insert(key, event.chain_hash.clone());
                }
            }
        }

        let mut next_outbox_id = inner.next_outbox_id;
        let state = inner.tenant_mut(tenant);
        for op in batch.into_ops() {
            match op {
                WriteOp::PutAgent(v) => {
                    state.agents.insert(v.agent_id.to_string(), v);
                }
                WriteOp::PutWallet(v) => {
                    state.wallets.insert(v.agent_id.to_string(), v);
                }
                WriteOp::PutGrant(v) => {
                    state.grants.insert(v.grant_id.to_string(), v);
                }
                WriteOp::PutRun(v) => {
                    state.runs.insert(v.run_id.to_string(), v);
                }
                WriteOp::AppendEvent { scope, event, .. } => {
                    state
                        .events
                        .entry((scope, event.stream_id.clone()))
                        .or_default()
                        .push(event);
                }
                WriteOp::PutSettlement(v) => {
                    state.settlements.insert(v.settlement_id.to_string(), v);
                }
                WriteOp::PutDispute(v) => {
                    state.disputes.insert(v.dispute_id.to_string(), v);
                }
                WriteOp::PutAgreement(v) => {
                    let key = v.agreement_hash.clone().unwrap_or_default();
                    state.agreements.insert(key, v);
                }
                WriteOp::PutEvidence(v) => {
                    state
                        .evidence
                        .entry(v.agreement_hash.clone())
                        .or_default()
                        .push(v);
                }
                WriteOp::PutHold(v) => {
                    let key = v.hold_hash.clone().unwrap_or_default();
                    state.holds.insert(key, v);
                }
                WriteOp::PutCase(v) => {
                    state.cases.insert(v.case_id.to_string(), v);
                }
                WriteOp::PutSession(v) => {
                    state.sessions.insert(v.session_id.to_string(), v);
                }
                WriteOp::PutWorkOrder(v) => {
                    state.work_orders.insert(v.work_order_id.to_string(), v);
                }
                WriteOp::PutReceipt(v) => {
                    state.receipts.insert(v.receipt_id.to_string(), v);
                }
                WriteOp::PutAttestation(v) => {
                    state.attestations.insert(v.attestation_id.to_string(), v);
                }
                WriteOp::PutAgentCard(v) => {
                    state.cards.insert(v.agent_id.to_string(), v);
                }
                WriteOp::PutGate(v) => {
                    state.gates.insert(v.gate_id.to_string(), v);
                }
                WriteOp::PutSignerKey(v) => {
                    state.signer_keys.insert(v.agent_id.to_string(), v);
                }
                WriteOp::PutApiKey(v) => {
                    state.api_keys.insert(v.key_id.to_string(), v);
                }
                WriteOp::PutKeyset(v) => {
                    state.keyset = Some(v);
                }
                WriteOp::Outbox(draft) => {
                    let id = next_outbox_id;
                    next_outbox_id += 1;
                    let now = Utc::now();
                    state.outbox.insert(
                        id,
                        OutboxMessage {
                            id,
                            tenant_id: tenant.clone(),
                            topic: draft.topic,
                            aggregate_type: draft.aggregate_type,
                            aggregate_id: draft.aggregate_id,
                            payload: draft.payload,
                            status: OutboxStatus::Pending,
                            attempt: 0,
                            created_at: now,
                            next_attempt_at: now,
                            processed_at: None,
                            last_error: None,
                        },
                    );
                }
                WriteOp::PutDelivery(v) => {
                    state.deliveries.insert(v.delivery_id.to_string(), v);
                }
            }
        }
        inner.next_outbox_id = next_outbox_id;
        Ok(())
    }

    async fn list_tenants(&self) -> StoreResult<Vec<TenantId>> {
        let inner = self.inner.read().await;
        let mut tenants: Vec<_> = inner.tenants.keys().cloned().collect();
        tenants.sort();
        Ok(tenants.into_iter().map(TenantId::from_string).collect())
    }

    async fn get_agent(&self, tenant: &TenantId, id: &AgentId) -> StoreResult<Option<AgentIdentity>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.agents.get(id.as_str()).cloned()))
    }

    async fn list_agents(&self, tenant: &TenantId) -> StoreResult<Vec<AgentIdentity>> {
        let inner = self.inner.read().await;
        let mut agents: Vec<_> = inner
            .tenant(tenant)
            .map(|s| s.agents.values().cloned().collect())
            .unwrap_or_default();
        agents.sort_by(|a: &AgentIdentity, b: &AgentIdentity| a.created_at.cmp(&b.created_at));
        Ok(agents)
    }

    async fn get_wallet(&self, tenant: &TenantId, agent: &AgentId) -> StoreResult<Option<AgentWallet>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.wallets.get(agent.as_str()).cloned()))
    }

    async fn get_grant(&self, tenant: &TenantId, id: &GrantId) -> StoreResult<Option<Grant>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.grants.get(id.as_str()).cloned()))
    }

    async fn list_grants(&self, tenant: &TenantId, kind: GrantKind) -> StoreResult<Vec<Grant>> {
        let inner = self.inner.read().await;
        let mut grants: Vec<_> = inner
            .tenant(tenant)
            .map(|s| {
                s.grants
                    .values()
                    .filter(|g| g.kind == kind)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        grants.sort_by(|a: &Grant, b: &Grant| a.created_at.cmp(&b.created_at));
        Ok(grants)
    }

    async fn grants_by_hash(&self, tenant: &TenantId, grant_hash: &str) -> StoreResult<Vec<Grant>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .map(|s| {
                s.grants
                    .values()
                    .filter(|g| g.grant_hash == grant_hash)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_run(&self, tenant: &TenantId, id: &RunId) -> StoreResult<Option<Run>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.runs.get(id.as_str()).cloned()))
    }

    async fn list_runs_for_agent(&self, tenant: &TenantId, agent: &AgentId) -> StoreResult<Vec<Run>> {
        let inner = self.inner.read().await;
        let mut runs: Vec<_> = inner
            .tenant(tenant)
            .map(|s| {
                s.runs
                    .values()
                    .filter(|r| &r.agent_id == agent)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        runs.sort_by(|a: &Run, b: &Run| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }

    async fn list_events(
        &self,
        tenant: &TenantId,
        scope: EventScope,
        stream_id: &str,
    ) -> StoreResult<Vec<ChainedEvent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.events.get(&(scope, stream_id.to_string())).cloned())
            .unwrap_or_default())
    }

    async fn stream_head(
        &self,
        tenant: &TenantId,
        scope: EventScope,
        stream_id: &str,
    ) -> StoreResult<String> {
        let inner = self.inner.read().await;
        Ok(head_of(
            inner
                .tenant(tenant)
                .and_then(|s| s.events.get(&(scope, stream_id.to_string()))),
        ))
    }

    async fn get_settlement(
        &self,
        tenant: &TenantId,
        id: &SettlementId,
    ) -> StoreResult<Option<Settlement>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.settlements.get(id.as_str()).cloned()))
    }

    async fn get_settlement_for_run(
        &self,
        tenant: &TenantId,
        run_id: &RunId,
    ) -> StoreResult<Option<Settlement>> {
        let inner = self.inner.read().await;
        Ok(inner.tenant(tenant).and_then(|s| {
            s.settlements
                .values()
                .find(|stl| &stl.run_id == run_id)
                .cloned()
        }))
    }

    async fn list_settlements_due_window_close(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Settlement>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .map(|s| {
                s.settlements
                    .values()
                    .filter(|stl| {
                        stl.status == SettlementStatus::Locked
                            && stl.dispute_status.is_none()
                            && stl
                                .dispute_window_ends_at
                                .map(|ends| ends <= now)
                                .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_dispute(&self, tenant: &TenantId, id: &DisputeId) -> StoreResult<Option<Dispute>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.disputes.get(id.as_str()).cloned()))
    }

    async fn get_agreement(
        &self,
        tenant: &TenantId,
        agreement_hash: &str,
    ) -> StoreResult<Option<ToolCallAgreement>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.agreements.get(agreement_hash).cloned()))
    }

    async fn list_evidence(
        &self,
        tenant: &TenantId,
        agreement_hash: &str,
    ) -> StoreResult<Vec<ToolCallEvidence>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.evidence.get(agreement_hash).cloned())
            .unwrap_or_default())
    }

    async fn get_hold(&self, tenant: &TenantId, hold_hash: &str) -> StoreResult<Option<FundingHold>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.holds.get(hold_hash).cloned()))
    }

    async fn list_holds(&self, tenant: &TenantId) -> StoreResult<Vec<FundingHold>> {
        let inner = self.inner.read().await;
        let mut holds: Vec<_> = inner
            .tenant(tenant)
            .map(|s| s.holds.values().cloned().collect())
            .unwrap_or_default();
        holds.sort_by(|a: &FundingHold, b: &FundingHold| a.created_at.cmp(&b.created_at));
        Ok(holds)
    }

    async fn list_holds_due_release(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<FundingHold>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .map(|s| {
                s.holds
                    .values()
                    .filter(|h| {
                        h.status == HoldStatus::Locked && h.challenge_window_ends_at <= now
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_case(&self, tenant: &TenantId, id: &CaseId) -> StoreResult<Option<ArbitrationCase>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.cases.get(id.as_str()).cloned()))
    }

    async fn get_case_for_hold(
        &self,
        tenant: &TenantId,
        hold_hash: &str,
    ) -> StoreResult<Option<ArbitrationCase>> {
        let inner = self.inner.read().await;
        Ok(inner.tenant(tenant).and_then(|s| {
            s.cases
                .values()
                .find(|c| c.hold_hash == hold_hash)
                .cloned()
        }))
    }

    async fn get_session(&self, tenant: &TenantId, id: &SessionId) -> StoreResult<Option<Session>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.sessions.get(id.as_str()).cloned()))
    }

    async fn get_work_order(
        &self,
        tenant: &TenantId,
        id: &WorkOrderId,
    ) -> StoreResult<Option<WorkOrder>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.work_orders.get(id.as_str()).cloned()))
    }

    async fn list_receipts_for_work_order(
        &self,
        tenant: &TenantId,
        id: &WorkOrderId,
    ) -> StoreResult<Vec<CompletionReceipt>> {
        let inner = self.inner.read().await;
        let mut receipts: Vec<_> = inner
            .tenant(tenant)
            .map(|s| {
                s.receipts
                    .values()
                    .filter(|r| &r.work_order_id == id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        receipts.sort_by(|a: &CompletionReceipt, b: &CompletionReceipt| {
            a.issued_at.cmp(&b.issued_at)
        });
        Ok(receipts)
    }

    async fn list_attestations_for(
        &self,
        tenant: &TenantId,
        subject_type: &str,
        subject_id: &str,
    ) -> StoreResult<Vec<Attestation>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .map(|s| {
                s.attestations
                    .values()
                    .filter(|a| a.subject_type == subject_type && a.subject_id == subject_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_agent_card(&self, tenant: &TenantId, agent: &AgentId) -> StoreResult<Option<AgentCard>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.cards.get(agent.as_str()).cloned()))
    }

    async fn list_public_agent_cards(&self, tenant: &TenantId) -> StoreResult<Vec<AgentCard>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .map(|s| {
                s.cards
                    .values()
                    .filter(|c| c.visibility == CardVisibility::Public)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_gate(&self, tenant: &TenantId, id: &GateId) -> StoreResult<Option<Gate>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.gates.get(id.as_str()).cloned()))
    }

    async fn get_signer_key(
        &self,
        tenant: &TenantId,
        agent: &AgentId,
    ) -> StoreResult<Option<SignerKey>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.signer_keys.get(agent.as_str()).cloned()))
    }

    async fn get_api_key(&self, tenant: &TenantId, key_id: &KeyId) -> StoreResult<Option<ApiKey>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.api_keys.get(key_id.as_str()).cloned()))
    }

    async fn get_keyset(&self, tenant: &TenantId) -> StoreResult<Option<KeysetStore>> {
        let inner = self.inner.read().await;
        Ok(inner.tenant(tenant).and_then(|s| s.keyset.clone()))
    }

    async fn get_idempotency(
        &self,
        tenant: &TenantId,
        key: &str,
    ) -> StoreResult<Option<IdempotencyRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.idempotency.get(key).cloned()))
    }

    async fn put_idempotency_if_absent(
        &self,
        tenant: &TenantId,
        record: IdempotencyRecord,
    ) -> StoreResult<Option<IdempotencyRecord>> {
        let mut inner = self.inner.write().await;
        let state = inner.tenant_mut(tenant);
        if let Some(existing) = state.idempotency.get(&record.key) {
            return Ok(Some(existing.clone()));
        }
        state.idempotency.insert(record.key.clone(), record);
        Ok(None)
    }

    async fn delete_expired_idempotency(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let state = inner.tenant_mut(tenant);
        let before = state.idempotency.len();
        state.idempotency.retain(|_, rec| !rec.is_expired(now));
        Ok((before - state.idempotency.len()) as u64)
    }

    async fn claim_due_outbox(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<OutboxMessage>> {
        let mut inner = self.inner.write().await;
        let state = inner.tenant_mut(tenant);
        let lease = now + Duration::seconds(CLAIM_LEASE_SECS);
        let mut claimed = Vec::new();
        for message in state.outbox.values_mut() {
            if claimed.len() >= limit {
                break;
            }
            if message.status == OutboxStatus::Pending && message.next_attempt_at <= now {
                message.next_attempt_at = lease;
                claimed.push(message.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_outbox_processed(
        &self,
        tenant: &TenantId,
        id: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let state = inner.tenant_mut(tenant);
        let message = state
            .outbox
            .get_mut(&id)
            .ok_or_else(|| SettldError::not_found("OUTBOX_MESSAGE_NOT_FOUND", id.to_string()))?;
        message.status = OutboxStatus::Processed;
        message.processed_at = Some(at);
        Ok(())
    }

    async fn record_outbox_failure(
        &self,
        tenant: &TenantId,
        id: i64,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let state = inner.tenant_mut(tenant);
        let message = state
            .outbox
            .get_mut(&id)
            .ok_or_else(|| SettldError::not_found("OUTBOX_MESSAGE_NOT_FOUND", id.to_string()))?;
        message.attempt += 1;
        message.last_error = Some(error.to_string());
        match next_attempt_at {
            Some(at) => message.next_attempt_at = at,
            None => message.status = OutboxStatus::Dlq,
        }
        Ok(())
    }

    async fn list_outbox(
        &self,
        tenant: &TenantId,
        status: Option<OutboxStatus>,
    ) -> StoreResult<Vec<OutboxMessage>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .map(|s| {
                s.outbox
                    .values()
                    .filter(|m| status.map(|want| m.status == want).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn earliest_pending_for_aggregate(
        &self,
        tenant: &TenantId,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> StoreResult<Option<i64>> {
        let inner = self.inner.read().await;
        Ok(inner.tenant(tenant).and_then(|s| {
            s.outbox
                .values()
                .find(|m| {
                    m.status == OutboxStatus::Pending
                        && m.aggregate_type == aggregate_type
                        && m.aggregate_id == aggregate_id
                })
                .map(|m| m.id)
        }))
    }

    async fn tenants_with_pending_outbox(&self) -> StoreResult<Vec<TenantId>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenants
            .iter()
            .filter(|(_, state)| {
                state
                    .outbox
                    .values()
                    .any(|m| m.status == OutboxStatus::Pending)
            })
            .map(|(tenant, _)| TenantId::from_string(tenant.clone()))
            .collect())
    }

    async fn get_delivery(
        &self,
        tenant: &TenantId,
        id: &DeliveryId,
    ) -> StoreResult<Option<DeliveryRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenant(tenant)
            .and_then(|s| s.deliveries.get(id.as_str()).cloned()))
    }

    async fn put_delivery(&self, tenant: &TenantId, record: &DeliveryRecord) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .tenant_mut(tenant)
            .deliveries
            .insert(record.delivery_id.to_string(), record.clone());
        Ok(())
    }

    async fn list_deliveries(
        &self,
        tenant: &TenantId,
        filter: DeliveryFilter,
    ) -> StoreResult<Vec<DeliveryRecord>> {
        let inner = self.inner.read().await;
        let mut records: Vec<_> = inner
            .tenant(tenant)
            .map(|s| {
                s.deliveries
                    .values()
                    .filter(|r| matches_delivery_filter(r, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by(|a: &DeliveryRecord, b: &DeliveryRecord| {
            a.created_at.cmp(&b.created_at)
        });
        Ok(records)
    }

    async fn ack_delivery(
        &self,
        tenant: &TenantId,
        id: &DeliveryId,
        at: DateTime<Utc>,
    ) -> StoreResult<DeliveryRecord> {
        let mut inner = self.inner.write().await;
        let state = inner.tenant_mut(tenant);
        let record = state
            .deliveries
            .get_mut(id.as_str())
            .ok_or_else(|| SettldError::not_found("DELIVERY_NOT_FOUND", id.to_string()))?;
        if record.state != DeliveryState::Acked {
            record.state = DeliveryState::Acked;
            record.acked_at = Some(at);
            record.updated_at = at;
        }
        Ok(record.clone())
    }

    async fn list_destinations(&self, tenant: &TenantId) -> StoreResult<Vec<WebhookDestination>> {
        let inner = self.inner.read().await;
        let mut destinations: Vec<_> = inner
            .tenant(tenant)
            .map(|s| s.destinations.values().cloned().collect())
            .unwrap_or_default();
        destinations.sort_by(|a: &WebhookDestination, b: &WebhookDestination| {
            a.destination_id.0.cmp(&b.destination_id.0)
        });
        Ok(destinations)
    }

    async fn put_destination(
        &self,
        tenant: &TenantId,
        destination: &WebhookDestination,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .tenant_mut(tenant)
            .destinations
            .insert(destination.destination_id.to_string(), destination.clone());
        Ok(())
    }
}
