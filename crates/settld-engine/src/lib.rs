//! Settld Engine - run lifecycle and settlement resolution
//!
//! The engines are thin orchestrators: they load snapshots, compute next
//! states with the pure crates (`settld-wallet`, `settld-chain`) and
//! describe all effects as one `WriteBatch` the store commits atomically.
//! Every business mutation that external parties must learn about rides an
//! outbox row in the same batch.

pub mod policy;
pub mod dispute;
pub mod session;
pub mod work_order;
pub mod gate;
pub mod directory;

pub use directory::StoreDirectory;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use settld_chain::{ChainedEventDraft, EventInput};
use settld_store::{EventScope, Store, WriteBatch};
use settld_types::*;
use std::sync::Arc;
use tracing::info;

/// Settlement block accepted on run creation
#[derive(Debug, Clone)]
pub struct SettlementSpec {
    pub payer_agent_id: AgentId,
    pub amount_cents: i64,
    pub currency: String,
    pub dispute_window_days: Option<u32>,
}

/// Inputs to [`RunEngine::create_run`]
#[derive(Debug, Clone)]
pub struct CreateRun {
    pub agent_id: AgentId,
    pub actor: EventActor,
    pub settlement: Option<SettlementSpec>,
}

/// Inputs to [`RunEngine::append_run_event`]
#[derive(Debug, Clone)]
pub struct AppendRunEvent {
    pub event_type: String,
    pub actor: EventActor,
    pub payload: Value,
    pub expected_prev_chain_hash: String,
}

/// What an append produced
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub run: Run,
    pub event: ChainedEvent,
    pub settlement: Option<Settlement>,
}

/// Requested manual resolution
#[derive(Debug, Clone)]
pub struct ResolveSettlement {
    pub status: SettlementStatus,
    pub release_rate_pct: u8,
    pub operator_id: String,
}

/// The run/settlement engine
#[derive(Clone)]
pub struct RunEngine {
    store: Arc<dyn Store>,
}

impl RunEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Register an agent identity together with its zero-balance wallet
    pub async fn register_agent(
        &self,
        tenant: &TenantId,
        display_name: String,
        owner: AgentOwner,
        capabilities: Vec<String>,
        public_key_pem: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(AgentIdentity, AgentWallet)> {
        let agent_id = AgentId::new();
        let mut signer_key = None;
        let keys = public_key_pem
            .map(|pem| {
                let key_id = KeyId::new();
                signer_key = Some(SignerKey {
                    key_id: key_id.clone(),
                    tenant_id: tenant.clone(),
                    agent_id: agent_id.clone(),
                    public_key_pem: pem.clone(),
                    status: SignerKeyStatus::Active,
                    created_at: now,
                    updated_at: now,
                });
                vec![AgentKey {
                    key_id,
                    public_key_pem: pem,
                }]
            })
            .unwrap_or_default();
        let identity = AgentIdentity {
            schema_version: AgentIdentity::SCHEMA_VERSION.into(),
            tenant_id: tenant.clone(),
            agent_id: agent_id.clone(),
            display_name,
            owner,
            capabilities,
            keys,
            status: AgentLifecycle::Active,
            created_at: now,
            updated_at: now,
        };
        let wallet = AgentWallet::new(tenant.clone(), agent_id.clone(), "USD", now);

        let mut batch = WriteBatch::new()
            .put_agent(identity.clone())
            .put_wallet(wallet.clone());
        if let Some(key) = signer_key {
            batch = batch.put_signer_key(key);
        }
        let batch = batch.outbox(OutboxDraft::new(
            "agent.registered",
            "agent",
            agent_id.to_string(),
            json!({ "agentId": agent_id, "displayName": identity.display_name }),
        ));
        self.store.commit(tenant, batch).await?;
        info!(agent = %agent_id, "agent registered");
        Ok((identity, wallet))
    }

    /// Credit an agent wallet
    pub async fn credit_wallet(
        &self,
        tenant: &TenantId,
        agent_id: &AgentId,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<AgentWallet> {
        let wallet = self
            .store
            .get_wallet(tenant, agent_id)
            .await?
            .ok_or_else(|| SettldError::not_found("WALLET_NOT_FOUND", agent_id.to_string()))?;
        let next = settld_wallet::credit(&wallet, amount_cents, now)?;
        let batch = WriteBatch::new().put_wallet(next.clone()).outbox(OutboxDraft::new(
            "wallet.credited",
            "wallet",
            agent_id.to_string(),
            json!({ "agentId": agent_id, "amountCents": amount_cents }),
        ));
        self.store.commit(tenant, batch).await?;
        Ok(next)
    }

    /// Update an agent's lifecycle status
    pub async fn set_agent_lifecycle(
        &self,
        tenant: &TenantId,
        agent_id: &AgentId,
        status: AgentLifecycle,
        now: DateTime<Utc>,
    ) -> Result<AgentIdentity> {
        let mut identity = self
            .store
            .get_agent(tenant, agent_id)
            .await?
            .ok_or_else(|| SettldError::not_found("AGENT_NOT_FOUND", agent_id.to_string()))?;
        identity.status = status;
        identity.updated_at = now;
        let batch = WriteBatch::new().put_agent(identity.clone()).outbox(OutboxDraft::new(
            "agent.lifecycle",
            "agent",
            agent_id.to_string(),
            json!({ "agentId": agent_id, "status": status }),
        ));
        self.store.commit(tenant, batch).await?;
        Ok(identity)
    }

    /// Create a run; with a settlement block the payer's funds lock in the
    /// same commit as the run's genesis event
    pub async fn create_run(
        &self,
        tenant: &TenantId,
        input: CreateRun,
        now: DateTime<Utc>,
    ) -> Result<(Run, Option<Settlement>)> {
        let payee = self
            .store
            .get_agent(tenant, &input.agent_id)
            .await?
            .ok_or_else(|| SettldError::not_found("AGENT_NOT_FOUND", input.agent_id.to_string()))?;
        if !payee.status.is_active() {
            return Err(match payee.status {
                AgentLifecycle::Throttled => SettldError::AgentThrottled {
                    agent_id: payee.agent_id.to_string(),
                },
                _ => SettldError::AgentSuspended {
                    agent_id: payee.agent_id.to_string(),
                },
            });
        }

        let run_id = RunId::new();
        let mut batch = WriteBatch::new();
        let mut settlement = None;
        let mut settlement_payload = Value::Null;

        if let Some(spec) = &input.settlement {
            let payer_wallet = self
                .store
                .get_wallet(tenant, &spec.payer_agent_id)
                .await?
                .ok_or_else(|| {
                    SettldError::not_found("WALLET_NOT_FOUND", spec.payer_agent_id.to_string())
                })?;
            let locked = settld_wallet::lock(&payer_wallet, spec.amount_cents, now)?;

            let record = Settlement {
                schema_version: Settlement::SCHEMA_VERSION.into(),
                tenant_id: tenant.clone(),
                settlement_id: SettlementId::new(),
                run_id: run_id.clone(),
                payer_agent_id: spec.payer_agent_id.clone(),
                payee_agent_id: input.agent_id.clone(),
                amount_cents: spec.amount_cents,
                currency: spec.currency.clone(),
                status: SettlementStatus::Locked,
                released_amount_cents: 0,
                refunded_amount_cents: 0,
                dispute_window_days: spec.dispute_window_days,
                dispute_window_ends_at: None,
                dispute_status: None,
                dispute_id: None,
                decision_status: DecisionStatus::Pending,
                decision_reason: None,
                decision: None,
                verdict_hash: None,
                created_at: now,
                updated_at: now,
            };
            settlement_payload = json!({
                "settlementId": record.settlement_id,
                "amountCents": record.amount_cents,
                "payerAgentId": record.payer_agent_id,
            });
            batch = batch
                .put_wallet(locked)
                .put_settlement(record.clone())
                .outbox(OutboxDraft::new(
                    "settlement.locked",
                    "settlement",
                    record.settlement_id.to_string(),
                    json!({
                        "settlementId": record.settlement_id,
                        "runId": run_id,
                        "amountCents": record.amount_cents,
                    }),
                ));
            settlement = Some(record);
        }

        let genesis = ChainedEventDraft::new(EventInput {
            stream_id: run_id.to_string(),
            event_type: run_events::RUN_CREATED.to_string(),
            actor: input.actor,
            payload: json!({
                "runId": run_id,
                "agentId": input.agent_id,
                "settlement": settlement_payload,
            }),
            at: now,
        })?
        .finalize(GENESIS_PREV_CHAIN_HASH, None)?;

        let run = Run {
            schema_version: Run::SCHEMA_VERSION.into(),
            tenant_id: tenant.clone(),
            run_id: run_id.clone(),
            agent_id: input.agent_id,
            status: RunStatus::Created,
            last_chain_hash: genesis.chain_hash.clone(),
            settlement_id: settlement.as_ref().map(|s| s.settlement_id.clone()),
            created_at: now,
            updated_at: now,
        };

        let batch = batch
            .put_run(run.clone())
            .append_event(EventScope::Run, GENESIS_PREV_CHAIN_HASH, genesis)
            .outbox(OutboxDraft::new(
                "run.created",
                "run",
                run_id.to_string(),
                json!({ "runId": run_id, "agentId": run.agent_id }),
            ));
        self.store.commit(tenant, batch).await?;
        info!(run = %run_id, "run created");
        Ok((run, settlement))
    }

    /// Append a typed event to a run's chain; terminal events drive the
    /// settlement resolution path in the same commit
    pub async fn append_run_event(
        &self,
        tenant: &TenantId,
        run_id: &RunId,
        input: AppendRunEvent,
        now: DateTime<Utc>,
    ) -> Result<AppendOutcome> {
        let mut run = self
            .store
            .get_run(tenant, run_id)
            .await?
            .ok_or_else(|| SettldError::not_found("RUN_NOT_FOUND", run_id.to_string()))?;

        // the head precondition is the serialization primitive: a stale
        // expected head must surface as the chain conflict, never as a
        // state error. The store re-checks atomically at commit time.
        if input.expected_prev_chain_hash != run.last_chain_hash {
            return Err(SettldError::ChainHashMismatch {
                stream_id: run_id.to_string(),
                expected: input.expected_prev_chain_hash,
                actual: run.last_chain_hash,
            });
        }

        let next_status = next_run_status(run.status, &input.event_type)?;

        let event = ChainedEventDraft::new(EventInput {
            stream_id: run_id.to_string(),
            event_type: input.event_type.clone(),
            actor: input.actor,
            payload: input.payload.clone(),
            at: now,
        })?
        .finalize(&input.expected_prev_chain_hash, None)?;

        run.status = next_status;
        run.last_chain_hash = event.chain_hash.clone();
        run.updated_at = now;

        let mut batch = WriteBatch::new()
            .append_event(
                EventScope::Run,
                input.expected_prev_chain_hash.clone(),
                event.clone(),
            )
            .put_run(run.clone());

        let mut settlement_out = None;
        if next_status.is_terminal() {
            batch = batch.outbox(OutboxDraft::new(
                "run.terminal",
                "run",
                run_id.to_string(),
                json!({ "runId": run_id, "status": run.status }),
            ));
            if let Some(settlement) = self.store.get_settlement_for_run(tenant, run_id).await? {
                if settlement.status == SettlementStatus::Locked
                    && settlement.decision_status == DecisionStatus::Pending
                {
                    let history = self
                        .store
                        .list_events(tenant, EventScope::Run, run_id.as_str())
                        .await?;
                    let verification =
                        policy::verification_from_events(&history, &input.payload);
                    let decision = policy::replay(
                        &input.event_type,
                        verification,
                        settlement.decision.as_ref(),
                    );
                    let (updated, ops) = self
                        .apply_decision(tenant, settlement, decision, now)
                        .await?;
                    batch = merge(batch, ops);
                    settlement_out = Some(updated);
                }
            }
        }

        self.store.commit(tenant, batch).await?;
        Ok(AppendOutcome {
            run,
            event,
            settlement: settlement_out,
        })
    }

    /// Apply a policy decision: execute immediately, defer behind a dispute
    /// window, or park for manual review
    async fn apply_decision(
        &self,
        tenant: &TenantId,
        mut settlement: Settlement,
        decision: SettlementDecision,
        now: DateTime<Utc>,
    ) -> Result<(Settlement, WriteBatch)> {
        settlement.decision_reason = Some(decision.reason_code.clone());
        settlement.updated_at = now;

        if !decision.should_auto_resolve {
            settlement.decision_status = DecisionStatus::ManualReviewRequired;
            settlement.decision = Some(decision);
            let batch = WriteBatch::new()
                .put_settlement(settlement.clone())
                .outbox(OutboxDraft::new(
                    "settlement.manual_review",
                    "settlement",
                    settlement.settlement_id.to_string(),
                    json!({
                        "settlementId": settlement.settlement_id,
                        "reasonCode": settlement.decision_reason,
                    }),
                ));
            return Ok((settlement, batch));
        }

        if let Some(days) = settlement.dispute_window_days {
            // funds stay escrowed until the window closes
            settlement.decision_status = DecisionStatus::AutoResolved;
            settlement.dispute_window_ends_at = Some(now + Duration::days(days as i64));
            settlement.decision = Some(decision);
            let batch = WriteBatch::new()
                .put_settlement(settlement.clone())
                .outbox(OutboxDraft::new(
                    "settlement.decision_recorded",
                    "settlement",
                    settlement.settlement_id.to_string(),
                    json!({
                        "settlementId": settlement.settlement_id,
                        "disputeWindowEndsAt": settlement.dispute_window_ends_at,
                    }),
                ));
            return Ok((settlement, batch));
        }

        let pct = decision.release_rate_pct;
        settlement.decision = Some(decision);
        settlement.decision_status = DecisionStatus::AutoResolved;
        self.execute_split(tenant, settlement, pct, now).await
    }

    /// Move escrowed funds per a release percentage and finalize the
    /// settlement status
    pub(crate) async fn execute_split(
        &self,
        tenant: &TenantId,
        mut settlement: Settlement,
        release_rate_pct: u8,
        now: DateTime<Utc>,
    ) -> Result<(Settlement, WriteBatch)> {
        if release_rate_pct > 100 {
            return Err(SettldError::validation(
                "VALIDATION_RELEASE_RATE_INVALID",
                format!("releaseRatePct {release_rate_pct} out of range"),
            ));
        }
        let released = settlement.amount_cents * release_rate_pct as i64 / 100;
        let refunded = settlement.amount_cents - released;

        let payer = self
            .store
            .get_wallet(tenant, &settlement.payer_agent_id)
            .await?
            .ok_or_else(|| {
                SettldError::not_found("WALLET_NOT_FOUND", settlement.payer_agent_id.to_string())
            })?;
        let payee = self
            .store
            .get_wallet(tenant, &settlement.payee_agent_id)
            .await?
            .ok_or_else(|| {
                SettldError::not_found("WALLET_NOT_FOUND", settlement.payee_agent_id.to_string())
            })?;

        let outcome = settld_wallet::split_release(
            &payer,
            &payee,
            settlement.amount_cents,
            released,
            refunded,
            now,
        )?;

        settlement.released_amount_cents = released;
        settlement.refunded_amount_cents = refunded;
        settlement.status = if released == settlement.amount_cents {
            SettlementStatus::Released
        } else if refunded == settlement.amount_cents {
            SettlementStatus::Refunded
        } else {
            SettlementStatus::Split
        };
        settlement.updated_at = now;

        let topic = match settlement.status {
            SettlementStatus::Released => "settlement.released",
            SettlementStatus::Refunded => "settlement.refunded",
            _ => "settlement.split",
        };
        let batch = WriteBatch::new()
            .put_wallet(outcome.payer_wallet)
            .put_wallet(outcome.payee_wallet)
            .put_settlement(settlement.clone())
            .outbox(OutboxDraft::new(
                topic,
                "settlement",
                settlement.settlement_id.to_string(),
                json!({
                    "settlementId": settlement.settlement_id,
                    "runId": settlement.run_id,
                    "releasedAmountCents": released,
                    "refundedAmountCents": refunded,
                }),
            ));
        info!(settlement = %settlement.settlement_id, status = ?settlement.status, "settlement resolved");
        Ok((settlement, batch))
    }

    /// Operator resolution after manual review. Single-shot: a settlement
    /// already out of `locked` rejects with `SETTLEMENT_ALREADY_RESOLVED`.
    pub async fn resolve_settlement(
        &self,
        tenant: &TenantId,
        run_id: &RunId,
        request: ResolveSettlement,
        now: DateTime<Utc>,
    ) -> Result<Settlement> {
        let settlement = self
            .store
            .get_settlement_for_run(tenant, run_id)
            .await?
            .ok_or_else(|| SettldError::not_found("SETTLEMENT_NOT_FOUND", run_id.to_string()))?;

        if settlement.status.is_resolved() {
            return Err(SettldError::SettlementAlreadyResolved {
                settlement_id: settlement.settlement_id.to_string(),
            });
        }
        if settlement.dispute_status == Some(DisputeStatus::Open)
            || settlement.dispute_status == Some(DisputeStatus::Escalated)
        {
            return Err(SettldError::Conflict {
                code: "SETTLEMENT_DISPUTED",
                message: "settlement is under an open dispute".into(),
            });
        }

        let pct = match request.status {
            SettlementStatus::Released => 100,
            SettlementStatus::Refunded => 0,
            SettlementStatus::Split => request.release_rate_pct,
            _ => {
                return Err(SettldError::validation(
                    "VALIDATION_STATUS_INVALID",
                    "manual resolution accepts released, refunded or split",
                ))
            }
        };

        let mut settlement = settlement;
        settlement.decision_status = DecisionStatus::ManualResolved;
        settlement.decision_reason = Some(format!("manual_resolved_by:{}", request.operator_id));
        let (resolved, batch) = self.execute_split(tenant, settlement, pct, now).await?;
        self.store.commit(tenant, batch).await?;
        Ok(resolved)
    }

    /// Execute recorded decisions whose dispute window has closed. Returns
    /// the number of settlements resolved.
    pub async fn close_due_windows(&self, tenant: &TenantId, now: DateTime<Utc>) -> Result<usize> {
        let due = self
            .store
            .list_settlements_due_window_close(tenant, now)
            .await?;
        let mut closed = 0;
        for settlement in due {
            let pct = settlement
                .decision
                .as_ref()
                .map(|d| d.release_rate_pct)
                .unwrap_or(0);
            let (_, batch) = self.execute_split(tenant, settlement, pct, now).await?;
            self.store.commit(tenant, batch).await?;
            closed += 1;
        }
        Ok(closed)
    }
}

/// Validate a run status transition driven by a typed event
fn next_run_status(current: RunStatus, event_type: &str) -> Result<RunStatus> {
    use run_events::*;
    let next = match (current, event_type) {
        (RunStatus::Created, RUN_STARTED) => RunStatus::Started,
        (RunStatus::Started, EVIDENCE_ADDED) => RunStatus::Started,
        (RunStatus::Started, RUN_COMPLETED) => RunStatus::Completed,
        (RunStatus::Created, RUN_FAILED) | (RunStatus::Started, RUN_FAILED) => RunStatus::Failed,
        (RunStatus::Created, RUN_CANCELLED) | (RunStatus::Started, RUN_CANCELLED) => {
            RunStatus::Cancelled
        }
        _ => {
            return Err(SettldError::Conflict {
                code: "RUN_STATE_INVALID",
                message: format!("event {event_type} is not valid in state {current:?}"),
            })
        }
    };
    Ok(next)
}

pub(crate) fn merge(mut left: WriteBatch, right: WriteBatch) -> WriteBatch {
    for op in right.into_ops() {
        left.push(op);
    }
    left
}

#[cfg(test)]
mod tests;
