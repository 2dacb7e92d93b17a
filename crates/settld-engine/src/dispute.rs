//! Dispute lifecycle over run settlements
//!
//! (none) → open → (+evidence)* → escalated(level) → closed(outcome).
//! Opening freezes the settlement; closing executes the verdict split and
//! records the verdict artifact hash on the settlement together with an
//! adjustment artifact describing the wallet deltas.

use crate::{merge, RunEngine};
use chrono::{DateTime, Utc};
use serde_json::json;
use settld_crypto::hash_artifact_of;
use settld_store::WriteBatch;
use settld_types::*;
use tracing::info;

/// Inputs to [`RunEngine::open_dispute`]
#[derive(Debug, Clone)]
pub struct OpenDispute {
    pub opened_by: AgentId,
    pub reason_code: String,
}

/// Inputs to [`RunEngine::close_dispute`]
#[derive(Debug, Clone)]
pub struct CloseDispute {
    pub dispute_id: DisputeId,
    pub outcome: DisputeOutcome,
    /// Required for `partial`; implied 0/100 otherwise
    pub release_rate_pct: Option<u8>,
    pub arbiter_id: String,
    pub reason: String,
}

/// The verdict artifact, hash-bound over its canonical core
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DisputeVerdict {
    pub schema_version: String,
    pub dispute_id: DisputeId,
    pub settlement_id: SettlementId,
    pub outcome: DisputeOutcome,
    pub release_rate_pct: u8,
    pub arbiter_id: String,
    pub reason: String,
    pub issued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict_hash: Option<String>,
}

impl DisputeVerdict {
    pub const SCHEMA_VERSION: &'static str = "DisputeVerdict.v1";
}

impl RunEngine {
    /// Open a dispute against a run's settlement. Allowed while the funds
    /// are still escrowed: locked, in manual review, or inside an open
    /// dispute window.
    pub async fn open_dispute(
        &self,
        tenant: &TenantId,
        run_id: &RunId,
        input: OpenDispute,
        now: DateTime<Utc>,
    ) -> Result<Dispute> {
        let mut settlement = self
            .store()
            .get_settlement_for_run(tenant, run_id)
            .await?
            .ok_or_else(|| SettldError::not_found("SETTLEMENT_NOT_FOUND", run_id.to_string()))?;

        if settlement.status.is_resolved() {
            return Err(SettldError::SettlementAlreadyResolved {
                settlement_id: settlement.settlement_id.to_string(),
            });
        }
        if settlement.dispute_status.is_some() {
            return Err(SettldError::Conflict {
                code: "DISPUTE_ALREADY_OPEN",
                message: format!(
                    "settlement {} already carries dispute {:?}",
                    settlement.settlement_id, settlement.dispute_id
                ),
            });
        }
        if let Some(ends_at) = settlement.dispute_window_ends_at {
            if now >= ends_at {
                return Err(SettldError::Conflict {
                    code: "DISPUTE_WINDOW_CLOSED",
                    message: "the dispute window for this settlement has ended".into(),
                });
            }
        }

        let dispute = Dispute {
            schema_version: Dispute::SCHEMA_VERSION.into(),
            tenant_id: tenant.clone(),
            dispute_id: DisputeId::new(),
            settlement_id: settlement.settlement_id.clone(),
            run_id: run_id.clone(),
            opened_by: input.opened_by,
            status: DisputeStatus::Open,
            level: DisputeLevel::L1Counterparty,
            reason_code: input.reason_code,
            evidence: Vec::new(),
            outcome: None,
            release_rate_pct: None,
            verdict_hash: None,
            opened_at: now,
            updated_at: now,
            closed_at: None,
        };

        settlement.status = SettlementStatus::Disputed;
        settlement.dispute_status = Some(DisputeStatus::Open);
        settlement.dispute_id = Some(dispute.dispute_id.clone());
        settlement.updated_at = now;

        let batch = WriteBatch::new()
            .put_dispute(dispute.clone())
            .put_settlement(settlement)
            .outbox(OutboxDraft::new(
                "dispute.opened",
                "settlement",
                dispute.settlement_id.to_string(),
                json!({
                    "disputeId": dispute.dispute_id,
                    "runId": run_id,
                    "reasonCode": dispute.reason_code,
                }),
            ));
        self.store().commit(tenant, batch).await?;
        info!(dispute = %dispute.dispute_id, run = %run_id, "dispute opened");
        Ok(dispute)
    }

    /// Attach evidence to an open or escalated dispute
    pub async fn add_dispute_evidence(
        &self,
        tenant: &TenantId,
        run_id: &RunId,
        dispute_id: &DisputeId,
        submitted_by: AgentId,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Dispute> {
        let mut dispute = self.load_open_dispute(tenant, run_id, dispute_id).await?;
        let payload_hash = settld_crypto::hash_canonical(&payload)?;
        dispute.evidence.push(DisputeEvidence {
            submitted_by,
            payload,
            payload_hash,
            submitted_at: now,
        });
        dispute.updated_at = now;

        let batch = WriteBatch::new().put_dispute(dispute.clone()).outbox(OutboxDraft::new(
            "dispute.evidence",
            "settlement",
            dispute.settlement_id.to_string(),
            json!({
                "disputeId": dispute.dispute_id,
                "evidenceCount": dispute.evidence.len(),
            }),
        ));
        self.store().commit(tenant, batch).await?;
        Ok(dispute)
    }

    /// Escalate a dispute one or more levels up the ladder
    pub async fn escalate_dispute(
        &self,
        tenant: &TenantId,
        run_id: &RunId,
        dispute_id: &DisputeId,
        level: DisputeLevel,
        now: DateTime<Utc>,
    ) -> Result<Dispute> {
        let mut dispute = self.load_open_dispute(tenant, run_id, dispute_id).await?;
        if level <= dispute.level {
            return Err(SettldError::Conflict {
                code: "DISPUTE_ESCALATION_INVALID",
                message: format!(
                    "dispute {} is already at level {:?}",
                    dispute.dispute_id, dispute.level
                ),
            });
        }
        dispute.level = level;
        dispute.status = DisputeStatus::Escalated;
        dispute.updated_at = now;

        let mut settlement = self
            .store()
            .get_settlement(tenant, &dispute.settlement_id)
            .await?
            .ok_or_else(|| {
                SettldError::not_found("SETTLEMENT_NOT_FOUND", dispute.settlement_id.to_string())
            })?;
        settlement.dispute_status = Some(DisputeStatus::Escalated);
        settlement.updated_at = now;

        let batch = WriteBatch::new()
            .put_dispute(dispute.clone())
            .put_settlement(settlement)
            .outbox(OutboxDraft::new(
                "dispute.escalated",
                "settlement",
                dispute.settlement_id.to_string(),
                json!({ "disputeId": dispute.dispute_id, "level": dispute.level }),
            ));
        self.store().commit(tenant, batch).await?;
        Ok(dispute)
    }

    /// Close a dispute with a verdict. The verdict's release rate drives a
    /// final release/refund split; the verdict hash lands on the settlement
    /// and the wallet deltas are recorded as an adjustment artifact.
    pub async fn close_dispute(
        &self,
        tenant: &TenantId,
        run_id: &RunId,
        input: CloseDispute,
        now: DateTime<Utc>,
    ) -> Result<(Dispute, Settlement, SettlementAdjustment)> {
        let mut dispute = self
            .load_open_dispute(tenant, run_id, &input.dispute_id)
            .await?;

        let release_rate_pct = match input.outcome {
            DisputeOutcome::Accepted => 0,
            DisputeOutcome::Rejected => 100,
            DisputeOutcome::Partial => input.release_rate_pct.ok_or_else(|| {
                SettldError::validation(
                    "VALIDATION_RELEASE_RATE_REQUIRED",
                    "partial verdicts require releaseRatePct",
                )
            })?,
        };
        if release_rate_pct > 100 {
            return Err(SettldError::validation(
                "VALIDATION_RELEASE_RATE_INVALID",
                format!("releaseRatePct {release_rate_pct} out of range"),
            ));
        }

        let mut verdict = DisputeVerdict {
            schema_version: DisputeVerdict::SCHEMA_VERSION.into(),
            dispute_id: dispute.dispute_id.clone(),
            settlement_id: dispute.settlement_id.clone(),
            outcome: input.outcome,
            release_rate_pct,
            arbiter_id: input.arbiter_id,
            reason: input.reason,
            issued_at: now,
            verdict_hash: None,
        };
        let verdict_hash = hash_artifact_of(&verdict, "verdictHash")?;
        verdict.verdict_hash = Some(verdict_hash.clone());

        let mut settlement = self
            .store()
            .get_settlement(tenant, &dispute.settlement_id)
            .await?
            .ok_or_else(|| {
                SettldError::not_found("SETTLEMENT_NOT_FOUND", dispute.settlement_id.to_string())
            })?;
        settlement.dispute_status = Some(DisputeStatus::Closed);
        settlement.verdict_hash = Some(verdict_hash.clone());
        // release the freeze before executing the split
        settlement.status = SettlementStatus::Locked;

        let (resolved, split_batch) = self
            .execute_split(tenant, settlement, release_rate_pct, now)
            .await?;

        dispute.status = DisputeStatus::Closed;
        dispute.outcome = Some(input.outcome);
        dispute.release_rate_pct = Some(release_rate_pct);
        dispute.verdict_hash = Some(verdict_hash.clone());
        dispute.closed_at = Some(now);
        dispute.updated_at = now;

        let adjustment = SettlementAdjustment {
            schema_version: SettlementAdjustment::SCHEMA_VERSION.into(),
            settlement_id: resolved.settlement_id.clone(),
            dispute_id: dispute.dispute_id.clone(),
            released_delta_cents: resolved.released_amount_cents,
            refunded_delta_cents: resolved.refunded_amount_cents,
            release_rate_pct,
            verdict_hash: verdict_hash.clone(),
            adjusted_at: now,
            adjustment_hash: None,
        };
        let mut adjustment = adjustment;
        adjustment.adjustment_hash = Some(hash_artifact_of(&adjustment, "adjustmentHash")?);

        let batch = merge(
            split_batch,
            WriteBatch::new().put_dispute(dispute.clone()).outbox(OutboxDraft::new(
                "dispute.closed",
                "settlement",
                resolved.settlement_id.to_string(),
                json!({
                    "disputeId": dispute.dispute_id,
                    "outcome": dispute.outcome,
                    "verdictHash": verdict_hash,
                    "adjustment": adjustment,
                }),
            )),
        );
        self.store().commit(tenant, batch).await?;
        info!(dispute = %dispute.dispute_id, outcome = ?dispute.outcome, "dispute closed");
        Ok((dispute, resolved, adjustment))
    }

    async fn load_open_dispute(
        &self,
        tenant: &TenantId,
        run_id: &RunId,
        dispute_id: &DisputeId,
    ) -> Result<Dispute> {
        let dispute = self
            .store()
            .get_dispute(tenant, dispute_id)
            .await?
            .ok_or_else(|| SettldError::not_found("DISPUTE_NOT_FOUND", dispute_id.to_string()))?;
        if &dispute.run_id != run_id {
            return Err(SettldError::Conflict {
                code: "DISPUTE_RUN_MISMATCH",
                message: format!("dispute {dispute_id} does not belong to run {run_id}"),
            });
        }
        if dispute.status == DisputeStatus::Closed {
            return Err(SettldError::Conflict {
                code: "DISPUTE_ALREADY_CLOSED",
                message: format!("dispute {dispute_id} is closed"),
            });
        }
        Ok(dispute)
    }
}
