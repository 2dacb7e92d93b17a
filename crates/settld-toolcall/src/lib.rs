//! Settld Toolcall - the tool-call settlement kernel
//!
//! A parallel settlement path for single tool invocations: a hash-bound
//! agreement fixes the terms, signed evidence proves execution, and a
//! funding hold pins the payment through a challenge window. The non-held
//! share pays out immediately; the holdback releases when the window
//! passes undisputed, or goes to arbitration when a signed dispute
//! envelope freezes it.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use settld_crypto::{
    hash_artifact_of, hash_canonical, sign_hash_hex, verify_hash_hex, verifying_key_from_pem,
    KeyPair,
};
use settld_store::{Store, WriteBatch};
use settld_types::*;
use std::sync::Arc;
use tracing::info;

mod replay;
pub use replay::{EvidenceCheck, ReplayEvaluation};

/// Inputs to [`ToolCallEngine::create_agreement`]
#[derive(Debug, Clone)]
pub struct CreateAgreement {
    pub tool_id: String,
    pub manifest_hash: String,
    pub call_id: String,
    pub input: Value,
    pub terms: AgreementTerms,
}

/// Inputs to [`ToolCallEngine::sign_evidence`]
#[derive(Debug, Clone)]
pub struct SignEvidence {
    pub agreement_hash: String,
    pub output: Value,
    pub metrics: Value,
    pub signer_key_id: KeyId,
}

/// Inputs to [`ToolCallEngine::create_hold`]
#[derive(Debug, Clone)]
pub struct CreateHold {
    pub agreement_hash: String,
    pub receipt_hash: String,
    pub payer_agent_id: AgentId,
    pub payee_agent_id: AgentId,
    pub amount_cents: i64,
    pub holdback_bps: u32,
    pub challenge_window_ms: i64,
}

/// Inputs to [`ToolCallEngine::open_dispute`]
#[derive(Debug, Clone)]
pub struct OpenHoldDispute {
    pub hold_hash: String,
    pub disputant_agent_id: AgentId,
    pub reason_code: String,
    pub evidence_refs: Vec<String>,
    pub signer_key_id: KeyId,
    pub signature: String,
}

/// Inputs to [`ToolCallEngine::issue_verdict`]
#[derive(Debug, Clone)]
pub struct IssueVerdict {
    pub case_id: CaseId,
    pub outcome: VerdictOutcome,
    pub release_rate_pct: Option<u8>,
    pub reason: String,
    pub arbiter_id: String,
}

/// The tool-call kernel
#[derive(Clone)]
pub struct ToolCallEngine {
    store: Arc<dyn Store>,
}

impl ToolCallEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Fix the terms of one tool call into a hash-bound agreement
    pub async fn create_agreement(
        &self,
        tenant: &TenantId,
        input: CreateAgreement,
        now: DateTime<Utc>,
    ) -> Result<ToolCallAgreement> {
        if input.terms.amount_cents <= 0 {
            return Err(SettldError::validation(
                "VALIDATION_AMOUNT_INVALID",
                "agreement amount must be positive",
            ));
        }
        validate_holdback(input.terms.holdback_bps, input.terms.challenge_window_ms)?;

        let input_hash = hash_canonical(&input.input)?;
        let mut agreement = ToolCallAgreement {
            schema_version: ToolCallAgreement::SCHEMA_VERSION.into(),
            tenant_id: tenant.clone(),
            tool_id: input.tool_id,
            manifest_hash: input.manifest_hash,
            call_id: input.call_id,
            input_hash,
            terms: input.terms,
            created_at: now,
            agreement_hash: None,
        };
        agreement.agreement_hash = Some(hash_artifact_of(&agreement, "agreementHash")?);

        let batch = WriteBatch::new()
            .put_agreement(agreement.clone())
            .outbox(OutboxDraft::new(
                "toolcall.agreement_created",
                "toolcall",
                agreement.agreement_hash.clone().unwrap_or_default(),
                json!({
                    "agreementHash": agreement.agreement_hash,
                    "toolId": agreement.tool_id,
                    "callId": agreement.call_id,
                }),
            ));
        self.store.commit(tenant, batch).await?;
        Ok(agreement)
    }

    /// Sign execution evidence under an agreement. The evidence hash is
    /// computed over the core with the signature blank, then signed.
    pub async fn sign_evidence(
        &self,
        tenant: &TenantId,
        input: SignEvidence,
        signer: &KeyPair,
        now: DateTime<Utc>,
    ) -> Result<ToolCallEvidence> {
        self.require_agreement(tenant, &input.agreement_hash).await?;

        let output_hash = hash_canonical(&input.output)?;
        let mut evidence = ToolCallEvidence {
            schema_version: ToolCallEvidence::SCHEMA_VERSION.into(),
            tenant_id: tenant.clone(),
            agreement_hash: input.agreement_hash,
            output_hash,
            metrics: input.metrics,
            signer_key_id: input.signer_key_id,
            signature: String::new(),
            created_at: now,
            evidence_hash: None,
        };
        let evidence_hash = evidence_core_hash(&evidence)?;
        evidence.signature = sign_hash_hex(signer, &evidence_hash)?;
        evidence.evidence_hash = Some(evidence_hash);

        let batch = WriteBatch::new()
            .put_evidence(evidence.clone())
            .outbox(OutboxDraft::new(
                "toolcall.evidence_signed",
                "toolcall",
                evidence.agreement_hash.clone(),
                json!({
                    "agreementHash": evidence.agreement_hash,
                    "evidenceHash": evidence.evidence_hash,
                    "outputHash": evidence.output_hash,
                }),
            ));
        self.store.commit(tenant, batch).await?;
        Ok(evidence)
    }

    /// Lock funds under an agreement. The non-held share releases to the
    /// payee immediately; `heldAmountCents = amount * holdbackBps / 10000`
    /// stays escrowed through the challenge window.
    pub async fn create_hold(
        &self,
        tenant: &TenantId,
        input: CreateHold,
        now: DateTime<Utc>,
    ) -> Result<FundingHold> {
        validate_holdback(input.holdback_bps, input.challenge_window_ms)?;
        let agreement = self.require_agreement(tenant, &input.agreement_hash).await?;
        if agreement.terms.amount_cents != input.amount_cents {
            return Err(SettldError::validation(
                "VALIDATION_AMOUNT_INVALID",
                format!(
                    "hold amount {} does not match agreed amount {}",
                    input.amount_cents, agreement.terms.amount_cents
                ),
            ));
        }

        let held_amount_cents = input.amount_cents * input.holdback_bps as i64 / 10_000;
        let immediate = input.amount_cents - held_amount_cents;

        let payer = self
            .store
            .get_wallet(tenant, &input.payer_agent_id)
            .await?
            .ok_or_else(|| {
                SettldError::not_found("WALLET_NOT_FOUND", input.payer_agent_id.to_string())
            })?;
        let payee = self
            .store
            .get_wallet(tenant, &input.payee_agent_id)
            .await?
            .ok_or_else(|| {
                SettldError::not_found("WALLET_NOT_FOUND", input.payee_agent_id.to_string())
            })?;

        let mut payer_next = settld_wallet::lock(&payer, input.amount_cents, now)?;
        let mut payee_next = payee;
        if immediate > 0 {
            let outcome = settld_wallet::release(&payer_next, &payee_next, immediate, now)?;
            payer_next = outcome.payer_wallet;
            payee_next = outcome.payee_wallet;
        }

        let status = if held_amount_cents == 0 {
            HoldStatus::Released
        } else {
            HoldStatus::Locked
        };
        let mut hold = FundingHold {
            schema_version: FundingHold::SCHEMA_VERSION.into(),
            tenant_id: tenant.clone(),
            agreement_hash: input.agreement_hash,
            receipt_hash: input.receipt_hash,
            payer_agent_id: input.payer_agent_id,
            payee_agent_id: input.payee_agent_id,
            amount_cents: input.amount_cents,
            held_amount_cents,
            currency: agreement.terms.currency.clone(),
            holdback_bps: input.holdback_bps,
            challenge_window_ms: input.challenge_window_ms,
            status,
            created_at: now,
            challenge_window_ends_at: now + Duration::milliseconds(input.challenge_window_ms),
            resolved_at: if held_amount_cents == 0 { Some(now) } else { None },
            dispute_envelope_hash: None,
            hold_hash: None,
        };
        hold.hold_hash = Some(hash_artifact_of(&hold, "holdHash")?);

        let mut batch = WriteBatch::new().put_wallet(payer_next);
        if immediate > 0 {
            batch = batch.put_wallet(payee_next);
        }
        let batch = batch.put_hold(hold.clone()).outbox(OutboxDraft::new(
            "hold.locked",
            "hold",
            hold.hold_hash.clone().unwrap_or_default(),
            json!({
                "holdHash": hold.hold_hash,
                "heldAmountCents": hold.held_amount_cents,
                "challengeWindowEndsAt": hold.challenge_window_ends_at,
            }),
        ));
        self.store.commit(tenant, batch).await?;
        info!(hold = ?hold.hold_hash, held = held_amount_cents, "funding hold created");
        Ok(hold)
    }

    /// Auto-release locked holds whose challenge window has passed.
    /// Returns the number of holds released.
    pub async fn release_due_holds(&self, tenant: &TenantId, now: DateTime<Utc>) -> Result<usize> {
        let due = self.store.list_holds_due_release(tenant, now).await?;
        let mut released = 0;
        for mut hold in due {
            let payer = self
                .store
                .get_wallet(tenant, &hold.payer_agent_id)
                .await?
                .ok_or_else(|| {
                    SettldError::not_found("WALLET_NOT_FOUND", hold.payer_agent_id.to_string())
                })?;
            let payee = self
                .store
                .get_wallet(tenant, &hold.payee_agent_id)
                .await?
                .ok_or_else(|| {
                    SettldError::not_found("WALLET_NOT_FOUND", hold.payee_agent_id.to_string())
                })?;
            let outcome =
                settld_wallet::release(&payer, &payee, hold.held_amount_cents, now)?;

            hold.status = HoldStatus::Released;
            hold.resolved_at = Some(now);
            let batch = WriteBatch::new()
                .put_wallet(outcome.payer_wallet)
                .put_wallet(outcome.payee_wallet)
                .put_hold(hold.clone())
                .outbox(OutboxDraft::new(
                    "hold.released",
                    "hold",
                    hold.hold_hash.clone().unwrap_or_default(),
                    json!({
                        "holdHash": hold.hold_hash,
                        "releasedCents": hold.held_amount_cents,
                    }),
                ));
            self.store.commit(tenant, batch).await?;
            released += 1;
        }
        Ok(released)
    }

    /// Freeze a hold with a signed dispute envelope and open an
    /// arbitration case
    pub async fn open_dispute(
        &self,
        tenant: &TenantId,
        input: OpenHoldDispute,
        now: DateTime<Utc>,
    ) -> Result<(DisputeOpenEnvelope, ArbitrationCase)> {
        let mut hold = self.require_hold(tenant, &input.hold_hash).await?;
        if hold.status != HoldStatus::Locked {
            return Err(SettldError::Conflict {
                code: "HOLD_NOT_DISPUTABLE",
                message: format!("hold is {:?}", hold.status),
            });
        }
        if now >= hold.challenge_window_ends_at {
            return Err(SettldError::Conflict {
                code: "CHALLENGE_WINDOW_CLOSED",
                message: "the challenge window for this hold has ended".into(),
            });
        }

        let mut envelope = DisputeOpenEnvelope {
            schema_version: DisputeOpenEnvelope::SCHEMA_VERSION.into(),
            tenant_id: tenant.clone(),
            hold_hash: input.hold_hash.clone(),
            disputant_agent_id: input.disputant_agent_id.clone(),
            reason_code: input.reason_code,
            evidence_refs: input.evidence_refs,
            signer_key_id: input.signer_key_id,
            signature: input.signature,
            opened_at: now,
            envelope_hash: None,
        };
        let envelope_hash = envelope_core_hash(&envelope)?;
        envelope.envelope_hash = Some(envelope_hash.clone());

        // verify the disputant's signature when a signer key is registered
        if let Some(key) = self
            .store
            .get_signer_key(tenant, &input.disputant_agent_id)
            .await?
        {
            let verifying = verifying_key_from_pem(&key.public_key_pem)?;
            let valid = verify_hash_hex(&verifying, &envelope_hash, &envelope.signature)?;
            if !valid {
                return Err(SettldError::validation(
                    "VALIDATION_SIGNATURE_INVALID",
                    "dispute envelope signature does not verify",
                ));
            }
        }

        hold.status = HoldStatus::Disputed;
        hold.dispute_envelope_hash = Some(envelope_hash.clone());

        let case = ArbitrationCase {
            schema_version: ArbitrationCase::SCHEMA_VERSION.into(),
            tenant_id: tenant.clone(),
            case_id: CaseId::new(),
            hold_hash: input.hold_hash,
            envelope_hash,
            status: CaseStatus::Open,
            verdict: None,
            opened_at: now,
            updated_at: now,
        };

        let batch = WriteBatch::new()
            .put_hold(hold)
            .put_case(case.clone())
            .outbox(OutboxDraft::new(
                "arbitration.opened",
                "hold",
                case.hold_hash.clone(),
                json!({
                    "caseId": case.case_id,
                    "holdHash": case.hold_hash,
                    "envelopeHash": case.envelope_hash,
                }),
            ));
        self.store.commit(tenant, batch).await?;
        info!(case = %case.case_id, "arbitration case opened");
        Ok((envelope, case))
    }

    /// Translate an arbiter's verdict into wallet moves over the held
    /// amount and settle the hold
    pub async fn issue_verdict(
        &self,
        tenant: &TenantId,
        input: IssueVerdict,
        now: DateTime<Utc>,
    ) -> Result<(ArbitrationCase, FundingHold)> {
        let mut case = self
            .store
            .get_case(tenant, &input.case_id)
            .await?
            .ok_or_else(|| SettldError::not_found("CASE_NOT_FOUND", input.case_id.to_string()))?;
        if case.status == CaseStatus::VerdictIssued {
            return Err(SettldError::Conflict {
                code: "VERDICT_ALREADY_ISSUED",
                message: format!("case {} already carries a verdict", case.case_id),
            });
        }

        let release_rate_pct = match input.outcome {
            VerdictOutcome::Accepted => 0,
            VerdictOutcome::Rejected => 100,
            VerdictOutcome::Partial => input.release_rate_pct.ok_or_else(|| {
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

        let mut hold = self.require_hold(tenant, &case.hold_hash).await?;
        if hold.status != HoldStatus::Disputed {
            return Err(SettldError::Conflict {
                code: "HOLD_NOT_DISPUTED",
                message: format!("hold is {:?}", hold.status),
            });
        }

        let released = hold.held_amount_cents * release_rate_pct as i64 / 100;
        let refunded = hold.held_amount_cents - released;

        let payer = self
            .store
            .get_wallet(tenant, &hold.payer_agent_id)
            .await?
            .ok_or_else(|| {
                SettldError::not_found("WALLET_NOT_FOUND", hold.payer_agent_id.to_string())
            })?;
        let payee = self
            .store
            .get_wallet(tenant, &hold.payee_agent_id)
            .await?
            .ok_or_else(|| {
                SettldError::not_found("WALLET_NOT_FOUND", hold.payee_agent_id.to_string())
            })?;
        let outcome = settld_wallet::split_release(
            &payer,
            &payee,
            hold.held_amount_cents,
            released,
            refunded,
            now,
        )?;

        let mut verdict = ArbitrationVerdict {
            outcome: input.outcome,
            release_rate_pct,
            reason: input.reason,
            arbiter_id: input.arbiter_id,
            issued_at: now,
            verdict_hash: None,
        };
        verdict.verdict_hash = Some(hash_artifact_of(&verdict, "verdictHash")?);

        case.status = CaseStatus::VerdictIssued;
        case.verdict = Some(verdict.clone());
        case.updated_at = now;

        hold.status = HoldStatus::Settled;
        hold.resolved_at = Some(now);

        let batch = WriteBatch::new()
            .put_wallet(outcome.payer_wallet)
            .put_wallet(outcome.payee_wallet)
            .put_case(case.clone())
            .put_hold(hold.clone())
            .outbox(OutboxDraft::new(
                "arbitration.verdict",
                "hold",
                case.hold_hash.clone(),
                json!({
                    "caseId": case.case_id,
                    "outcome": verdict.outcome,
                    "releaseRatePct": verdict.release_rate_pct,
                    "verdictHash": verdict.verdict_hash,
                    "releasedCents": released,
                    "refundedCents": refunded,
                }),
            ));
        self.store.commit(tenant, batch).await?;
        info!(case = %case.case_id, outcome = ?verdict.outcome, "verdict issued");
        Ok((case, hold))
    }

    async fn require_agreement(
        &self,
        tenant: &TenantId,
        agreement_hash: &str,
    ) -> Result<ToolCallAgreement> {
        self.store
            .get_agreement(tenant, agreement_hash)
            .await?
            .ok_or_else(|| SettldError::not_found("AGREEMENT_NOT_FOUND", agreement_hash))
    }

    async fn require_hold(&self, tenant: &TenantId, hold_hash: &str) -> Result<FundingHold> {
        self.store
            .get_hold(tenant, hold_hash)
            .await?
            .ok_or_else(|| SettldError::not_found("HOLD_NOT_FOUND", hold_hash))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}

fn validate_holdback(holdback_bps: u32, challenge_window_ms: i64) -> Result<()> {
    if holdback_bps > 10_000 {
        return Err(SettldError::validation(
            "VALIDATION_HOLDBACK_INVALID",
            format!("holdbackBps {holdback_bps} out of [0, 10000]"),
        ));
    }
    if challenge_window_ms < 0 {
        return Err(SettldError::validation(
            "VALIDATION_CHALLENGE_WINDOW_INVALID",
            "challengeWindowMs must be ≥ 0",
        ));
    }
    Ok(())
}

/// Evidence hash: canonical core with the hash omitted and the signature
/// blanked, so the signature can cover the hash itself
pub fn evidence_core_hash(evidence: &ToolCallEvidence) -> Result<String> {
    let mut core = evidence.clone();
    core.signature = String::new();
    core.evidence_hash = None;
    Ok(hash_artifact_of(&core, "evidenceHash")?)
}

/// Envelope hash mirrors the evidence rule
pub fn envelope_core_hash(envelope: &DisputeOpenEnvelope) -> Result<String> {
    let mut core = envelope.clone();
    core.signature = String::new();
    core.envelope_hash = None;
    Ok(hash_artifact_of(&core, "envelopeHash")?)
}

#[cfg(test)]
mod tests;
