//! Replay evaluation over stored tool-call artifacts
//!
//! Recomputes every hash binding for an agreement and its evidence so
//! operators can audit a call without trusting the stored hash fields.

use crate::{evidence_core_hash, ToolCallEngine};
use serde::Serialize;
use settld_crypto::hash_artifact_of;
use settld_types::*;

/// One evidence artifact's recheck result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceCheck {
    pub evidence_hash: Option<String>,
    pub recomputed_hash: String,
    pub hash_valid: bool,
}

/// The ops replay-evaluate answer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayEvaluation {
    pub agreement_hash: String,
    pub agreement_hash_valid: bool,
    pub evidence: Vec<EvidenceCheck>,
    pub hold_status: Option<HoldStatus>,
}

impl ToolCallEngine {
    /// Recompute hash bindings for an agreement and everything under it
    pub async fn replay_evaluate(
        &self,
        tenant: &TenantId,
        agreement_hash: &str,
    ) -> Result<ReplayEvaluation> {
        let agreement = self
            .store()
            .get_agreement(tenant, agreement_hash)
            .await?
            .ok_or_else(|| SettldError::not_found("AGREEMENT_NOT_FOUND", agreement_hash))?;

        let recomputed = hash_artifact_of(&agreement, "agreementHash")?;
        let agreement_hash_valid = agreement.agreement_hash.as_deref() == Some(recomputed.as_str());

        let mut evidence_checks = Vec::new();
        for evidence in self.store().list_evidence(tenant, agreement_hash).await? {
            let recomputed_hash = evidence_core_hash(&evidence)?;
            let hash_valid = evidence.evidence_hash.as_deref() == Some(recomputed_hash.as_str());
            evidence_checks.push(EvidenceCheck {
                evidence_hash: evidence.evidence_hash,
                recomputed_hash,
                hash_valid,
            });
        }

        // a hold, when present, is keyed by its own hash; find it through
        // the agreement binding
        let hold_status = self
            .store()
            .list_holds(tenant)
            .await?
            .into_iter()
            .find(|h| h.agreement_hash == agreement_hash)
            .map(|h| h.status);

        Ok(ReplayEvaluation {
            agreement_hash: agreement_hash.to_string(),
            agreement_hash_valid,
            evidence: evidence_checks,
            hold_status,
        })
    }
}
