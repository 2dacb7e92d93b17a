//! Tool-call kernel ops surface and arbitration routes

use crate::auth::AuthContext;
use crate::error::ApiResult;
use crate::handlers::tenant;
use crate::{ApiError, AppState};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use settld_toolcall::{
    CreateAgreement, CreateHold, IssueVerdict, OpenHoldDispute, ReplayEvaluation,
};
use settld_types::*;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgreementRequest {
    pub tool_id: String,
    pub manifest_hash: String,
    pub call_id: String,
    pub input: Value,
    pub terms: AgreementTerms,
}

pub async fn create_agreement(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateAgreementRequest>,
) -> ApiResult<(StatusCode, Json<ToolCallAgreement>)> {
    let agreement = state
        .toolcalls
        .create_agreement(
            &tenant(&auth),
            CreateAgreement {
                tool_id: body.tool_id,
                manifest_hash: body.manifest_hash,
                call_id: body.call_id,
                input: body.input,
                terms: body.terms,
            },
            Utc::now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(agreement)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockHoldRequest {
    pub agreement_hash: String,
    pub receipt_hash: String,
    pub payer_agent_id: String,
    pub payee_agent_id: String,
    pub amount_cents: i64,
    pub holdback_bps: u32,
    pub challenge_window_ms: i64,
}

pub async fn lock_hold(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<LockHoldRequest>,
) -> ApiResult<(StatusCode, Json<FundingHold>)> {
    let hold = state
        .toolcalls
        .create_hold(
            &tenant(&auth),
            CreateHold {
                agreement_hash: body.agreement_hash,
                receipt_hash: body.receipt_hash,
                payer_agent_id: AgentId::from_string(body.payer_agent_id),
                payee_agent_id: AgentId::from_string(body.payee_agent_id),
                amount_cents: body.amount_cents,
                holdback_bps: body.holdback_bps,
                challenge_window_ms: body.challenge_window_ms,
            },
            Utc::now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(hold)))
}

pub async fn list_holds(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Vec<FundingHold>>> {
    Ok(Json(state.store.list_holds(&tenant(&auth)).await?))
}

pub async fn get_hold(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(hold_hash): Path<String>,
) -> ApiResult<Json<FundingHold>> {
    let hold = state
        .store
        .get_hold(&tenant(&auth), &hold_hash)
        .await?
        .ok_or_else(|| ApiError(SettldError::not_found("HOLD_NOT_FOUND", hold_hash)))?;
    Ok(Json(hold))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayQuery {
    pub agreement_hash: String,
}

pub async fn replay_evaluate(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ReplayQuery>,
) -> ApiResult<Json<ReplayEvaluation>> {
    let evaluation = state
        .toolcalls
        .replay_evaluate(&tenant(&auth), &query.agreement_hash)
        .await?;
    Ok(Json(evaluation))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenArbitrationRequest {
    pub hold_hash: String,
    pub disputant_agent_id: String,
    pub reason_code: String,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    pub signer_key_id: String,
    pub signature: String,
}

pub async fn open_arbitration(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<OpenArbitrationRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let (envelope, case) = state
        .toolcalls
        .open_dispute(
            &tenant(&auth),
            OpenHoldDispute {
                hold_hash: body.hold_hash,
                disputant_agent_id: AgentId::from_string(body.disputant_agent_id),
                reason_code: body.reason_code,
                evidence_refs: body.evidence_refs,
                signer_key_id: KeyId::from_string(body.signer_key_id),
                signature: body.signature,
            },
            Utc::now(),
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "envelope": envelope, "case": case })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictRequest {
    pub case_id: String,
    pub outcome: VerdictOutcome,
    #[serde(default)]
    pub release_rate_pct: Option<u8>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub arbiter_id: Option<String>,
}

pub async fn issue_verdict(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<VerdictRequest>,
) -> ApiResult<Json<Value>> {
    let (case, hold) = state
        .toolcalls
        .issue_verdict(
            &tenant(&auth),
            IssueVerdict {
                case_id: CaseId::from_string(body.case_id),
                outcome: body.outcome,
                release_rate_pct: body.release_rate_pct,
                reason: body.reason.unwrap_or_default(),
                arbiter_id: body.arbiter_id.unwrap_or_else(|| "arbiter".into()),
            },
            Utc::now(),
        )
        .await?;
    Ok(Json(json!({ "case": case, "hold": hold })))
}
