//! Runs, chained events, settlements and disputes

use crate::auth::AuthContext;
use crate::error::ApiResult;
use crate::handlers::{expected_prev_from_headers, required, tenant};
use crate::{ApiError, AppState};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use settld_engine::dispute::{CloseDispute, OpenDispute};
use settld_engine::{AppendRunEvent, CreateRun, ResolveSettlement, SettlementSpec};
use settld_store::EventScope;
use settld_types::*;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementSpecBody {
    pub payer_agent_id: String,
    pub amount_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub dispute_window_days: Option<u32>,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunRequest {
    #[serde(default)]
    pub settlement: Option<SettlementSpecBody>,
    #[serde(default)]
    pub actor: Option<EventActor>,
}

pub async fn create_run(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(agent_id): Path<String>,
    Json(body): Json<CreateRunRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let tenant = tenant(&auth);
    let agent_id = AgentId::from_string(agent_id);
    let settlement = body.settlement.map(|s| SettlementSpec {
        payer_agent_id: AgentId::from_string(s.payer_agent_id),
        amount_cents: s.amount_cents,
        currency: s.currency,
        dispute_window_days: s.dispute_window_days,
    });
    let actor = body
        .actor
        .unwrap_or_else(|| EventActor::agent(agent_id.as_str()));

    let (run, settlement) = state
        .runs
        .create_run(
            &tenant,
            CreateRun {
                agent_id,
                actor,
                settlement,
            },
            Utc::now(),
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "run": run, "settlement": settlement })),
    ))
}

pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<Vec<Run>>> {
    let runs = state
        .store
        .list_runs_for_agent(&tenant(&auth), &AgentId::from_string(agent_id))
        .await?;
    Ok(Json(runs))
}

pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((_, run_id)): Path<(String, String)>,
) -> ApiResult<Json<Run>> {
    let run = state
        .store
        .get_run(&tenant(&auth), &RunId::from_string(run_id.clone()))
        .await?
        .ok_or_else(|| ApiError(SettldError::not_found("RUN_NOT_FOUND", run_id)))?;
    Ok(Json(run))
}

pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((_, run_id)): Path<(String, String)>,
) -> ApiResult<Json<Vec<ChainedEvent>>> {
    let events = state
        .store
        .list_events(&tenant(&auth), EventScope::Run, &run_id)
        .await?;
    Ok(Json(events))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendEventRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub actor: Option<EventActor>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub expected_prev_chain_hash: Option<String>,
}

pub async fn append_event(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((agent_id, run_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<AppendEventRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let expected_prev = body
        .expected_prev_chain_hash
        .or_else(|| expected_prev_from_headers(&headers))
        .ok_or_else(|| required("expectedPrevChainHash"))?;
    let actor = body
        .actor
        .unwrap_or_else(|| EventActor::agent(agent_id.as_str()));

    let outcome = state
        .runs
        .append_run_event(
            &tenant(&auth),
            &RunId::from_string(run_id),
            AppendRunEvent {
                event_type: body.event_type,
                actor,
                payload: body.payload,
                expected_prev_chain_hash: expected_prev,
            },
            Utc::now(),
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "event": outcome.event,
            "run": outcome.run,
            "settlement": outcome.settlement,
        })),
    ))
}

async fn settlement_for(
    state: &AppState,
    tenant: &TenantId,
    run_id: &str,
) -> ApiResult<Settlement> {
    state
        .store
        .get_settlement_for_run(tenant, &RunId::from_string(run_id))
        .await?
        .ok_or_else(|| ApiError(SettldError::not_found("SETTLEMENT_NOT_FOUND", run_id)))
        .map_err(Into::into)
}

pub async fn get_settlement(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Settlement>> {
    Ok(Json(settlement_for(&state, &tenant(&auth), &run_id).await?))
}

/// Verification view: the policy decision and its inputs
pub async fn get_verification(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let settlement = settlement_for(&state, &tenant(&auth), &run_id).await?;
    Ok(Json(json!({
        "runId": settlement.run_id,
        "settlementId": settlement.settlement_id,
        "decisionStatus": settlement.decision_status,
        "decision": settlement.decision,
        "verification": settlement.decision.as_ref().map(|d| json!({
            "status": d.verification_status,
            "reasonCode": d.reason_code,
            "policyVersion": d.policy_version,
        })),
    })))
}

/// Agreement view: the commercial terms bound into the settlement
pub async fn get_agreement(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let settlement = settlement_for(&state, &tenant(&auth), &run_id).await?;
    Ok(Json(json!({
        "runId": settlement.run_id,
        "payerAgentId": settlement.payer_agent_id,
        "payeeAgentId": settlement.payee_agent_id,
        "amountCents": settlement.amount_cents,
        "currency": settlement.currency,
        "disputeWindowDays": settlement.dispute_window_days,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub status: SettlementStatus,
    #[serde(default)]
    pub release_rate_pct: Option<u8>,
    #[serde(default)]
    pub operator_id: Option<String>,
}

pub async fn resolve_settlement(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(run_id): Path<String>,
    Json(body): Json<ResolveRequest>,
) -> ApiResult<Json<Settlement>> {
    let settlement = state
        .runs
        .resolve_settlement(
            &tenant(&auth),
            &RunId::from_string(run_id),
            ResolveSettlement {
                status: body.status,
                release_rate_pct: body.release_rate_pct.unwrap_or(0),
                operator_id: body.operator_id.unwrap_or_else(|| "operator".into()),
            },
            Utc::now(),
        )
        .await?;
    Ok(Json(settlement))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDisputeRequest {
    pub opened_by: String,
    pub reason_code: String,
}

pub async fn open_dispute(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(run_id): Path<String>,
    Json(body): Json<OpenDisputeRequest>,
) -> ApiResult<(StatusCode, Json<Dispute>)> {
    let dispute = state
        .runs
        .open_dispute(
            &tenant(&auth),
            &RunId::from_string(run_id),
            OpenDispute {
                opened_by: AgentId::from_string(body.opened_by),
                reason_code: body.reason_code,
            },
            Utc::now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(dispute)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputeEvidenceRequest {
    pub dispute_id: String,
    pub submitted_by: String,
    pub payload: Value,
}

pub async fn dispute_evidence(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(run_id): Path<String>,
    Json(body): Json<DisputeEvidenceRequest>,
) -> ApiResult<Json<Dispute>> {
    let dispute = state
        .runs
        .add_dispute_evidence(
            &tenant(&auth),
            &RunId::from_string(run_id),
            &DisputeId::from_string(body.dispute_id),
            AgentId::from_string(body.submitted_by),
            body.payload,
            Utc::now(),
        )
        .await?;
    Ok(Json(dispute))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalateRequest {
    pub dispute_id: String,
    pub level: DisputeLevel,
}

pub async fn escalate_dispute(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(run_id): Path<String>,
    Json(body): Json<EscalateRequest>,
) -> ApiResult<Json<Dispute>> {
    let dispute = state
        .runs
        .escalate_dispute(
            &tenant(&auth),
            &RunId::from_string(run_id),
            &DisputeId::from_string(body.dispute_id),
            body.level,
            Utc::now(),
        )
        .await?;
    Ok(Json(dispute))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseDisputeRequest {
    pub dispute_id: String,
    pub outcome: DisputeOutcome,
    #[serde(default)]
    pub release_rate_pct: Option<u8>,
    #[serde(default)]
    pub arbiter_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn close_dispute(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(run_id): Path<String>,
    Json(body): Json<CloseDisputeRequest>,
) -> ApiResult<Json<Value>> {
    let (dispute, settlement, adjustment) = state
        .runs
        .close_dispute(
            &tenant(&auth),
            &RunId::from_string(run_id),
            CloseDispute {
                dispute_id: DisputeId::from_string(body.dispute_id),
                outcome: body.outcome,
                release_rate_pct: body.release_rate_pct,
                arbiter_id: body.arbiter_id.unwrap_or_else(|| "arbiter".into()),
                reason: body.reason.unwrap_or_default(),
            },
            Utc::now(),
        )
        .await?;
    Ok(Json(json!({
        "dispute": dispute,
        "settlement": settlement,
        "adjustment": adjustment,
    })))
}
