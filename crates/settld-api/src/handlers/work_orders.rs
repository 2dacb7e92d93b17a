//! Work order surface

use crate::auth::AuthContext;
use crate::error::ApiResult;
use crate::handlers::tenant;
use crate::{ApiError, AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use settld_engine::work_order::CreateWorkOrder;
use settld_types::*;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub buyer_agent_id: String,
    pub seller_agent_id: String,
    pub description: String,
    pub amount_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateRequest>,
) -> ApiResult<(StatusCode, Json<WorkOrder>)> {
    let order = state
        .work_orders
        .create(
            &tenant(&auth),
            CreateWorkOrder {
                buyer_agent_id: AgentId::from_string(body.buyer_agent_id),
                seller_agent_id: AgentId::from_string(body.seller_agent_id),
                description: body.description,
                amount_cents: body.amount_cents,
                currency: body.currency,
            },
            Utc::now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkOrder>> {
    let order = state
        .store
        .get_work_order(&tenant(&auth), &WorkOrderId::from_string(id.clone()))
        .await?
        .ok_or_else(|| ApiError(SettldError::not_found("WORK_ORDER_NOT_FOUND", id)))?;
    Ok(Json(order))
}

pub async fn accept(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkOrder>> {
    let order = state
        .work_orders
        .accept(&tenant(&auth), &WorkOrderId::from_string(id), Utc::now())
        .await?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRequest {
    pub units: i64,
    pub unit_type: String,
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn progress(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<ProgressRequest>,
) -> ApiResult<Json<WorkOrder>> {
    let order = state
        .work_orders
        .progress(
            &tenant(&auth),
            &WorkOrderId::from_string(id),
            body.units,
            body.unit_type,
            body.note,
            Utc::now(),
        )
        .await?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUpRequest {
    pub amount_cents: i64,
}

pub async fn top_up(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<TopUpRequest>,
) -> ApiResult<Json<WorkOrder>> {
    let order = state
        .work_orders
        .top_up(
            &tenant(&auth),
            &WorkOrderId::from_string(id),
            body.amount_cents,
            Utc::now(),
        )
        .await?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub output_refs: Vec<String>,
}

pub async fn complete(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<CompleteRequest>,
) -> ApiResult<Json<Value>> {
    let (order, receipt) = state
        .work_orders
        .complete(
            &tenant(&auth),
            &WorkOrderId::from_string(id),
            body.summary,
            body.output_refs,
            Utc::now(),
        )
        .await?;
    Ok(Json(json!({ "workOrder": order, "receipt": receipt })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    #[serde(default = "full_release")]
    pub release_rate_pct: u8,
}

fn full_release() -> u8 {
    100
}

pub async fn settle(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<SettleRequest>,
) -> ApiResult<Json<WorkOrder>> {
    let order = state
        .work_orders
        .settle(
            &tenant(&auth),
            &WorkOrderId::from_string(id),
            body.release_rate_pct,
            Utc::now(),
        )
        .await?;
    Ok(Json(order))
}

pub async fn metering(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<MeteringRecord>>> {
    let metering = state
        .work_orders
        .metering(&tenant(&auth), &WorkOrderId::from_string(id))
        .await?;
    Ok(Json(metering))
}

pub async fn receipts(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<CompletionReceipt>>> {
    let receipts = state
        .store
        .list_receipts_for_work_order(&tenant(&auth), &WorkOrderId::from_string(id))
        .await?;
    Ok(Json(receipts))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationRequest {
    pub attestor_id: String,
    pub payload: Value,
}

/// Attach a hash-bound third-party attestation to a work order
pub async fn attest(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<AttestationRequest>,
) -> ApiResult<(StatusCode, Json<Attestation>)> {
    let tenant = tenant(&auth);
    let work_order_id = WorkOrderId::from_string(id);
    state
        .store
        .get_work_order(&tenant, &work_order_id)
        .await?
        .ok_or_else(|| {
            ApiError(SettldError::not_found(
                "WORK_ORDER_NOT_FOUND",
                work_order_id.to_string(),
            ))
        })?;

    let mut attestation = Attestation {
        schema_version: Attestation::SCHEMA_VERSION.into(),
        tenant_id: tenant.clone(),
        attestation_id: AttestationId::new(),
        subject_type: "work_order".into(),
        subject_id: work_order_id.to_string(),
        attestor_id: body.attestor_id,
        payload: body.payload,
        issued_at: Utc::now(),
        attestation_hash: None,
    };
    attestation.attestation_hash = Some(settld_crypto::hash_artifact_of(
        &attestation,
        "attestationHash",
    )?);

    let batch = settld_store::WriteBatch::new()
        .put_attestation(attestation.clone())
        .outbox(OutboxDraft::new(
            "work_order.attested",
            "work_order",
            attestation.subject_id.clone(),
            json!({
                "attestationId": attestation.attestation_id,
                "attestationHash": attestation.attestation_hash,
            }),
        ));
    state.store.commit(&tenant, batch).await?;
    Ok((StatusCode::CREATED, Json(attestation)))
}

pub async fn attestations(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Attestation>>> {
    let list = state
        .store
        .list_attestations_for(&tenant(&auth), "work_order", &id)
        .await?;
    Ok(Json(list))
}
