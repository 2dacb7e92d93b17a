//! x402 gate: payment gates, authorization, agent lifecycle

use crate::auth::AuthContext;
use crate::error::ApiResult;
use crate::handlers::tenant;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use settld_engine::gate::{AuthorizePayment, CreateGate};
use settld_types::*;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGateRequest {
    pub payer_agent_id: String,
    pub payee_agent_id: String,
    pub amount_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub tool_id: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

pub async fn create_gate(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateGateRequest>,
) -> ApiResult<(StatusCode, Json<Gate>)> {
    let gate = state
        .gates
        .create_gate(
            &tenant(&auth),
            CreateGate {
                payer_agent_id: AgentId::from_string(body.payer_agent_id),
                payee_agent_id: AgentId::from_string(body.payee_agent_id),
                amount_cents: body.amount_cents,
                currency: body.currency,
                tool_id: body.tool_id,
                provider_id: body.provider_id,
            },
            Utc::now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(gate)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizePaymentRequest {
    pub gate_id: String,
    pub grant_id: String,
    #[serde(default)]
    pub risk_class: Option<String>,
}

pub async fn authorize_payment(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<AuthorizePaymentRequest>,
) -> ApiResult<Json<PaymentAuthorization>> {
    let authorization = state
        .gates
        .authorize_payment(
            &tenant(&auth),
            AuthorizePayment {
                gate_id: GateId::from_string(body.gate_id),
                grant_id: GrantId::from_string(body.grant_id),
                risk_class: body.risk_class,
                require_signer_key: state.config.require_signer_key,
            },
            Utc::now(),
        )
        .await?;
    Ok(Json(authorization))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleRequest {
    pub status: AgentLifecycle,
}

pub async fn set_lifecycle(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<LifecycleRequest>,
) -> ApiResult<Json<AgentIdentity>> {
    let identity = state
        .runs
        .set_agent_lifecycle(
            &tenant(&auth),
            &AgentId::from_string(id),
            body.status,
            Utc::now(),
        )
        .await?;
    Ok(Json(identity))
}
