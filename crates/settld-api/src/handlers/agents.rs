//! Agent registration, wallets and the public card stream

use crate::auth::AuthContext;
use crate::error::ApiResult;
use crate::handlers::tenant;
use crate::sse::CardStreamItem;
use crate::{ApiError, AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Extension, Json,
};
use chrono::Utc;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use settld_store::WriteBatch;
use settld_types::*;
use std::convert::Infallible;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgentRequest {
    pub display_name: String,
    pub owner: AgentOwner,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub public_key_pem: Option<String>,
    /// Card visibility; defaults to tenant-only
    #[serde(default)]
    pub public: bool,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<RegisterAgentRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if body.display_name.trim().is_empty() {
        return Err(ApiError(SettldError::validation(
            "VALIDATION_DISPLAY_NAME_REQUIRED",
            "displayName must not be empty",
        )));
    }
    let tenant = tenant(&auth);
    let now = Utc::now();
    let (identity, wallet) = state
        .runs
        .register_agent(
            &tenant,
            body.display_name,
            body.owner,
            body.capabilities,
            body.public_key_pem,
            now,
        )
        .await?;

    let card = AgentCard {
        schema_version: AgentCard::SCHEMA_VERSION.into(),
        tenant_id: tenant.clone(),
        agent_id: identity.agent_id.clone(),
        display_name: identity.display_name.clone(),
        visibility: if body.public {
            CardVisibility::Public
        } else {
            CardVisibility::Tenant
        },
        capabilities: identity.capabilities.clone(),
        endpoint: None,
        updated_at: now,
    };
    state
        .store
        .commit(&tenant, WriteBatch::new().put_agent_card(card.clone()))
        .await?;
    if card.visibility == CardVisibility::Public {
        state.hub.publish_card(CardStreamItem {
            tenant: tenant.clone(),
            card,
        });
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({ "agent": identity, "wallet": wallet })),
    ))
}

pub async fn get_agent(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<AgentIdentity>> {
    let agent = state
        .store
        .get_agent(&tenant(&auth), &AgentId::from_string(id.clone()))
        .await?
        .ok_or_else(|| ApiError(SettldError::not_found("AGENT_NOT_FOUND", id)))?;
    Ok(Json(agent))
}

pub async fn get_wallet(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<AgentWallet>> {
    let wallet = state
        .store
        .get_wallet(&tenant(&auth), &AgentId::from_string(id.clone()))
        .await?
        .ok_or_else(|| ApiError(SettldError::not_found("WALLET_NOT_FOUND", id)))?;
    Ok(Json(wallet))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditRequest {
    pub amount_cents: i64,
}

pub async fn credit_wallet(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<CreditRequest>,
) -> ApiResult<Json<AgentWallet>> {
    let wallet = state
        .runs
        .credit_wallet(
            &tenant(&auth),
            &AgentId::from_string(id),
            body.amount_cents,
            Utc::now(),
        )
        .await?;
    Ok(Json(wallet))
}

/// Public SSE stream of agent-card upserts: replays current public cards,
/// then follows live publishes for the tenant
pub async fn stream_cards(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    // public route: tenant comes from the header without authentication
    let tenant = headers
        .get(crate::TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(TenantId::from)
        .ok_or_else(|| {
            ApiError(SettldError::validation(
                "VALIDATION_TENANT_REQUIRED",
                "tenant header is required",
            ))
        })?;

    let existing = state.store.list_public_agent_cards(&tenant).await?;
    let mut live = state.hub.subscribe_cards();

    let stream = async_stream::stream! {
        for card in existing {
            yield Ok(card_event(&card));
        }
        while let Ok(item) = live.recv().await {
            if item.tenant == tenant {
                yield Ok(card_event(&item.card));
            }
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn card_event(card: &AgentCard) -> Event {
    Event::default()
        .id(card.agent_id.to_string())
        .event("agent-card")
        .data(serde_json::to_string(card).unwrap_or_else(|_| "{}".into()))
}
