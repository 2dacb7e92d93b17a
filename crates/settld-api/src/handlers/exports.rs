//! Delivery ACKs, the ops delivery listing, the well-known keyset and
//! health

use crate::auth::AuthContext;
use crate::error::ApiResult;
use crate::handlers::tenant;
use crate::{ApiError, AppState};
use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use settld_store::DeliveryFilter;
use settld_types::*;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
    pub delivery_id: String,
}

/// Receiver ACK for a webhook delivery; duplicates are a no-op
pub async fn ack(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<AckRequest>,
) -> ApiResult<Json<DeliveryRecord>> {
    let record = state
        .store
        .ack_delivery(
            &tenant(&auth),
            &DeliveryId::from_string(body.delivery_id),
            Utc::now(),
        )
        .await?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct DeliveryQuery {
    #[serde(default)]
    pub state: Option<String>,
}

pub async fn list_deliveries(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<DeliveryQuery>,
) -> ApiResult<Json<Vec<DeliveryRecord>>> {
    let filter = match query.state.as_deref() {
        None => DeliveryFilter::All,
        Some(value) => DeliveryFilter::parse(value).ok_or_else(|| {
            ApiError(SettldError::validation(
                "VALIDATION_STATE_INVALID",
                format!("unknown delivery state filter {value:?}"),
            ))
        })?,
    };
    let deliveries = state
        .store
        .list_deliveries(&tenant(&auth), filter)
        .await?;
    Ok(Json(deliveries))
}

/// The published keyset, unauthenticated
pub async fn well_known_keys(State(state): State<Arc<AppState>>) -> Json<PublishedKeyset> {
    Json(state.ring.published())
}

/// Rotate the platform signer: the old active key moves into the bounded
/// `previous` history and the persisted keyset is rewritten
pub async fn rotate_keys(
    State(state): State<Arc<AppState>>,
    Extension(_auth): Extension<AuthContext>,
) -> ApiResult<Json<PublishedKeyset>> {
    let stored = state.ring.rotate(settld_crypto::KeyPair::generate());
    state
        .store
        .commit(
            &TenantId::from(PLATFORM_TENANT),
            settld_store::WriteBatch::new().put_keyset(stored),
        )
        .await?;
    Ok(Json(state.ring.published()))
}

/// Liveness plus a store ping
pub async fn healthz(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    state.store.ping().await?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintApiKeyRequest {
    pub label: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Mint a bearer credential for the tenant. The plaintext secret is
/// returned exactly once; only its SHA-256 is stored.
pub async fn mint_api_key(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<MintApiKeyRequest>,
) -> ApiResult<Json<Value>> {
    let tenant = tenant(&auth);
    let key_id = KeyId::new();
    let secret = hex::encode(settld_crypto::sha256(
        format!("{}:{}", key_id, uuid::Uuid::new_v4()).as_bytes(),
    ));
    let record = ApiKey {
        key_id: key_id.clone(),
        tenant_id: tenant.clone(),
        label: body.label,
        secret_hash: settld_crypto::sha256_hex(secret.as_bytes()),
        scopes: body.scopes,
        created_at: Utc::now(),
        revoked: false,
    };
    state
        .store
        .commit(
            &tenant,
            settld_store::WriteBatch::new().put_api_key(record),
        )
        .await?;
    Ok(Json(json!({
        "keyId": key_id,
        "secret": secret,
        "bearer": format!("{key_id}.{secret}"),
    })))
}
