//! Authority and delegation grant issuance, listing and revocation

use crate::auth::AuthContext;
use crate::error::ApiResult;
use crate::handlers::tenant;
use crate::{ApiError, AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use settld_authority::finalize_grant_hash;
use settld_store::WriteBatch;
use settld_types::*;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    pub grantor_id: String,
    pub grantee_agent_id: String,
    pub scope: GrantScope,
    pub spend_envelope: SpendEnvelope,
    #[serde(default)]
    pub parent_grant_hash: Option<String>,
    #[serde(default)]
    pub root_grant_hash: Option<String>,
    #[serde(default)]
    pub max_delegation_depth: Option<u32>,
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    #[serde(default = "default_revocable")]
    pub revocable: bool,
}

fn default_revocable() -> bool {
    true
}

async fn issue(
    state: &AppState,
    auth: &AuthContext,
    body: GrantRequest,
    kind: GrantKind,
) -> ApiResult<Grant> {
    let tenant = tenant(auth);
    let now = Utc::now();

    let grantee = AgentId::from_string(body.grantee_agent_id);
    state
        .store
        .get_agent(&tenant, &grantee)
        .await?
        .ok_or_else(|| ApiError(SettldError::not_found("AGENT_NOT_FOUND", grantee.to_string())))?;

    let (depth, max_delegation_depth) = match (kind, body.parent_grant_hash.as_deref()) {
        (GrantKind::Authority, _) => (0, body.max_delegation_depth.unwrap_or(3)),
        (GrantKind::Delegation, Some(parent_hash)) => {
            let mut parents = state.store.grants_by_hash(&tenant, parent_hash).await?;
            if parents.is_empty() {
                return Err(ApiError(SettldError::Authority {
                    code: AuthorityCode::RootNotFound,
                    message: format!("no grant found for parent hash {parent_hash}"),
                }));
            }
            let parent = parents.remove(0);
            (
                parent.chain_binding.depth + 1,
                parent.chain_binding.max_delegation_depth,
            )
        }
        (GrantKind::Delegation, None) => {
            return Err(ApiError(SettldError::validation(
                "VALIDATION_PARENT_GRANT_REQUIRED",
                "delegation grants require parentGrantHash",
            )))
        }
    };

    let mut grant = Grant {
        schema_version: Grant::schema_version_for(kind).into(),
        tenant_id: tenant.clone(),
        grant_id: GrantId::new(),
        kind,
        grantor_id: body.grantor_id,
        grantee_agent_id: grantee,
        scope: body.scope,
        spend_envelope: body.spend_envelope,
        chain_binding: ChainBinding {
            root_grant_hash: body.root_grant_hash,
            parent_grant_hash: body.parent_grant_hash,
            depth,
            max_delegation_depth,
        },
        validity: GrantValidity {
            issued_at: now,
            not_before: body.not_before.unwrap_or(now),
            expires_at: body.expires_at,
        },
        revocation: GrantRevocation {
            revocable: body.revocable,
            revoked_at: None,
            revocation_reason_code: None,
        },
        grant_hash: String::new(),
        created_at: now,
    };
    finalize_grant_hash(&mut grant)?;

    let topic = match kind {
        GrantKind::Authority => "grant.issued",
        GrantKind::Delegation => "grant.delegated",
    };
    let batch = WriteBatch::new().put_grant(grant.clone()).outbox(OutboxDraft::new(
        topic,
        "grant",
        grant.grant_id.to_string(),
        json!({
            "grantId": grant.grant_id,
            "grantHash": grant.grant_hash,
            "granteeAgentId": grant.grantee_agent_id,
        }),
    ));
    state.store.commit(&tenant, batch).await?;
    Ok(grant)
}

pub async fn create_authority(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<GrantRequest>,
) -> ApiResult<(StatusCode, Json<Grant>)> {
    let grant = issue(&state, &auth, body, GrantKind::Authority).await?;
    Ok((StatusCode::CREATED, Json(grant)))
}

pub async fn create_delegation(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<GrantRequest>,
) -> ApiResult<(StatusCode, Json<Grant>)> {
    let grant = issue(&state, &auth, body, GrantKind::Delegation).await?;
    Ok((StatusCode::CREATED, Json(grant)))
}

pub async fn list_authority(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Vec<Grant>>> {
    Ok(Json(
        state
            .store
            .list_grants(&tenant(&auth), GrantKind::Authority)
            .await?,
    ))
}

pub async fn list_delegation(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Vec<Grant>>> {
    Ok(Json(
        state
            .store
            .list_grants(&tenant(&auth), GrantKind::Delegation)
            .await?,
    ))
}

pub async fn get_grant(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Grant>> {
    let grant = state
        .store
        .get_grant(&tenant(&auth), &GrantId::from_string(id.clone()))
        .await?
        .ok_or_else(|| ApiError(SettldError::not_found("GRANT_NOT_FOUND", id)))?;
    Ok(Json(grant))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    #[serde(default)]
    pub reason_code: Option<String>,
}

pub async fn revoke_grant(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<RevokeRequest>,
) -> ApiResult<Json<Grant>> {
    let tenant = tenant(&auth);
    let mut grant = state
        .store
        .get_grant(&tenant, &GrantId::from_string(id.clone()))
        .await?
        .ok_or_else(|| ApiError(SettldError::not_found("GRANT_NOT_FOUND", id)))?;

    if !grant.revocation.revocable {
        return Err(ApiError(SettldError::Conflict {
            code: "GRANT_NOT_REVOCABLE",
            message: format!("grant {} was issued irrevocable", grant.grant_id),
        }));
    }
    if grant.revocation.is_revoked() {
        return Ok(Json(grant)); // idempotent
    }

    grant.revocation.revoked_at = Some(Utc::now());
    grant.revocation.revocation_reason_code = body.reason_code;

    let batch = WriteBatch::new().put_grant(grant.clone()).outbox(OutboxDraft::new(
        "grant.revoked",
        "grant",
        grant.grant_id.to_string(),
        json!({
            "grantId": grant.grant_id,
            "grantHash": grant.grant_hash,
            "reasonCode": grant.revocation.revocation_reason_code,
        }),
    ));
    state.store.commit(&tenant, batch).await?;
    Ok(Json(grant))
}
