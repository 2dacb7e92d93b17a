//! Tenant resolution and authentication
//!
//! Tenant comes from `x-proxy-tenant-id`. Credentials are, in order of
//! precedence: an ops token (`x-proxy-ops-token`), a bearer key
//! (`Authorization: Bearer <keyId>.<secret>` checked against the stored
//! SHA-256 secret hash), or a static per-tenant `x-api-key`. All secret
//! comparisons are constant-time. Public routes (well-known keys, health,
//! public SSE) skip authentication.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use settld_crypto::sha256_hex;
use settld_types::{KeyId, SettldError, TenantId};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::{ApiError, AppState, API_KEY_HEADER, OPS_TOKEN_HEADER, TENANT_HEADER};

/// Who the dispatcher authenticated
#[derive(Debug, Clone)]
pub enum AuthPrincipal {
    Ops,
    ApiKey(KeyId),
    StaticKey,
}

/// Resolved per-request auth context
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub tenant: TenantId,
    pub principal: AuthPrincipal,
}

fn header<'a>(req: &'a Request<Body>, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

fn is_public_path(path: &str) -> bool {
    path.starts_with("/.well-known/") || path == "/healthz" || path.starts_with("/public/")
}

pub async fn layer(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if is_public_path(&path) {
        return next.run(req).await;
    }

    let Some(tenant) = header(&req, TENANT_HEADER).filter(|t| !t.is_empty()) else {
        return ApiError(SettldError::validation(
            "VALIDATION_TENANT_REQUIRED",
            format!("{TENANT_HEADER} header is required"),
        ))
        .into_response();
    };
    let tenant = TenantId::from_string(tenant);

    match authenticate(&state, &tenant, &req).await {
        Ok(principal) => {
            req.extensions_mut().insert(AuthContext { tenant, principal });
            next.run(req).await
        }
        Err(err) => ApiError(err).into_response(),
    }
}

async fn authenticate(
    state: &AppState,
    tenant: &TenantId,
    req: &Request<Body>,
) -> Result<AuthPrincipal, SettldError> {
    if let Some(token) = header(req, OPS_TOKEN_HEADER) {
        if constant_time_contains(&state.config.ops_tokens, token) {
            return Ok(AuthPrincipal::Ops);
        }
        return Err(SettldError::Unauthenticated);
    }

    if let Some(authorization) = header(req, "authorization") {
        let Some(bearer) = authorization.strip_prefix("Bearer ") else {
            return Err(SettldError::Unauthenticated);
        };
        let Some((key_id, secret)) = bearer.split_once('.') else {
            return Err(SettldError::Unauthenticated);
        };
        let key = state
            .store
            .get_api_key(tenant, &KeyId::from_string(key_id))
            .await?
            .ok_or(SettldError::Unauthenticated)?;
        if key.revoked {
            return Err(SettldError::Unauthenticated);
        }
        let candidate = sha256_hex(secret.as_bytes());
        if bool::from(candidate.as_bytes().ct_eq(key.secret_hash.as_bytes())) {
            return Ok(AuthPrincipal::ApiKey(key.key_id));
        }
        return Err(SettldError::Unauthenticated);
    }

    if let Some(api_key) = header(req, API_KEY_HEADER) {
        let known = state
            .config
            .static_api_keys
            .get(tenant.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        if constant_time_contains(known, api_key) {
            return Ok(AuthPrincipal::StaticKey);
        }
        return Err(SettldError::Unauthenticated);
    }

    Err(SettldError::Unauthenticated)
}

fn constant_time_contains<S: AsRef<str>>(known: &[S], candidate: &str) -> bool {
    let mut matched = false;
    for entry in known {
        matched |= bool::from(entry.as_ref().as_bytes().ct_eq(candidate.as_bytes()));
    }
    matched
}
