//! Request-level idempotency
//!
//! Mutating requests carrying `x-idempotency-key` are fingerprinted as
//! `sha256(canonical({method, path, body}))`. A stored record with the
//! same fingerprint replays the exact response bytes and status; a
//! different fingerprint under the same key is a 409. Snapshots persist
//! after the business effect commits, so a failed request never poisons
//! its key; expired records are treated as absent (lazy TTL).

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use settld_crypto::hash_canonical;
use settld_types::{IdempotencyRecord, SettldError};
use std::sync::Arc;

use crate::auth::AuthContext;
use crate::{ApiError, AppState, IDEMPOTENCY_KEY_HEADER};

/// Marker header on replayed responses
pub const REPLAYED_HEADER: &str = "x-settld-idempotent-replay";

const BODY_LIMIT: usize = 1 << 20;

pub async fn layer(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let is_mutation = matches!(
        *req.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );
    let key = req
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let (Some(key), true) = (key, is_mutation) else {
        return next.run(req).await;
    };
    let Some(auth) = req.extensions().get::<AuthContext>().cloned() else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let body_bytes = match to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return ApiError(SettldError::validation(
                "VALIDATION_BODY_INVALID",
                "request body could not be read",
            ))
            .into_response()
        }
    };

    let body_value: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&body_bytes) {
            Ok(value) => value,
            Err(_) => Value::String(settld_crypto::sha256_hex(&body_bytes)),
        }
    };
    let fingerprint_input = json!({
        "method": parts.method.as_str(),
        "path": parts.uri.path(),
        "body": body_value,
    });
    let fingerprint = match hash_canonical(&fingerprint_input) {
        Ok(fp) => fp,
        Err(err) => return ApiError(SettldError::from(err)).into_response(),
    };

    let now = Utc::now();
    match state.store.get_idempotency(&auth.tenant, &key).await {
        Ok(Some(record)) if !record.is_expired(now) => {
            return if record.request_fingerprint == fingerprint {
                replay(&record)
            } else {
                ApiError(SettldError::IdempotencyKeyConflict { key }).into_response()
            };
        }
        Ok(_) => {}
        Err(err) => return ApiError(err).into_response(),
    }

    let req = Request::from_parts(parts, Body::from(body_bytes));
    let response = next.run(req).await;

    // only successful effects are pinned to the key
    if !response.status().is_success() {
        return response;
    }

    let (resp_parts, resp_body) = response.into_parts();
    let resp_bytes = match to_bytes(resp_body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let record = IdempotencyRecord {
        tenant_id: auth.tenant.clone(),
        key: key.clone(),
        request_fingerprint: fingerprint.clone(),
        response_status: resp_parts.status.as_u16(),
        response_body: String::from_utf8_lossy(&resp_bytes).into_owned(),
        created_at: now,
        expires_at: now + Duration::seconds(IdempotencyRecord::DEFAULT_TTL_SECS),
    };
    match state
        .store
        .put_idempotency_if_absent(&auth.tenant, record)
        .await
    {
        // a racing request with the same key landed first; its snapshot is
        // the canonical one
        Ok(Some(existing)) if existing.request_fingerprint == fingerprint => {
            return replay(&existing)
        }
        Ok(_) => {}
        Err(err) => return ApiError(err).into_response(),
    }

    Response::from_parts(resp_parts, Body::from(resp_bytes))
}

fn replay(record: &IdempotencyRecord) -> Response {
    let status =
        StatusCode::from_u16(record.response_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::new(Body::from(record.response_body.clone()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("application/json"),
    );
    response
        .headers_mut()
        .insert(REPLAYED_HEADER, axum::http::HeaderValue::from_static("true"));
    response
}
