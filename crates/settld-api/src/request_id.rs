//! Request id propagation
//!
//! Echoes `x-request-id` or generates one, exposes it to handlers through
//! request extensions, stamps it onto every response, and patches it into
//! JSON error envelopes so the wire shape is `{code, message, details?,
//! requestId}` without every handler threading it around.

use axum::{
    body::{to_bytes, Body},
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use uuid::Uuid;

use crate::REQUEST_ID_HEADER;

/// The request id resolved for the in-flight request
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

pub async fn layer(mut req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("req_{}", Uuid::new_v4()));

    req.extensions_mut().insert(RequestId(request_id.clone()));
    let response = next.run(req).await;
    let mut response = patch_error_body(response, &request_id).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Insert `requestId` into JSON error envelopes produced by [`crate::ApiError`]
async fn patch_error_body(response: Response, request_id: &str) -> Response {
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }
    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, 1 << 20).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };
    let patched = match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(mut map)) if map.contains_key("code") => {
            map.entry("requestId")
                .or_insert_with(|| Value::String(request_id.to_string()));
            serde_json::to_vec(&map).unwrap_or_else(|_| bytes.to_vec())
        }
        _ => bytes.to_vec(),
    };
    parts.headers.remove(axum::http::header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(patched))
}
