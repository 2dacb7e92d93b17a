//! Route handlers, grouped by aggregate family

pub mod agents;
pub mod runs;
pub mod grants;
pub mod work_orders;
pub mod sessions;
pub mod toolcalls;
pub mod x402;
pub mod exports;

use crate::auth::AuthContext;
use crate::ApiError;
use axum::http::HeaderMap;
use settld_types::{SettldError, TenantId};

/// Tenant of the authenticated request
pub(crate) fn tenant(auth: &AuthContext) -> TenantId {
    auth.tenant.clone()
}

/// Read the optimistic chain-head header when a body omits it
pub(crate) fn expected_prev_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(crate::EXPECTED_PREV_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// 400 for bodies the handler cannot accept
pub(crate) fn required(field: &'static str) -> ApiError {
    ApiError(SettldError::validation(
        "VALIDATION_FIELD_REQUIRED",
        format!("{field} is required"),
    ))
}
