//! Settld API - the HTTP dispatcher
//!
//! Resolves the tenant, authenticates the caller, applies request-level
//! idempotency, routes into the domain engines and performs the single
//! domain-error → HTTP mapping at the boundary. Every response carries
//! `x-request-id`; SSE surfaces stream session events and public agent
//! cards.

pub mod state;
pub mod error;
pub mod auth;
pub mod idempotency;
pub mod request_id;
pub mod routes;
pub mod sse;
pub mod handlers;

pub use error::ApiError;
pub use routes::router;
pub use state::{ApiConfig, AppState};

/// Header carrying the tenant on every authenticated request
pub const TENANT_HEADER: &str = "x-proxy-tenant-id";
/// Ops token header
pub const OPS_TOKEN_HEADER: &str = "x-proxy-ops-token";
/// Static API key header
pub const API_KEY_HEADER: &str = "x-api-key";
/// Request id echo header
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Idempotency key header
pub const IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";
/// Optimistic chain head header accepted on append routes
pub const EXPECTED_PREV_HEADER: &str = "x-proxy-expected-prev-chain-hash";
/// Protocol version header
pub const PROTOCOL_HEADER: &str = "x-settld-protocol";
