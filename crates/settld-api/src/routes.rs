//! Route table
//!
//! Layer order (outermost first): request id → auth/tenant → idempotency.

use crate::{auth, handlers, idempotency, request_id, AppState};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the full dispatcher
pub fn router(state: Arc<AppState>) -> Router {
    let router: Router<Arc<AppState>> = Router::new()
        // agents and wallets
        .route("/agents/register", post(handlers::agents::register))
        .route("/agents/:id", get(handlers::agents::get_agent))
        .route("/agents/:id/wallet", get(handlers::agents::get_wallet))
        .route(
            "/agents/:id/wallet/credit",
            post(handlers::agents::credit_wallet),
        )
        // runs and their chained events
        .route(
            "/agents/:id/runs",
            post(handlers::runs::create_run).get(handlers::runs::list_runs),
        )
        .route("/agents/:id/runs/:run_id", get(handlers::runs::get_run))
        .route(
            "/agents/:id/runs/:run_id/events",
            get(handlers::runs::list_events).post(handlers::runs::append_event),
        )
        // authority / delegation grants
        .route(
            "/authority-grants",
            post(handlers::grants::create_authority).get(handlers::grants::list_authority),
        )
        .route("/authority-grants/:id", get(handlers::grants::get_grant))
        .route(
            "/authority-grants/:id/revoke",
            post(handlers::grants::revoke_grant),
        )
        .route(
            "/delegation-grants",
            post(handlers::grants::create_delegation).get(handlers::grants::list_delegation),
        )
        .route("/delegation-grants/:id", get(handlers::grants::get_grant))
        .route(
            "/delegation-grants/:id/revoke",
            post(handlers::grants::revoke_grant),
        )
        // work orders
        .route("/work-orders", post(handlers::work_orders::create))
        .route("/work-orders/:id", get(handlers::work_orders::get_order))
        .route("/work-orders/:id/accept", post(handlers::work_orders::accept))
        .route(
            "/work-orders/:id/progress",
            post(handlers::work_orders::progress),
        )
        .route("/work-orders/:id/topUp", post(handlers::work_orders::top_up))
        .route(
            "/work-orders/:id/complete",
            post(handlers::work_orders::complete),
        )
        .route("/work-orders/:id/settle", post(handlers::work_orders::settle))
        .route(
            "/work-orders/:id/metering",
            get(handlers::work_orders::metering),
        )
        .route(
            "/work-orders/:id/receipts",
            get(handlers::work_orders::receipts),
        )
        .route(
            "/work-orders/:id/attestations",
            post(handlers::work_orders::attest).get(handlers::work_orders::attestations),
        )
        // sessions
        .route("/sessions", post(handlers::sessions::create))
        .route("/sessions/:id", get(handlers::sessions::get_session))
        .route(
            "/sessions/:id/events",
            get(handlers::sessions::list_events).post(handlers::sessions::append_event),
        )
        .route(
            "/sessions/:id/events/stream",
            get(handlers::sessions::stream_events),
        )
        .route(
            "/sessions/:id/replay-pack",
            get(handlers::sessions::replay_pack),
        )
        .route(
            "/sessions/:id/transcript",
            get(handlers::sessions::transcript),
        )
        // public discovery
        .route(
            "/public/agent-cards/stream",
            get(handlers::agents::stream_cards),
        )
        // x402 gate
        .route("/x402/gate/create", post(handlers::x402::create_gate))
        .route(
            "/x402/authorize-payment",
            post(handlers::x402::authorize_payment),
        )
        .route(
            "/x402/agents/:id/lifecycle",
            post(handlers::x402::set_lifecycle),
        )
        // tool-call kernel (ops surface)
        .route(
            "/ops/tool-calls/agreements",
            post(handlers::toolcalls::create_agreement),
        )
        .route(
            "/ops/tool-calls/holds/lock",
            post(handlers::toolcalls::lock_hold),
        )
        .route("/ops/tool-calls/holds", get(handlers::toolcalls::list_holds))
        .route(
            "/ops/tool-calls/holds/:hold_hash",
            get(handlers::toolcalls::get_hold),
        )
        .route(
            "/ops/tool-calls/replay-evaluate",
            get(handlers::toolcalls::replay_evaluate),
        )
        .route(
            "/tool-calls/arbitration/open",
            post(handlers::toolcalls::open_arbitration),
        )
        .route(
            "/tool-calls/arbitration/verdict",
            post(handlers::toolcalls::issue_verdict),
        )
        // run settlement and disputes
        .route(
            "/runs/:run_id/settlement",
            get(handlers::runs::get_settlement),
        )
        .route(
            "/runs/:run_id/settlement/resolve",
            post(handlers::runs::resolve_settlement),
        )
        .route(
            "/runs/:run_id/verification",
            get(handlers::runs::get_verification),
        )
        .route("/runs/:run_id/agreement", get(handlers::runs::get_agreement))
        .route(
            "/runs/:run_id/dispute/open",
            post(handlers::runs::open_dispute),
        )
        .route(
            "/runs/:run_id/dispute/evidence",
            post(handlers::runs::dispute_evidence),
        )
        .route(
            "/runs/:run_id/dispute/escalate",
            post(handlers::runs::escalate_dispute),
        )
        .route(
            "/runs/:run_id/dispute/close",
            post(handlers::runs::close_dispute),
        )
        // delivery plumbing
        .route("/exports/ack", post(handlers::exports::ack))
        .route("/ops/deliveries", get(handlers::exports::list_deliveries))
        .route("/ops/keys/rotate", post(handlers::exports::rotate_keys))
        .route("/ops/api-keys", post(handlers::exports::mint_api_key))
        // edges
        .route(
            "/.well-known/settld-keys.json",
            get(handlers::exports::well_known_keys),
        )
        .route("/healthz", get(handlers::exports::healthz));

    // layers: innermost runs last
    router
        .layer(middleware::from_fn_with_state(state.clone(), auth::layer))
        .with_state(state)
}
