//! HTTP-level tests driving the dispatcher through `tower::ServiceExt`

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use settld_api::{router, ApiConfig, AppState};
use settld_crypto::{KeyPair, SignerRing};
use settld_store::MemStore;
use std::sync::Arc;
use tower::ServiceExt;

const TENANT: &str = "tenant_http";
const OPS_TOKEN: &str = "ops-secret-token";

fn app() -> Router {
    let store = Arc::new(MemStore::new());
    let ring = SignerRing::new(KeyPair::from_seed("api-test-seed"));
    let config = ApiConfig {
        ops_tokens: vec![OPS_TOKEN.to_string()],
        ..ApiConfig::default()
    };
    router(AppState::new(store, ring, config))
}

fn request(method: &str, path: &str, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("x-proxy-tenant-id", TENANT)
        .header("x-proxy-ops-token", OPS_TOKEN);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value, axum::http::HeaderMap) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value, headers)
}

async fn register_agent(app: &Router, name: &str) -> String {
    let (status, body, _) = send(
        app,
        request(
            "POST",
            "/agents/register",
            Some(json!({
                "displayName": name,
                "owner": { "type": "organization", "id": "org_1" },
                "capabilities": ["work"],
                "public": true,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["agent"]["agentId"].as_str().unwrap().to_string()
}

async fn credit(app: &Router, agent: &str, amount: i64) {
    let (status, _, _) = send(
        app,
        request(
            "POST",
            &format!("/agents/{agent}/wallet/credit"),
            Some(json!({ "amountCents": amount })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn tenant_header_is_required() {
    let app = app();
    let req = Request::builder()
        .method("GET")
        .uri("/agents/agent_missing")
        .header("x-proxy-ops-token", OPS_TOKEN)
        .body(Body::empty())
        .unwrap();
    let (status, body, headers) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_TENANT_REQUIRED");
    // every response carries a request id, errors embed it too
    assert!(headers.contains_key("x-request-id"));
    assert!(body["requestId"].is_string());
}

#[tokio::test]
async fn missing_credentials_are_401() {
    let app = app();
    let req = Request::builder()
        .method("GET")
        .uri("/agents/agent_missing")
        .header("x-proxy-tenant-id", TENANT)
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTH_UNAUTHENTICATED");
}

#[tokio::test]
async fn minted_bearer_keys_authenticate() {
    let app = app();
    let (status, minted, _) = send(
        &app,
        request("POST", "/ops/api-keys", Some(json!({ "label": "ci" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let bearer = minted["bearer"].as_str().unwrap().to_string();

    // the bearer credential works without the ops token
    let req = Request::builder()
        .method("GET")
        .uri("/ops/deliveries")
        .header("x-proxy-tenant-id", TENANT)
        .header("authorization", format!("Bearer {bearer}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    // a corrupted secret does not
    let req = Request::builder()
        .method("GET")
        .uri("/ops/deliveries")
        .header("x-proxy-tenant-id", TENANT)
        .header("authorization", format!("Bearer {bearer}xx"))
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTH_UNAUTHENTICATED");
}

#[tokio::test]
async fn request_id_is_echoed() {
    let app = app();
    let mut req = request("GET", "/healthz", None);
    req.headers_mut()
        .insert("x-request-id", "req_custom_42".parse().unwrap());
    let (_, _, headers) = send(&app, req).await;
    assert_eq!(headers["x-request-id"], "req_custom_42");
}

#[tokio::test]
async fn well_known_keys_are_public() {
    let app = app();
    let req = Request::builder()
        .method("GET")
        .uri("/.well-known/settld-keys.json")
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["schemaVersion"], "Keyset.v1");
    assert_eq!(body["keys"][0]["algorithm"], "ed25519");
    assert_eq!(body["keys"][0]["status"], "active");
}

#[tokio::test]
async fn first_verified_run_over_http() {
    let app = app();
    let payer = register_agent(&app, "buyer").await;
    let payee = register_agent(&app, "worker").await;
    credit(&app, &payer, 5000).await;

    let (status, body, _) = send(
        &app,
        request(
            "POST",
            &format!("/agents/{payee}/runs"),
            Some(json!({
                "settlement": {
                    "payerAgentId": payer,
                    "amountCents": 1250,
                }
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let run_id = body["run"]["runId"].as_str().unwrap().to_string();
    let mut head = body["run"]["lastChainHash"].as_str().unwrap().to_string();

    for (event_type, payload) in [
        ("RUN_STARTED", json!({})),
        ("EVIDENCE_ADDED", json!({ "artifact": "s3://out" })),
        ("RUN_COMPLETED", json!({})),
    ] {
        let (status, body, _) = send(
            &app,
            request(
                "POST",
                &format!("/agents/{payee}/runs/{run_id}/events"),
                Some(json!({
                    "type": event_type,
                    "payload": payload,
                    "expectedPrevChainHash": head,
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "append {event_type}");
        head = body["event"]["chainHash"].as_str().unwrap().to_string();
    }

    let (_, run, _) = send(&app, request("GET", &format!("/agents/{payee}/runs/{run_id}"), None)).await;
    assert_eq!(run["status"], "completed");

    let (_, settlement, _) =
        send(&app, request("GET", &format!("/runs/{run_id}/settlement"), None)).await;
    assert_eq!(settlement["status"], "released");
    assert_eq!(settlement["releasedAmountCents"], 1250);

    let (_, verification, _) =
        send(&app, request("GET", &format!("/runs/{run_id}/verification"), None)).await;
    assert_eq!(verification["verification"]["status"], "green");

    let (_, payer_wallet, _) =
        send(&app, request("GET", &format!("/agents/{payer}/wallet"), None)).await;
    assert_eq!(payer_wallet["availableCents"], 3750);
    assert_eq!(payer_wallet["escrowLockedCents"], 0);

    let (_, payee_wallet, _) =
        send(&app, request("GET", &format!("/agents/{payee}/wallet"), None)).await;
    assert_eq!(payee_wallet["availableCents"], 1250);

    let (_, events, _) = send(
        &app,
        request("GET", &format!("/agents/{payee}/runs/{run_id}/events"), None),
    )
    .await;
    assert_eq!(events.as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn stale_chain_head_is_a_409() {
    let app = app();
    let payer = register_agent(&app, "buyer").await;
    let payee = register_agent(&app, "worker").await;
    credit(&app, &payer, 1000).await;

    let (_, body, _) = send(
        &app,
        request("POST", &format!("/agents/{payee}/runs"), Some(json!({}))),
    )
    .await;
    let run_id = body["run"]["runId"].as_str().unwrap().to_string();
    let head = body["run"]["lastChainHash"].as_str().unwrap().to_string();

    let append = |payload: Value| {
        request(
            "POST",
            &format!("/agents/{payee}/runs/{run_id}/events"),
            Some(payload),
        )
    };
    let (status, started, _) = send(
        &app,
        append(json!({ "type": "RUN_STARTED", "expectedPrevChainHash": head })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let new_head = started["event"]["chainHash"].as_str().unwrap().to_string();

    // a second writer races on the consumed head with an event that is
    // valid for the run's current state: the chain precondition is what
    // rejects it, with a 409 and the observed head in the details
    let (status, body, _) = send(
        &app,
        append(json!({ "type": "EVIDENCE_ADDED", "expectedPrevChainHash": head })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CHAIN_HASH_MISMATCH");
    assert_eq!(body["details"]["actualHead"], new_head.as_str());
    assert_eq!(body["details"]["expectedPrevChainHash"], head.as_str());

    let (_, events, _) = send(
        &app,
        request("GET", &format!("/agents/{payee}/runs/{run_id}/events"), None),
    )
    .await;
    assert_eq!(events.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn gate_create_replays_byte_identical_under_one_key() {
    let app = app();
    let payer = register_agent(&app, "buyer").await;
    let payee = register_agent(&app, "tool-host").await;

    let body = json!({
        "payerAgentId": payer,
        "payeeAgentId": payee,
        "amountCents": 400,
    });
    let make = |body: &Value| {
        let mut req = request("POST", "/x402/gate/create", Some(body.clone()));
        req.headers_mut()
            .insert("x-idempotency-key", "key-1".parse().unwrap());
        req
    };

    let first = app.clone().oneshot(make(&body)).await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let first_bytes = to_bytes(first.into_body(), 1 << 20).await.unwrap();

    let second = app.clone().oneshot(make(&body)).await.unwrap();
    assert_eq!(second.status(), StatusCode::CREATED);
    assert!(second.headers().contains_key("x-settld-idempotent-replay"));
    let second_bytes = to_bytes(second.into_body(), 1 << 20).await.unwrap();

    // byte-identical replay, one business effect
    assert_eq!(first_bytes, second_bytes);

    // same key, different body: 409
    let conflicting = json!({
        "payerAgentId": payer,
        "payeeAgentId": payee,
        "amountCents": 999,
    });
    let (status, body, _) = send(&app, make(&conflicting)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "IDEMPOTENCY_KEY_CONFLICT");
}

#[tokio::test]
async fn manual_review_resolves_through_the_ops_route() {
    let app = app();
    let payer = register_agent(&app, "buyer").await;
    let payee = register_agent(&app, "worker").await;
    credit(&app, &payer, 2000).await;

    let (_, body, _) = send(
        &app,
        request(
            "POST",
            &format!("/agents/{payee}/runs"),
            Some(json!({
                "settlement": { "payerAgentId": payer, "amountCents": 1000 }
            })),
        ),
    )
    .await;
    let run_id = body["run"]["runId"].as_str().unwrap().to_string();
    let head = body["run"]["lastChainHash"].as_str().unwrap().to_string();

    let (_, started, _) = send(
        &app,
        request(
            "POST",
            &format!("/agents/{payee}/runs/{run_id}/events"),
            Some(json!({ "type": "RUN_STARTED", "expectedPrevChainHash": head })),
        ),
    )
    .await;
    let head = started["event"]["chainHash"].as_str().unwrap();
    let (_, completed, _) = send(
        &app,
        request(
            "POST",
            &format!("/agents/{payee}/runs/{run_id}/events"),
            Some(json!({
                "type": "RUN_COMPLETED",
                "payload": { "verificationStatus": "amber" },
                "expectedPrevChainHash": head,
            })),
        ),
    )
    .await;
    assert_eq!(
        completed["settlement"]["decisionStatus"],
        "manual_review_required"
    );

    let (status, resolved, _) = send(
        &app,
        request(
            "POST",
            &format!("/runs/{run_id}/settlement/resolve"),
            Some(json!({ "status": "released", "releaseRatePct": 100 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["status"], "released");
    assert_eq!(resolved["decisionStatus"], "manual_resolved");

    // single-shot: a second resolve conflicts
    let (status, body, _) = send(
        &app,
        request(
            "POST",
            &format!("/runs/{run_id}/settlement/resolve"),
            Some(json!({ "status": "refunded" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SETTLEMENT_ALREADY_RESOLVED");
}

#[tokio::test]
async fn suspended_agents_answer_410_on_new_runs() {
    let app = app();
    let payee = register_agent(&app, "worker").await;

    let (status, _, _) = send(
        &app,
        request(
            "POST",
            &format!("/x402/agents/{payee}/lifecycle"),
            Some(json!({ "status": "suspended" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body, _) = send(
        &app,
        request("POST", &format!("/agents/{payee}/runs"), Some(json!({}))),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["code"], "X402_AGENT_SUSPENDED");
}

#[tokio::test]
async fn deliveries_listing_validates_the_state_filter() {
    let app = app();
    let (status, _, _) = send(&app, request("GET", "/ops/deliveries?state=pending", None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body, _) = send(&app, request("GET", "/ops/deliveries?state=bogus", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_STATE_INVALID");
}

#[tokio::test]
async fn key_rotation_publishes_the_previous_key() {
    let app = app();
    let (_, before, _) = send(
        &app,
        Request::builder()
            .method("GET")
            .uri("/.well-known/settld-keys.json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let old_kid = before["keys"][0]["kid"].as_str().unwrap().to_string();

    let (status, rotated, _) = send(&app, request("POST", "/ops/keys/rotate", Some(json!({})))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rotated["keys"].as_array().unwrap().len(), 2);
    assert_eq!(rotated["keys"][0]["status"], "active");
    assert_eq!(rotated["keys"][1]["status"], "previous");
    assert_eq!(rotated["keys"][1]["kid"], old_kid.as_str());
    assert_ne!(rotated["keys"][0]["kid"], old_kid.as_str());
}

#[tokio::test]
async fn session_events_append_and_replay() {
    let app = app();
    let (_, session, _) = send(
        &app,
        request("POST", "/sessions", Some(json!({ "participants": [] }))),
    )
    .await;
    let session_id = session["sessionId"].as_str().unwrap().to_string();
    let head = session["lastChainHash"].as_str().unwrap().to_string();

    let (status, appended, _) = send(
        &app,
        request(
            "POST",
            &format!("/sessions/{session_id}/events"),
            Some(json!({
                "type": "MESSAGE",
                "payload": { "text": "quote accepted" },
                "expectedPrevChainHash": head,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(appended["event"]["type"], "MESSAGE");

    let (_, pack, _) = send(
        &app,
        request("GET", &format!("/sessions/{session_id}/replay-pack"), None),
    )
    .await;
    assert_eq!(pack["events"].as_array().unwrap().len(), 2);
    assert_eq!(
        pack["headChainHash"],
        pack["events"][1]["chainHash"]
    );

    let (_, transcript, _) = send(
        &app,
        request("GET", &format!("/sessions/{session_id}/transcript"), None),
    )
    .await;
    assert_eq!(transcript.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn work_order_flow_over_http() {
    let app = app();
    let buyer = register_agent(&app, "buyer").await;
    let seller = register_agent(&app, "seller").await;
    credit(&app, &buyer, 3000).await;

    let (status, order, _) = send(
        &app,
        request(
            "POST",
            "/work-orders",
            Some(json!({
                "buyerAgentId": buyer,
                "sellerAgentId": seller,
                "description": "index the corpus",
                "amountCents": 2000,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = order["workOrderId"].as_str().unwrap().to_string();

    send(&app, request("POST", &format!("/work-orders/{id}/accept"), Some(json!({})))).await;
    send(
        &app,
        request(
            "POST",
            &format!("/work-orders/{id}/progress"),
            Some(json!({ "units": 5, "unitType": "documents" })),
        ),
    )
    .await;
    let (_, completed, _) = send(
        &app,
        request(
            "POST",
            &format!("/work-orders/{id}/complete"),
            Some(json!({ "summary": "indexed" })),
        ),
    )
    .await;
    assert!(completed["receipt"]["receiptHash"].is_string());

    let (status, settled, _) = send(
        &app,
        request(
            "POST",
            &format!("/work-orders/{id}/settle"),
            Some(json!({ "releaseRatePct": 100 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settled["status"], "settled");

    let (_, seller_wallet, _) =
        send(&app, request("GET", &format!("/agents/{seller}/wallet"), None)).await;
    assert_eq!(seller_wallet["availableCents"], 2000);

    let (_, receipts, _) = send(
        &app,
        request("GET", &format!("/work-orders/{id}/receipts"), None),
    )
    .await;
    assert_eq!(receipts.as_array().unwrap().len(), 1);
}
