use crate::dispute::{CloseDispute, OpenDispute};
use crate::work_order::{CreateWorkOrder, WorkOrderEngine};
use crate::{AppendRunEvent, CreateRun, ResolveSettlement, RunEngine, SettlementSpec};
use chrono::{Duration, Utc};
use serde_json::json;
use settld_store::{MemStore, Store};
use settld_types::*;
use std::sync::Arc;

fn tenant() -> TenantId {
    TenantId::from("tenant_test")
}

fn owner() -> AgentOwner {
    AgentOwner {
        owner_type: "organization".into(),
        id: "org_1".into(),
    }
}

async fn setup() -> (RunEngine, Arc<dyn Store>, AgentId, AgentId) {
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let engine = RunEngine::new(store.clone());
    let now = Utc::now();

    let (payer, _) = engine
        .register_agent(&tenant(), "buyer".into(), owner(), vec![], None, now)
        .await
        .unwrap();
    let (payee, _) = engine
        .register_agent(&tenant(), "worker".into(), owner(), vec![], None, now)
        .await
        .unwrap();
    engine
        .credit_wallet(&tenant(), &payer.agent_id, 5000, now)
        .await
        .unwrap();

    (engine, store, payer.agent_id, payee.agent_id)
}

fn settlement_spec(payer: &AgentId, amount: i64) -> SettlementSpec {
    SettlementSpec {
        payer_agent_id: payer.clone(),
        amount_cents: amount,
        currency: "USD".into(),
        dispute_window_days: None,
    }
}

async fn append(
    engine: &RunEngine,
    run_id: &RunId,
    event_type: &str,
    payload: serde_json::Value,
    expected_prev: &str,
) -> Result<crate::AppendOutcome> {
    engine
        .append_run_event(
            &tenant(),
            run_id,
            AppendRunEvent {
                event_type: event_type.to_string(),
                actor: EventActor::agent("agent_worker"),
                payload,
                expected_prev_chain_hash: expected_prev.to_string(),
            },
            Utc::now(),
        )
        .await
}

#[tokio::test]
async fn first_verified_run_releases_in_full() {
    let (engine, store, payer, payee) = setup().await;

    let (run, settlement) = engine
        .create_run(
            &tenant(),
            CreateRun {
                agent_id: payee.clone(),
                actor: EventActor::agent(payer.as_str()),
                settlement: Some(settlement_spec(&payer, 1250)),
            },
            Utc::now(),
        )
        .await
        .unwrap();
    let settlement = settlement.unwrap();
    assert_eq!(settlement.status, SettlementStatus::Locked);

    // payer escrow is locked at creation
    let payer_wallet = store.get_wallet(&tenant(), &payer).await.unwrap().unwrap();
    assert_eq!(payer_wallet.available_cents, 3750);
    assert_eq!(payer_wallet.escrow_locked_cents, 1250);

    let started = append(&engine, &run.run_id, run_events::RUN_STARTED, json!({}), &run.last_chain_hash)
        .await
        .unwrap();
    let evidenced = append(
        &engine,
        &run.run_id,
        run_events::EVIDENCE_ADDED,
        json!({ "artifact": "s3://bucket/result" }),
        &started.event.chain_hash,
    )
    .await
    .unwrap();
    let completed = append(
        &engine,
        &run.run_id,
        run_events::RUN_COMPLETED,
        json!({}),
        &evidenced.event.chain_hash,
    )
    .await
    .unwrap();

    assert_eq!(completed.run.status, RunStatus::Completed);
    let resolved = completed.settlement.unwrap();
    assert_eq!(resolved.status, SettlementStatus::Released);
    assert_eq!(resolved.decision_status, DecisionStatus::AutoResolved);
    assert_eq!(
        resolved.decision.as_ref().unwrap().verification_status,
        VerificationStatus::Green
    );

    let payer_wallet = store.get_wallet(&tenant(), &payer).await.unwrap().unwrap();
    let payee_wallet = store.get_wallet(&tenant(), &payee).await.unwrap().unwrap();
    assert_eq!(payer_wallet.available_cents, 3750);
    assert_eq!(payer_wallet.escrow_locked_cents, 0);
    assert_eq!(payee_wallet.available_cents, 1250);
    assert!(payer_wallet.is_balanced());
    assert!(payee_wallet.is_balanced());

    // exactly 4 events persisted: created, started, evidence, completed
    let events = store
        .list_events(&tenant(), settld_store::EventScope::Run, run.run_id.as_str())
        .await
        .unwrap();
    assert_eq!(events.len(), 4);
    settld_chain::verify_chain(&events).unwrap();
}

#[tokio::test]
async fn chain_conflict_increments_the_head_exactly_once() {
    let (engine, store, payer, payee) = setup().await;
    let (run, _) = engine
        .create_run(
            &tenant(),
            CreateRun {
                agent_id: payee,
                actor: EventActor::agent(payer.as_str()),
                settlement: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();

    let head = run.last_chain_hash.clone();
    let winner = append(&engine, &run.run_id, run_events::RUN_STARTED, json!({}), &head)
        .await
        .unwrap();

    // the second append racing on the same head loses with 409
    let err = append(&engine, &run.run_id, run_events::RUN_STARTED, json!({}), &head)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CHAIN_HASH_MISMATCH");
    assert_eq!(err.http_status(), 409);

    let events = store
        .list_events(&tenant(), settld_store::EventScope::Run, run.run_id.as_str())
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events.last().unwrap().chain_hash, winner.event.chain_hash);
}

#[tokio::test]
async fn amber_verification_routes_to_manual_review_and_resolves_once() {
    let (engine, store, payer, payee) = setup().await;
    let (run, _) = engine
        .create_run(
            &tenant(),
            CreateRun {
                agent_id: payee.clone(),
                actor: EventActor::agent(payer.as_str()),
                settlement: Some(settlement_spec(&payer, 1000)),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    let started = append(&engine, &run.run_id, run_events::RUN_STARTED, json!({}), &run.last_chain_hash)
        .await
        .unwrap();
    let completed = append(
        &engine,
        &run.run_id,
        run_events::RUN_COMPLETED,
        json!({ "verificationStatus": "amber" }),
        &started.event.chain_hash,
    )
    .await
    .unwrap();

    let settlement = completed.settlement.unwrap();
    assert_eq!(settlement.status, SettlementStatus::Locked);
    assert_eq!(
        settlement.decision_status,
        DecisionStatus::ManualReviewRequired
    );

    // funds are still escrowed
    let payer_wallet = store.get_wallet(&tenant(), &payer).await.unwrap().unwrap();
    assert_eq!(payer_wallet.escrow_locked_cents, 1000);

    // operator releases in full
    let resolved = engine
        .resolve_settlement(
            &tenant(),
            &run.run_id,
            ResolveSettlement {
                status: SettlementStatus::Released,
                release_rate_pct: 100,
                operator_id: "ops_1".into(),
            },
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, SettlementStatus::Released);
    assert_eq!(resolved.decision_status, DecisionStatus::ManualResolved);

    // single-shot rule
    let err = engine
        .resolve_settlement(
            &tenant(),
            &run.run_id,
            ResolveSettlement {
                status: SettlementStatus::Refunded,
                release_rate_pct: 0,
                operator_id: "ops_1".into(),
            },
            Utc::now(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SETTLEMENT_ALREADY_RESOLVED");
}

#[tokio::test]
async fn failed_run_refunds_the_payer() {
    let (engine, store, payer, payee) = setup().await;
    let (run, _) = engine
        .create_run(
            &tenant(),
            CreateRun {
                agent_id: payee,
                actor: EventActor::agent(payer.as_str()),
                settlement: Some(settlement_spec(&payer, 700)),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    let started = append(&engine, &run.run_id, run_events::RUN_STARTED, json!({}), &run.last_chain_hash)
        .await
        .unwrap();
    let failed = append(
        &engine,
        &run.run_id,
        run_events::RUN_FAILED,
        json!({ "error": "worker crashed" }),
        &started.event.chain_hash,
    )
    .await
    .unwrap();

    let settlement = failed.settlement.unwrap();
    assert_eq!(settlement.status, SettlementStatus::Refunded);
    assert_eq!(settlement.refunded_amount_cents, 700);

    let payer_wallet = store.get_wallet(&tenant(), &payer).await.unwrap().unwrap();
    assert_eq!(payer_wallet.available_cents, 5000);
    assert_eq!(payer_wallet.escrow_locked_cents, 0);
}

#[tokio::test]
async fn dispute_escalation_closes_with_a_partial_split() {
    let (engine, store, payer, payee) = setup().await;
    let mut spec = settlement_spec(&payer, 1000);
    spec.dispute_window_days = Some(7);
    let (run, _) = engine
        .create_run(
            &tenant(),
            CreateRun {
                agent_id: payee.clone(),
                actor: EventActor::agent(payer.as_str()),
                settlement: Some(spec),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    let started = append(&engine, &run.run_id, run_events::RUN_STARTED, json!({}), &run.last_chain_hash)
        .await
        .unwrap();
    let evidenced = append(
        &engine,
        &run.run_id,
        run_events::EVIDENCE_ADDED,
        json!({}),
        &started.event.chain_hash,
    )
    .await
    .unwrap();
    let completed = append(
        &engine,
        &run.run_id,
        run_events::RUN_COMPLETED,
        json!({}),
        &evidenced.event.chain_hash,
    )
    .await
    .unwrap();

    // green decision recorded but deferred behind the dispute window
    let settlement = completed.settlement.unwrap();
    assert_eq!(settlement.status, SettlementStatus::Locked);
    assert_eq!(settlement.decision_status, DecisionStatus::AutoResolved);
    assert!(settlement.dispute_window_ends_at.is_some());

    // l1 dispute with evidence, escalated to l2, closed partial at 40%
    let dispute = engine
        .open_dispute(
            &tenant(),
            &run.run_id,
            OpenDispute {
                opened_by: payer.clone(),
                reason_code: "OUTPUT_INCOMPLETE".into(),
            },
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(dispute.level, DisputeLevel::L1Counterparty);

    engine
        .add_dispute_evidence(
            &tenant(),
            &run.run_id,
            &dispute.dispute_id,
            payer.clone(),
            json!({ "missing": ["section 3"] }),
            Utc::now(),
        )
        .await
        .unwrap();

    let escalated = engine
        .escalate_dispute(
            &tenant(),
            &run.run_id,
            &dispute.dispute_id,
            DisputeLevel::L2Arbiter,
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(escalated.status, DisputeStatus::Escalated);

    let (closed, settlement, adjustment) = engine
        .close_dispute(
            &tenant(),
            &run.run_id,
            CloseDispute {
                dispute_id: dispute.dispute_id.clone(),
                outcome: DisputeOutcome::Partial,
                release_rate_pct: Some(40),
                arbiter_id: "arbiter_1".into(),
                reason: "partial delivery".into(),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    assert_eq!(closed.status, DisputeStatus::Closed);
    assert_eq!(settlement.status, SettlementStatus::Split);
    assert_eq!(settlement.released_amount_cents, 400);
    assert_eq!(settlement.refunded_amount_cents, 600);
    assert!(settlement.conserves_escrow());
    assert!(settlement.verdict_hash.is_some());
    assert_eq!(adjustment.release_rate_pct, 40);
    assert_eq!(adjustment.verdict_hash, settlement.verdict_hash.unwrap());

    let payee_wallet = store.get_wallet(&tenant(), &payee).await.unwrap().unwrap();
    let payer_wallet = store.get_wallet(&tenant(), &payer).await.unwrap().unwrap();
    assert_eq!(payee_wallet.available_cents, 400);
    assert_eq!(payer_wallet.available_cents, 4600);
    assert!(payer_wallet.is_balanced() && payee_wallet.is_balanced());
}

#[tokio::test]
async fn undisputed_window_executes_the_recorded_decision_on_close() {
    let (engine, store, payer, payee) = setup().await;
    let mut spec = settlement_spec(&payer, 800);
    spec.dispute_window_days = Some(3);
    let (run, _) = engine
        .create_run(
            &tenant(),
            CreateRun {
                agent_id: payee.clone(),
                actor: EventActor::agent(payer.as_str()),
                settlement: Some(spec),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    let started = append(&engine, &run.run_id, run_events::RUN_STARTED, json!({}), &run.last_chain_hash)
        .await
        .unwrap();
    let evidenced = append(
        &engine,
        &run.run_id,
        run_events::EVIDENCE_ADDED,
        json!({}),
        &started.event.chain_hash,
    )
    .await
    .unwrap();
    append(
        &engine,
        &run.run_id,
        run_events::RUN_COMPLETED,
        json!({}),
        &evidenced.event.chain_hash,
    )
    .await
    .unwrap();

    // nothing due before the window passes
    assert_eq!(
        engine.close_due_windows(&tenant(), Utc::now()).await.unwrap(),
        0
    );

    let later = Utc::now() + Duration::days(4);
    assert_eq!(engine.close_due_windows(&tenant(), later).await.unwrap(), 1);

    let payee_wallet = store.get_wallet(&tenant(), &payee).await.unwrap().unwrap();
    assert_eq!(payee_wallet.available_cents, 800);
}

#[tokio::test]
async fn insufficient_payer_balance_rejects_run_creation() {
    let (engine, store, payer, payee) = setup().await;
    let err = engine
        .create_run(
            &tenant(),
            CreateRun {
                agent_id: payee,
                actor: EventActor::agent(payer.as_str()),
                settlement: Some(settlement_spec(&payer, 9999999)),
            },
            Utc::now(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_WALLET_BALANCE");

    // no partial state: wallet untouched, nothing locked
    let wallet = store.get_wallet(&tenant(), &payer).await.unwrap().unwrap();
    assert_eq!(wallet.available_cents, 5000);
    assert_eq!(wallet.escrow_locked_cents, 0);
}

#[tokio::test]
async fn work_order_lifecycle_settles_the_escrow() {
    let (_engine, store, buyer, seller) = setup().await;
    let orders = WorkOrderEngine::new(store.clone());

    let order = orders
        .create(
            &tenant(),
            CreateWorkOrder {
                buyer_agent_id: buyer.clone(),
                seller_agent_id: seller.clone(),
                description: "summarize corpus".into(),
                amount_cents: 2000,
                currency: "USD".into(),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    orders.accept(&tenant(), &order.work_order_id, Utc::now()).await.unwrap();
    orders
        .progress(&tenant(), &order.work_order_id, 10, "documents".into(), None, Utc::now())
        .await
        .unwrap();
    orders
        .top_up(&tenant(), &order.work_order_id, 500, Utc::now())
        .await
        .unwrap();
    let (completed, receipt) = orders
        .complete(&tenant(), &order.work_order_id, "done".into(), vec![], Utc::now())
        .await
        .unwrap();
    assert_eq!(completed.status, WorkOrderStatus::Completed);
    assert!(receipt.receipt_hash.is_some());

    let settled = orders
        .settle(&tenant(), &order.work_order_id, 100, Utc::now())
        .await
        .unwrap();
    assert_eq!(settled.status, WorkOrderStatus::Settled);
    assert_eq!(settled.settled_released_cents, Some(2500));

    let seller_wallet = store.get_wallet(&tenant(), &seller).await.unwrap().unwrap();
    assert_eq!(seller_wallet.available_cents, 2500);

    let metering = orders.metering(&tenant(), &order.work_order_id).await.unwrap();
    assert_eq!(metering.len(), 1);
}
