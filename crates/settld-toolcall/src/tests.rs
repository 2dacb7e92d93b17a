use crate::*;
use chrono::Utc;
use serde_json::json;
use settld_engine::RunEngine;
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

async fn setup() -> (ToolCallEngine, Arc<dyn Store>, AgentId, AgentId) {
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let agents = RunEngine::new(store.clone());
    let now = Utc::now();

    let (payer, _) = agents
        .register_agent(&tenant(), "caller".into(), owner(), vec![], None, now)
        .await
        .unwrap();
    let (payee, _) = agents
        .register_agent(&tenant(), "tool-host".into(), owner(), vec![], None, now)
        .await
        .unwrap();
    agents
        .credit_wallet(&tenant(), &payer.agent_id, 10_000, now)
        .await
        .unwrap();

    (
        ToolCallEngine::new(store.clone()),
        store,
        payer.agent_id,
        payee.agent_id,
    )
}

fn terms(payer: &AgentId, payee: &AgentId, amount: i64, bps: u32, window_ms: i64) -> AgreementTerms {
    AgreementTerms {
        payer_agent_id: payer.clone(),
        payee_agent_id: payee.clone(),
        amount_cents: amount,
        currency: "USD".into(),
        holdback_bps: bps,
        challenge_window_ms: window_ms,
    }
}

async fn make_agreement(
    engine: &ToolCallEngine,
    payer: &AgentId,
    payee: &AgentId,
    amount: i64,
    bps: u32,
    window_ms: i64,
) -> ToolCallAgreement {
    engine
        .create_agreement(
            &tenant(),
            CreateAgreement {
                tool_id: "tool.summarize".into(),
                manifest_hash: settld_crypto::sha256_hex(b"manifest"),
                call_id: "call_1".into(),
                input: json!({ "document": "corpus.txt" }),
                terms: terms(payer, payee, amount, bps, window_ms),
            },
            Utc::now(),
        )
        .await
        .unwrap()
}

async fn make_hold(
    engine: &ToolCallEngine,
    agreement: &ToolCallAgreement,
    bps: u32,
    window_ms: i64,
) -> FundingHold {
    engine
        .create_hold(
            &tenant(),
            CreateHold {
                agreement_hash: agreement.agreement_hash.clone().unwrap(),
                receipt_hash: settld_crypto::sha256_hex(b"receipt"),
                payer_agent_id: agreement.terms.payer_agent_id.clone(),
                payee_agent_id: agreement.terms.payee_agent_id.clone(),
                amount_cents: agreement.terms.amount_cents,
                holdback_bps: bps,
                challenge_window_ms: window_ms,
            },
            Utc::now(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn agreement_hash_binds_the_canonical_core() {
    let (engine, _, payer, payee) = setup().await;
    let agreement = make_agreement(&engine, &payer, &payee, 1000, 2000, 60_000).await;

    let recomputed = settld_crypto::hash_artifact_of(&agreement, "agreementHash").unwrap();
    assert_eq!(agreement.agreement_hash.as_deref(), Some(recomputed.as_str()));
    assert_eq!(agreement.input_hash.len(), 64);
}

#[tokio::test]
async fn signed_evidence_verifies_under_the_signer_key() {
    let (engine, _, payer, payee) = setup().await;
    let agreement = make_agreement(&engine, &payer, &payee, 1000, 0, 0).await;
    let keypair = settld_crypto::KeyPair::generate();

    let evidence = engine
        .sign_evidence(
            &tenant(),
            SignEvidence {
                agreement_hash: agreement.agreement_hash.clone().unwrap(),
                output: json!({ "summary": "ok" }),
                metrics: json!({ "latencyMs": 420 }),
                signer_key_id: KeyId::new(),
            },
            &keypair,
            Utc::now(),
        )
        .await
        .unwrap();

    let core_hash = evidence_core_hash(&evidence).unwrap();
    assert_eq!(evidence.evidence_hash.as_deref(), Some(core_hash.as_str()));
    assert!(settld_crypto::verify_hash_hex(
        keypair.verifying_key(),
        &core_hash,
        &evidence.signature
    )
    .unwrap());
}

#[tokio::test]
async fn hold_splits_immediate_and_held_shares() {
    let (engine, store, payer, payee) = setup().await;
    // 20% holdback over 1000 cents
    let agreement = make_agreement(&engine, &payer, &payee, 1000, 2000, 60_000).await;
    let hold = make_hold(&engine, &agreement, 2000, 60_000).await;

    assert_eq!(hold.held_amount_cents, 200);
    assert_eq!(hold.status, HoldStatus::Locked);

    let payer_wallet = store.get_wallet(&tenant(), &payer).await.unwrap().unwrap();
    let payee_wallet = store.get_wallet(&tenant(), &payee).await.unwrap().unwrap();
    assert_eq!(payer_wallet.available_cents, 9000);
    assert_eq!(payer_wallet.escrow_locked_cents, 200);
    assert_eq!(payee_wallet.available_cents, 800);
    assert!(payer_wallet.is_balanced() && payee_wallet.is_balanced());
}

#[tokio::test]
async fn zero_holdback_releases_everything_immediately() {
    let (engine, store, payer, payee) = setup().await;
    let agreement = make_agreement(&engine, &payer, &payee, 500, 0, 0).await;
    let hold = make_hold(&engine, &agreement, 0, 0).await;

    assert_eq!(hold.held_amount_cents, 0);
    assert_eq!(hold.status, HoldStatus::Released);

    let payee_wallet = store.get_wallet(&tenant(), &payee).await.unwrap().unwrap();
    assert_eq!(payee_wallet.available_cents, 500);
}

#[tokio::test]
async fn undisputed_holds_release_after_the_window() {
    let (engine, store, payer, payee) = setup().await;
    let agreement = make_agreement(&engine, &payer, &payee, 1000, 10_000, 50).await;
    let hold = make_hold(&engine, &agreement, 10_000, 50).await;
    assert_eq!(hold.held_amount_cents, 1000);

    // nothing due before the window ends
    let before = hold.challenge_window_ends_at - chrono::Duration::milliseconds(10);
    assert_eq!(engine.release_due_holds(&tenant(), before).await.unwrap(), 0);

    let after = hold.challenge_window_ends_at + chrono::Duration::milliseconds(10);
    assert_eq!(engine.release_due_holds(&tenant(), after).await.unwrap(), 1);

    let payee_wallet = store.get_wallet(&tenant(), &payee).await.unwrap().unwrap();
    assert_eq!(payee_wallet.available_cents, 1000);
    let stored = store
        .get_hold(&tenant(), hold.hold_hash.as_deref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, HoldStatus::Released);
}

#[tokio::test]
async fn dispute_freezes_the_hold_and_a_partial_verdict_splits_it() {
    let (engine, store, payer, payee) = setup().await;
    let agreement = make_agreement(&engine, &payer, &payee, 1000, 10_000, 600_000).await;
    let hold = make_hold(&engine, &agreement, 10_000, 600_000).await;
    let hold_hash = hold.hold_hash.clone().unwrap();

    let (envelope, case) = engine
        .open_dispute(
            &tenant(),
            OpenHoldDispute {
                hold_hash: hold_hash.clone(),
                disputant_agent_id: payer.clone(),
                reason_code: "OUTPUT_TAMPERED".into(),
                evidence_refs: vec!["sha256:abc".into()],
                signer_key_id: KeyId::new(),
                signature: "unverified".into(),
            },
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(envelope.envelope_hash.is_some());
    assert_eq!(case.status, CaseStatus::Open);

    // the frozen hold does not auto-release even after the window
    let after = hold.challenge_window_ends_at + chrono::Duration::minutes(1);
    assert_eq!(engine.release_due_holds(&tenant(), after).await.unwrap(), 0);

    let (case, settled_hold) = engine
        .issue_verdict(
            &tenant(),
            IssueVerdict {
                case_id: case.case_id.clone(),
                outcome: VerdictOutcome::Partial,
                release_rate_pct: Some(30),
                reason: "output partially usable".into(),
                arbiter_id: "arbiter_1".into(),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    assert_eq!(case.status, CaseStatus::VerdictIssued);
    assert_eq!(settled_hold.status, HoldStatus::Settled);
    let verdict = case.verdict.unwrap();
    assert_eq!(verdict.release_rate_pct, 30);
    assert!(verdict.verdict_hash.is_some());

    let payer_wallet = store.get_wallet(&tenant(), &payer).await.unwrap().unwrap();
    let payee_wallet = store.get_wallet(&tenant(), &payee).await.unwrap().unwrap();
    assert_eq!(payee_wallet.available_cents, 300);
    assert_eq!(payer_wallet.available_cents, 9700);
    assert!(payer_wallet.is_balanced() && payee_wallet.is_balanced());

    // a second verdict on the same case is rejected
    let err = engine
        .issue_verdict(
            &tenant(),
            IssueVerdict {
                case_id: case.case_id.clone(),
                outcome: VerdictOutcome::Rejected,
                release_rate_pct: None,
                reason: "retry".into(),
                arbiter_id: "arbiter_1".into(),
            },
            Utc::now(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VERDICT_ALREADY_ISSUED");
}

#[tokio::test]
async fn dispute_after_the_window_is_rejected() {
    let (engine, _, payer, payee) = setup().await;
    let agreement = make_agreement(&engine, &payer, &payee, 1000, 5000, 0).await;
    let hold = make_hold(&engine, &agreement, 5000, 0).await;

    let err = engine
        .open_dispute(
            &tenant(),
            OpenHoldDispute {
                hold_hash: hold.hold_hash.clone().unwrap(),
                disputant_agent_id: payer.clone(),
                reason_code: "LATE".into(),
                evidence_refs: vec![],
                signer_key_id: KeyId::new(),
                signature: String::new(),
            },
            Utc::now() + chrono::Duration::seconds(1),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CHALLENGE_WINDOW_CLOSED");
}

#[tokio::test]
async fn replay_evaluate_validates_stored_hashes() {
    let (engine, _, payer, payee) = setup().await;
    let agreement = make_agreement(&engine, &payer, &payee, 1000, 1000, 60_000).await;
    let keypair = settld_crypto::KeyPair::generate();
    engine
        .sign_evidence(
            &tenant(),
            SignEvidence {
                agreement_hash: agreement.agreement_hash.clone().unwrap(),
                output: json!({ "ok": true }),
                metrics: json!({}),
                signer_key_id: KeyId::new(),
            },
            &keypair,
            Utc::now(),
        )
        .await
        .unwrap();
    make_hold(&engine, &agreement, 1000, 60_000).await;

    let evaluation = engine
        .replay_evaluate(&tenant(), agreement.agreement_hash.as_deref().unwrap())
        .await
        .unwrap();
    assert!(evaluation.agreement_hash_valid);
    assert_eq!(evaluation.evidence.len(), 1);
    assert!(evaluation.evidence[0].hash_valid);
    assert_eq!(evaluation.hold_status, Some(HoldStatus::Locked));
}
