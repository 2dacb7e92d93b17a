//! Settlement policy replay
//!
//! The policy is deterministic over the terminal event type and the
//! verification outcome: green auto-releases in full, red auto-refunds,
//! amber routes to manual review, and failed or cancelled runs refund.
//! Replaying against a stored decision flags divergence instead of
//! silently overwriting it.

use serde_json::Value;
use settld_types::{run_events, ChainedEvent, SettlementDecision, VerificationStatus};

/// Version tag recorded on every decision
pub const POLICY_VERSION: &str = "settlement-policy.v1";

/// Derive the verification outcome for a run from its event trail.
/// An explicit `verificationStatus` on the terminal payload wins, then the
/// most recent evidence event; otherwise green when evidence exists and
/// amber when none does.
pub fn verification_from_events(
    events: &[ChainedEvent],
    terminal_payload: &Value,
) -> VerificationStatus {
    if let Some(status) = parse_status(terminal_payload) {
        return status;
    }
    let mut saw_evidence = false;
    let mut from_evidence = None;
    for event in events {
        if event.event_type == run_events::EVIDENCE_ADDED {
            saw_evidence = true;
            if let Some(status) = parse_status(&event.payload) {
                from_evidence = Some(status);
            }
        }
    }
    if let Some(status) = from_evidence {
        return status;
    }
    if saw_evidence {
        VerificationStatus::Green
    } else {
        VerificationStatus::Amber
    }
}

fn parse_status(payload: &Value) -> Option<VerificationStatus> {
    match payload.get("verificationStatus").and_then(Value::as_str) {
        Some("green") => Some(VerificationStatus::Green),
        Some("amber") => Some(VerificationStatus::Amber),
        Some("red") => Some(VerificationStatus::Red),
        _ => None,
    }
}

/// Replay the bound policy for a terminal run event
pub fn replay(
    terminal_type: &str,
    verification: VerificationStatus,
    stored: Option<&SettlementDecision>,
) -> SettlementDecision {
    let (should_auto_resolve, release_rate_pct, reason_code) = match terminal_type {
        run_events::RUN_FAILED => (true, 0, "RUN_FAILED"),
        run_events::RUN_CANCELLED => (true, 0, "RUN_CANCELLED"),
        _ => match verification {
            VerificationStatus::Green => (true, 100, "VERIFICATION_GREEN"),
            VerificationStatus::Red => (true, 0, "VERIFICATION_RED"),
            VerificationStatus::Amber => (false, 0, "VERIFICATION_AMBER"),
        },
    };

    let mut decision = SettlementDecision {
        should_auto_resolve,
        release_rate_pct,
        verification_status: verification,
        reason_code: reason_code.to_string(),
        matches_stored_decision: true,
        policy_version: POLICY_VERSION.to_string(),
    };
    if let Some(stored) = stored {
        decision.matches_stored_decision = stored.should_auto_resolve
            == decision.should_auto_resolve
            && stored.release_rate_pct == decision.release_rate_pct
            && stored.verification_status == decision.verification_status;
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use settld_types::EventActor;

    fn event(event_type: &str, payload: Value) -> ChainedEvent {
        ChainedEvent {
            id: "ev".into(),
            stream_id: "run_1".into(),
            event_type: event_type.into(),
            actor: EventActor::system(),
            payload,
            at: Utc::now(),
            prev_chain_hash: "null".into(),
            payload_hash: String::new(),
            chain_hash: String::new(),
            signature: None,
        }
    }

    #[test]
    fn evidence_without_status_defaults_green() {
        let events = vec![event(run_events::EVIDENCE_ADDED, json!({"note": "ok"}))];
        assert_eq!(
            verification_from_events(&events, &json!({})),
            VerificationStatus::Green
        );
    }

    #[test]
    fn no_evidence_defaults_amber() {
        assert_eq!(
            verification_from_events(&[], &json!({})),
            VerificationStatus::Amber
        );
    }

    #[test]
    fn terminal_payload_status_wins() {
        let events = vec![event(
            run_events::EVIDENCE_ADDED,
            json!({"verificationStatus": "green"}),
        )];
        assert_eq!(
            verification_from_events(&events, &json!({"verificationStatus": "red"})),
            VerificationStatus::Red
        );
    }

    #[test]
    fn green_auto_releases_in_full() {
        let d = replay(run_events::RUN_COMPLETED, VerificationStatus::Green, None);
        assert!(d.should_auto_resolve);
        assert_eq!(d.release_rate_pct, 100);
    }

    #[test]
    fn amber_routes_to_manual_review() {
        let d = replay(run_events::RUN_COMPLETED, VerificationStatus::Amber, None);
        assert!(!d.should_auto_resolve);
        assert_eq!(d.reason_code, "VERIFICATION_AMBER");
    }

    #[test]
    fn failed_runs_refund_regardless_of_verification() {
        let d = replay(run_events::RUN_FAILED, VerificationStatus::Green, None);
        assert!(d.should_auto_resolve);
        assert_eq!(d.release_rate_pct, 0);
        assert_eq!(d.reason_code, "RUN_FAILED");
    }

    #[test]
    fn replay_detects_divergence_from_a_stored_decision() {
        let stored = replay(run_events::RUN_COMPLETED, VerificationStatus::Green, None);
        let diverged = replay(run_events::RUN_COMPLETED, VerificationStatus::Red, Some(&stored));
        assert!(!diverged.matches_stored_decision);

        let same = replay(run_events::RUN_COMPLETED, VerificationStatus::Green, Some(&stored));
        assert!(same.matches_stored_decision);
    }
}
