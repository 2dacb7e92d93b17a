//! Chained events
//!
//! One event shape serves every chained aggregate (runs, sessions, work
//! orders): `chainHash` commits to the canonical event header including the
//! previous head, forming a per-stream append-only chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The literal previous-hash of a genesis event
pub const GENESIS_PREV_CHAIN_HASH: &str = "null";

/// Who produced an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventActor {
    /// Actor kind, e.g. "agent", "operator", "system"
    #[serde(rename = "type")]
    pub actor_type: String,
    pub id: String,
}

impl EventActor {
    pub fn agent(id: impl Into<String>) -> Self {
        Self {
            actor_type: "agent".into(),
            id: id.into(),
        }
    }

    pub fn system() -> Self {
        Self {
            actor_type: "system".into(),
            id: "settld".into(),
        }
    }

    pub fn operator(id: impl Into<String>) -> Self {
        Self {
            actor_type: "operator".into(),
            id: id.into(),
        }
    }
}

/// A finalized chained event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainedEvent {
    pub id: String,
    pub stream_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub actor: EventActor,
    pub payload: Value,
    pub at: DateTime<Utc>,
    pub prev_chain_hash: String,
    pub payload_hash: String,
    pub chain_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ChainedEvent {
    pub fn is_genesis(&self) -> bool {
        self.prev_chain_hash == GENESIS_PREV_CHAIN_HASH
    }
}

/// Run event types driving the run state machine
pub mod run_events {
    pub const RUN_CREATED: &str = "RUN_CREATED";
    pub const RUN_STARTED: &str = "RUN_STARTED";
    pub const EVIDENCE_ADDED: &str = "EVIDENCE_ADDED";
    pub const RUN_COMPLETED: &str = "RUN_COMPLETED";
    pub const RUN_FAILED: &str = "RUN_FAILED";
    pub const RUN_CANCELLED: &str = "RUN_CANCELLED";

    /// Event types that terminate a run
    pub const TERMINAL: [&str; 3] = [RUN_COMPLETED, RUN_FAILED, RUN_CANCELLED];
}
