//! Settld Chain - per-aggregate append-only event chains
//!
//! Events are built in two steps: a draft computes the payload hash and a
//! short-coded id; finalization binds the previous head and computes the
//! chain hash over the canonical event header. Appending is enforced by the
//! store: a caller's `expectedPrevChainHash` must equal the current head or
//! the append fails with `CHAIN_HASH_MISMATCH` and no mutation.
//!
//! The genesis event carries the literal string `"null"` as its previous
//! hash.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use settld_crypto::{hash_canonical, sign_hash_hex, KeyPair};
use settld_types::{ChainedEvent, EventActor, SettldError, GENESIS_PREV_CHAIN_HASH};
use uuid::Uuid;

/// A chained event before the previous head is known
#[derive(Debug, Clone)]
pub struct ChainedEventDraft {
    pub id: String,
    pub stream_id: String,
    pub event_type: String,
    pub actor: EventActor,
    pub payload: Value,
    pub at: DateTime<Utc>,
    pub payload_hash: String,
}

/// Inputs to [`ChainedEventDraft::new`]
#[derive(Debug, Clone)]
pub struct EventInput {
    pub stream_id: String,
    pub event_type: String,
    pub actor: EventActor,
    pub payload: Value,
    pub at: DateTime<Utc>,
}

impl ChainedEventDraft {
    /// Build a draft: computes `payloadHash = sha256(canonical(payload))`
    /// and an id of the form `<type-shortcode>_<random>`.
    pub fn new(input: EventInput) -> Result<Self, SettldError> {
        let payload_hash = hash_canonical(&input.payload).map_err(SettldError::from)?;
        let id = format!("{}_{}", type_shortcode(&input.event_type), Uuid::new_v4());
        Ok(Self {
            id,
            stream_id: input.stream_id,
            event_type: input.event_type,
            actor: input.actor,
            payload: input.payload,
            at: input.at,
            payload_hash,
        })
    }

    /// Finalize against a previous head. The chain hash commits to the
    /// canonical event header; the optional signer signs the chain hash.
    pub fn finalize(
        self,
        prev_chain_hash: &str,
        signer: Option<&KeyPair>,
    ) -> Result<ChainedEvent, SettldError> {
        let chain_hash = chain_hash_for(
            &self.id,
            &self.stream_id,
            &self.event_type,
            &self.actor,
            self.at,
            prev_chain_hash,
            &self.payload_hash,
        )?;
        let signature = match signer {
            Some(keypair) => {
                Some(sign_hash_hex(keypair, &chain_hash).map_err(SettldError::from)?)
            }
            None => None,
        };
        Ok(ChainedEvent {
            id: self.id,
            stream_id: self.stream_id,
            event_type: self.event_type,
            actor: self.actor,
            payload: self.payload,
            at: self.at,
            prev_chain_hash: prev_chain_hash.to_string(),
            payload_hash: self.payload_hash,
            chain_hash,
            signature,
        })
    }
}

/// The chain hash: SHA-256 over the canonical event header
pub fn chain_hash_for(
    id: &str,
    stream_id: &str,
    event_type: &str,
    actor: &EventActor,
    at: DateTime<Utc>,
    prev_chain_hash: &str,
    payload_hash: &str,
) -> Result<String, SettldError> {
    let header = json!({
        "id": id,
        "streamId": stream_id,
        "type": event_type,
        "actor": actor,
        "at": at,
        "prevChainHash": prev_chain_hash,
        "payloadHash": payload_hash,
    });
    hash_canonical(&header).map_err(SettldError::from)
}

/// Recompute and check one event's hashes
pub fn verify_event(event: &ChainedEvent) -> Result<(), SettldError> {
    let payload_hash = hash_canonical(&event.payload).map_err(SettldError::from)?;
    if payload_hash != event.payload_hash {
        return Err(SettldError::ArtifactHashMismatch {
            artifact_type: "ChainedEvent.payload".into(),
            expected: event.payload_hash.clone(),
            actual: payload_hash,
        });
    }
    let chain_hash = chain_hash_for(
        &event.id,
        &event.stream_id,
        &event.event_type,
        &event.actor,
        event.at,
        &event.prev_chain_hash,
        &event.payload_hash,
    )?;
    if chain_hash != event.chain_hash {
        return Err(SettldError::ArtifactHashMismatch {
            artifact_type: "ChainedEvent.chain".into(),
            expected: event.chain_hash.clone(),
            actual: chain_hash,
        });
    }
    Ok(())
}

/// Replay a whole stream: every link must verify and each event's
/// `prevChainHash` must equal the previous event's `chainHash`.
pub fn verify_chain(events: &[ChainedEvent]) -> Result<(), SettldError> {
    let mut prev = GENESIS_PREV_CHAIN_HASH.to_string();
    for event in events {
        if event.prev_chain_hash != prev {
            return Err(SettldError::ChainHashMismatch {
                stream_id: event.stream_id.clone(),
                expected: prev,
                actual: event.prev_chain_hash.clone(),
            });
        }
        verify_event(event)?;
        prev = event.chain_hash.clone();
    }
    Ok(())
}

fn type_shortcode(event_type: &str) -> String {
    let code: String = event_type
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect();
    code.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft(stream: &str, event_type: &str, payload: Value) -> ChainedEventDraft {
        ChainedEventDraft::new(EventInput {
            stream_id: stream.to_string(),
            event_type: event_type.to_string(),
            actor: EventActor::agent("agent_1"),
            payload,
            at: Utc::now(),
        })
        .unwrap()
    }

    #[test]
    fn draft_ids_carry_the_type_shortcode() {
        let d = draft("run_1", "RUN_STARTED", json!({}));
        assert!(d.id.starts_with("runstart"));
    }

    #[test]
    fn genesis_uses_the_null_literal() {
        let event = draft("run_1", "RUN_CREATED", json!({"k": 1}))
            .finalize(GENESIS_PREV_CHAIN_HASH, None)
            .unwrap();
        assert!(event.is_genesis());
        assert_eq!(event.prev_chain_hash, "null");
        verify_event(&event).unwrap();
    }

    #[test]
    fn chain_links_verify_in_order() {
        let first = draft("run_1", "RUN_CREATED", json!({"n": 0}))
            .finalize(GENESIS_PREV_CHAIN_HASH, None)
            .unwrap();
        let second = draft("run_1", "RUN_STARTED", json!({"n": 1}))
            .finalize(&first.chain_hash, None)
            .unwrap();
        let third = draft("run_1", "RUN_COMPLETED", json!({"n": 2}))
            .finalize(&second.chain_hash, None)
            .unwrap();
        verify_chain(&[first, second, third]).unwrap();
    }

    #[test]
    fn broken_link_is_rejected() {
        let first = draft("run_1", "RUN_CREATED", json!({}))
            .finalize(GENESIS_PREV_CHAIN_HASH, None)
            .unwrap();
        let stray = draft("run_1", "RUN_STARTED", json!({}))
            .finalize("0000", None)
            .unwrap();
        let err = verify_chain(&[first, stray]).unwrap_err();
        assert_eq!(err.code(), "CHAIN_HASH_MISMATCH");
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let mut event = draft("run_1", "EVIDENCE_ADDED", json!({"score": 1}))
            .finalize(GENESIS_PREV_CHAIN_HASH, None)
            .unwrap();
        event.payload = json!({"score": 2});
        let err = verify_event(&event).unwrap_err();
        assert_eq!(err.code(), "ARTIFACT_HASH_MISMATCH");
    }

    #[test]
    fn signed_events_verify_under_the_signer_key() {
        let keypair = KeyPair::generate();
        let event = draft("run_1", "RUN_COMPLETED", json!({}))
            .finalize(GENESIS_PREV_CHAIN_HASH, Some(&keypair))
            .unwrap();
        let sig = event.signature.as_deref().unwrap();
        assert!(settld_crypto::verify_hash_hex(
            keypair.verifying_key(),
            &event.chain_hash,
            sig
        )
        .unwrap());
    }
}
