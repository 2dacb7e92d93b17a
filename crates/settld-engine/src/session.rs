//! Session streams
//!
//! Sessions are chained-event aggregates parallel to runs: a genesis event
//! on creation, arbitrary typed events afterwards, the same head
//! precondition on every append. Replay packs and transcripts are derived
//! read models over the chain.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use settld_chain::{ChainedEventDraft, EventInput};
use settld_store::{EventScope, Store, WriteBatch};
use settld_types::*;
use std::sync::Arc;

/// Inputs to [`SessionEngine::append_event`]
#[derive(Debug, Clone)]
pub struct AppendSessionEvent {
    pub event_type: String,
    pub actor: EventActor,
    pub payload: Value,
    pub expected_prev_chain_hash: String,
}

/// Ordered events plus the chain head, for offline replay
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayPack {
    pub schema_version: String,
    pub session_id: SessionId,
    pub head_chain_hash: String,
    pub events: Vec<ChainedEvent>,
}

/// Flattened payload view of a session
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub actor: EventActor,
    pub payload: Value,
}

/// The session engine
#[derive(Clone)]
pub struct SessionEngine {
    store: Arc<dyn Store>,
}

/// Event type that closes a session
pub const SESSION_CLOSED: &str = "SESSION_CLOSED";

impl SessionEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create_session(
        &self,
        tenant: &TenantId,
        participants: Vec<AgentId>,
        actor: EventActor,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let session_id = SessionId::new();
        let genesis = ChainedEventDraft::new(EventInput {
            stream_id: session_id.to_string(),
            event_type: "SESSION_CREATED".to_string(),
            actor,
            payload: json!({ "sessionId": session_id, "participants": participants }),
            at: now,
        })?
        .finalize(GENESIS_PREV_CHAIN_HASH, None)?;

        let session = Session {
            schema_version: Session::SCHEMA_VERSION.into(),
            tenant_id: tenant.clone(),
            session_id: session_id.clone(),
            status: SessionStatus::Open,
            participants,
            last_chain_hash: genesis.chain_hash.clone(),
            created_at: now,
            updated_at: now,
        };

        let batch = WriteBatch::new()
            .put_session(session.clone())
            .append_event(EventScope::Session, GENESIS_PREV_CHAIN_HASH, genesis)
            .outbox(OutboxDraft::new(
                "session.created",
                "session",
                session_id.to_string(),
                json!({ "sessionId": session_id }),
            ));
        self.store.commit(tenant, batch).await?;
        Ok(session)
    }

    pub async fn append_event(
        &self,
        tenant: &TenantId,
        session_id: &SessionId,
        input: AppendSessionEvent,
        now: DateTime<Utc>,
    ) -> Result<(Session, ChainedEvent)> {
        let mut session = self
            .store
            .get_session(tenant, session_id)
            .await?
            .ok_or_else(|| SettldError::not_found("SESSION_NOT_FOUND", session_id.to_string()))?;
        // stale heads are the chain conflict, not a lifecycle error; the
        // store re-checks atomically at commit time
        if input.expected_prev_chain_hash != session.last_chain_hash {
            return Err(SettldError::ChainHashMismatch {
                stream_id: session_id.to_string(),
                expected: input.expected_prev_chain_hash,
                actual: session.last_chain_hash,
            });
        }
        if session.status == SessionStatus::Closed {
            return Err(SettldError::Conflict {
                code: "SESSION_CLOSED",
                message: format!("session {session_id} is closed"),
            });
        }

        let event = ChainedEventDraft::new(EventInput {
            stream_id: session_id.to_string(),
            event_type: input.event_type.clone(),
            actor: input.actor,
            payload: input.payload,
            at: now,
        })?
        .finalize(&input.expected_prev_chain_hash, None)?;

        if input.event_type == SESSION_CLOSED {
            session.status = SessionStatus::Closed;
        }
        session.last_chain_hash = event.chain_hash.clone();
        session.updated_at = now;

        let batch = WriteBatch::new()
            .append_event(
                EventScope::Session,
                input.expected_prev_chain_hash,
                event.clone(),
            )
            .put_session(session.clone());
        self.store.commit(tenant, batch).await?;
        Ok((session, event))
    }

    pub async fn list_events(
        &self,
        tenant: &TenantId,
        session_id: &SessionId,
    ) -> Result<Vec<ChainedEvent>> {
        self.require_session(tenant, session_id).await?;
        self.store
            .list_events(tenant, EventScope::Session, session_id.as_str())
            .await
    }

    pub async fn replay_pack(
        &self,
        tenant: &TenantId,
        session_id: &SessionId,
    ) -> Result<ReplayPack> {
        let session = self.require_session(tenant, session_id).await?;
        let events = self
            .store
            .list_events(tenant, EventScope::Session, session_id.as_str())
            .await?;
        settld_chain::verify_chain(&events)?;
        Ok(ReplayPack {
            schema_version: "SessionReplayPack.v1".into(),
            session_id: session.session_id,
            head_chain_hash: session.last_chain_hash,
            events,
        })
    }

    pub async fn transcript(
        &self,
        tenant: &TenantId,
        session_id: &SessionId,
    ) -> Result<Vec<TranscriptEntry>> {
        let events = self.list_events(tenant, session_id).await?;
        Ok(events
            .into_iter()
            .map(|e| TranscriptEntry {
                at: e.at,
                event_type: e.event_type,
                actor: e.actor,
                payload: e.payload,
            })
            .collect())
    }

    async fn require_session(
        &self,
        tenant: &TenantId,
        session_id: &SessionId,
    ) -> Result<Session> {
        self.store
            .get_session(tenant, session_id)
            .await?
            .ok_or_else(|| SettldError::not_found("SESSION_NOT_FOUND", session_id.to_string()))
    }
}
