//! Session surface, including the SSE event stream

use crate::auth::AuthContext;
use crate::error::ApiResult;
use crate::handlers::{expected_prev_from_headers, required, tenant};
use crate::sse::SessionStreamItem;
use crate::{ApiError, AppState};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    Extension, Json,
};
use chrono::Utc;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use settld_engine::session::{AppendSessionEvent, ReplayPack, TranscriptEntry};
use settld_types::*;
use std::convert::Infallible;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub actor: Option<EventActor>,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let participants = body
        .participants
        .into_iter()
        .map(AgentId::from_string)
        .collect();
    let actor = body.actor.unwrap_or_else(EventActor::system);
    let session = state
        .sessions
        .create_session(&tenant(&auth), participants, actor, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Session>> {
    let session = state
        .store
        .get_session(&tenant(&auth), &SessionId::from_string(id.clone()))
        .await?
        .ok_or_else(|| ApiError(SettldError::not_found("SESSION_NOT_FOUND", id)))?;
    Ok(Json(session))
}

pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ChainedEvent>>> {
    let events = state
        .sessions
        .list_events(&tenant(&auth), &SessionId::from_string(id))
        .await?;
    Ok(Json(events))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendSessionEventRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub actor: Option<EventActor>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub expected_prev_chain_hash: Option<String>,
}

pub async fn append_event(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AppendSessionEventRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let expected_prev = body
        .expected_prev_chain_hash
        .or_else(|| expected_prev_from_headers(&headers))
        .ok_or_else(|| required("expectedPrevChainHash"))?;
    let tenant = tenant(&auth);
    let session_id = SessionId::from_string(id);

    let (session, event) = state
        .sessions
        .append_event(
            &tenant,
            &session_id,
            AppendSessionEvent {
                event_type: body.event_type,
                actor: body.actor.unwrap_or_else(EventActor::system),
                payload: body.payload,
                expected_prev_chain_hash: expected_prev,
            },
            Utc::now(),
        )
        .await?;

    let seq = state
        .sessions
        .list_events(&tenant, &session_id)
        .await
        .map(|events| events.len())
        .unwrap_or(0);
    state.hub.publish_session_event(SessionStreamItem {
        tenant: tenant.clone(),
        session_id: session_id.to_string(),
        seq,
        event: event.clone(),
    });

    Ok((
        StatusCode::CREATED,
        Json(json!({ "session": session, "event": event })),
    ))
}

/// SSE stream with `last-event-id` resume: replays stored events past the
/// cursor, then follows live appends
pub async fn stream_events(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let tenant = tenant(&auth);
    let session_id = SessionId::from_string(id);
    // make sure the stream exists before subscribing
    state
        .store
        .get_session(&tenant, &session_id)
        .await?
        .ok_or_else(|| {
            ApiError(SettldError::not_found("SESSION_NOT_FOUND", session_id.to_string()))
        })?;

    let resume_after: usize = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let stored = state.sessions.list_events(&tenant, &session_id).await?;
    let mut live = state.hub.subscribe_sessions();
    let mut replayed = 0usize;

    let session_key = session_id.to_string();
    let stream = async_stream::stream! {
        for (idx, event) in stored.iter().enumerate() {
            let seq = idx + 1;
            if seq > resume_after {
                replayed = seq;
                yield Ok(session_event(seq, event));
            }
        }
        while let Ok(item) = live.recv().await {
            if item.tenant == tenant && item.session_id == session_key && item.seq > replayed {
                yield Ok(session_event(item.seq, &item.event));
            }
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn session_event(seq: usize, event: &ChainedEvent) -> Event {
    Event::default()
        .id(seq.to_string())
        .event("session-event")
        .data(serde_json::to_string(event).unwrap_or_else(|_| "{}".into()))
}

pub async fn replay_pack(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<ReplayPack>> {
    let pack = state
        .sessions
        .replay_pack(&tenant(&auth), &SessionId::from_string(id))
        .await?;
    Ok(Json(pack))
}

pub async fn transcript(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<TranscriptEntry>>> {
    let transcript = state
        .sessions
        .transcript(&tenant(&auth), &SessionId::from_string(id))
        .await?;
    Ok(Json(transcript))
}
