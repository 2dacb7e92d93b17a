//! Live stream hub for SSE surfaces
//!
//! Handlers publish after their commits; SSE endpoints replay persisted
//! state first, then follow the live feed. Streams are tenant-filtered at
//! the subscription site.

use settld_types::{AgentCard, ChainedEvent, TenantId};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// A live session event with its 1-based position in the stream
#[derive(Debug, Clone)]
pub struct SessionStreamItem {
    pub tenant: TenantId,
    pub session_id: String,
    pub seq: usize,
    pub event: ChainedEvent,
}

/// A live agent-card upsert
#[derive(Debug, Clone)]
pub struct CardStreamItem {
    pub tenant: TenantId,
    pub card: AgentCard,
}

/// Broadcast fan-out shared by handlers and SSE endpoints
pub struct StreamHub {
    sessions: broadcast::Sender<SessionStreamItem>,
    cards: broadcast::Sender<CardStreamItem>,
}

impl StreamHub {
    pub fn new() -> Self {
        let (sessions, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (cards, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sessions, cards }
    }

    pub fn publish_session_event(&self, item: SessionStreamItem) {
        // no subscribers is fine; the stream replays from the store
        let _ = self.sessions.send(item);
    }

    pub fn publish_card(&self, item: CardStreamItem) {
        let _ = self.cards.send(item);
    }

    pub fn subscribe_sessions(&self) -> broadcast::Receiver<SessionStreamItem> {
        self.sessions.subscribe()
    }

    pub fn subscribe_cards(&self) -> broadcast::Receiver<CardStreamItem> {
        self.cards.subscribe()
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}
