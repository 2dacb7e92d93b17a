//! Outbox, webhook deliveries and idempotency records

use crate::{DeliveryId, DestinationId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbox row state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processed,
    Dlq,
}

/// A domain event pending out-of-band delivery
///
/// Written in the same store commit as the domain change it describes.
/// `id` is monotonic per store; per-aggregate ordering follows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxMessage {
    pub id: i64,
    pub tenant_id: TenantId,
    pub topic: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub payload: Value,
    pub status: OutboxStatus,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// What the engines enqueue; the store assigns `id` at commit time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxDraft {
    pub topic: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub payload: Value,
}

impl OutboxDraft {
    pub fn new(
        topic: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            topic: topic.into(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            payload,
        }
    }
}

/// Per-destination webhook delivery state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Queued,
    Delivered,
    Acked,
    Failed,
    Dlq,
}

/// Tracks one outbox row's delivery to one destination
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub delivery_id: DeliveryId,
    pub tenant_id: TenantId,
    pub outbox_id: i64,
    pub destination_id: DestinationId,
    pub state: DeliveryState,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acked_at: Option<DateTime<Utc>>,
}

/// A webhook destination registered for a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDestination {
    pub destination_id: DestinationId,
    pub tenant_id: TenantId,
    pub url: String,
    /// Shared HMAC secret; never serialized into delivery payloads
    pub secret: String,
    /// Topics this destination subscribes to; empty means all
    pub topics: Vec<String>,
}

impl WebhookDestination {
    pub fn accepts_topic(&self, topic: &str) -> bool {
        self.topics.is_empty() || self.topics.iter().any(|t| t == topic)
    }
}

/// Request-level idempotency record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub tenant_id: TenantId,
    pub key: String,
    pub request_fingerprint: String,
    pub response_status: u16,
    /// Exact response body bytes, replayed verbatim
    pub response_body: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Default retention for stored responses
    pub const DEFAULT_TTL_SECS: i64 = 24 * 60 * 60;

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_topic_filter() {
        let dest = WebhookDestination {
            destination_id: DestinationId::new(),
            tenant_id: TenantId::new(),
            url: "https://receiver.example/hooks".into(),
            secret: "s".into(),
            topics: vec!["settlement.released".into()],
        };
        assert!(dest.accepts_topic("settlement.released"));
        assert!(!dest.accepts_topic("grant.issued"));

        let all = WebhookDestination {
            topics: vec![],
            ..dest
        };
        assert!(all.accepts_topic("grant.issued"));
    }

    #[test]
    fn idempotency_expiry() {
        let now = Utc::now();
        let rec = IdempotencyRecord {
            tenant_id: TenantId::new(),
            key: "k1".into(),
            request_fingerprint: "f".into(),
            response_status: 201,
            response_body: "{}".into(),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(IdempotencyRecord::DEFAULT_TTL_SECS),
        };
        assert!(!rec.is_expired(now));
        assert!(rec.is_expired(now + chrono::Duration::days(2)));
    }
}
