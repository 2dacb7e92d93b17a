//! The delivery worker
//!
//! One pump pass per tenant: claim due pending rows oldest-first, gate them
//! to per-aggregate FIFO, sign and POST to every subscribed destination,
//! and record the per-destination delivery state. 2xx marks delivered
//! (awaiting receiver ACK); 4xx is terminal and parks the row in the DLQ
//! after one observation; 5xx and timeouts retry on a fixed exponential
//! backoff schedule until the attempt cap, then DLQ.

use crate::{signature_header, BRAND};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use settld_crypto::canonical_json_bytes;
use settld_store::{DeliveryFilter, Store};
use settld_types::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Fixed backoff schedule, seconds per prior attempt
const BACKOFF_SECS: [i64; 5] = [1, 5, 25, 120, 600];

/// Transport failure classification
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),
    #[error("connection error: {0}")]
    Connection(String),
}

/// Outbound HTTP seam; tests swap in an in-process transport
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &[u8],
        timeout: std::time::Duration,
    ) -> std::result::Result<u16, TransportError>;
}

/// reqwest-backed transport used in production
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &[u8],
        timeout: std::time::Duration,
    ) -> std::result::Result<u16, TransportError> {
        let mut request = self.client.post(url).timeout(timeout).body(body.to_vec());
        for (name, value) in headers {
            request = request.header(name, value);
        }
        match request.send().await {
            Ok(response) => Ok(response.status().as_u16()),
            Err(err) if err.is_timeout() => Err(TransportError::Timeout(timeout)),
            Err(err) => Err(TransportError::Connection(err.to_string())),
        }
    }
}

/// Worker tuning knobs
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub claim_limit: usize,
    pub max_attempts: u32,
    pub http_timeout: std::time::Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            claim_limit: 25,
            max_attempts: 5,
            http_timeout: std::time::Duration::from_secs(5),
        }
    }
}

/// Counters from one pump pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub delivered: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub skipped_fifo: usize,
}

/// The delivery worker
#[derive(Clone)]
pub struct DeliveryWorker {
    store: Arc<dyn Store>,
    transport: Arc<dyn DeliveryTransport>,
    config: DeliveryConfig,
}

impl DeliveryWorker {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn DeliveryTransport>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    /// Pump every tenant with pending rows
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<PumpStats> {
        let mut total = PumpStats::default();
        for tenant in self.store.tenants_with_pending_outbox().await? {
            let stats = self.pump_tenant(&tenant, now).await?;
            total.delivered += stats.delivered;
            total.retried += stats.retried;
            total.dead_lettered += stats.dead_lettered;
            total.skipped_fifo += stats.skipped_fifo;
        }
        Ok(total)
    }

    /// One pass over a tenant's due rows
    pub async fn pump_tenant(&self, tenant: &TenantId, now: DateTime<Utc>) -> Result<PumpStats> {
        let claimed = self
            .store
            .claim_due_outbox(tenant, now, self.config.claim_limit)
            .await?;
        let mut stats = PumpStats::default();
        // per-aggregate FIFO: one failure parks the rest of the group
        let mut blocked_aggregates: HashMap<(String, String), ()> = HashMap::new();

        for message in claimed {
            let aggregate_key = (message.aggregate_type.clone(), message.aggregate_id.clone());
            if blocked_aggregates.contains_key(&aggregate_key) {
                stats.skipped_fifo += 1;
                continue;
            }
            // an earlier row for this aggregate may still be pending from a
            // previous pass; never overtake it
            if let Some(earliest) = self
                .store
                .earliest_pending_for_aggregate(
                    tenant,
                    &message.aggregate_type,
                    &message.aggregate_id,
                )
                .await?
            {
                if earliest < message.id {
                    stats.skipped_fifo += 1;
                    continue;
                }
            }

            match self.deliver_message(tenant, &message, now).await? {
                MessageOutcome::Delivered => stats.delivered += 1,
                MessageOutcome::Retried => {
                    stats.retried += 1;
                    blocked_aggregates.insert(aggregate_key, ());
                }
                MessageOutcome::DeadLettered => {
                    stats.dead_lettered += 1;
                    blocked_aggregates.insert(aggregate_key, ());
                }
            }
        }
        Ok(stats)
    }

    async fn deliver_message(
        &self,
        tenant: &TenantId,
        message: &OutboxMessage,
        now: DateTime<Utc>,
    ) -> Result<MessageOutcome> {
        let destinations: Vec<WebhookDestination> = self
            .store
            .list_destinations(tenant)
            .await?
            .into_iter()
            .filter(|d| d.accepts_topic(&message.topic))
            .collect();

        if destinations.is_empty() {
            self.store
                .mark_outbox_processed(tenant, message.id, now)
                .await?;
            return Ok(MessageOutcome::Delivered);
        }

        // the wire body is canonical so every retry sends identical bytes
        let envelope = json!({
            "schemaVersion": "OutboxDelivery.v1",
            "outboxId": message.id,
            "topic": message.topic,
            "aggregateType": message.aggregate_type,
            "aggregateId": message.aggregate_id,
            "payload": message.payload,
        });
        let body = canonical_json_bytes(&envelope)?;

        let existing = self.existing_deliveries(tenant, message.id).await?;
        let mut retryable_error: Option<String> = None;
        let mut terminal_error: Option<String> = None;

        for destination in &destinations {
            let mut record = match existing.get(destination.destination_id.as_str()) {
                Some(record) => record.clone(),
                None => DeliveryRecord {
                    delivery_id: DeliveryId::new(),
                    tenant_id: tenant.clone(),
                    outbox_id: message.id,
                    destination_id: destination.destination_id.clone(),
                    state: DeliveryState::Queued,
                    attempts: 0,
                    last_status: None,
                    last_error: None,
                    created_at: now,
                    updated_at: now,
                    acked_at: None,
                },
            };
            if matches!(record.state, DeliveryState::Delivered | DeliveryState::Acked) {
                continue; // already landed in a prior pass
            }

            let timestamp = now.to_rfc3339();
            let headers = vec![
                ("content-type".to_string(), "application/json".to_string()),
                (
                    format!("x-{BRAND}-signature"),
                    signature_header(&destination.secret, &timestamp, &body),
                ),
                (format!("x-{BRAND}-timestamp"), timestamp),
                (
                    format!("x-{BRAND}-delivery-id"),
                    record.delivery_id.to_string(),
                ),
                (
                    format!("x-{BRAND}-dedupe-key"),
                    format!("{}:{}", tenant, message.id),
                ),
                (
                    format!("x-{BRAND}-artifact-type"),
                    message.aggregate_type.clone(),
                ),
            ];

            record.attempts += 1;
            record.updated_at = now;
            let result = self
                .transport
                .post(&destination.url, &headers, &body, self.config.http_timeout)
                .await;

            match result {
                Ok(status) if (200..300).contains(&status) => {
                    record.state = DeliveryState::Delivered;
                    record.last_status = Some(status);
                    record.last_error = None;
                }
                Ok(status) if (400..500).contains(&status) => {
                    record.state = DeliveryState::Dlq;
                    record.last_status = Some(status);
                    record.last_error = Some(format!("terminal status {status}"));
                    terminal_error = Some(format!(
                        "destination {} answered {status}",
                        destination.destination_id
                    ));
                }
                Ok(status) => {
                    record.state = DeliveryState::Failed;
                    record.last_status = Some(status);
                    record.last_error = Some(format!("retryable status {status}"));
                    retryable_error = Some(format!(
                        "destination {} answered {status}",
                        destination.destination_id
                    ));
                }
                Err(err) => {
                    record.state = DeliveryState::Failed;
                    record.last_status = None;
                    record.last_error = Some(err.to_string());
                    retryable_error =
                        Some(format!("destination {}: {err}", destination.destination_id));
                }
            }
            self.store.put_delivery(tenant, &record).await?;
        }

        if let Some(error) = terminal_error {
            warn!(outbox = message.id, %error, "outbox row dead-lettered");
            self.store
                .record_outbox_failure(tenant, message.id, &error, None)
                .await?;
            return Ok(MessageOutcome::DeadLettered);
        }
        if let Some(error) = retryable_error {
            if message.attempt + 1 >= self.config.max_attempts {
                warn!(outbox = message.id, %error, "attempt cap reached, dead-lettering");
                self.store
                    .record_outbox_failure(tenant, message.id, &error, None)
                    .await?;
                return Ok(MessageOutcome::DeadLettered);
            }
            let backoff_idx = (message.attempt as usize).min(BACKOFF_SECS.len() - 1);
            let next = now + Duration::seconds(BACKOFF_SECS[backoff_idx]);
            self.store
                .record_outbox_failure(tenant, message.id, &error, Some(next))
                .await?;
            return Ok(MessageOutcome::Retried);
        }

        self.store
            .mark_outbox_processed(tenant, message.id, now)
            .await?;
        info!(outbox = message.id, topic = %message.topic, "outbox row delivered");
        Ok(MessageOutcome::Delivered)
    }

    async fn existing_deliveries(
        &self,
        tenant: &TenantId,
        outbox_id: i64,
    ) -> Result<HashMap<String, DeliveryRecord>> {
        Ok(self
            .store
            .list_deliveries(tenant, DeliveryFilter::All)
            .await?
            .into_iter()
            .filter(|r| r.outbox_id == outbox_id)
            .map(|r| (r.destination_id.to_string(), r))
            .collect())
    }
}

enum MessageOutcome {
    Delivered,
    Retried,
    DeadLettered,
}
