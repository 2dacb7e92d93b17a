//! Postgres back-end
//!
//! Aggregates are stored as JSONB documents with the columns needed for
//! indexing lifted out. All queries are tenant-scoped. Batch commits run in
//! one transaction; chain appends take a per-stream advisory lock so two
//! racing appends serialize and the loser fails the head precondition.
//!
//! Migrations are embedded (`sqlx::migrate!`), forward-only, and applied
//! under sqlx's migration lock. The schema is namespaced through
//! `search_path` per connection.

use crate::{DeliveryFilter, EventScope, Store, StoreResult, WriteBatch, WriteOp};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use settld_types::*;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;

/// Redelivery lease applied to claimed outbox rows
const CLAIM_LEASE_SECS: i64 = 30;

/// Connection settings for the SQL back-end
#[derive(Debug, Clone)]
pub struct PgStoreConfig {
    pub database_url: String,
    /// Postgres schema the tables live in, e.g. `proxy_prod`
    pub schema: String,
    pub max_connections: u32,
    pub migrate_on_startup: bool,
}

impl PgStoreConfig {
    pub fn new(database_url: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            schema: schema.into(),
            max_connections: 10,
            migrate_on_startup: true,
        }
    }
}

/// The Postgres store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect, pin the search path, and optionally run migrations
    pub async fn connect(config: &PgStoreConfig) -> StoreResult<Self> {
        let schema = sanitize_schema(&config.schema)?;
        info!(schema = %schema, "connecting to postgres");

        let search_path = schema.clone();
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .after_connect(move |conn, _meta| {
                let search_path = search_path.clone();
                Box::pin(async move {
                    sqlx::query(&format!("SET search_path TO {search_path}, public"))
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&config.database_url)
            .await
            .map_err(internal)?;

        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
            .execute(&pool)
            .await
            .map_err(internal)?;

        if config.migrate_on_startup {
            info!("running store migrations");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(internal)?;
            info!("store migrations complete");
        }

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn sanitize_schema(schema: &str) -> StoreResult<String> {
    if schema.is_empty()
        || !schema
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(SettldError::validation(
            "VALIDATION_SCHEMA_INVALID",
            format!("schema name {schema:?} must be alphanumeric/underscore"),
        ));
    }
    Ok(schema.to_string())
}

fn internal<E: std::fmt::Display>(err: E) -> SettldError {
    SettldError::internal(err.to_string())
}

fn to_doc<T: Serialize>(value: &T) -> StoreResult<Value> {
    serde_json::to_value(value).map_err(internal)
}

fn from_doc<T: DeserializeOwned>(doc: Value) -> StoreResult<T> {
    serde_json::from_value(doc).map_err(internal)
}

fn enum_str<T: Serialize>(value: &T) -> StoreResult<String> {
    match serde_json::to_value(value).map_err(internal)? {
        Value::String(s) => Ok(s),
        other => Err(internal(format!("expected string enum, got {other}"))),
    }
}

fn row_doc<T: DeserializeOwned>(row: &PgRow) -> StoreResult<T> {
    from_doc(row.try_get::<Value, _>("doc").map_err(internal)?)
}

fn rows_docs<T: DeserializeOwned>(rows: Vec<PgRow>) -> StoreResult<Vec<T>> {
    rows.iter().map(row_doc).collect()
}

fn outbox_from_row(row: &PgRow) -> StoreResult<OutboxMessage> {
    let status: String = row.try_get("status").map_err(internal)?;
    Ok(OutboxMessage {
        id: row.try_get("id").map_err(internal)?,
        tenant_id: TenantId::from_string(row.try_get::<String, _>("tenant_id").map_err(internal)?),
        topic: row.try_get("topic").map_err(internal)?,
        aggregate_type: row.try_get("aggregate_type").map_err(internal)?,
        aggregate_id: row.try_get("aggregate_id").map_err(internal)?,
        payload: row.try_get("payload").map_err(internal)?,
        status: from_doc(Value::String(status))?,
        attempt: row.try_get::<i32, _>("attempt").map_err(internal)? as u32,
        created_at: row.try_get("created_at").map_err(internal)?,
        next_attempt_at: row.try_get("next_attempt_at").map_err(internal)?,
        processed_at: row.try_get("processed_at").map_err(internal)?,
        last_error: row.try_get("last_error").map_err(internal)?,
    })
}

async fn append_event_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    tenant: &TenantId,
    scope: EventScope,
    expected_prev: &str,
    event: &ChainedEvent,
) -> StoreResult<()> {
    // serialize concurrent appenders on the same stream
    let lock_key = format!("{}|{}|{}", tenant, scope.as_str(), event.stream_id);
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(&lock_key)
        .execute(&mut **tx)
        .await
        .map_err(internal)?;

    let head: Option<String> = sqlx::query_scalar(
        "SELECT chain_hash FROM chained_events \
         WHERE tenant_id = $1 AND scope = $2 AND stream_id = $3 \
         ORDER BY seq DESC LIMIT 1",
    )
    .bind(tenant.as_str())
    .bind(scope.as_str())
    .bind(&event.stream_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(internal)?;

    let head = head.unwrap_or_else(|| GENESIS_PREV_CHAIN_HASH.to_string());
    if head != expected_prev {
        return Err(SettldError::ChainHashMismatch {
            stream_id: event.stream_id.clone(),
            expected: expected_prev.to_string(),
            actual: head,
        });
    }

    sqlx::query(
        "INSERT INTO chained_events \
         (tenant_id, scope, stream_id, chain_hash, prev_chain_hash, doc, at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(tenant.as_str())
    .bind(scope.as_str())
    .bind(&event.stream_id)
    .bind(&event.chain_hash)
    .bind(&event.prev_chain_hash)
    .bind(to_doc(event)?)
    .bind(event.at)
    .execute(&mut **tx)
    .await
    .map_err(internal)?;
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
        Ok(())
    }

    async fn commit(&self, tenant: &TenantId, batch: WriteBatch) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        for op in batch.into_ops() {
            match op {
                WriteOp::PutAgent(v) => {
                    sqlx::query(
                        "INSERT INTO agents (tenant_id, agent_id, status, doc, created_at) \
                         VALUES ($1, $2, $3, $4, $5) \
                         ON CONFLICT (tenant_id, agent_id) \
                         DO UPDATE SET status = EXCLUDED.status, doc = EXCLUDED.doc",
                    )
                    .bind(tenant.as_str())
                    .bind(v.agent_id.as_str())
                    .bind(enum_str(&v.status)?)
                    .bind(to_doc(&v)?)
                    .bind(v.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::PutWallet(v) => {
                    sqlx::query(
                        "INSERT INTO wallets (tenant_id, agent_id, doc, updated_at) \
                         VALUES ($1, $2, $3, $4) \
                         ON CONFLICT (tenant_id, agent_id) \
                         DO UPDATE SET doc = EXCLUDED.doc, updated_at = EXCLUDED.updated_at",
                    )
                    .bind(tenant.as_str())
                    .bind(v.agent_id.as_str())
                    .bind(to_doc(&v)?)
                    .bind(v.updated_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::PutGrant(v) => {
                    sqlx::query(
                        "INSERT INTO grants (tenant_id, grant_id, kind, grant_hash, doc, created_at) \
                         VALUES ($1, $2, $3, $4, $5, $6) \
                         ON CONFLICT (tenant_id, grant_id) \
                         DO UPDATE SET doc = EXCLUDED.doc, grant_hash = EXCLUDED.grant_hash",
                    )
                    .bind(tenant.as_str())
                    .bind(v.grant_id.as_str())
                    .bind(enum_str(&v.kind)?)
                    .bind(&v.grant_hash)
                    .bind(to_doc(&v)?)
                    .bind(v.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::PutRun(v) => {
                    sqlx::query(
                        "INSERT INTO runs (tenant_id, run_id, agent_id, status, doc, created_at) \
                         VALUES ($1, $2, $3, $4, $5, $6) \
                         ON CONFLICT (tenant_id, run_id) \
                         DO UPDATE SET status = EXCLUDED.status, doc = EXCLUDED.doc",
                    )
                    .bind(tenant.as_str())
                    .bind(v.run_id.as_str())
                    .bind(v.agent_id.as_str())
                    .bind(enum_str(&v.status)?)
                    .bind(to_doc(&v)?)
                    .bind(v.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::AppendEvent {
                    scope,
                    expected_prev,
                    event,
                } => {
                    append_event_in_tx(&mut tx, tenant, scope, &expected_prev, &event).await?;
                }
                WriteOp::PutSettlement(v) => {
                    sqlx::query(
                        "INSERT INTO settlements \
                         (tenant_id, settlement_id, run_id, status, has_dispute, \
                          dispute_window_ends_at, doc, created_at) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                         ON CONFLICT (tenant_id, settlement_id) \
                         DO UPDATE SET status = EXCLUDED.status, \
                                       has_dispute = EXCLUDED.has_dispute, \
                                       dispute_window_ends_at = EXCLUDED.dispute_window_ends_at, \
                                       doc = EXCLUDED.doc",
                    )
                    .bind(tenant.as_str())
                    .bind(v.settlement_id.as_str())
                    .bind(v.run_id.as_str())
                    .bind(enum_str(&v.status)?)
                    .bind(v.dispute_status.is_some())
                    .bind(v.dispute_window_ends_at)
                    .bind(to_doc(&v)?)
                    .bind(v.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::PutDispute(v) => {
                    sqlx::query(
                        "INSERT INTO disputes \
                         (tenant_id, dispute_id, settlement_id, status, doc, opened_at) \
                         VALUES ($1, $2, $3, $4, $5, $6) \
                         ON CONFLICT (tenant_id, dispute_id) \
                         DO UPDATE SET status = EXCLUDED.status, doc = EXCLUDED.doc",
                    )
                    .bind(tenant.as_str())
                    .bind(v.dispute_id.as_str())
                    .bind(v.settlement_id.as_str())
                    .bind(enum_str(&v.status)?)
                    .bind(to_doc(&v)?)
                    .bind(v.opened_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::PutAgreement(v) => {
                    let hash = v.agreement_hash.clone().unwrap_or_default();
                    sqlx::query(
                        "INSERT INTO toolcall_agreements (tenant_id, agreement_hash, doc, created_at) \
                         VALUES ($1, $2, $3, $4) \
                         ON CONFLICT (tenant_id, agreement_hash) DO UPDATE SET doc = EXCLUDED.doc",
                    )
                    .bind(tenant.as_str())
                    .bind(hash)
                    .bind(to_doc(&v)?)
                    .bind(v.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::PutEvidence(v) => {
                    let hash = v.evidence_hash.clone().unwrap_or_default();
                    sqlx::query(
                        "INSERT INTO toolcall_evidence \
                         (tenant_id, evidence_hash, agreement_hash, doc, created_at) \
                         VALUES ($1, $2, $3, $4, $5) \
                         ON CONFLICT (tenant_id, evidence_hash) DO UPDATE SET doc = EXCLUDED.doc",
                    )
                    .bind(tenant.as_str())
                    .bind(hash)
                    .bind(&v.agreement_hash)
                    .bind(to_doc(&v)?)
                    .bind(v.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::PutHold(v) => {
                    let hash = v.hold_hash.clone().unwrap_or_default();
                    sqlx::query(
                        "INSERT INTO funding_holds \
                         (tenant_id, hold_hash, status, challenge_window_ends_at, doc, created_at) \
                         VALUES ($1, $2, $3, $4, $5, $6) \
                         ON CONFLICT (tenant_id, hold_hash) \
                         DO UPDATE SET status = EXCLUDED.status, doc = EXCLUDED.doc",
                    )
                    .bind(tenant.as_str())
                    .bind(hash)
                    .bind(enum_str(&v.status)?)
                    .bind(v.challenge_window_ends_at)
                    .bind(to_doc(&v)?)
                    .bind(v.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::PutCase(v) => {
                    sqlx::query(
                        "INSERT INTO arbitration_cases \
                         (tenant_id, case_id, hold_hash, status, doc, opened_at) \
                         VALUES ($1, $2, $3, $4, $5, $6) \
                         ON CONFLICT (tenant_id, case_id) \
                         DO UPDATE SET status = EXCLUDED.status, doc = EXCLUDED.doc",
                    )
                    .bind(tenant.as_str())
                    .bind(v.case_id.as_str())
                    .bind(&v.hold_hash)
                    .bind(enum_str(&v.status)?)
                    .bind(to_doc(&v)?)
                    .bind(v.opened_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::PutSession(v) => {
                    sqlx::query(
                        "INSERT INTO sessions (tenant_id, session_id, status, doc, created_at) \
                         VALUES ($1, $2, $3, $4, $5) \
                         ON CONFLICT (tenant_id, session_id) \
                         DO UPDATE SET status = EXCLUDED.status, doc = EXCLUDED.doc",
                    )
                    .bind(tenant.as_str())
                    .bind(v.session_id.as_str())
                    .bind(enum_str(&v.status)?)
                    .bind(to_doc(&v)?)
                    .bind(v.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::PutWorkOrder(v) => {
                    sqlx::query(
                        "INSERT INTO work_orders (tenant_id, work_order_id, status, doc, created_at) \
                         VALUES ($1, $2, $3, $4, $5) \
                         ON CONFLICT (tenant_id, work_order_id) \
                         DO UPDATE SET status = EXCLUDED.status, doc = EXCLUDED.doc",
                    )
                    .bind(tenant.as_str())
                    .bind(v.work_order_id.as_str())
                    .bind(enum_str(&v.status)?)
                    .bind(to_doc(&v)?)
                    .bind(v.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::PutReceipt(v) => {
                    sqlx::query(
                        "INSERT INTO completion_receipts \
                         (tenant_id, receipt_id, work_order_id, doc, issued_at) \
                         VALUES ($1, $2, $3, $4, $5) \
                         ON CONFLICT (tenant_id, receipt_id) DO UPDATE SET doc = EXCLUDED.doc",
                    )
                    .bind(tenant.as_str())
                    .bind(v.receipt_id.as_str())
                    .bind(v.work_order_id.as_str())
                    .bind(to_doc(&v)?)
                    .bind(v.issued_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::PutAttestation(v) => {
                    sqlx::query(
                        "INSERT INTO attestations \
                         (tenant_id, attestation_id, subject_type, subject_id, doc, issued_at) \
                         VALUES ($1, $2, $3, $4, $5, $6) \
                         ON CONFLICT (tenant_id, attestation_id) DO UPDATE SET doc = EXCLUDED.doc",
                    )
                    .bind(tenant.as_str())
                    .bind(v.attestation_id.as_str())
                    .bind(&v.subject_type)
                    .bind(&v.subject_id)
                    .bind(to_doc(&v)?)
                    .bind(v.issued_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::PutAgentCard(v) => {
                    sqlx::query(
                        "INSERT INTO agent_cards (tenant_id, agent_id, visibility, doc, updated_at) \
                         VALUES ($1, $2, $3, $4, $5) \
                         ON CONFLICT (tenant_id, agent_id) \
                         DO UPDATE SET visibility = EXCLUDED.visibility, doc = EXCLUDED.doc, \
                                       updated_at = EXCLUDED.updated_at",
                    )
                    .bind(tenant.as_str())
                    .bind(v.agent_id.as_str())
                    .bind(enum_str(&v.visibility)?)
                    .bind(to_doc(&v)?)
                    .bind(v.updated_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::PutGate(v) => {
                    sqlx::query(
                        "INSERT INTO gates (tenant_id, gate_id, doc, created_at) \
                         VALUES ($1, $2, $3, $4) \
                         ON CONFLICT (tenant_id, gate_id) DO UPDATE SET doc = EXCLUDED.doc",
                    )
                    .bind(tenant.as_str())
                    .bind(v.gate_id.as_str())
                    .bind(to_doc(&v)?)
                    .bind(v.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::PutSignerKey(v) => {
                    sqlx::query(
                        "INSERT INTO signer_keys (tenant_id, agent_id, status, doc, updated_at) \
                         VALUES ($1, $2, $3, $4, $5) \
                         ON CONFLICT (tenant_id, agent_id) \
                         DO UPDATE SET status = EXCLUDED.status, doc = EXCLUDED.doc, \
                                       updated_at = EXCLUDED.updated_at",
                    )
                    .bind(tenant.as_str())
                    .bind(v.agent_id.as_str())
                    .bind(enum_str(&v.status)?)
                    .bind(to_doc(&v)?)
                    .bind(v.updated_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::PutApiKey(v) => {
                    sqlx::query(
                        "INSERT INTO api_keys (tenant_id, key_id, doc, created_at) \
                         VALUES ($1, $2, $3, $4) \
                         ON CONFLICT (tenant_id, key_id) DO UPDATE SET doc = EXCLUDED.doc",
                    )
                    .bind(tenant.as_str())
                    .bind(v.key_id.as_str())
                    .bind(to_doc(&v)?)
                    .bind(v.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::PutKeyset(v) => {
                    sqlx::query(
                        "INSERT INTO keysets (tenant_id, doc, rotated_at) \
                         VALUES ($1, $2, $3) \
                         ON CONFLICT (tenant_id) \
                         DO UPDATE SET doc = EXCLUDED.doc, rotated_at = EXCLUDED.rotated_at",
                    )
                    .bind(tenant.as_str())
                    .bind(to_doc(&v)?)
                    .bind(v.rotated_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::Outbox(draft) => {
                    let now = Utc::now();
                    sqlx::query(
                        "INSERT INTO outbox \
                         (tenant_id, topic, aggregate_type, aggregate_id, payload, status, \
                          attempt, created_at, next_attempt_at) \
                         VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, $6)",
                    )
                    .bind(tenant.as_str())
                    .bind(&draft.topic)
                    .bind(&draft.aggregate_type)
                    .bind(&draft.aggregate_id)
                    .bind(&draft.payload)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                WriteOp::PutDelivery(v) => {
                    sqlx::query(
                        "INSERT INTO deliveries \
                         (tenant_id, delivery_id, outbox_id, destination_id, state, doc, created_at) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7) \
                         ON CONFLICT (tenant_id, delivery_id) \
                         DO UPDATE SET state = EXCLUDED.state, doc = EXCLUDED.doc",
                    )
                    .bind(tenant.as_str())
                    .bind(v.delivery_id.as_str())
                    .bind(v.outbox_id)
                    .bind(v.destination_id.as_str())
                    .bind(enum_str(&v.state)?)
                    .bind(to_doc(&v)?)
                    .bind(v.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
            }
        }
        tx.commit().await.map_err(internal)
    }

    async fn list_tenants(&self) -> StoreResult<Vec<TenantId>> {
        let tenants: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT tenant_id FROM agents ORDER BY tenant_id")
                .fetch_all(&self.pool)
                .await
                .map_err(internal)?;
        Ok(tenants.into_iter().map(TenantId::from_string).collect())
    }

    async fn get_agent(&self, tenant: &TenantId, id: &AgentId) -> StoreResult<Option<AgentIdentity>> {
        let row = sqlx::query("SELECT doc FROM agents WHERE tenant_id = $1 AND agent_id = $2")
            .bind(tenant.as_str())
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn list_agents(&self, tenant: &TenantId) -> StoreResult<Vec<AgentIdentity>> {
        let rows = sqlx::query("SELECT doc FROM agents WHERE tenant_id = $1 ORDER BY created_at")
            .bind(tenant.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        rows_docs(rows)
    }

    async fn get_wallet(&self, tenant: &TenantId, agent: &AgentId) -> StoreResult<Option<AgentWallet>> {
        let row = sqlx::query("SELECT doc FROM wallets WHERE tenant_id = $1 AND agent_id = $2")
            .bind(tenant.as_str())
            .bind(agent.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn get_grant(&self, tenant: &TenantId, id: &GrantId) -> StoreResult<Option<Grant>> {
        let row = sqlx::query("SELECT doc FROM grants WHERE tenant_id = $1 AND grant_id = $2")
            .bind(tenant.as_str())
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn list_grants(&self, tenant: &TenantId, kind: GrantKind) -> StoreResult<Vec<Grant>> {
        let rows = sqlx::query(
            "SELECT doc FROM grants WHERE tenant_id = $1 AND kind = $2 ORDER BY created_at",
        )
        .bind(tenant.as_str())
        .bind(enum_str(&kind)?)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows_docs(rows)
    }

    async fn grants_by_hash(&self, tenant: &TenantId, grant_hash: &str) -> StoreResult<Vec<Grant>> {
        let rows =
            sqlx::query("SELECT doc FROM grants WHERE tenant_id = $1 AND grant_hash = $2")
                .bind(tenant.as_str())
                .bind(grant_hash)
                .fetch_all(&self.pool)
                .await
                .map_err(internal)?;
        rows_docs(rows)
    }

    async fn get_run(&self, tenant: &TenantId, id: &RunId) -> StoreResult<Option<Run>> {
        let row = sqlx::query("SELECT doc FROM runs WHERE tenant_id = $1 AND run_id = $2")
            .bind(tenant.as_str())
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn list_runs_for_agent(&self, tenant: &TenantId, agent: &AgentId) -> StoreResult<Vec<Run>> {
        let rows = sqlx::query(
            "SELECT doc FROM runs WHERE tenant_id = $1 AND agent_id = $2 ORDER BY created_at",
        )
        .bind(tenant.as_str())
        .bind(agent.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows_docs(rows)
    }

    async fn list_events(
        &self,
        tenant: &TenantId,
        scope: EventScope,
        stream_id: &str,
    ) -> StoreResult<Vec<ChainedEvent>> {
        let rows = sqlx::query(
            "SELECT doc FROM chained_events \
             WHERE tenant_id = $1 AND scope = $2 AND stream_id = $3 ORDER BY seq",
        )
        .bind(tenant.as_str())
        .bind(scope.as_str())
        .bind(stream_id)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows_docs(rows)
    }

    async fn stream_head(
        &self,
        tenant: &TenantId,
        scope: EventScope,
        stream_id: &str,
    ) -> StoreResult<String> {
        let head: Option<String> = sqlx::query_scalar(
            "SELECT chain_hash FROM chained_events \
             WHERE tenant_id = $1 AND scope = $2 AND stream_id = $3 \
             ORDER BY seq DESC LIMIT 1",
        )
        .bind(tenant.as_str())
        .bind(scope.as_str())
        .bind(stream_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?;
        Ok(head.unwrap_or_else(|| GENESIS_PREV_CHAIN_HASH.to_string()))
    }

    async fn get_settlement(
        &self,
        tenant: &TenantId,
        id: &SettlementId,
    ) -> StoreResult<Option<Settlement>> {
        let row =
            sqlx::query("SELECT doc FROM settlements WHERE tenant_id = $1 AND settlement_id = $2")
                .bind(tenant.as_str())
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn get_settlement_for_run(
        &self,
        tenant: &TenantId,
        run_id: &RunId,
    ) -> StoreResult<Option<Settlement>> {
        let row = sqlx::query(
            "SELECT doc FROM settlements WHERE tenant_id = $1 AND run_id = $2 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(tenant.as_str())
        .bind(run_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn list_settlements_due_window_close(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Settlement>> {
        let rows = sqlx::query(
            "SELECT doc FROM settlements \
             WHERE tenant_id = $1 AND status = 'locked' AND has_dispute = FALSE \
               AND dispute_window_ends_at IS NOT NULL AND dispute_window_ends_at <= $2",
        )
        .bind(tenant.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows_docs(rows)
    }

    async fn get_dispute(&self, tenant: &TenantId, id: &DisputeId) -> StoreResult<Option<Dispute>> {
        let row = sqlx::query("SELECT doc FROM disputes WHERE tenant_id = $1 AND dispute_id = $2")
            .bind(tenant.as_str())
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn get_agreement(
        &self,
        tenant: &TenantId,
        agreement_hash: &str,
    ) -> StoreResult<Option<ToolCallAgreement>> {
        let row = sqlx::query(
            "SELECT doc FROM toolcall_agreements WHERE tenant_id = $1 AND agreement_hash = $2",
        )
        .bind(tenant.as_str())
        .bind(agreement_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn list_evidence(
        &self,
        tenant: &TenantId,
        agreement_hash: &str,
    ) -> StoreResult<Vec<ToolCallEvidence>> {
        let rows = sqlx::query(
            "SELECT doc FROM toolcall_evidence \
             WHERE tenant_id = $1 AND agreement_hash = $2 ORDER BY created_at",
        )
        .bind(tenant.as_str())
        .bind(agreement_hash)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows_docs(rows)
    }

    async fn get_hold(&self, tenant: &TenantId, hold_hash: &str) -> StoreResult<Option<FundingHold>> {
        let row =
            sqlx::query("SELECT doc FROM funding_holds WHERE tenant_id = $1 AND hold_hash = $2")
                .bind(tenant.as_str())
                .bind(hold_hash)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn list_holds(&self, tenant: &TenantId) -> StoreResult<Vec<FundingHold>> {
        let rows =
            sqlx::query("SELECT doc FROM funding_holds WHERE tenant_id = $1 ORDER BY created_at")
                .bind(tenant.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(internal)?;
        rows_docs(rows)
    }

    async fn list_holds_due_release(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<FundingHold>> {
        let rows = sqlx::query(
            "SELECT doc FROM funding_holds \
             WHERE tenant_id = $1 AND status = 'locked' AND challenge_window_ends_at <= $2",
        )
        .bind(tenant.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows_docs(rows)
    }

    async fn get_case(&self, tenant: &TenantId, id: &CaseId) -> StoreResult<Option<ArbitrationCase>> {
        let row =
            sqlx::query("SELECT doc FROM arbitration_cases WHERE tenant_id = $1 AND case_id = $2")
                .bind(tenant.as_str())
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn get_case_for_hold(
        &self,
        tenant: &TenantId,
        hold_hash: &str,
    ) -> StoreResult<Option<ArbitrationCase>> {
        let row = sqlx::query(
            "SELECT doc FROM arbitration_cases \
             WHERE tenant_id = $1 AND hold_hash = $2 ORDER BY opened_at DESC LIMIT 1",
        )
        .bind(tenant.as_str())
        .bind(hold_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn get_session(&self, tenant: &TenantId, id: &SessionId) -> StoreResult<Option<Session>> {
        let row = sqlx::query("SELECT doc FROM sessions WHERE tenant_id = $1 AND session_id = $2")
            .bind(tenant.as_str())
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn get_work_order(
        &self,
        tenant: &TenantId,
        id: &WorkOrderId,
    ) -> StoreResult<Option<WorkOrder>> {
        let row =
            sqlx::query("SELECT doc FROM work_orders WHERE tenant_id = $1 AND work_order_id = $2")
                .bind(tenant.as_str())
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn list_receipts_for_work_order(
        &self,
        tenant: &TenantId,
        id: &WorkOrderId,
    ) -> StoreResult<Vec<CompletionReceipt>> {
        let rows = sqlx::query(
            "SELECT doc FROM completion_receipts \
             WHERE tenant_id = $1 AND work_order_id = $2 ORDER BY issued_at",
        )
        .bind(tenant.as_str())
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows_docs(rows)
    }

    async fn list_attestations_for(
        &self,
        tenant: &TenantId,
        subject_type: &str,
        subject_id: &str,
    ) -> StoreResult<Vec<Attestation>> {
        let rows = sqlx::query(
            "SELECT doc FROM attestations \
             WHERE tenant_id = $1 AND subject_type = $2 AND subject_id = $3 ORDER BY issued_at",
        )
        .bind(tenant.as_str())
        .bind(subject_type)
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows_docs(rows)
    }

    async fn get_agent_card(&self, tenant: &TenantId, agent: &AgentId) -> StoreResult<Option<AgentCard>> {
        let row = sqlx::query("SELECT doc FROM agent_cards WHERE tenant_id = $1 AND agent_id = $2")
            .bind(tenant.as_str())
            .bind(agent.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn list_public_agent_cards(&self, tenant: &TenantId) -> StoreResult<Vec<AgentCard>> {
        let rows = sqlx::query(
            "SELECT doc FROM agent_cards \
             WHERE tenant_id = $1 AND visibility = 'public' ORDER BY updated_at",
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows_docs(rows)
    }

    async fn get_gate(&self, tenant: &TenantId, id: &GateId) -> StoreResult<Option<Gate>> {
        let row = sqlx::query("SELECT doc FROM gates WHERE tenant_id = $1 AND gate_id = $2")
            .bind(tenant.as_str())
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn get_signer_key(
        &self,
        tenant: &TenantId,
        agent: &AgentId,
    ) -> StoreResult<Option<SignerKey>> {
        let row = sqlx::query("SELECT doc FROM signer_keys WHERE tenant_id = $1 AND agent_id = $2")
            .bind(tenant.as_str())
            .bind(agent.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn get_api_key(&self, tenant: &TenantId, key_id: &KeyId) -> StoreResult<Option<ApiKey>> {
        let row = sqlx::query("SELECT doc FROM api_keys WHERE tenant_id = $1 AND key_id = $2")
            .bind(tenant.as_str())
            .bind(key_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn get_keyset(&self, tenant: &TenantId) -> StoreResult<Option<KeysetStore>> {
        let row = sqlx::query("SELECT doc FROM keysets WHERE tenant_id = $1")
            .bind(tenant.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn get_idempotency(
        &self,
        tenant: &TenantId,
        key: &str,
    ) -> StoreResult<Option<IdempotencyRecord>> {
        let row = sqlx::query("SELECT doc FROM idempotency WHERE tenant_id = $1 AND key = $2")
            .bind(tenant.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn put_idempotency_if_absent(
        &self,
        tenant: &TenantId,
        record: IdempotencyRecord,
    ) -> StoreResult<Option<IdempotencyRecord>> {
        let inserted = sqlx::query(
            "INSERT INTO idempotency (tenant_id, key, doc, expires_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (tenant_id, key) DO NOTHING",
        )
        .bind(tenant.as_str())
        .bind(&record.key)
        .bind(to_doc(&record)?)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(internal)?;

        if inserted.rows_affected() == 1 {
            Ok(None)
        } else {
            self.get_idempotency(tenant, &record.key).await
        }
    }

    async fn delete_expired_idempotency(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM idempotency WHERE tenant_id = $1 AND expires_at <= $2")
            .bind(tenant.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(result.rows_affected())
    }

    async fn claim_due_outbox(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<OutboxMessage>> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        let rows = sqlx::query(
            "SELECT * FROM outbox \
             WHERE tenant_id = $1 AND status = 'pending' AND next_attempt_at <= $2 \
             ORDER BY id ASC LIMIT $3 \
             FOR UPDATE SKIP LOCKED",
        )
        .bind(tenant.as_str())
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(internal)?;

        let messages: Vec<OutboxMessage> = rows
            .iter()
            .map(outbox_from_row)
            .collect::<StoreResult<_>>()?;

        if !messages.is_empty() {
            let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
            sqlx::query("UPDATE outbox SET next_attempt_at = $1 WHERE id = ANY($2)")
                .bind(now + Duration::seconds(CLAIM_LEASE_SECS))
                .bind(&ids)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
        }
        tx.commit().await.map_err(internal)?;
        Ok(messages)
    }

    async fn mark_outbox_processed(
        &self,
        tenant: &TenantId,
        id: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE outbox SET status = 'processed', processed_at = $3 \
             WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant.as_str())
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        if result.rows_affected() == 0 {
            return Err(SettldError::not_found("OUTBOX_MESSAGE_NOT_FOUND", id.to_string()));
        }
        Ok(())
    }

    async fn record_outbox_failure(
        &self,
        tenant: &TenantId,
        id: i64,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let result = match next_attempt_at {
            Some(at) => sqlx::query(
                "UPDATE outbox SET attempt = attempt + 1, last_error = $3, next_attempt_at = $4 \
                 WHERE tenant_id = $1 AND id = $2",
            )
            .bind(tenant.as_str())
            .bind(id)
            .bind(error)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(internal)?,
            None => sqlx::query(
                "UPDATE outbox SET attempt = attempt + 1, last_error = $3, status = 'dlq' \
                 WHERE tenant_id = $1 AND id = $2",
            )
            .bind(tenant.as_str())
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(internal)?,
        };
        if result.rows_affected() == 0 {
            return Err(SettldError::not_found("OUTBOX_MESSAGE_NOT_FOUND", id.to_string()));
        }
        Ok(())
    }

    async fn list_outbox(
        &self,
        tenant: &TenantId,
        status: Option<OutboxStatus>,
    ) -> StoreResult<Vec<OutboxMessage>> {
        let rows = match status {
            Some(status) => sqlx::query(
                "SELECT * FROM outbox WHERE tenant_id = $1 AND status = $2 ORDER BY id",
            )
            .bind(tenant.as_str())
            .bind(enum_str(&status)?)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?,
            None => sqlx::query("SELECT * FROM outbox WHERE tenant_id = $1 ORDER BY id")
                .bind(tenant.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(internal)?,
        };
        rows.iter().map(outbox_from_row).collect()
    }

    async fn earliest_pending_for_aggregate(
        &self,
        tenant: &TenantId,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> StoreResult<Option<i64>> {
        sqlx::query_scalar(
            "SELECT id FROM outbox \
             WHERE tenant_id = $1 AND status = 'pending' \
               AND aggregate_type = $2 AND aggregate_id = $3 \
             ORDER BY id ASC LIMIT 1",
        )
        .bind(tenant.as_str())
        .bind(aggregate_type)
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)
    }

    async fn tenants_with_pending_outbox(&self) -> StoreResult<Vec<TenantId>> {
        let tenants: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT tenant_id FROM outbox WHERE status = 'pending'")
                .fetch_all(&self.pool)
                .await
                .map_err(internal)?;
        Ok(tenants.into_iter().map(TenantId::from_string).collect())
    }

    async fn get_delivery(
        &self,
        tenant: &TenantId,
        id: &DeliveryId,
    ) -> StoreResult<Option<DeliveryRecord>> {
        let row =
            sqlx::query("SELECT doc FROM deliveries WHERE tenant_id = $1 AND delivery_id = $2")
                .bind(tenant.as_str())
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?;
        row.as_ref().map(row_doc).transpose()
    }

    async fn put_delivery(&self, tenant: &TenantId, record: &DeliveryRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO deliveries \
             (tenant_id, delivery_id, outbox_id, destination_id, state, doc, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (tenant_id, delivery_id) \
             DO UPDATE SET state = EXCLUDED.state, doc = EXCLUDED.doc",
        )
        .bind(tenant.as_str())
        .bind(record.delivery_id.as_str())
        .bind(record.outbox_id)
        .bind(record.destination_id.as_str())
        .bind(enum_str(&record.state)?)
        .bind(to_doc(record)?)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn list_deliveries(
        &self,
        tenant: &TenantId,
        filter: DeliveryFilter,
    ) -> StoreResult<Vec<DeliveryRecord>> {
        let rows = match filter {
            DeliveryFilter::All => {
                sqlx::query("SELECT doc FROM deliveries WHERE tenant_id = $1 ORDER BY created_at")
                    .bind(tenant.as_str())
                    .fetch_all(&self.pool)
                    .await
                    .map_err(internal)?
            }
            DeliveryFilter::Pending => sqlx::query(
                "SELECT doc FROM deliveries \
                 WHERE tenant_id = $1 AND state IN ('queued', 'delivered', 'failed') \
                 ORDER BY created_at",
            )
            .bind(tenant.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?,
            DeliveryFilter::Processed => sqlx::query(
                "SELECT doc FROM deliveries WHERE tenant_id = $1 AND state = 'acked' \
                 ORDER BY created_at",
            )
            .bind(tenant.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?,
            DeliveryFilter::Dlq => sqlx::query(
                "SELECT doc FROM deliveries WHERE tenant_id = $1 AND state = 'dlq' \
                 ORDER BY created_at",
            )
            .bind(tenant.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?,
        };
        rows_docs(rows)
    }

    async fn ack_delivery(
        &self,
        tenant: &TenantId,
        id: &DeliveryId,
        at: DateTime<Utc>,
    ) -> StoreResult<DeliveryRecord> {
        let mut record = self
            .get_delivery(tenant, id)
            .await?
            .ok_or_else(|| SettldError::not_found("DELIVERY_NOT_FOUND", id.to_string()))?;
        if record.state != DeliveryState::Acked {
            record.state = DeliveryState::Acked;
            record.acked_at = Some(at);
            record.updated_at = at;
            self.put_delivery(tenant, &record).await?;
        }
        Ok(record)
    }

    async fn list_destinations(&self, tenant: &TenantId) -> StoreResult<Vec<WebhookDestination>> {
        let rows = sqlx::query(
            "SELECT doc FROM destinations WHERE tenant_id = $1 ORDER BY destination_id",
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows_docs(rows)
    }

    async fn put_destination(
        &self,
        tenant: &TenantId,
        destination: &WebhookDestination,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO destinations (tenant_id, destination_id, doc) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (tenant_id, destination_id) DO UPDATE SET doc = EXCLUDED.doc",
        )
        .bind(tenant.as_str())
        .bind(destination.destination_id.as_str())
        .bind(to_doc(destination)?)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }
}
