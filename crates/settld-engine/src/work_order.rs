//! Work order lifecycle
//!
//! created → accepted → in_progress → completed → settled (or cancelled).
//! Creation and top-ups lock buyer funds; settle splits the escrowed total
//! to the seller through the wallet engine. Progress appends metering
//! records; completion issues a hash-bound receipt.

use chrono::{DateTime, Utc};
use serde_json::json;
use settld_crypto::hash_artifact_of;
use settld_store::{Store, WriteBatch};
use settld_types::*;
use std::sync::Arc;
use tracing::info;

/// Inputs to [`WorkOrderEngine::create`]
#[derive(Debug, Clone)]
pub struct CreateWorkOrder {
    pub buyer_agent_id: AgentId,
    pub seller_agent_id: AgentId,
    pub description: String,
    pub amount_cents: i64,
    pub currency: String,
}

/// The work order engine
#[derive(Clone)]
pub struct WorkOrderEngine {
    store: Arc<dyn Store>,
}

impl WorkOrderEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        tenant: &TenantId,
        input: CreateWorkOrder,
        now: DateTime<Utc>,
    ) -> Result<WorkOrder> {
        let buyer_wallet = self
            .store
            .get_wallet(tenant, &input.buyer_agent_id)
            .await?
            .ok_or_else(|| {
                SettldError::not_found("WALLET_NOT_FOUND", input.buyer_agent_id.to_string())
            })?;
        let locked = settld_wallet::lock(&buyer_wallet, input.amount_cents, now)?;

        let order = WorkOrder {
            schema_version: WorkOrder::SCHEMA_VERSION.into(),
            tenant_id: tenant.clone(),
            work_order_id: WorkOrderId::new(),
            buyer_agent_id: input.buyer_agent_id,
            seller_agent_id: input.seller_agent_id,
            status: WorkOrderStatus::Created,
            description: input.description,
            escrowed_cents: input.amount_cents,
            currency: input.currency,
            metering: Vec::new(),
            settled_released_cents: None,
            settled_refunded_cents: None,
            created_at: now,
            updated_at: now,
        };

        let batch = WriteBatch::new()
            .put_wallet(locked)
            .put_work_order(order.clone())
            .outbox(OutboxDraft::new(
                "work_order.created",
                "work_order",
                order.work_order_id.to_string(),
                json!({
                    "workOrderId": order.work_order_id,
                    "amountCents": order.escrowed_cents,
                }),
            ));
        self.store.commit(tenant, batch).await?;
        info!(work_order = %order.work_order_id, "work order created");
        Ok(order)
    }

    pub async fn accept(
        &self,
        tenant: &TenantId,
        id: &WorkOrderId,
        now: DateTime<Utc>,
    ) -> Result<WorkOrder> {
        self.transition(tenant, id, WorkOrderStatus::Created, WorkOrderStatus::Accepted, now)
            .await
    }

    /// Record progress: moves to in_progress and appends a metering entry
    pub async fn progress(
        &self,
        tenant: &TenantId,
        id: &WorkOrderId,
        units: i64,
        unit_type: String,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<WorkOrder> {
        let mut order = self.require(tenant, id).await?;
        if !matches!(
            order.status,
            WorkOrderStatus::Accepted | WorkOrderStatus::InProgress
        ) {
            return Err(invalid_state(&order, "progress"));
        }
        order.status = WorkOrderStatus::InProgress;
        order.metering.push(MeteringRecord {
            recorded_at: now,
            units,
            unit_type,
            note,
        });
        order.updated_at = now;
        self.store
            .commit(tenant, WriteBatch::new().put_work_order(order.clone()))
            .await?;
        Ok(order)
    }

    /// Lock additional buyer funds into the order's escrow
    pub async fn top_up(
        &self,
        tenant: &TenantId,
        id: &WorkOrderId,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<WorkOrder> {
        let mut order = self.require(tenant, id).await?;
        if matches!(
            order.status,
            WorkOrderStatus::Settled | WorkOrderStatus::Cancelled
        ) {
            return Err(invalid_state(&order, "topUp"));
        }
        let wallet = self
            .store
            .get_wallet(tenant, &order.buyer_agent_id)
            .await?
            .ok_or_else(|| {
                SettldError::not_found("WALLET_NOT_FOUND", order.buyer_agent_id.to_string())
            })?;
        let locked = settld_wallet::lock(&wallet, amount_cents, now)?;
        order.escrowed_cents += amount_cents;
        order.updated_at = now;

        let batch = WriteBatch::new()
            .put_wallet(locked)
            .put_work_order(order.clone())
            .outbox(OutboxDraft::new(
                "work_order.topped_up",
                "work_order",
                order.work_order_id.to_string(),
                json!({ "workOrderId": order.work_order_id, "amountCents": amount_cents }),
            ));
        self.store.commit(tenant, batch).await?;
        Ok(order)
    }

    /// Mark the order complete and issue a hash-bound completion receipt
    pub async fn complete(
        &self,
        tenant: &TenantId,
        id: &WorkOrderId,
        summary: String,
        output_refs: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<(WorkOrder, CompletionReceipt)> {
        let mut order = self.require(tenant, id).await?;
        if !matches!(
            order.status,
            WorkOrderStatus::Accepted | WorkOrderStatus::InProgress
        ) {
            return Err(invalid_state(&order, "complete"));
        }
        order.status = WorkOrderStatus::Completed;
        order.updated_at = now;

        let mut receipt = CompletionReceipt {
            schema_version: CompletionReceipt::SCHEMA_VERSION.into(),
            tenant_id: tenant.clone(),
            receipt_id: ReceiptId::new(),
            work_order_id: order.work_order_id.clone(),
            seller_agent_id: order.seller_agent_id.clone(),
            summary,
            output_refs,
            issued_at: now,
            receipt_hash: None,
        };
        receipt.receipt_hash = Some(hash_artifact_of(&receipt, "receiptHash")?);

        let batch = WriteBatch::new()
            .put_work_order(order.clone())
            .put_receipt(receipt.clone())
            .outbox(OutboxDraft::new(
                "work_order.completed",
                "work_order",
                order.work_order_id.to_string(),
                json!({
                    "workOrderId": order.work_order_id,
                    "receiptHash": receipt.receipt_hash,
                }),
            ));
        self.store.commit(tenant, batch).await?;
        Ok((order, receipt))
    }

    /// Split the escrowed total between seller and buyer
    pub async fn settle(
        &self,
        tenant: &TenantId,
        id: &WorkOrderId,
        release_rate_pct: u8,
        now: DateTime<Utc>,
    ) -> Result<WorkOrder> {
        if release_rate_pct > 100 {
            return Err(SettldError::validation(
                "VALIDATION_RELEASE_RATE_INVALID",
                format!("releaseRatePct {release_rate_pct} out of range"),
            ));
        }
        let mut order = self.require(tenant, id).await?;
        if order.status != WorkOrderStatus::Completed {
            return Err(invalid_state(&order, "settle"));
        }

        let released = order.escrowed_cents * release_rate_pct as i64 / 100;
        let refunded = order.escrowed_cents - released;
        let buyer = self
            .store
            .get_wallet(tenant, &order.buyer_agent_id)
            .await?
            .ok_or_else(|| {
                SettldError::not_found("WALLET_NOT_FOUND", order.buyer_agent_id.to_string())
            })?;
        let seller = self
            .store
            .get_wallet(tenant, &order.seller_agent_id)
            .await?
            .ok_or_else(|| {
                SettldError::not_found("WALLET_NOT_FOUND", order.seller_agent_id.to_string())
            })?;
        let outcome = settld_wallet::split_release(
            &buyer,
            &seller,
            order.escrowed_cents,
            released,
            refunded,
            now,
        )?;

        order.status = WorkOrderStatus::Settled;
        order.settled_released_cents = Some(released);
        order.settled_refunded_cents = Some(refunded);
        order.updated_at = now;

        let batch = WriteBatch::new()
            .put_wallet(outcome.payer_wallet)
            .put_wallet(outcome.payee_wallet)
            .put_work_order(order.clone())
            .outbox(OutboxDraft::new(
                "work_order.settled",
                "work_order",
                order.work_order_id.to_string(),
                json!({
                    "workOrderId": order.work_order_id,
                    "releasedCents": released,
                    "refundedCents": refunded,
                }),
            ));
        self.store.commit(tenant, batch).await?;
        info!(work_order = %order.work_order_id, released, refunded, "work order settled");
        Ok(order)
    }

    pub async fn metering(
        &self,
        tenant: &TenantId,
        id: &WorkOrderId,
    ) -> Result<Vec<MeteringRecord>> {
        Ok(self.require(tenant, id).await?.metering)
    }

    async fn transition(
        &self,
        tenant: &TenantId,
        id: &WorkOrderId,
        from: WorkOrderStatus,
        to: WorkOrderStatus,
        now: DateTime<Utc>,
    ) -> Result<WorkOrder> {
        let mut order = self.require(tenant, id).await?;
        if order.status != from {
            return Err(invalid_state(&order, "accept"));
        }
        order.status = to;
        order.updated_at = now;
        self.store
            .commit(tenant, WriteBatch::new().put_work_order(order.clone()))
            .await?;
        Ok(order)
    }

    async fn require(&self, tenant: &TenantId, id: &WorkOrderId) -> Result<WorkOrder> {
        self.store
            .get_work_order(tenant, id)
            .await?
            .ok_or_else(|| SettldError::not_found("WORK_ORDER_NOT_FOUND", id.to_string()))
    }
}

fn invalid_state(order: &WorkOrder, operation: &str) -> SettldError {
    SettldError::Conflict {
        code: "WORK_ORDER_STATE_INVALID",
        message: format!(
            "operation {operation} is not valid while {} is {:?}",
            order.work_order_id, order.status
        ),
    }
}
