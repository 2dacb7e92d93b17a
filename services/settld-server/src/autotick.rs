//! The background scheduler
//!
//! One cooperative tick drives everything time-based: the outbox pump,
//! challenge-window hold expiry, settlement dispute-window closure and the
//! idempotency sweep. Each sub-task is independent; one tenant's failure
//! is logged and never stalls the loop.

use chrono::Utc;
use settld_engine::RunEngine;
use settld_outbox::DeliveryWorker;
use settld_store::Store;
use settld_toolcall::ToolCallEngine;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct Autotick {
    store: Arc<dyn Store>,
    worker: DeliveryWorker,
    runs: RunEngine,
    toolcalls: ToolCallEngine,
    interval: Duration,
}

impl Autotick {
    pub fn new(
        store: Arc<dyn Store>,
        worker: DeliveryWorker,
        runs: RunEngine,
        toolcalls: ToolCallEngine,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            worker,
            runs,
            toolcalls,
            interval,
        }
    }

    /// Run until the process shuts down
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.tick_once().await;
        }
    }

    /// One full pass; also driven directly by tests
    pub async fn tick_once(&self) {
        let now = Utc::now();

        match self.worker.tick(now).await {
            Ok(stats) if stats.delivered + stats.retried + stats.dead_lettered > 0 => {
                debug!(?stats, "outbox pump");
            }
            Ok(_) => {}
            Err(err) => warn!("outbox pump failed: {err}"),
        }

        let tenants = match self.store.list_tenants().await {
            Ok(tenants) => tenants,
            Err(err) => {
                warn!("tenant sweep failed: {err}");
                return;
            }
        };

        for tenant in tenants {
            if let Err(err) = self.toolcalls.release_due_holds(&tenant, now).await {
                warn!(%tenant, "hold expiry sweep failed: {err}");
            }
            if let Err(err) = self.runs.close_due_windows(&tenant, now).await {
                warn!(%tenant, "dispute window sweep failed: {err}");
            }
            if let Err(err) = self.store.delete_expired_idempotency(&tenant, now).await {
                warn!(%tenant, "idempotency sweep failed: {err}");
            }
        }
    }
}
