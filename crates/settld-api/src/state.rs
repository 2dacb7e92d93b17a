//! Application state shared across handlers

use crate::sse::StreamHub;
use settld_engine::gate::GateEngine;
use settld_engine::session::SessionEngine;
use settld_engine::work_order::WorkOrderEngine;
use settld_engine::RunEngine;
use settld_crypto::SignerRing;
use settld_store::Store;
use settld_toolcall::ToolCallEngine;
use std::collections::HashMap;
use std::sync::Arc;

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Ops tokens accepted on `x-proxy-ops-token`, any tenant
    pub ops_tokens: Vec<String>,
    /// Static `x-api-key` secrets per tenant
    pub static_api_keys: HashMap<String, Vec<String>>,
    /// Whether the authority verifier demands an active signer key
    pub require_signer_key: bool,
    /// Protocol version echoed to clients
    pub protocol_version: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            ops_tokens: Vec::new(),
            static_api_keys: HashMap::new(),
            require_signer_key: false,
            protocol_version: "1.0".to_string(),
        }
    }
}

/// Shared application state
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub runs: RunEngine,
    pub sessions: SessionEngine,
    pub work_orders: WorkOrderEngine,
    pub toolcalls: ToolCallEngine,
    pub gates: GateEngine,
    pub ring: SignerRing,
    pub hub: StreamHub,
    pub config: ApiConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, ring: SignerRing, config: ApiConfig) -> Arc<Self> {
        Arc::new(Self {
            runs: RunEngine::new(store.clone()),
            sessions: SessionEngine::new(store.clone()),
            work_orders: WorkOrderEngine::new(store.clone()),
            toolcalls: ToolCallEngine::new(store.clone()),
            gates: GateEngine::new(store.clone()),
            hub: StreamHub::new(),
            store,
            ring,
            config,
        })
    }
}
