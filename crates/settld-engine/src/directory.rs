//! Store-backed authority directory
//!
//! Adapts the tenant-scoped store to the verifier's lookup seam.

use async_trait::async_trait;
use settld_authority::{AuthorityDirectory, DirectoryError};
use settld_store::Store;
use settld_types::{AgentId, AgentIdentity, Grant, SignerKey, TenantId};
use std::sync::Arc;

/// The store is authoritative for grant resolution
#[derive(Clone)]
pub struct StoreDirectory {
    store: Arc<dyn Store>,
}

impl StoreDirectory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuthorityDirectory for StoreDirectory {
    async fn grants_by_hash(
        &self,
        tenant: &TenantId,
        grant_hash: &str,
    ) -> Result<Vec<Grant>, DirectoryError> {
        self.store
            .grants_by_hash(tenant, grant_hash)
            .await
            .map_err(|e| DirectoryError(e.to_string()))
    }

    async fn agent(
        &self,
        tenant: &TenantId,
        agent_id: &AgentId,
    ) -> Result<Option<AgentIdentity>, DirectoryError> {
        self.store
            .get_agent(tenant, agent_id)
            .await
            .map_err(|e| DirectoryError(e.to_string()))
    }

    async fn signer_key(
        &self,
        tenant: &TenantId,
        agent_id: &AgentId,
    ) -> Result<Option<SignerKey>, DirectoryError> {
        self.store
            .get_signer_key(tenant, agent_id)
            .await
            .map_err(|e| DirectoryError(e.to_string()))
    }
}
