//! x402 payment gates
//!
//! A gate is a hash-bound artifact created ahead of a payment; authorizing
//! a payment runs the authority verifier over the caller's leaf grant and
//! the operation descriptor, and answers with an authorization artifact.
//! Funds move only when a run settlement or funding hold locks them.

use crate::StoreDirectory;
use chrono::{DateTime, Utc};
use serde_json::json;
use settld_authority::{verify_operation, OperationDescriptor, OperationRole, VerifyOptions};
use settld_crypto::hash_artifact_of;
use settld_store::{Store, WriteBatch};
use settld_types::*;
use std::sync::Arc;

/// Inputs to [`GateEngine::create_gate`]
#[derive(Debug, Clone)]
pub struct CreateGate {
    pub payer_agent_id: AgentId,
    pub payee_agent_id: AgentId,
    pub amount_cents: i64,
    pub currency: String,
    pub tool_id: Option<String>,
    pub provider_id: Option<String>,
}

/// Inputs to [`GateEngine::authorize_payment`]
#[derive(Debug, Clone)]
pub struct AuthorizePayment {
    pub gate_id: GateId,
    pub grant_id: GrantId,
    pub risk_class: Option<String>,
    pub require_signer_key: bool,
}

/// The x402 gate engine
#[derive(Clone)]
pub struct GateEngine {
    store: Arc<dyn Store>,
    directory: StoreDirectory,
}

impl GateEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let directory = StoreDirectory::new(store.clone());
        Self { store, directory }
    }

    pub async fn create_gate(
        &self,
        tenant: &TenantId,
        input: CreateGate,
        now: DateTime<Utc>,
    ) -> Result<Gate> {
        if input.amount_cents <= 0 {
            return Err(SettldError::validation(
                "VALIDATION_AMOUNT_INVALID",
                "gate amount must be positive",
            ));
        }
        let mut gate = Gate {
            schema_version: Gate::SCHEMA_VERSION.into(),
            tenant_id: tenant.clone(),
            gate_id: GateId::new(),
            payer_agent_id: input.payer_agent_id,
            payee_agent_id: input.payee_agent_id,
            amount_cents: input.amount_cents,
            currency: input.currency,
            tool_id: input.tool_id,
            provider_id: input.provider_id,
            created_at: now,
            gate_hash: None,
        };
        gate.gate_hash = Some(hash_artifact_of(&gate, "gateHash")?);

        let batch = WriteBatch::new().put_gate(gate.clone()).outbox(OutboxDraft::new(
            "gate.created",
            "gate",
            gate.gate_id.to_string(),
            json!({ "gateId": gate.gate_id, "gateHash": gate.gate_hash }),
        ));
        self.store.commit(tenant, batch).await?;
        Ok(gate)
    }

    /// Verify the grant chain for the gate's payment. Rejections surface
    /// as the verifier's typed errors; success yields an authorization
    /// artifact bound to the leaf grant hash.
    pub async fn authorize_payment(
        &self,
        tenant: &TenantId,
        input: AuthorizePayment,
        now: DateTime<Utc>,
    ) -> Result<PaymentAuthorization> {
        let gate = self
            .store
            .get_gate(tenant, &input.gate_id)
            .await?
            .ok_or_else(|| SettldError::not_found("GATE_NOT_FOUND", input.gate_id.to_string()))?;
        let leaf = self
            .store
            .get_grant(tenant, &input.grant_id)
            .await?
            .ok_or_else(|| SettldError::not_found("GRANT_NOT_FOUND", input.grant_id.to_string()))?;

        let op = OperationDescriptor {
            role: OperationRole::Payer,
            operation: "x402.authorizePayment".into(),
            tool_id: gate.tool_id.clone(),
            provider_id: gate.provider_id.clone(),
            risk_class: input.risk_class,
            side_effecting: true,
            amount_cents: Some(gate.amount_cents),
        };
        let options = VerifyOptions {
            require_signer_key: input.require_signer_key,
        };
        let verified = verify_operation(&self.directory, tenant, &leaf, &op, &options, now).await?;

        let authorization = PaymentAuthorization {
            schema_version: PaymentAuthorization::SCHEMA_VERSION.into(),
            tenant_id: tenant.clone(),
            authorization_id: AuthorizationId::new(),
            gate_id: gate.gate_id.clone(),
            grant_hash: verified.leaf_grant_hash,
            amount_cents: gate.amount_cents,
            authorized: true,
            issued_at: now,
        };

        let batch = WriteBatch::new().outbox(OutboxDraft::new(
            "gate.payment_authorized",
            "gate",
            gate.gate_id.to_string(),
            json!({
                "authorizationId": authorization.authorization_id,
                "gateId": gate.gate_id,
                "grantHash": authorization.grant_hash,
            }),
        ));
        self.store.commit(tenant, batch).await?;
        Ok(authorization)
    }
}
