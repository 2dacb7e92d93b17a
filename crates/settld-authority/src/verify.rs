//! The chain verification walk

use crate::{
    authority_error, lifecycle_gate, schema_valid, signer_key_gate, AuthorityDirectory,
    OperationDescriptor, VerifiedChain,
};
use chrono::{DateTime, Utc};
use settld_types::{AuthorityCode, Grant, GrantKind, SettldError, TenantId};

/// Hard bound on chain walks; grants deeper than this are malformed
const MAX_CHAIN_LEN: usize = 32;

/// Tenant policy knobs the verifier honors
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// When set, the grantee must hold an active signer key
    pub require_signer_key: bool,
}

/// Verify a leaf grant against an operation. On success returns the full
/// root-first chain.
pub async fn verify_operation(
    directory: &dyn AuthorityDirectory,
    tenant: &TenantId,
    leaf: &Grant,
    op: &OperationDescriptor,
    options: &VerifyOptions,
    now: DateTime<Utc>,
) -> Result<VerifiedChain, SettldError> {
    let chain = resolve_chain(directory, tenant, leaf).await?;
    let root = &chain[0];

    check_root(root, now)?;

    if let Some(declared_root) = leaf.chain_binding.root_grant_hash.as_deref() {
        if declared_root != root.grant_hash {
            return Err(authority_error(
                AuthorityCode::RootMismatch,
                format!(
                    "leaf declares root {declared_root} but the chain resolves to {}",
                    root.grant_hash
                ),
            ));
        }
    }

    // depth rule: leaf depth bounded by the root's delegation budget
    if leaf.chain_binding.depth > root.chain_binding.max_delegation_depth {
        return Err(SettldError::Conflict {
            code: "X402_AUTHORITY_DELEGATION_DEPTH_EXCEEDED",
            message: format!(
                "leaf depth {} exceeds root maxDelegationDepth {}",
                leaf.chain_binding.depth, root.chain_binding.max_delegation_depth
            ),
        });
    }

    // every non-root link: lifecycle of the grant itself plus subset rules
    for pair in chain.windows(2) {
        let (parent, child) = (&pair[0], &pair[1]);
        check_ancestor(child, now)?;
        check_subset(parent, child)?;
    }

    check_operation_fit(leaf, op)?;

    // grantee lifecycle and signer key
    let identity = directory
        .agent(tenant, &leaf.grantee_agent_id)
        .await
        .map_err(resolver_unavailable)?
        .ok_or_else(|| {
            SettldError::not_found("AGENT_NOT_FOUND", leaf.grantee_agent_id.to_string())
        })?;
    lifecycle_gate(&identity)?;

    if options.require_signer_key {
        let key = directory
            .signer_key(tenant, &leaf.grantee_agent_id)
            .await
            .map_err(resolver_unavailable)?;
        signer_key_gate(key.as_ref(), op.role)?;
    }

    Ok(VerifiedChain {
        root_grant_hash: root.grant_hash.clone(),
        leaf_grant_hash: leaf.grant_hash.clone(),
        chain,
        verified_at: now,
    })
}

/// Walk parent hashes up to the root. Returns the chain root-first.
async fn resolve_chain(
    directory: &dyn AuthorityDirectory,
    tenant: &TenantId,
    leaf: &Grant,
) -> Result<Vec<Grant>, SettldError> {
    let mut chain = vec![leaf.clone()];
    let mut cursor = leaf.clone();

    while let Some(parent_hash) = cursor.chain_binding.parent_grant_hash.clone() {
        if chain.len() >= MAX_CHAIN_LEN {
            return Err(authority_error(
                AuthorityCode::RootSchemaInvalid,
                format!("delegation chain exceeds {MAX_CHAIN_LEN} links"),
            ));
        }
        let mut candidates = directory
            .grants_by_hash(tenant, &parent_hash)
            .await
            .map_err(resolver_unavailable)?;
        match candidates.len() {
            0 => {
                return Err(authority_error(
                    AuthorityCode::RootNotFound,
                    format!("no grant found for parent hash {parent_hash}"),
                ))
            }
            1 => {}
            n => {
                return Err(authority_error(
                    AuthorityCode::RootAmbiguous,
                    format!("{n} grants share hash {parent_hash}"),
                ))
            }
        }
        let parent = candidates.remove(0);
        chain.push(parent.clone());
        cursor = parent;
    }

    chain.reverse();

    let root = &chain[0];
    if root.kind != GrantKind::Authority || !root.is_root() {
        return Err(authority_error(
            AuthorityCode::RootNotFound,
            "chain does not terminate in a root authority grant",
        ));
    }
    Ok(chain)
}

fn check_root(root: &Grant, now: DateTime<Utc>) -> Result<(), SettldError> {
    if !schema_valid(root) {
        return Err(authority_error(
            AuthorityCode::RootSchemaInvalid,
            format!("root schemaVersion {}", root.schema_version),
        ));
    }
    if root.revocation.is_revoked() {
        return Err(authority_error(
            AuthorityCode::RootRevoked,
            format!("root grant {} is revoked", root.grant_id),
        ));
    }
    if now < root.validity.not_before {
        return Err(authority_error(
            AuthorityCode::RootNotActive,
            format!("root grant {} is not yet valid", root.grant_id),
        ));
    }
    if now >= root.validity.expires_at {
        return Err(authority_error(
            AuthorityCode::RootExpired,
            format!("root grant {} has expired", root.grant_id),
        ));
    }
    Ok(())
}

fn check_ancestor(grant: &Grant, now: DateTime<Utc>) -> Result<(), SettldError> {
    if !schema_valid(grant) {
        return Err(SettldError::Conflict {
            code: "X402_AUTHORITY_DELEGATION_GRANT_SCHEMA_INVALID",
            message: format!("grant {} schemaVersion {}", grant.grant_id, grant.schema_version),
        });
    }
    if grant.revocation.is_revoked() {
        return Err(SettldError::Conflict {
            code: "X402_AUTHORITY_DELEGATION_GRANT_REVOKED",
            message: format!("grant {} is revoked", grant.grant_id),
        });
    }
    if !grant.is_within_validity(now) {
        return Err(SettldError::Conflict {
            code: "X402_AUTHORITY_DELEGATION_GRANT_EXPIRED",
            message: format!("grant {} is outside its validity window", grant.grant_id),
        });
    }
    Ok(())
}

/// Subset rules between one parent-child link. An absent parent list means
/// unrestricted; an absent child list inherits the parent's restriction.
fn check_subset(parent: &Grant, child: &Grant) -> Result<(), SettldError> {
    if !parent.scope.side_effecting_allowed && child.scope.side_effecting_allowed {
        return Err(authority_error(
            AuthorityCode::ScopeEscalation,
            format!(
                "grant {} enables side effects its parent forbids",
                child.grant_id
            ),
        ));
    }
    subset_list(
        parent.scope.allowed_risk_classes.as_deref(),
        child.scope.allowed_risk_classes.as_deref(),
        child,
        "allowedRiskClasses",
    )?;
    subset_list(
        parent.scope.allowed_provider_ids.as_deref(),
        child.scope.allowed_provider_ids.as_deref(),
        child,
        "allowedProviderIds",
    )?;
    subset_list(
        parent.scope.allowed_tool_ids.as_deref(),
        child.scope.allowed_tool_ids.as_deref(),
        child,
        "allowedToolIds",
    )?;
    if child.spend_envelope.max_per_call_cents > parent.spend_envelope.max_per_call_cents
        || child.spend_envelope.max_total_cents > parent.spend_envelope.max_total_cents
    {
        return Err(authority_error(
            AuthorityCode::ScopeEscalation,
            format!(
                "grant {} widens the spend envelope beyond its parent",
                child.grant_id
            ),
        ));
    }
    Ok(())
}

fn subset_list(
    parent: Option<&[String]>,
    child: Option<&[String]>,
    child_grant: &Grant,
    field: &str,
) -> Result<(), SettldError> {
    let Some(parent_list) = parent else {
        return Ok(()); // unrestricted parent
    };
    let Some(child_list) = child else {
        // child inherits nothing explicit but may not be broader than the
        // parent; an absent child list would mean unrestricted, which is
        // an escalation under a restricted parent
        return Err(authority_error(
            AuthorityCode::ScopeEscalation,
            format!(
                "grant {} leaves {field} unrestricted under a restricted parent",
                child_grant.grant_id
            ),
        ));
    };
    for entry in child_list {
        if !parent_list.contains(entry) {
            return Err(authority_error(
                AuthorityCode::ScopeEscalation,
                format!("grant {} adds {entry} to {field}", child_grant.grant_id),
            ));
        }
    }
    Ok(())
}

/// The leaf scope must cover the operation itself
fn check_operation_fit(leaf: &Grant, op: &OperationDescriptor) -> Result<(), SettldError> {
    if op.side_effecting && !leaf.scope.side_effecting_allowed {
        return Err(authority_error(
            AuthorityCode::ScopeEscalation,
            format!("operation {} is side-effecting", op.operation),
        ));
    }
    if let (Some(risk), Some(allowed)) = (&op.risk_class, &leaf.scope.allowed_risk_classes) {
        if !allowed.contains(risk) {
            return Err(authority_error(
                AuthorityCode::ScopeEscalation,
                format!("risk class {risk} is not granted"),
            ));
        }
    }
    if let (Some(provider), Some(allowed)) = (&op.provider_id, &leaf.scope.allowed_provider_ids) {
        if !allowed.contains(provider) {
            return Err(authority_error(
                AuthorityCode::ScopeEscalation,
                format!("provider {provider} is not granted"),
            ));
        }
    }
    if let (Some(tool), Some(allowed)) = (&op.tool_id, &leaf.scope.allowed_tool_ids) {
        if !allowed.contains(tool) {
            return Err(authority_error(
                AuthorityCode::ScopeEscalation,
                format!("tool {tool} is not granted"),
            ));
        }
    }
    if let Some(amount) = op.amount_cents {
        if amount > leaf.spend_envelope.max_per_call_cents {
            return Err(SettldError::Conflict {
                code: "X402_AUTHORITY_SPEND_ENVELOPE_EXCEEDED",
                message: format!(
                    "amount {amount} exceeds maxPerCallCents {}",
                    leaf.spend_envelope.max_per_call_cents
                ),
            });
        }
    }
    Ok(())
}

fn resolver_unavailable(err: crate::DirectoryError) -> SettldError {
    authority_error(AuthorityCode::RootResolverUnavailable, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{finalize_grant_hash, AuthorityDirectory, DirectoryError, OperationRole};
    use async_trait::async_trait;
    use chrono::Duration;
    use settld_types::{
        AgentId, AgentIdentity, AgentKey, AgentLifecycle, AgentOwner, ChainBinding, GrantId,
        GrantRevocation, GrantScope, GrantValidity, KeyId, SignerKey, SignerKeyStatus,
        SpendEnvelope,
    };
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MapDirectory {
        grants: Mutex<Vec<Grant>>,
        agents: Mutex<HashMap<String, AgentIdentity>>,
        keys: Mutex<HashMap<String, SignerKey>>,
    }

    impl MapDirectory {
        fn insert_grant(&self, grant: Grant) {
            self.grants.lock().unwrap().push(grant);
        }

        fn insert_agent(&self, identity: AgentIdentity) {
            self.agents
                .lock()
                .unwrap()
                .insert(identity.agent_id.to_string(), identity);
        }

        fn insert_key(&self, key: SignerKey) {
            self.keys
                .lock()
                .unwrap()
                .insert(key.agent_id.to_string(), key);
        }
    }

    #[async_trait]
    impl AuthorityDirectory for MapDirectory {
        async fn grants_by_hash(
            &self,
            _tenant: &TenantId,
            grant_hash: &str,
        ) -> Result<Vec<Grant>, DirectoryError> {
            Ok(self
                .grants
                .lock()
                .unwrap()
                .iter()
                .filter(|g| g.grant_hash == grant_hash)
                .cloned()
                .collect())
        }

        async fn agent(
            &self,
            _tenant: &TenantId,
            agent_id: &AgentId,
        ) -> Result<Option<AgentIdentity>, DirectoryError> {
            Ok(self.agents.lock().unwrap().get(agent_id.as_str()).cloned())
        }

        async fn signer_key(
            &self,
            _tenant: &TenantId,
            agent_id: &AgentId,
        ) -> Result<Option<SignerKey>, DirectoryError> {
            Ok(self.keys.lock().unwrap().get(agent_id.as_str()).cloned())
        }
    }

    fn tenant() -> TenantId {
        TenantId::from("tenant_test")
    }

    fn active_agent(agent_id: &AgentId) -> AgentIdentity {
        let now = Utc::now();
        AgentIdentity {
            schema_version: AgentIdentity::SCHEMA_VERSION.into(),
            tenant_id: tenant(),
            agent_id: agent_id.clone(),
            display_name: "worker".into(),
            owner: AgentOwner {
                owner_type: "organization".into(),
                id: "org_1".into(),
            },
            capabilities: vec!["tool.call".into()],
            keys: vec![AgentKey {
                key_id: KeyId::new(),
                public_key_pem: String::new(),
            }],
            status: AgentLifecycle::Active,
            created_at: now,
            updated_at: now,
        }
    }

    fn root_grant(grantee: &AgentId) -> Grant {
        let now = Utc::now();
        let mut grant = Grant {
            schema_version: Grant::AUTHORITY_SCHEMA_VERSION.into(),
            tenant_id: tenant(),
            grant_id: GrantId::new(),
            kind: GrantKind::Authority,
            grantor_id: "org_1".into(),
            grantee_agent_id: grantee.clone(),
            scope: GrantScope {
                side_effecting_allowed: true,
                allowed_risk_classes: Some(vec!["low".into(), "medium".into()]),
                allowed_provider_ids: None,
                allowed_tool_ids: None,
            },
            spend_envelope: SpendEnvelope {
                currency: "USD".into(),
                max_per_call_cents: 10_000,
                max_total_cents: 100_000,
            },
            chain_binding: ChainBinding {
                root_grant_hash: None,
                parent_grant_hash: None,
                depth: 0,
                max_delegation_depth: 2,
            },
            validity: GrantValidity {
                issued_at: now,
                not_before: now - Duration::minutes(1),
                expires_at: now + Duration::days(7),
            },
            revocation: GrantRevocation {
                revocable: true,
                revoked_at: None,
                revocation_reason_code: None,
            },
            grant_hash: String::new(),
            created_at: now,
        };
        finalize_grant_hash(&mut grant).unwrap();
        grant
    }

    fn delegate(parent: &Grant, root: &Grant, grantee: &AgentId, depth: u32) -> Grant {
        let now = Utc::now();
        let mut grant = Grant {
            schema_version: Grant::DELEGATION_SCHEMA_VERSION.into(),
            tenant_id: tenant(),
            grant_id: GrantId::new(),
            kind: GrantKind::Delegation,
            grantor_id: parent.grantee_agent_id.to_string(),
            grantee_agent_id: grantee.clone(),
            scope: parent.scope.clone(),
            spend_envelope: parent.spend_envelope.clone(),
            chain_binding: ChainBinding {
                root_grant_hash: Some(root.grant_hash.clone()),
                parent_grant_hash: Some(parent.grant_hash.clone()),
                depth,
                max_delegation_depth: root.chain_binding.max_delegation_depth,
            },
            validity: parent.validity.clone(),
            revocation: GrantRevocation {
                revocable: true,
                revoked_at: None,
                revocation_reason_code: None,
            },
            grant_hash: String::new(),
            created_at: now,
        };
        finalize_grant_hash(&mut grant).unwrap();
        grant
    }

    fn op() -> OperationDescriptor {
        OperationDescriptor {
            role: OperationRole::Payer,
            operation: "toolCall".into(),
            tool_id: None,
            provider_id: None,
            risk_class: Some("low".into()),
            side_effecting: true,
            amount_cents: Some(500),
        }
    }

    #[tokio::test]
    async fn valid_delegation_chain_verifies() {
        let directory = MapDirectory::default();
        let worker = AgentId::new();
        let sub = AgentId::new();
        directory.insert_agent(active_agent(&worker));
        directory.insert_agent(active_agent(&sub));

        let root = root_grant(&worker);
        let leaf = delegate(&root, &root, &sub, 1);
        directory.insert_grant(root.clone());
        directory.insert_grant(leaf.clone());

        let verified = verify_operation(
            &directory,
            &tenant(),
            &leaf,
            &op(),
            &VerifyOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(verified.chain.len(), 2);
        assert_eq!(verified.root_grant_hash, root.grant_hash);
    }

    #[tokio::test]
    async fn missing_root_is_rejected() {
        let directory = MapDirectory::default();
        let worker = AgentId::new();
        let sub = AgentId::new();
        directory.insert_agent(active_agent(&sub));

        let root = root_grant(&worker);
        let leaf = delegate(&root, &root, &sub, 1);
        // root never inserted
        directory.insert_grant(leaf.clone());

        let err = verify_operation(
            &directory,
            &tenant(),
            &leaf,
            &op(),
            &VerifyOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "X402_AUTHORITY_DELEGATION_ROOT_NOT_FOUND");
    }

    #[tokio::test]
    async fn duplicate_root_hash_is_ambiguous() {
        let directory = MapDirectory::default();
        let worker = AgentId::new();
        let sub = AgentId::new();
        directory.insert_agent(active_agent(&sub));

        let root = root_grant(&worker);
        let leaf = delegate(&root, &root, &sub, 1);
        directory.insert_grant(root.clone());
        directory.insert_grant(root.clone());
        directory.insert_grant(leaf.clone());

        let err = verify_operation(
            &directory,
            &tenant(),
            &leaf,
            &op(),
            &VerifyOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "X402_AUTHORITY_DELEGATION_ROOT_AMBIGUOUS");
    }

    #[tokio::test]
    async fn revoked_root_is_rejected() {
        let directory = MapDirectory::default();
        let worker = AgentId::new();
        let sub = AgentId::new();
        directory.insert_agent(active_agent(&sub));

        let mut root = root_grant(&worker);
        root.revocation.revoked_at = Some(Utc::now());
        root.revocation.revocation_reason_code = Some("COMPROMISED".into());
        let leaf = delegate(&root, &root, &sub, 1);
        directory.insert_grant(root);
        directory.insert_grant(leaf.clone());

        let err = verify_operation(
            &directory,
            &tenant(),
            &leaf,
            &op(),
            &VerifyOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "X402_AUTHORITY_DELEGATION_ROOT_REVOKED");
    }

    #[tokio::test]
    async fn scope_widening_is_an_escalation() {
        let directory = MapDirectory::default();
        let worker = AgentId::new();
        let sub = AgentId::new();
        directory.insert_agent(active_agent(&sub));

        let root = root_grant(&worker);
        let mut leaf = delegate(&root, &root, &sub, 1);
        leaf.scope.allowed_risk_classes =
            Some(vec!["low".into(), "medium".into(), "high".into()]);
        finalize_grant_hash(&mut leaf).unwrap();
        directory.insert_grant(root);
        directory.insert_grant(leaf.clone());

        let err = verify_operation(
            &directory,
            &tenant(),
            &leaf,
            &op(),
            &VerifyOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "X402_AUTHORITY_DELEGATION_SCOPE_ESCALATION");
    }

    #[tokio::test]
    async fn depth_beyond_the_root_budget_is_rejected() {
        let directory = MapDirectory::default();
        let worker = AgentId::new();
        let sub = AgentId::new();
        directory.insert_agent(active_agent(&sub));

        let root = root_grant(&worker); // max depth 2
        let mut leaf = delegate(&root, &root, &sub, 3);
        finalize_grant_hash(&mut leaf).unwrap();
        directory.insert_grant(root);
        directory.insert_grant(leaf.clone());

        let err = verify_operation(
            &directory,
            &tenant(),
            &leaf,
            &op(),
            &VerifyOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "X402_AUTHORITY_DELEGATION_DEPTH_EXCEEDED");
    }

    #[tokio::test]
    async fn side_effect_forbidden_anywhere_blocks_the_leaf() {
        let directory = MapDirectory::default();
        let worker = AgentId::new();
        let sub = AgentId::new();
        directory.insert_agent(active_agent(&sub));

        let mut root = root_grant(&worker);
        root.scope.side_effecting_allowed = false;
        finalize_grant_hash(&mut root).unwrap();
        let mut leaf = delegate(&root, &root, &sub, 1);
        leaf.scope.side_effecting_allowed = true;
        finalize_grant_hash(&mut leaf).unwrap();
        directory.insert_grant(root);
        directory.insert_grant(leaf.clone());

        let err = verify_operation(
            &directory,
            &tenant(),
            &leaf,
            &op(),
            &VerifyOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "X402_AUTHORITY_DELEGATION_SCOPE_ESCALATION");
    }

    #[tokio::test]
    async fn suspended_grantee_maps_to_gone() {
        let directory = MapDirectory::default();
        let worker = AgentId::new();
        directory.insert_agent(AgentIdentity {
            status: AgentLifecycle::Suspended,
            ..active_agent(&worker)
        });

        let root = root_grant(&worker);
        directory.insert_grant(root.clone());

        let err = verify_operation(
            &directory,
            &tenant(),
            &root,
            &op(),
            &VerifyOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "X402_AGENT_SUSPENDED");
        assert_eq!(err.http_status(), 410);
    }

    #[tokio::test]
    async fn throttled_grantee_maps_to_429() {
        let directory = MapDirectory::default();
        let worker = AgentId::new();
        directory.insert_agent(AgentIdentity {
            status: AgentLifecycle::Throttled,
            ..active_agent(&worker)
        });

        let root = root_grant(&worker);
        directory.insert_grant(root.clone());

        let err = verify_operation(
            &directory,
            &tenant(),
            &root,
            &op(),
            &VerifyOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.http_status(), 429);
    }

    #[tokio::test]
    async fn signer_key_lifecycle_is_enforced_when_required() {
        let directory = MapDirectory::default();
        let worker = AgentId::new();
        directory.insert_agent(active_agent(&worker));
        let root = root_grant(&worker);
        directory.insert_grant(root.clone());

        let options = VerifyOptions {
            require_signer_key: true,
        };

        // no key registered at all
        let err = verify_operation(&directory, &tenant(), &root, &op(), &options, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "X402_AUTHORITY_GRANT_SIGNER_KEY_INVALID");
        assert_eq!(err.details().unwrap()["reasonCode"], "SIGNER_KEY_MISSING");

        // revoked key
        let now = Utc::now();
        directory.insert_key(SignerKey {
            key_id: KeyId::new(),
            tenant_id: tenant(),
            agent_id: worker.clone(),
            public_key_pem: String::new(),
            status: SignerKeyStatus::Revoked,
            created_at: now,
            updated_at: now,
        });
        let err = verify_operation(&directory, &tenant(), &root, &op(), &options, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.details().unwrap()["reasonCode"], "SIGNER_KEY_REVOKED");
        assert_eq!(err.details().unwrap()["role"], "payer");

        // active key passes
        directory.insert_key(SignerKey {
            key_id: KeyId::new(),
            tenant_id: tenant(),
            agent_id: worker.clone(),
            public_key_pem: String::new(),
            status: SignerKeyStatus::Active,
            created_at: now,
            updated_at: now,
        });
        verify_operation(&directory, &tenant(), &root, &op(), &options, Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn declared_root_mismatch_is_rejected() {
        let directory = MapDirectory::default();
        let worker = AgentId::new();
        let sub = AgentId::new();
        directory.insert_agent(active_agent(&sub));

        let root = root_grant(&worker);
        let other_root = root_grant(&worker);
        let mut leaf = delegate(&root, &other_root, &sub, 1);
        finalize_grant_hash(&mut leaf).unwrap();
        directory.insert_grant(root);
        directory.insert_grant(other_root);
        directory.insert_grant(leaf.clone());

        let err = verify_operation(
            &directory,
            &tenant(),
            &leaf,
            &op(),
            &VerifyOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "X402_AUTHORITY_DELEGATION_ROOT_MISMATCH");
    }

    #[tokio::test]
    async fn per_call_envelope_caps_the_operation() {
        let directory = MapDirectory::default();
        let worker = AgentId::new();
        directory.insert_agent(active_agent(&worker));
        let root = root_grant(&worker); // maxPerCallCents 10_000
        directory.insert_grant(root.clone());

        let mut big = op();
        big.amount_cents = Some(20_000);

        let err = verify_operation(
            &directory,
            &tenant(),
            &root,
            &big,
            &VerifyOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "X402_AUTHORITY_SPEND_ENVELOPE_EXCEEDED");
    }
}
