//! The workspace-wide domain error
//!
//! Engines return typed errors; the HTTP dispatcher performs a single
//! mapping to `{code, message, details?, requestId}` at the boundary.
//! Every variant carries a stable string code; the HTTP status is derived
//! from the error kind, never hard-coded in handlers.

use serde_json::{json, Value};
use thiserror::Error;

/// Coarse error classification driving the HTTP status mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Shape or value errors; fail closed, no partial writes (400)
    Validation,
    /// Missing or bad credentials (401)
    Unauthenticated,
    /// Authenticated but out of scope (403)
    Forbidden,
    /// Aggregate does not exist in this tenant (404)
    NotFound,
    /// Optimistic concurrency, idempotency or policy conflicts (409)
    Conflict,
    /// Lifecycle-suspended agent (410)
    Gone,
    /// Receiver detected a tampered artifact (422)
    Tamper,
    /// Throttled agent or caller (429)
    Throttled,
    /// Server/infra faults; never leak internals (500)
    Internal,
}

impl ErrorKind {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::Unauthenticated => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Gone => 410,
            Self::Tamper => 422,
            Self::Throttled => 429,
            Self::Internal => 500,
        }
    }
}

/// Authority/delegation chain verification failure codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityCode {
    RootNotFound,
    RootAmbiguous,
    RootRevoked,
    RootNotActive,
    RootExpired,
    RootSchemaInvalid,
    RootResolverUnavailable,
    RootMismatch,
    ScopeEscalation,
}

impl AuthorityCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RootNotFound => "X402_AUTHORITY_DELEGATION_ROOT_NOT_FOUND",
            Self::RootAmbiguous => "X402_AUTHORITY_DELEGATION_ROOT_AMBIGUOUS",
            Self::RootRevoked => "X402_AUTHORITY_DELEGATION_ROOT_REVOKED",
            Self::RootNotActive => "X402_AUTHORITY_DELEGATION_ROOT_NOT_ACTIVE",
            Self::RootExpired => "X402_AUTHORITY_DELEGATION_ROOT_EXPIRED",
            Self::RootSchemaInvalid => "X402_AUTHORITY_DELEGATION_ROOT_SCHEMA_INVALID",
            Self::RootResolverUnavailable => {
                "X402_AUTHORITY_DELEGATION_ROOT_RESOLVER_UNAVAILABLE"
            }
            Self::RootMismatch => "X402_AUTHORITY_DELEGATION_ROOT_MISMATCH",
            Self::ScopeEscalation => "X402_AUTHORITY_DELEGATION_SCOPE_ESCALATION",
        }
    }
}

/// Reason a grantee signer key failed the lifecycle check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerKeyReason {
    NotActive,
    Revoked,
    Rotated,
    Missing,
}

impl SignerKeyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotActive => "SIGNER_KEY_NOT_ACTIVE",
            Self::Revoked => "SIGNER_KEY_REVOKED",
            Self::Rotated => "SIGNER_KEY_ROTATED",
            Self::Missing => "SIGNER_KEY_MISSING",
        }
    }
}

/// The Settld domain error
#[derive(Debug, Clone, Error)]
pub enum SettldError {
    #[error("{message}")]
    Validation {
        code: &'static str,
        message: String,
    },

    #[error("unsupported canonical value: {message}")]
    UnsupportedCanonicalValue { message: String },

    #[error("{code}: {id}")]
    NotFound { code: &'static str, id: String },

    #[error("chain hash mismatch on stream {stream_id}")]
    ChainHashMismatch {
        stream_id: String,
        expected: String,
        actual: String,
    },

    #[error("insufficient wallet balance: have {available}, need {requested}")]
    InsufficientWalletBalance { available: i64, requested: i64 },

    #[error("settlement {settlement_id} already resolved")]
    SettlementAlreadyResolved { settlement_id: String },

    #[error("idempotency key {key} bound to a different request")]
    IdempotencyKeyConflict { key: String },

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("scope forbidden for {operation}")]
    ScopeForbidden { operation: String },

    #[error("agent {agent_id} is suspended")]
    AgentSuspended { agent_id: String },

    #[error("agent {agent_id} is throttled")]
    AgentThrottled { agent_id: String },

    #[error("{}", .code.as_str())]
    Authority {
        code: AuthorityCode,
        message: String,
    },

    #[error("signer key invalid for role {role}")]
    SignerKeyInvalid {
        reason: SignerKeyReason,
        role: String,
    },

    #[error("webhook signature header missing or malformed")]
    WebhookSignatureHeaderInvalid,

    #[error("webhook timestamp outside tolerance of {tolerance_secs}s")]
    WebhookTimestampTolerance { tolerance_secs: i64 },

    #[error("webhook signature does not match any candidate")]
    WebhookSignatureNoMatch,

    #[error("webhook verification requires the raw request body")]
    WebhookRawBodyRequired,

    #[error("artifact hash mismatch for {artifact_type}")]
    ArtifactHashMismatch {
        artifact_type: String,
        expected: String,
        actual: String,
    },

    #[error("{message}")]
    Conflict {
        code: &'static str,
        message: String,
    },

    #[error("internal error")]
    Internal { message: String },
}

impl SettldError {
    /// Stable wire code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. } => code,
            Self::UnsupportedCanonicalValue { .. } => "UNSUPPORTED_CANONICAL_VALUE",
            Self::NotFound { code, .. } => code,
            Self::ChainHashMismatch { .. } => "CHAIN_HASH_MISMATCH",
            Self::InsufficientWalletBalance { .. } => "INSUFFICIENT_WALLET_BALANCE",
            Self::SettlementAlreadyResolved { .. } => "SETTLEMENT_ALREADY_RESOLVED",
            Self::IdempotencyKeyConflict { .. } => "IDEMPOTENCY_KEY_CONFLICT",
            Self::Unauthenticated => "AUTH_UNAUTHENTICATED",
            Self::ScopeForbidden { .. } => "AUTH_SCOPE_FORBIDDEN",
            Self::AgentSuspended { .. } => "X402_AGENT_SUSPENDED",
            Self::AgentThrottled { .. } => "X402_AGENT_THROTTLED",
            Self::Authority { code, .. } => code.as_str(),
            Self::SignerKeyInvalid { .. } => "X402_AUTHORITY_GRANT_SIGNER_KEY_INVALID",
            Self::WebhookSignatureHeaderInvalid => "WEBHOOK_SIGNATURE_HEADER_INVALID",
            Self::WebhookTimestampTolerance { .. } => "WEBHOOK_TIMESTAMP_TOLERANCE",
            Self::WebhookSignatureNoMatch => "WEBHOOK_SIGNATURE_NO_MATCH",
            Self::WebhookRawBodyRequired => "WEBHOOK_RAW_BODY_REQUIRED",
            Self::ArtifactHashMismatch { .. } => "ARTIFACT_HASH_MISMATCH",
            Self::Conflict { code, .. } => code,
            Self::Internal { .. } => "INTERNAL",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. }
            | Self::UnsupportedCanonicalValue { .. }
            | Self::WebhookSignatureHeaderInvalid
            | Self::WebhookTimestampTolerance { .. }
            | Self::WebhookRawBodyRequired => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ChainHashMismatch { .. }
            | Self::InsufficientWalletBalance { .. }
            | Self::SettlementAlreadyResolved { .. }
            | Self::IdempotencyKeyConflict { .. }
            | Self::Authority { .. }
            | Self::SignerKeyInvalid { .. }
            | Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Unauthenticated | Self::WebhookSignatureNoMatch => ErrorKind::Unauthenticated,
            Self::ScopeForbidden { .. } => ErrorKind::Forbidden,
            Self::AgentSuspended { .. } => ErrorKind::Gone,
            Self::AgentThrottled { .. } => ErrorKind::Throttled,
            Self::ArtifactHashMismatch { .. } => ErrorKind::Tamper,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }

    /// Structured details for the wire envelope, when the variant has any
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::ChainHashMismatch {
                stream_id,
                expected,
                actual,
            } => Some(json!({
                "streamId": stream_id,
                "expectedPrevChainHash": expected,
                "actualHead": actual,
            })),
            Self::InsufficientWalletBalance {
                available,
                requested,
            } => Some(json!({
                "availableCents": available,
                "requestedCents": requested,
            })),
            Self::SignerKeyInvalid { reason, role } => Some(json!({
                "reasonCode": reason.as_str(),
                "role": role,
            })),
            Self::ArtifactHashMismatch {
                artifact_type,
                expected,
                actual,
            } => Some(json!({
                "artifactType": artifact_type,
                "expectedHash": expected,
                "actualHash": actual,
            })),
            _ => None,
        }
    }

    /// Convenience constructor for 404s
    pub fn not_found(code: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            code,
            id: id.into(),
        }
    }

    /// Convenience constructor for 400 validation failures
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err = SettldError::ChainHashMismatch {
            stream_id: "run_x".into(),
            expected: "a".into(),
            actual: "b".into(),
        };
        assert_eq!(err.code(), "CHAIN_HASH_MISMATCH");
        assert_eq!(err.http_status(), 409);
    }

    #[test]
    fn authority_codes_map_to_conflict() {
        let err = SettldError::Authority {
            code: AuthorityCode::ScopeEscalation,
            message: "child widens allowedToolIds".into(),
        };
        assert_eq!(err.code(), "X402_AUTHORITY_DELEGATION_SCOPE_ESCALATION");
        assert_eq!(err.http_status(), 409);
    }

    #[test]
    fn lifecycle_errors_map_to_gone_and_throttled() {
        assert_eq!(
            SettldError::AgentSuspended {
                agent_id: "agent_1".into()
            }
            .http_status(),
            410
        );
        assert_eq!(
            SettldError::AgentThrottled {
                agent_id: "agent_1".into()
            }
            .http_status(),
            429
        );
    }

    #[test]
    fn signer_key_details_carry_reason_and_role() {
        let err = SettldError::SignerKeyInvalid {
            reason: SignerKeyReason::Revoked,
            role: "grantee".into(),
        };
        let details = err.details().unwrap();
        assert_eq!(details["reasonCode"], "SIGNER_KEY_REVOKED");
        assert_eq!(details["role"], "grantee");
    }
}
