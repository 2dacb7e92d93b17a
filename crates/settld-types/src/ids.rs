//! Identifier newtypes
//!
//! Every aggregate is addressed by a stable string identifier with a
//! recognizable prefix, generated from a v4 UUID.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a fresh identifier
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::new_v4()))
            }

            /// Wrap an existing identifier string
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Top-level isolation boundary; all reads and writes are tenant-scoped
    TenantId, "tenant"
);
string_id!(
    /// An autonomous agent registered on the platform
    AgentId, "agent"
);
string_id!(
    /// An auditable unit of work with a chained event log
    RunId, "run"
);
string_id!(
    /// Escrow-backed resolution of a run or tool-call
    SettlementId, "stl"
);
string_id!(
    /// A dispute opened against a settlement
    DisputeId, "dsp"
);
string_id!(
    /// An authority or delegation grant
    GrantId, "grant"
);
string_id!(
    /// A long-lived interaction stream between agents
    SessionId, "sess"
);
string_id!(
    /// A negotiated unit of paid work
    WorkOrderId, "wo"
);
string_id!(
    /// An arbitration case over a frozen funding hold
    CaseId, "case"
);
string_id!(
    /// One webhook delivery attempt stream for an outbox row
    DeliveryId, "dlv"
);
string_id!(
    /// A registered webhook destination
    DestinationId, "dest"
);
string_id!(
    /// A signing or API key
    KeyId, "key"
);
string_id!(
    /// An x402 payment gate
    GateId, "gate"
);
string_id!(
    /// A completion receipt issued for a work order
    ReceiptId, "rcpt"
);
string_id!(
    /// A third-party attestation artifact
    AttestationId, "att"
);
string_id!(
    /// A payment authorization issued by the x402 gate
    AuthorizationId, "pay"
);

/// The reserved tenant that owns process-level state (keysets)
pub const PLATFORM_TENANT: &str = "platform";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_their_prefix() {
        assert!(TenantId::new().as_str().starts_with("tenant_"));
        assert!(RunId::new().as_str().starts_with("run_"));
        assert!(SettlementId::new().as_str().starts_with("stl_"));
    }

    #[test]
    fn ids_roundtrip_through_serde() {
        let id = AgentId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: AgentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
