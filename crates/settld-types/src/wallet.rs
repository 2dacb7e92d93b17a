//! Agent wallet records
//!
//! One wallet per agent. The record is a snapshot; all transitions are pure
//! functions in `settld-wallet`, and the store is the only writer.

use crate::{AgentId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-agent double-entry wallet
///
/// Invariant: all fields ≥ 0 and
/// `available_cents + escrow_locked_cents = total_credited_cents − total_debited_cents`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentWallet {
    pub schema_version: String,
    pub tenant_id: TenantId,
    pub agent_id: AgentId,
    pub available_cents: i64,
    pub escrow_locked_cents: i64,
    pub total_credited_cents: i64,
    pub total_debited_cents: i64,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

impl AgentWallet {
    pub const SCHEMA_VERSION: &'static str = "AgentWallet.v1";

    /// Fresh zero-balance wallet for an agent
    pub fn new(tenant_id: TenantId, agent_id: AgentId, currency: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            schema_version: Self::SCHEMA_VERSION.to_string(),
            tenant_id,
            agent_id,
            available_cents: 0,
            escrow_locked_cents: 0,
            total_credited_cents: 0,
            total_debited_cents: 0,
            currency: currency.into(),
            updated_at: at,
        }
    }

    /// Check the wallet integrity invariant
    pub fn is_balanced(&self) -> bool {
        self.available_cents >= 0
            && self.escrow_locked_cents >= 0
            && self.total_credited_cents >= 0
            && self.total_debited_cents >= 0
            && self.available_cents + self.escrow_locked_cents
                == self.total_credited_cents - self.total_debited_cents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_wallet_is_balanced() {
        let w = AgentWallet::new(TenantId::new(), AgentId::new(), "USD", Utc::now());
        assert!(w.is_balanced());
        assert_eq!(w.available_cents, 0);
    }

    #[test]
    fn imbalance_is_detected() {
        let mut w = AgentWallet::new(TenantId::new(), AgentId::new(), "USD", Utc::now());
        w.available_cents = 100;
        assert!(!w.is_balanced());
    }
}
