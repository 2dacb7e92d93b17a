//! Settld Types - Canonical domain types for the settlement core
//!
//! This crate contains all foundational types for Settld with zero
//! dependencies on other settld crates. It defines the type system for:
//!
//! - Identity types (TenantId, AgentId, RunId, etc.)
//! - Agent identities, wallets and lifecycle
//! - Authority and delegation grants
//! - Runs, chained events and settlements
//! - Tool-call agreements, evidence, holds and arbitration
//! - Outbox, deliveries and idempotency records
//! - Sessions, work orders and agent cards
//!
//! # Architectural Invariants
//!
//! These types support the core Settld invariants:
//!
//! 1. Every aggregate is scoped by `tenantId`; cross-tenant reads fail closed
//! 2. Wallet integrity: `available + escrowLocked = totalCredited − totalDebited`
//! 3. Signed artifacts hash the canonical form with the hash field omitted
//! 4. Per-aggregate event chains are append-only with head preconditions

pub mod ids;
pub mod error;
pub mod agent;
pub mod wallet;
pub mod grant;
pub mod event;
pub mod run;
pub mod toolcall;
pub mod outbox;
pub mod session;
pub mod keys;

pub use ids::*;
pub use error::*;
pub use agent::*;
pub use wallet::*;
pub use grant::*;
pub use event::*;
pub use run::*;
pub use toolcall::*;
pub use outbox::*;
pub use session::*;
pub use keys::*;

/// Version of the Settld wire schema family
pub const SCHEMA_FAMILY_VERSION: &str = "v1";

/// Result alias used across the workspace
pub type Result<T> = std::result::Result<T, SettldError>;
