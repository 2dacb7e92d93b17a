//! Settld Outbox - durable event delivery
//!
//! Domain engines enqueue outbox rows inside their business commits; the
//! delivery worker drains them into HMAC-signed webhook POSTs with
//! per-aggregate FIFO ordering, exponential backoff and a DLQ. The
//! receiver-side verifier mirrors the signing scheme with timestamp
//! tolerance and constant-time comparison.

pub mod sign;
pub mod verify;
pub mod worker;

pub use sign::*;
pub use verify::*;
pub use worker::*;

/// The primary brand stamped into delivery headers
pub const BRAND: &str = "settld";

/// Alias brand accepted on the receiving side
pub const BRAND_ALIAS: &str = "nooterra";
