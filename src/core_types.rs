//! Core types used throughout the system
//!
//! These are fundamental type aliases used by all modules.
//! They provide semantic meaning and enable future type evolution.

/// Deal ID - assigned by the deal lifecycle service.
///
/// # Usage:
/// - Scopes `ESCROW:{deal}` and `COMMISSION:{deal}` accounts
/// - Partition key for outbox events
pub type DealId = i64;

/// User ID - channel owner identity, immutable after assignment.
pub type UserId = i64;

/// Ledger entry ID - database sequence, used as pagination cursor
pub type EntryId = i64;

/// Outbox entry ID - database sequence
pub type OutboxId = i64;

/// Sub-wallet ID - allocated once per deal for deposit addresses
pub type SubwalletId = i64;
