//! Escrow Settlement Ledger
//!
//! Holds advertiser payments in escrow, splits payouts between channel
//! owner and platform commission, and refunds cancelled deals. Every money
//! movement is a balanced double-entry transfer; every state change reaches
//! downstream consumers through a transactional outbox.
//!
//! # Modules
//!
//! - [`money`] - nanoTON amounts, commission split, TON string conversion
//! - [`core_types`] - Id aliases (DealId, UserId, ...)
//! - [`ledger`] - Double-entry ledger, transfer engine, balance cache
//! - [`escrow`] - Deposit / release / refund on top of the ledger
//! - [`outbox`] - Transactional outbox writer, poller and publishers
//! - [`db`] - PostgreSQL pool and schema bootstrap
//! - [`app`] - Service assembly from configuration
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

// Core types - must be first!
pub mod core_types;

pub mod money;

// Settlement
pub mod escrow;
pub mod ledger;
pub mod outbox;

// Infrastructure
pub mod app;
pub mod config;
pub mod db;
pub mod logging;

// Convenient re-exports at crate root
pub use core_types::{DealId, EntryId, OutboxId, SubwalletId, UserId};
pub use money::{Money, MoneyError};
