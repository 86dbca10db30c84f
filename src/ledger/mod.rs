//! Double-Entry Ledger
//!
//! Every value movement is a balanced multi-leg transfer: `Σ debits == Σ
//! credits`, all legs share one `tx_ref`, and the whole transfer commits or
//! nothing does.
//!
//! # Accounts
//!
//! ```text
//! EXTERNAL_TON ──deposit──▶ ESCROW:{deal} ──release──▶ OWNER_PENDING:{user}
//!       ▲                        │  └──────────────▶ COMMISSION:{deal}
//!       └─────────refund─────────┘
//! ```
//!
//! Contra accounts (`EXTERNAL_TON`, `PLATFORM_TREASURY`, `NETWORK_FEES`,
//! `DUST_WRITEOFF`) stand for value outside the system and may go negative. Every other account is
//! debited with a conditional update and can never go below zero.
//!
//! # Safety Invariants
//!
//! 1. **Balanced**: entries of one `tx_ref` sum to zero
//! 2. **One-Sided**: each entry has exactly one positive side
//! 3. **At-Most-Once**: an idempotency key maps to at most one `tx_ref`
//! 4. **Append-Only**: entries are never updated; corrections are new transfers

pub mod account;
pub mod cache;
pub mod engine;
pub mod error;
pub mod idempotency;
pub mod memory;
pub mod port;
pub mod postgres;
pub mod store;
pub mod types;


pub use account::{AccountId, AccountIdError};
pub use cache::{BalanceCache, InProcessBalanceCache};
pub use engine::{TransferEngine, TransferReceipt};
pub use error::{LedgerError, ValidationError};
pub use idempotency::{IdempotencyGuard, IdempotencyOutcome};
pub use memory::InMemoryLedgerStore;
pub use port::LedgerPort;
pub use postgres::PgLedgerStore;
pub use store::{LedgerStore, LedgerTx};
pub use types::{
    AccountBalance, EntryPage, EntryType, LedgerEntry, Leg, Side, TransferRequest, TxRef,
};
