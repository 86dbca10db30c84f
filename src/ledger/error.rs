//! Ledger Error Types
//!
//! Error codes are stable identifiers surfaced to collaborators (deal
//! lifecycle service, ops tooling).

use thiserror::Error;

use super::account::AccountId;
use crate::money::Money;

/// Structural problems with a transfer request. Detected before any I/O.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Transfer needs at least 2 legs, got {count}")]
    TooFewLegs { count: usize },

    #[error("Leg {index} has zero amount")]
    ZeroAmount { index: usize },

    #[error("Unbalanced transfer: debits={debits}, credits={credits}")]
    Unbalanced { debits: Money, credits: Money },

    #[error("Amount would cause overflow")]
    AmountOverflow,

    #[error("Idempotency key must not be empty")]
    EmptyIdempotencyKey,

    #[error("Idempotency key is {len} bytes, max {max}")]
    IdempotencyKeyTooLong { len: usize, max: usize },
}

/// Ledger error types
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Invalid transfer: {0}")]
    Validation(#[from] ValidationError),

    #[error("Insufficient balance on {account}: required {required}")]
    InsufficientBalance { account: AccountId, required: Money },

    #[error("Balance overflow on {0}")]
    BalanceOverflow(AccountId),

    #[error("Database error: {0}")]
    Persistence(String),

    #[error("Corrupt ledger row: {0}")]
    CorruptRow(String),
}

impl LedgerError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "VALIDATION_ERROR",
            LedgerError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            LedgerError::BalanceOverflow(_) => "BALANCE_OVERFLOW",
            LedgerError::Persistence(_) => "PERSISTENCE_ERROR",
            LedgerError::CorruptRow(_) => "CORRUPT_ROW",
        }
    }

    /// Whether re-issuing the same transfer (same idempotency key) may succeed.
    ///
    /// Only transient storage failures qualify; business outcomes fail the
    /// same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Persistence(_))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Persistence(e.to_string())
    }
}
