//! Escrow Error Types

use thiserror::Error;

use super::wallet::WalletError;
use crate::ledger::error::LedgerError;
use crate::money::MoneyError;
use crate::outbox::error::OutboxError;

#[derive(Error, Debug, Clone)]
pub enum EscrowError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid commission rate: {0}bp (max 10000)")]
    InvalidCommissionRate(u32),

    #[error("Insufficient confirmations: {actual} < {required}")]
    InsufficientConfirmations { required: u32, actual: u32 },

    #[error("Invalid transaction hash")]
    InvalidTxHash,

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Event encoding failed: {0}")]
    Event(String),
}

impl EscrowError {
    pub fn code(&self) -> &'static str {
        match self {
            EscrowError::Ledger(e) => e.code(),
            EscrowError::InvalidAmount(_) => "INVALID_AMOUNT",
            EscrowError::InvalidCommissionRate(_) => "INVALID_COMMISSION_RATE",
            EscrowError::InsufficientConfirmations { .. } => "INSUFFICIENT_CONFIRMATIONS",
            EscrowError::InvalidTxHash => "INVALID_TX_HASH",
            EscrowError::Wallet(_) => "WALLET_ERROR",
            EscrowError::Database(_) => "DATABASE_ERROR",
            EscrowError::Event(_) => "EVENT_ENCODING_ERROR",
        }
    }

    /// Whether the same call may succeed later. Insufficient confirmations
    /// resolve themselves as the chain advances.
    pub fn is_retryable(&self) -> bool {
        match self {
            EscrowError::Ledger(e) => e.is_retryable(),
            EscrowError::InsufficientConfirmations { .. } => true,
            EscrowError::Database(_) => true,
            EscrowError::Wallet(WalletError::Unavailable(_)) => true,
            _ => false,
        }
    }
}

impl From<sqlx::Error> for EscrowError {
    fn from(e: sqlx::Error) -> Self {
        EscrowError::Database(e.to_string())
    }
}

impl From<OutboxError> for EscrowError {
    fn from(e: OutboxError) -> Self {
        EscrowError::Event(e.to_string())
    }
}

impl From<MoneyError> for EscrowError {
    fn from(e: MoneyError) -> Self {
        match e {
            MoneyError::InvalidRate(bp) => EscrowError::InvalidCommissionRate(bp),
            other => EscrowError::InvalidAmount(other.to_string()),
        }
    }
}
