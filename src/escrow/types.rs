//! Escrow Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{DealId, SubwalletId, UserId};
use crate::ledger::types::TxRef;
use crate::money::Money;

/// Outbox topics
pub const TOPIC_DEPOSIT_CONFIRMED: &str = "escrow.deposit_confirmed";
pub const TOPIC_RELEASED: &str = "escrow.released";
pub const TOPIC_REFUNDED: &str = "escrow.refunded";

/// Idempotency key of the deposit transfer for an on-chain transaction
pub fn deposit_key(tx_hash: &str) -> String {
    format!("deposit:{}", tx_hash)
}

pub fn release_key(deal_id: DealId) -> String {
    format!("release:{}", deal_id)
}

/// At most one refund per deal
pub fn refund_key(deal_id: DealId) -> String {
    format!("refund:{}", deal_id)
}

/// A deal's deposit address, one per deal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositAddressInfo {
    pub deal_id: DealId,
    pub subwallet_id: SubwalletId,
    pub address: String,
    pub expected_amount_nano: i64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of `release_escrow`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReleaseReceipt {
    pub tx_ref: TxRef,
    pub deal_id: DealId,
    pub owner_id: UserId,
    pub commission: Money,
    pub owner_amount: Money,
    /// The release had already been applied; owner and amounts are those of
    /// the committed transfer, not of this call
    pub replayed: bool,
}

/// Payload of escrow outbox events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EscrowEvent {
    DepositConfirmed {
        deal_id: DealId,
        tx_hash: String,
        amount_nano: u64,
        amount_ton: String,
        confirmations: u32,
        from_address: String,
    },
    Released {
        deal_id: DealId,
        owner_id: UserId,
        amount_nano: u64,
        commission_nano: u64,
        owner_amount_nano: u64,
        commission_rate_bp: u32,
    },
    Refunded {
        deal_id: DealId,
        amount_nano: u64,
        amount_ton: String,
    },
}

impl EscrowEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            EscrowEvent::DepositConfirmed { .. } => TOPIC_DEPOSIT_CONFIRMED,
            EscrowEvent::Released { .. } => TOPIC_RELEASED,
            EscrowEvent::Refunded { .. } => TOPIC_REFUNDED,
        }
    }

    pub fn deal_id(&self) -> DealId {
        match self {
            EscrowEvent::DepositConfirmed { deal_id, .. }
            | EscrowEvent::Released { deal_id, .. }
            | EscrowEvent::Refunded { deal_id, .. } => *deal_id,
        }
    }
}
