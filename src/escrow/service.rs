//! Escrow Service
//!
//! Deposit, release and refund expressed as ledger transfers. Each
//! operation is exactly one transfer plus one outbox event in the same
//! transaction; none of them can partially apply.
//!
//! | Operation | Legs                                                  | Key               |
//! |-----------|-------------------------------------------------------|-------------------|
//! | deposit   | DEBIT EXTERNAL_TON / CREDIT ESCROW                    | `deposit:{hash}`  |
//! | release   | DEBIT ESCROW / CREDIT COMMISSION / CREDIT OWNER_PENDING | `release:{deal}` |
//! | refund    | DEBIT ESCROW / CREDIT EXTERNAL_TON                    | `refund:{deal}`   |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use super::error::EscrowError;
use super::store::DepositAddressRepository;
use super::types::{
    DepositAddressInfo, EscrowEvent, ReleaseReceipt, deposit_key, refund_key, release_key,
};
use super::wallet::TonWallet;
use crate::core_types::{DealId, UserId};
use crate::ledger::account::AccountId;
use crate::ledger::engine::TransferEngine;
use crate::ledger::error::LedgerError;
use crate::ledger::types::{EntryType, Leg, TransferRequest, TxRef};
use crate::money::{Money, TON_DECIMALS, format_ton, split_commission};
use crate::outbox::types::NewOutboxEntry;

#[async_trait]
pub trait EscrowPort: Send + Sync {
    /// Idempotent per deal; does not touch the ledger
    async fn generate_deposit_address(
        &self,
        deal_id: DealId,
        expected_amount: Money,
    ) -> Result<DepositAddressInfo, EscrowError>;

    /// Credit escrow for an on-chain deposit; a repeated `tx_hash` credits once
    async fn confirm_deposit(
        &self,
        deal_id: DealId,
        tx_hash: &str,
        amount: Money,
        confirmations: u32,
        from_address: &str,
    ) -> Result<TxRef, EscrowError>;

    /// Pay out a completed deal: commission to the platform, rest to the owner
    async fn release_escrow(
        &self,
        deal_id: DealId,
        owner_id: UserId,
        deal_amount: Money,
        commission_rate_bp: u32,
    ) -> Result<ReleaseReceipt, EscrowError>;

    /// Return escrowed funds to the outside world.
    ///
    /// One refund per deal: the transfer is keyed `refund:{deal}`, so any
    /// later call for the same deal, whatever the amount, replays the first
    /// refund's `tx_ref` and moves nothing. Refund the full escrow balance
    /// (see `EscrowService::escrow_balance`) in that single call.
    async fn refund_escrow(&self, deal_id: DealId, amount: Money) -> Result<TxRef, EscrowError>;
}

#[derive(Debug, Clone)]
pub struct EscrowConfig {
    /// Deposits with fewer confirmations are rejected without ledger effect
    pub min_confirmations: u32,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            min_confirmations: 1,
        }
    }
}

pub struct EscrowService {
    engine: Arc<TransferEngine>,
    addresses: Arc<dyn DepositAddressRepository>,
    wallet: Arc<dyn TonWallet>,
    config: EscrowConfig,
}

impl EscrowService {
    pub fn new(
        engine: Arc<TransferEngine>,
        addresses: Arc<dyn DepositAddressRepository>,
        wallet: Arc<dyn TonWallet>,
        config: EscrowConfig,
    ) -> Self {
        Self {
            engine,
            addresses,
            wallet,
            config,
        }
    }

    /// Current escrow balance of a deal
    pub async fn escrow_balance(&self, deal_id: DealId) -> Result<Money, EscrowError> {
        let balance = self.engine.balance(&AccountId::Escrow(deal_id)).await?;
        Money::from_i64(balance.balance_nano).map_err(|_| {
            EscrowError::Ledger(LedgerError::CorruptRow(format!(
                "escrow {} balance is negative: {}",
                deal_id, balance.balance_nano
            )))
        })
    }

    fn event(&self, event: &EscrowEvent, key: &str) -> Result<NewOutboxEntry, EscrowError> {
        Ok(self.engine.outbox_writer().event(
            event.topic(),
            Some(event.deal_id()),
            Some(key),
            event,
        )?)
    }

    /// Receipt of a release that was already applied, read back from its
    /// entries. `owner_id` falls back to the caller's when the release had no
    /// owner leg (10000bp).
    async fn committed_release(
        &self,
        deal_id: DealId,
        requested_owner: UserId,
        tx_ref: TxRef,
    ) -> Result<ReleaseReceipt, EscrowError> {
        let entries = self.engine.store().entries_by_tx_ref(tx_ref).await?;

        let mut owner_id = None;
        let mut commission = Money::ZERO;
        let mut owner_amount = Money::ZERO;
        for entry in &entries {
            match &entry.account {
                AccountId::Commission(_) => {
                    commission = Self::stored_amount(entry.credit_nano)?;
                }
                AccountId::OwnerPending(owner) => {
                    owner_id = Some(*owner);
                    owner_amount = Self::stored_amount(entry.credit_nano)?;
                }
                _ => {}
            }
        }

        let owner_id = owner_id.unwrap_or(requested_owner);
        if owner_id != requested_owner {
            warn!(
                deal_id,
                tx_ref = %tx_ref,
                requested_owner,
                released_owner = owner_id,
                "Release replayed with a different owner; returning committed payout"
            );
        }

        Ok(ReleaseReceipt {
            tx_ref,
            deal_id,
            owner_id,
            commission,
            owner_amount,
            replayed: true,
        })
    }

    fn stored_amount(nano: i64) -> Result<Money, EscrowError> {
        Money::from_i64(nano).map_err(|_| {
            EscrowError::Ledger(LedgerError::CorruptRow(format!(
                "negative entry amount {}",
                nano
            )))
        })
    }

    fn require_positive(amount: Money, what: &str) -> Result<(), EscrowError> {
        if amount.is_zero() {
            return Err(EscrowError::InvalidAmount(format!("{} must be positive", what)));
        }
        Ok(())
    }
}

#[async_trait]
impl EscrowPort for EscrowService {
    async fn generate_deposit_address(
        &self,
        deal_id: DealId,
        expected_amount: Money,
    ) -> Result<DepositAddressInfo, EscrowError> {
        Self::require_positive(expected_amount, "expected amount")?;

        if let Some(existing) = self.addresses.find(deal_id).await? {
            return Ok(existing);
        }

        let subwallet_id = self.addresses.next_subwallet_id().await?;
        let address = self.wallet.derive_address(subwallet_id).await?;
        let candidate = DepositAddressInfo {
            deal_id,
            subwallet_id,
            address,
            expected_amount_nano: expected_amount.to_i64()?,
            created_at: Utc::now(),
        };

        let stored = self.addresses.insert_or_get(&candidate).await?;
        info!(
            deal_id,
            subwallet_id = stored.subwallet_id,
            address = %stored.address,
            expected_ton = %format_ton(expected_amount.nano(), TON_DECIMALS),
            "Deposit address assigned"
        );
        Ok(stored)
    }

    async fn confirm_deposit(
        &self,
        deal_id: DealId,
        tx_hash: &str,
        amount: Money,
        confirmations: u32,
        from_address: &str,
    ) -> Result<TxRef, EscrowError> {
        if tx_hash.trim().is_empty() {
            return Err(EscrowError::InvalidTxHash);
        }
        Self::require_positive(amount, "deposit amount")?;
        if confirmations < self.config.min_confirmations {
            return Err(EscrowError::InsufficientConfirmations {
                required: self.config.min_confirmations,
                actual: confirmations,
            });
        }

        match self.addresses.find(deal_id).await? {
            Some(info) if info.expected_amount_nano != amount.to_i64()? => {
                warn!(
                    deal_id,
                    tx_hash,
                    expected_nano = info.expected_amount_nano,
                    received_nano = amount.nano(),
                    "Deposit amount differs from expected; crediting amount received"
                );
            }
            Some(_) => {}
            None => {
                warn!(deal_id, tx_hash, "Deposit for deal without an assigned address");
            }
        }

        let key = deposit_key(tx_hash);
        let request = TransferRequest::new(key.clone(), vec![
            Leg::debit(AccountId::ExternalTon, EntryType::EscrowDeposit, amount),
            Leg::credit(AccountId::Escrow(deal_id), EntryType::EscrowDeposit, amount),
        ])
        .with_deal(deal_id)
        .with_description(format!("Deposit {} from {}", tx_hash, from_address));

        let event = self.event(
            &EscrowEvent::DepositConfirmed {
                deal_id,
                tx_hash: tx_hash.to_string(),
                amount_nano: amount.nano(),
                amount_ton: format_ton(amount.nano(), TON_DECIMALS),
                confirmations,
                from_address: from_address.to_string(),
            },
            &key,
        )?;

        let receipt = self.engine.transfer_with_outbox(request, vec![event]).await?;
        info!(
            deal_id,
            tx_hash,
            tx_ref = %receipt.tx_ref,
            amount_nano = amount.nano(),
            replayed = receipt.replayed,
            "Deposit confirmed"
        );
        Ok(receipt.tx_ref)
    }

    async fn release_escrow(
        &self,
        deal_id: DealId,
        owner_id: UserId,
        deal_amount: Money,
        commission_rate_bp: u32,
    ) -> Result<ReleaseReceipt, EscrowError> {
        Self::require_positive(deal_amount, "deal amount")?;
        let split = split_commission(deal_amount, commission_rate_bp)?;

        // Zero legs are invalid; 0bp or 10000bp leave a 2-leg transfer
        let mut legs = vec![Leg::debit(
            AccountId::Escrow(deal_id),
            EntryType::EscrowRelease,
            deal_amount,
        )];
        if !split.commission.is_zero() {
            legs.push(Leg::credit(
                AccountId::Commission(deal_id),
                EntryType::PlatformCommission,
                split.commission,
            ));
        }
        if !split.owner.is_zero() {
            legs.push(Leg::credit(
                AccountId::OwnerPending(owner_id),
                EntryType::OwnerPayout,
                split.owner,
            ));
        }

        let key = release_key(deal_id);
        let request = TransferRequest::new(key.clone(), legs)
            .with_deal(deal_id)
            .with_description(format!(
                "Release deal {} to owner {} at {}bp",
                deal_id, owner_id, commission_rate_bp
            ));

        let event = self.event(
            &EscrowEvent::Released {
                deal_id,
                owner_id,
                amount_nano: deal_amount.nano(),
                commission_nano: split.commission.nano(),
                owner_amount_nano: split.owner.nano(),
                commission_rate_bp,
            },
            &key,
        )?;

        let receipt = self.engine.transfer_with_outbox(request, vec![event]).await?;
        info!(
            deal_id,
            owner_id,
            tx_ref = %receipt.tx_ref,
            commission_nano = split.commission.nano(),
            owner_amount_nano = split.owner.nano(),
            replayed = receipt.replayed,
            "Escrow released"
        );

        if receipt.replayed {
            return self.committed_release(deal_id, owner_id, receipt.tx_ref).await;
        }

        Ok(ReleaseReceipt {
            tx_ref: receipt.tx_ref,
            deal_id,
            owner_id,
            commission: split.commission,
            owner_amount: split.owner,
            replayed: false,
        })
    }

    async fn refund_escrow(&self, deal_id: DealId, amount: Money) -> Result<TxRef, EscrowError> {
        Self::require_positive(amount, "refund amount")?;

        let key = refund_key(deal_id);
        let request = TransferRequest::new(key.clone(), vec![
            Leg::debit(AccountId::Escrow(deal_id), EntryType::EscrowRefund, amount),
            Leg::credit(AccountId::ExternalTon, EntryType::EscrowRefund, amount),
        ])
        .with_deal(deal_id)
        .with_description(format!("Refund deal {}", deal_id));

        let event = self.event(
            &EscrowEvent::Refunded {
                deal_id,
                amount_nano: amount.nano(),
                amount_ton: format_ton(amount.nano(), TON_DECIMALS),
            },
            &key,
        )?;

        let receipt = self.engine.transfer_with_outbox(request, vec![event]).await?;
        info!(
            deal_id,
            tx_ref = %receipt.tx_ref,
            amount_nano = amount.nano(),
            replayed = receipt.replayed,
            "Escrow refunded"
        );
        Ok(receipt.tx_ref)
    }
}
