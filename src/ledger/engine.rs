//! Transfer Engine
//!
//! Validates and atomically commits balanced multi-leg transfers.
//!
//! # Flow
//!
//! ```text
//! validate ─▶ BEGIN ─▶ claim key ──replay──▶ ROLLBACK, return old tx_ref
//!                          │
//!                        fresh
//!                          ▼
//!          per leg (supplied order): conditional debit / unconditional delta
//!                          ▼
//!             insert entries ─▶ append outbox ─▶ COMMIT ─▶ refresh cache
//! ```
//!
//! # Safety Invariants
//!
//! 1. **No I/O before validation**: malformed requests never open a transaction
//! 2. **All or nothing**: any failing leg rolls back every earlier leg
//! 3. **Replay writes nothing**: a known key returns its original tx_ref
//! 4. **Cache after commit**: the cache only ever sees committed balances

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::account::AccountId;
use super::cache::BalanceCache;
use super::error::LedgerError;
use super::idempotency::{IdempotencyGuard, IdempotencyOutcome};
use super::port::LedgerPort;
use super::store::{LedgerStore, LedgerTx};
use super::types::{
    AccountBalance, EntryPage, EntryType, LedgerEntry, NewLedgerEntry, TransferRequest, TxRef,
    clamp_page_size,
};
use crate::core_types::{DealId, EntryId};
use crate::money::Money;
use crate::outbox::types::NewOutboxEntry;
use crate::outbox::writer::OutboxWriter;

/// Result of a transfer call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReceipt {
    pub tx_ref: TxRef,
    /// `true` when the idempotency key had already been used
    pub replayed: bool,
}

pub struct TransferEngine {
    store: Arc<dyn LedgerStore>,
    cache: Arc<dyn BalanceCache>,
    outbox: OutboxWriter,
}

impl TransferEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        cache: Arc<dyn BalanceCache>,
        outbox: OutboxWriter,
    ) -> Self {
        Self {
            store,
            cache,
            outbox,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn outbox_writer(&self) -> &OutboxWriter {
        &self.outbox
    }

    /// Commit a transfer together with outbox events describing it.
    ///
    /// The events are written in the same transaction as the entries, so they
    /// exist if and only if the transfer committed. A replayed key writes
    /// neither entries nor events.
    pub async fn transfer_with_outbox(
        &self,
        request: TransferRequest,
        events: Vec<NewOutboxEntry>,
    ) -> Result<TransferReceipt, LedgerError> {
        let total = request.validate()?;

        let mut tx = self.store.begin().await?;

        let outcome =
            IdempotencyGuard::acquire(tx.as_mut(), &request.idempotency_key, TxRef::new()).await;
        let tx_ref = match outcome {
            Ok(IdempotencyOutcome::Fresh(tx_ref)) => tx_ref,
            Ok(IdempotencyOutcome::Replay(existing)) => {
                tx.rollback().await?;
                info!(
                    idempotency_key = %request.idempotency_key,
                    tx_ref = %existing,
                    "Transfer already applied - returning existing tx_ref (idempotent)"
                );
                return Ok(TransferReceipt {
                    tx_ref: existing,
                    replayed: true,
                });
            }
            Err(e) => {
                Self::abort(tx, &request).await;
                return Err(e);
            }
        };

        let applied = self.apply(tx.as_mut(), &request, tx_ref, &events).await;
        let touched = match applied {
            Ok(touched) => touched,
            Err(e) => {
                Self::abort(tx, &request).await;
                return Err(e);
            }
        };

        if let Err(e) = tx.commit().await {
            // Outcome unknown; drop whatever we had cached for these accounts.
            for balance in &touched {
                self.cache.evict(&balance.account);
            }
            return Err(e);
        }

        for balance in touched {
            self.cache.put(balance);
        }

        info!(
            tx_ref = %tx_ref,
            idempotency_key = %request.idempotency_key,
            deal_id = ?request.deal_id,
            legs = request.legs.len(),
            amount = total.nano(),
            events = events.len(),
            "Transfer committed"
        );

        Ok(TransferReceipt {
            tx_ref,
            replayed: false,
        })
    }

    /// Steps 3-5 plus the outbox append, inside the open transaction.
    ///
    /// Returns the post-update balance of every touched account.
    async fn apply(
        &self,
        tx: &mut dyn LedgerTx,
        request: &TransferRequest,
        tx_ref: TxRef,
        events: &[NewOutboxEntry],
    ) -> Result<Vec<AccountBalance>, LedgerError> {
        let mut touched = Vec::with_capacity(request.legs.len());

        for leg in &request.legs {
            let balance = if leg.needs_balance_check() {
                let amount = leg
                    .amount
                    .to_i64()
                    .map_err(|_| LedgerError::BalanceOverflow(leg.account.clone()))?;
                tx.debit_if_sufficient(&leg.account, amount)
                    .await?
                    .ok_or_else(|| LedgerError::InsufficientBalance {
                        account: leg.account.clone(),
                        required: leg.amount,
                    })?
            } else {
                tx.apply_delta(&leg.account, leg.signed_delta()?).await?
            };

            debug!(
                tx_ref = %tx_ref,
                account = %leg.account,
                side = %leg.side,
                amount = leg.amount.nano(),
                balance = balance.balance_nano,
                version = balance.version,
                "Leg applied"
            );
            touched.push(balance);
        }

        for leg in &request.legs {
            let entry = NewLedgerEntry::from_leg(request, tx_ref, leg)?;
            tx.insert_entry(&entry).await?;
        }

        for event in events {
            self.outbox.append(tx, event).await?;
        }

        Ok(touched)
    }

    async fn abort(tx: Box<dyn LedgerTx>, request: &TransferRequest) {
        if let Err(e) = tx.rollback().await {
            warn!(
                idempotency_key = %request.idempotency_key,
                error = %e,
                "Rollback failed after transfer error"
            );
        }
    }

    /// Balance with cache read-through
    pub async fn balance(&self, account: &AccountId) -> Result<AccountBalance, LedgerError> {
        if let Some(hit) = self.cache.get(account) {
            return Ok(hit);
        }

        let balance = self
            .store
            .balance(account)
            .await?
            .unwrap_or_else(|| AccountBalance::empty(account.clone()));
        self.cache.put(balance.clone());
        Ok(balance)
    }
}

#[async_trait]
impl LedgerPort for TransferEngine {
    async fn transfer(&self, request: TransferRequest) -> Result<TxRef, LedgerError> {
        self.transfer_with_outbox(request, Vec::new())
            .await
            .map(|receipt| receipt.tx_ref)
    }

    async fn get_balance(&self, account: &AccountId) -> Result<i64, LedgerError> {
        self.balance(account).await.map(|b| b.balance_nano)
    }

    async fn get_entries_by_deal(&self, deal_id: DealId) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.store.entries_by_deal(deal_id).await
    }

    async fn get_entries_by_account(
        &self,
        account: &AccountId,
        cursor: Option<EntryId>,
        limit: usize,
    ) -> Result<EntryPage, LedgerError> {
        let limit = clamp_page_size(limit);
        let entries = self.store.entries_by_account(account, cursor, limit).await?;
        Ok(EntryPage::from_entries(entries, limit))
    }

    async fn sum_debits_since(
        &self,
        account: &AccountId,
        entry_type: EntryType,
        since: DateTime<Utc>,
    ) -> Result<Money, LedgerError> {
        self.store.sum_debits_since(account, entry_type, since).await
    }
}
