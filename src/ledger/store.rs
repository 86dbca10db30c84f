//! Ledger persistence ports
//!
//! [`LedgerStore`] is the read side plus a factory for [`LedgerTx`], the unit
//! of work a transfer runs in. Everything done through one `LedgerTx` commits
//! or rolls back together; dropping it without `commit` rolls back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::account::AccountId;
use super::error::LedgerError;
use super::types::{AccountBalance, EntryType, LedgerEntry, NewLedgerEntry, TxRef};
use crate::core_types::{DealId, EntryId, OutboxId};
use crate::money::Money;
use crate::outbox::types::NewOutboxEntry;

/// One database transaction
#[async_trait]
pub trait LedgerTx: Send {
    /// Insert the key into the uniqueness guard.
    ///
    /// Returns `false` if the key already exists (committed by someone else).
    async fn claim_idempotency_key(&mut self, key: &str, tx_ref: TxRef)
    -> Result<bool, LedgerError>;

    /// TxRef recorded for an already-claimed key
    async fn tx_ref_for_key(&mut self, key: &str) -> Result<Option<TxRef>, LedgerError>;

    /// `balance -= amount` only if `balance >= amount`, as one atomic step.
    ///
    /// Returns `None` when the balance is insufficient (or the account has
    /// never been credited). Nothing is changed in that case.
    async fn debit_if_sufficient(
        &mut self,
        account: &AccountId,
        amount: i64,
    ) -> Result<Option<AccountBalance>, LedgerError>;

    /// Unconditional signed update, creating the balance row on first touch
    async fn apply_delta(
        &mut self,
        account: &AccountId,
        delta: i64,
    ) -> Result<AccountBalance, LedgerError>;

    async fn insert_entry(&mut self, entry: &NewLedgerEntry) -> Result<EntryId, LedgerError>;

    /// Outbox row written inside this transaction
    async fn append_outbox(&mut self, entry: &NewOutboxEntry) -> Result<OutboxId, LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError>;
}

/// Ledger storage backend
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Start a unit of work
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError>;

    async fn balance(&self, account: &AccountId) -> Result<Option<AccountBalance>, LedgerError>;

    /// All entries of a deal, newest first
    async fn entries_by_deal(&self, deal_id: DealId) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// All entries of one transfer, in insertion order
    async fn entries_by_tx_ref(&self, tx_ref: TxRef) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Keyset page by id descending; `cursor` is the last id already seen
    async fn entries_by_account(
        &self,
        account: &AccountId,
        cursor: Option<EntryId>,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Σ debit_nano for (account, entry_type) with `created_at >= since`
    async fn sum_debits_since(
        &self,
        account: &AccountId,
        entry_type: EntryType,
        since: DateTime<Utc>,
    ) -> Result<Money, LedgerError>;
}
