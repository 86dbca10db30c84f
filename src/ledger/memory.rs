//! In-memory ledger backend
//!
//! Serializable by construction: a transaction holds the single state lock
//! from `begin` until `commit`/`rollback`/drop. Writes are staged on the
//! transaction and only merged into shared state on commit, so nothing a
//! transaction does is visible to readers (or to the outbox poller) before
//! it commits.
//!
//! Used by tests and by `storage: memory` dev mode.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::account::AccountId;
use super::error::LedgerError;
use super::store::{LedgerStore, LedgerTx};
use super::types::{AccountBalance, EntryType, LedgerEntry, NewLedgerEntry, TxRef};
use crate::core_types::{DealId, EntryId, OutboxId};
use crate::money::Money;
use crate::outbox::types::{NewOutboxEntry, OutboxEntry};

#[derive(Debug, Default)]
pub(crate) struct MemoryState {
    pub(crate) balances: HashMap<AccountId, AccountBalance>,
    pub(crate) idempotency_keys: HashMap<String, TxRef>,
    /// Ascending by id
    pub(crate) entries: Vec<LedgerEntry>,
    pub(crate) outbox: BTreeMap<OutboxId, OutboxEntry>,
    next_entry_id: EntryId,
    next_outbox_id: OutboxId,
}

impl MemoryState {
    fn allocate_entry_id(&mut self) -> EntryId {
        self.next_entry_id += 1;
        self.next_entry_id
    }

    pub(crate) fn allocate_outbox_id(&mut self) -> OutboxId {
        self.next_outbox_id += 1;
        self.next_outbox_id
    }
}

#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    pub(crate) state: Arc<Mutex<MemoryState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of committed entries
    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }
}

pub struct InMemoryLedgerTx {
    guard: OwnedMutexGuard<MemoryState>,
    balances: HashMap<AccountId, AccountBalance>,
    keys: HashMap<String, TxRef>,
    entries: Vec<LedgerEntry>,
    outbox: Vec<OutboxEntry>,
}

impl InMemoryLedgerTx {
    fn current(&self, account: &AccountId) -> AccountBalance {
        self.balances
            .get(account)
            .or_else(|| self.guard.balances.get(account))
            .cloned()
            .unwrap_or_else(|| AccountBalance::empty(account.clone()))
    }
}

#[async_trait]
impl LedgerTx for InMemoryLedgerTx {
    async fn claim_idempotency_key(
        &mut self,
        key: &str,
        tx_ref: TxRef,
    ) -> Result<bool, LedgerError> {
        if self.guard.idempotency_keys.contains_key(key) || self.keys.contains_key(key) {
            return Ok(false);
        }
        self.keys.insert(key.to_string(), tx_ref);
        Ok(true)
    }

    async fn tx_ref_for_key(&mut self, key: &str) -> Result<Option<TxRef>, LedgerError> {
        Ok(self
            .keys
            .get(key)
            .or_else(|| self.guard.idempotency_keys.get(key))
            .copied())
    }

    async fn debit_if_sufficient(
        &mut self,
        account: &AccountId,
        amount: i64,
    ) -> Result<Option<AccountBalance>, LedgerError> {
        let mut balance = self.current(account);
        if balance.version == 0 || balance.balance_nano < amount {
            return Ok(None);
        }
        balance.balance_nano -= amount;
        balance.version += 1;
        self.balances.insert(account.clone(), balance.clone());
        Ok(Some(balance))
    }

    async fn apply_delta(
        &mut self,
        account: &AccountId,
        delta: i64,
    ) -> Result<AccountBalance, LedgerError> {
        let mut balance = self.current(account);
        balance.balance_nano = balance
            .balance_nano
            .checked_add(delta)
            .ok_or_else(|| LedgerError::BalanceOverflow(account.clone()))?;
        balance.version += 1;
        self.balances.insert(account.clone(), balance.clone());
        Ok(balance)
    }

    async fn insert_entry(&mut self, entry: &NewLedgerEntry) -> Result<EntryId, LedgerError> {
        let id = self.guard.allocate_entry_id();
        self.entries.push(LedgerEntry {
            id,
            tx_ref: entry.tx_ref,
            idempotency_key: entry.idempotency_key.clone(),
            deal_id: entry.deal_id,
            account: entry.account.clone(),
            entry_type: entry.entry_type,
            debit_nano: entry.debit_nano,
            credit_nano: entry.credit_nano,
            description: entry.description.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn append_outbox(&mut self, entry: &NewOutboxEntry) -> Result<OutboxId, LedgerError> {
        let id = self.guard.allocate_outbox_id();
        self.outbox
            .push(OutboxEntry::pending(id, entry.clone(), Utc::now()));
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let InMemoryLedgerTx {
            mut guard,
            balances,
            keys,
            entries,
            outbox,
        } = *self;

        guard.balances.extend(balances);
        guard.idempotency_keys.extend(keys);
        guard.entries.extend(entries);
        for row in outbox {
            guard.outbox.insert(row.id, row);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(InMemoryLedgerTx {
            guard,
            balances: HashMap::new(),
            keys: HashMap::new(),
            entries: Vec::new(),
            outbox: Vec::new(),
        }))
    }

    async fn balance(&self, account: &AccountId) -> Result<Option<AccountBalance>, LedgerError> {
        Ok(self.state.lock().await.balances.get(account).cloned())
    }

    async fn entries_by_deal(&self, deal_id: DealId) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .rev()
            .filter(|e| e.deal_id == Some(deal_id))
            .cloned()
            .collect())
    }

    async fn entries_by_tx_ref(&self, tx_ref: TxRef) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.tx_ref == tx_ref)
            .cloned()
            .collect())
    }

    async fn entries_by_account(
        &self,
        account: &AccountId,
        cursor: Option<EntryId>,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .rev()
            .filter(|e| &e.account == account)
            .filter(|e| cursor.is_none_or(|c| e.id < c))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn sum_debits_since(
        &self,
        account: &AccountId,
        entry_type: EntryType,
        since: DateTime<Utc>,
    ) -> Result<Money, LedgerError> {
        let state = self.state.lock().await;
        Money::checked_sum(
            state
                .entries
                .iter()
                .filter(|e| &e.account == account && e.entry_type == entry_type)
                .filter(|e| e.created_at >= since)
                .map(|e| Money::from_nano(e.debit_nano as u64)),
        )
        .map_err(|_| LedgerError::BalanceOverflow(account.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.apply_delta(&AccountId::Escrow(1), 100).await.unwrap();
        drop(tx);

        assert!(store.balance(&AccountId::Escrow(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conditional_debit() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(
            tx.debit_if_sufficient(&AccountId::Escrow(1), 1)
                .await
                .unwrap()
                .is_none(),
            "never-credited account has nothing to debit"
        );
        tx.apply_delta(&AccountId::Escrow(1), 100).await.unwrap();
        assert!(
            tx.debit_if_sufficient(&AccountId::Escrow(1), 101)
                .await
                .unwrap()
                .is_none()
        );
        let after = tx
            .debit_if_sufficient(&AccountId::Escrow(1), 100)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.balance_nano, 0);
        assert_eq!(after.version, 2);
        tx.commit().await.unwrap();

        let stored = store.balance(&AccountId::Escrow(1)).await.unwrap().unwrap();
        assert_eq!(stored.balance_nano, 0);
    }

    #[tokio::test]
    async fn test_delta_overflow() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.apply_delta(&AccountId::ExternalTon, i64::MIN + 1).await.unwrap();
        assert!(matches!(
            tx.apply_delta(&AccountId::ExternalTon, -2).await,
            Err(LedgerError::BalanceOverflow(_))
        ));
    }

    #[tokio::test]
    async fn test_velocity_sum_overflow_is_not_retryable() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        for _ in 0..2 {
            tx.insert_entry(&NewLedgerEntry {
                tx_ref: TxRef::new(),
                idempotency_key: "withdraw".into(),
                deal_id: None,
                account: AccountId::NetworkFees,
                entry_type: EntryType::OwnerWithdrawal,
                debit_nano: i64::MAX,
                credit_nano: 0,
                description: None,
            })
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();

        let since = Utc::now() - chrono::Duration::hours(1);
        let err = store
            .sum_debits_since(&AccountId::NetworkFees, EntryType::OwnerWithdrawal, since)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BALANCE_OVERFLOW");
        assert!(!err.is_retryable());
    }
}
