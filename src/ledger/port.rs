//! Ledger port offered to collaborators (deal lifecycle, withdrawal limits)

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::account::AccountId;
use super::error::LedgerError;
use super::types::{EntryPage, EntryType, LedgerEntry, TransferRequest, TxRef};
use crate::core_types::{DealId, EntryId};
use crate::money::Money;

#[async_trait]
pub trait LedgerPort: Send + Sync {
    /// Apply a balanced transfer; replaying a key returns the original tx_ref
    async fn transfer(&self, request: TransferRequest) -> Result<TxRef, LedgerError>;

    /// Current balance in nanoTON (negative only for contra accounts)
    async fn get_balance(&self, account: &AccountId) -> Result<i64, LedgerError>;

    /// All entries for a deal, newest first
    async fn get_entries_by_deal(&self, deal_id: DealId) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Keyset page by entry id descending
    async fn get_entries_by_account(
        &self,
        account: &AccountId,
        cursor: Option<EntryId>,
        limit: usize,
    ) -> Result<EntryPage, LedgerError>;

    /// Velocity aggregate (e.g. daily withdrawal caps)
    async fn sum_debits_since(
        &self,
        account: &AccountId,
        entry_type: EntryType,
        since: DateTime<Utc>,
    ) -> Result<Money, LedgerError>;
}
