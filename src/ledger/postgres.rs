//! PostgreSQL ledger backend
//!
//! The conditional debit is a single statement:
//!
//! ```sql
//! UPDATE account_balances SET balance_nano = balance_nano - $2 ...
//! WHERE account_id = $1 AND balance_nano >= $2
//! ```
//!
//! The row lock it takes serializes concurrent transfers on the same account
//! until commit. Zero rows affected means insufficient balance (or an
//! account that was never credited).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::account::AccountId;
use super::error::LedgerError;
use super::store::{LedgerStore, LedgerTx};
use super::types::{AccountBalance, EntryType, LedgerEntry, NewLedgerEntry, TxRef};
use crate::core_types::{DealId, EntryId, OutboxId};
use crate::money::Money;
use crate::outbox::postgres::insert_outbox;
use crate::outbox::types::NewOutboxEntry;

const ENTRY_COLUMNS: &str = "id, tx_ref, idempotency_key, deal_id, account_id, entry_type, \
                             debit_nano, credit_nano, description, created_at";

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn claim_idempotency_key(
        &mut self,
        key: &str,
        tx_ref: TxRef,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO ledger_idempotency_keys (idempotency_key, tx_ref)
            VALUES ($1, $2)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(tx_ref.as_uuid())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn tx_ref_for_key(&mut self, key: &str) -> Result<Option<TxRef>, LedgerError> {
        let tx_ref = sqlx::query_scalar::<_, uuid::Uuid>(
            "SELECT tx_ref FROM ledger_idempotency_keys WHERE idempotency_key = $1",
        )
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(tx_ref.map(TxRef::from_uuid))
    }

    async fn debit_if_sufficient(
        &mut self,
        account: &AccountId,
        amount: i64,
    ) -> Result<Option<AccountBalance>, LedgerError> {
        let row = sqlx::query(
            r#"
            UPDATE account_balances
            SET balance_nano = balance_nano - $2, version = version + 1, updated_at = NOW()
            WHERE account_id = $1 AND balance_nano >= $2
            RETURNING balance_nano, version
            "#,
        )
        .bind(account.to_string())
        .bind(amount)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|row| AccountBalance {
            account: account.clone(),
            balance_nano: row.get("balance_nano"),
            version: row.get("version"),
        }))
    }

    async fn apply_delta(
        &mut self,
        account: &AccountId,
        delta: i64,
    ) -> Result<AccountBalance, LedgerError> {
        let row = sqlx::query(
            r#"
            INSERT INTO account_balances (account_id, balance_nano, version, updated_at)
            VALUES ($1, $2, 1, NOW())
            ON CONFLICT (account_id)
            DO UPDATE SET balance_nano = account_balances.balance_nano + EXCLUDED.balance_nano,
                          version = account_balances.version + 1,
                          updated_at = NOW()
            RETURNING balance_nano, version
            "#,
        )
        .bind(account.to_string())
        .bind(delta)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| overflow_or_persistence(e, account))?;

        Ok(AccountBalance {
            account: account.clone(),
            balance_nano: row.get("balance_nano"),
            version: row.get("version"),
        })
    }

    async fn insert_entry(&mut self, entry: &NewLedgerEntry) -> Result<EntryId, LedgerError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO ledger_entries
                (tx_ref, idempotency_key, deal_id, account_id, entry_type,
                 debit_nano, credit_nano, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            RETURNING id
            "#,
        )
        .bind(entry.tx_ref.as_uuid())
        .bind(&entry.idempotency_key)
        .bind(entry.deal_id)
        .bind(entry.account.to_string())
        .bind(entry.entry_type.as_str())
        .bind(entry.debit_nano)
        .bind(entry.credit_nano)
        .bind(&entry.description)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn append_outbox(&mut self, entry: &NewOutboxEntry) -> Result<OutboxId, LedgerError> {
        Ok(insert_outbox(&mut *self.tx, entry).await?)
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn balance(&self, account: &AccountId) -> Result<Option<AccountBalance>, LedgerError> {
        let row = sqlx::query(
            "SELECT balance_nano, version FROM account_balances WHERE account_id = $1",
        )
        .bind(account.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| AccountBalance {
            account: account.clone(),
            balance_nano: row.get("balance_nano"),
            version: row.get("version"),
        }))
    }

    async fn entries_by_deal(&self, deal_id: DealId) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ledger_entries WHERE deal_id = $1 ORDER BY id DESC",
            ENTRY_COLUMNS
        ))
        .bind(deal_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn entries_by_tx_ref(&self, tx_ref: TxRef) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ledger_entries WHERE tx_ref = $1 ORDER BY id ASC",
            ENTRY_COLUMNS
        ))
        .bind(tx_ref.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn entries_by_account(
        &self,
        account: &AccountId,
        cursor: Option<EntryId>,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM ledger_entries
            WHERE account_id = $1 AND ($2::BIGINT IS NULL OR id < $2)
            ORDER BY id DESC
            LIMIT $3
            "#,
            ENTRY_COLUMNS
        ))
        .bind(account.to_string())
        .bind(cursor)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn sum_debits_since(
        &self,
        account: &AccountId,
        entry_type: EntryType,
        since: DateTime<Utc>,
    ) -> Result<Money, LedgerError> {
        // SUM(BIGINT) is NUMERIC; cast back so overflow surfaces as a DB error
        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(debit_nano), 0)::BIGINT
            FROM ledger_entries
            WHERE account_id = $1 AND entry_type = $2 AND created_at >= $3
            "#,
        )
        .bind(account.to_string())
        .bind(entry_type.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| overflow_or_persistence(e, account))?;

        Money::from_i64(total).map_err(|e| LedgerError::CorruptRow(e.to_string()))
    }
}

/// 22003 (numeric_value_out_of_range) is deterministic, not a transient
/// storage failure
fn overflow_or_persistence(e: sqlx::Error, account: &AccountId) -> LedgerError {
    let overflow = matches!(
        &e,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("22003")
    );
    if overflow {
        LedgerError::BalanceOverflow(account.clone())
    } else {
        LedgerError::from(e)
    }
}

fn row_to_entry(row: &PgRow) -> Result<LedgerEntry, LedgerError> {
    let account_str: String = row.get("account_id");
    let account: AccountId = account_str
        .parse()
        .map_err(|e: super::account::AccountIdError| LedgerError::CorruptRow(e.to_string()))?;

    let entry_type_str: String = row.get("entry_type");
    let entry_type: EntryType = entry_type_str.parse().map_err(LedgerError::CorruptRow)?;

    let entry = LedgerEntry {
        id: row.get("id"),
        tx_ref: TxRef::from_uuid(row.get("tx_ref")),
        idempotency_key: row.get("idempotency_key"),
        deal_id: row.get("deal_id"),
        account,
        entry_type,
        debit_nano: row.get("debit_nano"),
        credit_nano: row.get("credit_nano"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    };

    if !entry.is_one_sided() {
        return Err(LedgerError::CorruptRow(format!(
            "entry {} has debit={} credit={}",
            entry.id, entry.debit_nano, entry.credit_nano
        )));
    }

    Ok(entry)
}
