//! Deposit address persistence
//!
//! One row per deal. First-time callers racing on the same deal each try an
//! insert-if-absent and then re-read, so every caller returns the row that
//! won. The loser's sub-wallet id is simply never used.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;

use super::error::EscrowError;
use super::types::DepositAddressInfo;
use crate::core_types::{DealId, SubwalletId};

#[async_trait]
pub trait DepositAddressRepository: Send + Sync {
    async fn find(&self, deal_id: DealId) -> Result<Option<DepositAddressInfo>, EscrowError>;

    /// Next value of the monotonic sub-wallet sequence
    async fn next_subwallet_id(&self) -> Result<SubwalletId, EscrowError>;

    /// Insert unless the deal already has an address; returns the stored row
    async fn insert_or_get(
        &self,
        info: &DepositAddressInfo,
    ) -> Result<DepositAddressInfo, EscrowError>;
}

pub struct PgDepositAddressRepository {
    pool: PgPool,
}

impl PgDepositAddressRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DepositAddressRepository for PgDepositAddressRepository {
    async fn find(&self, deal_id: DealId) -> Result<Option<DepositAddressInfo>, EscrowError> {
        let row = sqlx::query(
            r#"
            SELECT deal_id, subwallet_id, address, expected_amount_nano, created_at
            FROM deposit_addresses
            WHERE deal_id = $1
            "#,
        )
        .bind(deal_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_info))
    }

    async fn next_subwallet_id(&self) -> Result<SubwalletId, EscrowError> {
        let id = sqlx::query_scalar::<_, i64>("SELECT nextval('deposit_subwallet_seq')")
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn insert_or_get(
        &self,
        info: &DepositAddressInfo,
    ) -> Result<DepositAddressInfo, EscrowError> {
        sqlx::query(
            r#"
            INSERT INTO deposit_addresses
                (deal_id, subwallet_id, address, expected_amount_nano, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (deal_id) DO NOTHING
            "#,
        )
        .bind(info.deal_id)
        .bind(info.subwallet_id)
        .bind(&info.address)
        .bind(info.expected_amount_nano)
        .bind(info.created_at)
        .execute(&self.pool)
        .await?;

        // Re-fetch so a lost race returns the winner's row
        self.find(info.deal_id).await?.ok_or_else(|| {
            EscrowError::Database(format!(
                "deposit address for deal {} vanished after insert",
                info.deal_id
            ))
        })
    }
}

fn row_to_info(row: &PgRow) -> DepositAddressInfo {
    DepositAddressInfo {
        deal_id: row.get("deal_id"),
        subwallet_id: row.get("subwallet_id"),
        address: row.get("address"),
        expected_amount_nano: row.get("expected_amount_nano"),
        created_at: row.get("created_at"),
    }
}

/// In-memory deposit addresses for tests and `storage: memory`
#[derive(Clone, Default)]
pub struct InMemoryDepositAddressRepository {
    rows: Arc<Mutex<HashMap<DealId, DepositAddressInfo>>>,
    seq: Arc<AtomicI64>,
}

impl InMemoryDepositAddressRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DepositAddressRepository for InMemoryDepositAddressRepository {
    async fn find(&self, deal_id: DealId) -> Result<Option<DepositAddressInfo>, EscrowError> {
        Ok(self.rows.lock().await.get(&deal_id).cloned())
    }

    async fn next_subwallet_id(&self) -> Result<SubwalletId, EscrowError> {
        Ok(self.seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert_or_get(
        &self,
        info: &DepositAddressInfo,
    ) -> Result<DepositAddressInfo, EscrowError> {
        let mut rows = self.rows.lock().await;
        Ok(rows.entry(info.deal_id).or_insert_with(|| info.clone()).clone())
    }
}
