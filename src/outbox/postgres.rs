//! PostgreSQL outbox repository
//!
//! The claim is a single statement so claiming and marking PROCESSING cannot
//! be split by a crash:
//!
//! ```sql
//! UPDATE outbox SET status = 10 ...
//! WHERE id IN (SELECT id ... FOR UPDATE SKIP LOCKED)
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};

use super::error::OutboxError;
use super::repository::OutboxRepository;
use super::types::{NewOutboxEntry, OutboxEntry, OutboxStatus, StatusCounts};
use crate::core_types::OutboxId;

const OUTBOX_COLUMNS: &str = "id, deal_id, idempotency_key, topic, partition_key, payload, \
                              status, retry_count, version, created_at, processed_at, \
                              next_attempt_at, claimed_at, last_error";

/// Insert a PENDING row through any executor (pool or open transaction)
pub(crate) async fn insert_outbox<'e, E>(
    executor: E,
    entry: &NewOutboxEntry,
) -> Result<OutboxId, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO outbox
            (deal_id, idempotency_key, topic, partition_key, payload, status,
             retry_count, version, created_at, next_attempt_at)
        VALUES ($1, $2, $3, $4, $5, $6, 0, 0, NOW(), NOW())
        RETURNING id
        "#,
    )
    .bind(entry.deal_id)
    .bind(&entry.idempotency_key)
    .bind(&entry.topic)
    .bind(&entry.partition_key)
    .bind(&entry.payload)
    .bind(OutboxStatus::Pending.id())
    .fetch_one(executor)
    .await
}

pub struct PgOutboxRepository {
    pool: PgPool,
}

impl PgOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxRepository for PgOutboxRepository {
    async fn save(&self, entry: &NewOutboxEntry) -> Result<OutboxId, OutboxError> {
        Ok(insert_outbox(&self.pool, entry).await?)
    }

    async fn find_pending_batch(&self, limit: usize) -> Result<Vec<OutboxEntry>, OutboxError> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE outbox
            SET status = $1, version = version + 1, claimed_at = NOW()
            WHERE id IN (
                SELECT id FROM outbox
                WHERE status = $2 AND next_attempt_at <= NOW()
                ORDER BY id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            OUTBOX_COLUMNS
        ))
        .bind(OutboxStatus::Processing.id())
        .bind(OutboxStatus::Pending.id())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        // RETURNING order is unspecified
        let mut entries = rows
            .iter()
            .map(row_to_entry)
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn mark_delivered(&self, id: OutboxId, version: i32) -> Result<bool, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = $1, version = version + 1, processed_at = NOW(), last_error = NULL
            WHERE id = $2 AND status = $3 AND version = $4
            "#,
        )
        .bind(OutboxStatus::Delivered.id())
        .bind(id)
        .bind(OutboxStatus::Processing.id())
        .bind(version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(
        &self,
        id: OutboxId,
        version: i32,
        error: &str,
    ) -> Result<bool, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = $1, version = version + 1, retry_count = retry_count + 1,
                processed_at = NOW(), last_error = $2
            WHERE id = $3 AND status = $4 AND version = $5
            "#,
        )
        .bind(OutboxStatus::Failed.id())
        .bind(error)
        .bind(id)
        .bind(OutboxStatus::Processing.id())
        .bind(version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment_retry(
        &self,
        id: OutboxId,
        version: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = $1, version = version + 1, retry_count = retry_count + 1,
                next_attempt_at = $2, claimed_at = NULL, last_error = $3
            WHERE id = $4 AND status = $5 AND version = $6
            "#,
        )
        .bind(OutboxStatus::Pending.id())
        .bind(next_attempt_at)
        .bind(error)
        .bind(id)
        .bind(OutboxStatus::Processing.id())
        .bind(version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_stale_claims(&self, lease: Duration) -> Result<u64, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = $1, version = version + 1, claimed_at = NULL
            WHERE status = $2 AND claimed_at < NOW() - make_interval(secs => $3)
            "#,
        )
        .bind(OutboxStatus::Pending.id())
        .bind(OutboxStatus::Processing.id())
        .bind(lease.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxEntry>, OutboxError> {
        let row = sqlx::query(&format!("SELECT {} FROM outbox WHERE id = $1", OUTBOX_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn counts_by_status(&self) -> Result<StatusCounts, OutboxError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM outbox GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status_id: i16 = row.get("status");
            let n: i64 = row.get("n");
            let slot = match OutboxStatus::from_id(status_id) {
                Some(OutboxStatus::Pending) => &mut counts.pending,
                Some(OutboxStatus::Processing) => &mut counts.processing,
                Some(OutboxStatus::Delivered) => &mut counts.delivered,
                Some(OutboxStatus::Failed) => &mut counts.failed,
                None => {
                    return Err(OutboxError::CorruptRow(format!(
                        "unknown status {}",
                        status_id
                    )));
                }
            };
            *slot = n as u64;
        }
        Ok(counts)
    }
}

fn row_to_entry(row: &PgRow) -> Result<OutboxEntry, OutboxError> {
    let status_id: i16 = row.get("status");
    let status = OutboxStatus::from_id(status_id)
        .ok_or_else(|| OutboxError::CorruptRow(format!("unknown status {}", status_id)))?;

    Ok(OutboxEntry {
        id: row.get("id"),
        deal_id: row.get("deal_id"),
        idempotency_key: row.get("idempotency_key"),
        topic: row.get("topic"),
        partition_key: row.get("partition_key"),
        payload: row.get("payload"),
        status,
        retry_count: row.get("retry_count"),
        version: row.get("version"),
        created_at: row.get("created_at"),
        processed_at: row.get("processed_at"),
        next_attempt_at: row.get("next_attempt_at"),
        claimed_at: row.get("claimed_at"),
        last_error: row.get("last_error"),
    })
}
