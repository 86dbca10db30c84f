//! Outbox repository port
//!
//! Every state change after the claim is a CAS on `(status = PROCESSING,
//! version = claimed version)`. A `false` return means the caller no longer
//! owns the row (lease expired and another poller reclaimed it) and must not
//! touch it further.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::OutboxError;
use super::types::{NewOutboxEntry, OutboxEntry, StatusCounts};
use crate::core_types::OutboxId;

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Standalone append, outside any ledger transaction
    async fn save(&self, entry: &NewOutboxEntry) -> Result<OutboxId, OutboxError>;

    /// Claim up to `limit` due PENDING rows (ascending id), moving them to
    /// PROCESSING. Rows locked or claimed by another poller are skipped.
    async fn find_pending_batch(&self, limit: usize) -> Result<Vec<OutboxEntry>, OutboxError>;

    /// PROCESSING -> DELIVERED
    async fn mark_delivered(&self, id: OutboxId, version: i32) -> Result<bool, OutboxError>;

    /// PROCESSING -> FAILED (terminal)
    async fn mark_failed(
        &self,
        id: OutboxId,
        version: i32,
        error: &str,
    ) -> Result<bool, OutboxError>;

    /// PROCESSING -> PENDING with `retry_count + 1`, due again at `next_attempt_at`
    async fn increment_retry(
        &self,
        id: OutboxId,
        version: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, OutboxError>;

    /// Return rows claimed longer than `lease` ago to PENDING. Does not
    /// consume a retry.
    async fn release_stale_claims(&self, lease: Duration) -> Result<u64, OutboxError>;

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxEntry>, OutboxError>;

    async fn counts_by_status(&self) -> Result<StatusCounts, OutboxError>;
}
