//! In-memory outbox repository
//!
//! Shares state with [`InMemoryLedgerStore`], so rows appended inside a
//! ledger transaction appear here only once that transaction commits.
//! The state lock makes each claim atomic, which gives the same
//! "no two pollers see the same row" guarantee as `SKIP LOCKED`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::OutboxError;
use super::repository::OutboxRepository;
use super::types::{NewOutboxEntry, OutboxEntry, OutboxStatus, StatusCounts};
use crate::core_types::OutboxId;
use crate::ledger::memory::InMemoryLedgerStore;

fn owned(entry: &OutboxEntry, version: i32) -> bool {
    entry.status == OutboxStatus::Processing && entry.version == version
}

#[async_trait]
impl OutboxRepository for InMemoryLedgerStore {
    async fn save(&self, entry: &NewOutboxEntry) -> Result<OutboxId, OutboxError> {
        let mut state = self.state.lock().await;
        let id = state.allocate_outbox_id();
        state
            .outbox
            .insert(id, OutboxEntry::pending(id, entry.clone(), Utc::now()));
        Ok(id)
    }

    async fn find_pending_batch(&self, limit: usize) -> Result<Vec<OutboxEntry>, OutboxError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let mut claimed = Vec::new();
        for entry in state.outbox.values_mut() {
            if claimed.len() >= limit {
                break;
            }
            if entry.status == OutboxStatus::Pending && entry.next_attempt_at <= now {
                entry.status = OutboxStatus::Processing;
                entry.version += 1;
                entry.claimed_at = Some(now);
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_delivered(&self, id: OutboxId, version: i32) -> Result<bool, OutboxError> {
        let mut state = self.state.lock().await;
        match state.outbox.get_mut(&id) {
            Some(entry) if owned(entry, version) => {
                entry.status = OutboxStatus::Delivered;
                entry.version += 1;
                entry.processed_at = Some(Utc::now());
                entry.last_error = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(
        &self,
        id: OutboxId,
        version: i32,
        error: &str,
    ) -> Result<bool, OutboxError> {
        let mut state = self.state.lock().await;
        match state.outbox.get_mut(&id) {
            Some(entry) if owned(entry, version) => {
                entry.status = OutboxStatus::Failed;
                entry.version += 1;
                entry.retry_count += 1;
                entry.processed_at = Some(Utc::now());
                entry.last_error = Some(error.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_retry(
        &self,
        id: OutboxId,
        version: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, OutboxError> {
        let mut state = self.state.lock().await;
        match state.outbox.get_mut(&id) {
            Some(entry) if owned(entry, version) => {
                entry.status = OutboxStatus::Pending;
                entry.version += 1;
                entry.retry_count += 1;
                entry.next_attempt_at = next_attempt_at;
                entry.claimed_at = None;
                entry.last_error = Some(error.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_stale_claims(&self, lease: Duration) -> Result<u64, OutboxError> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| OutboxError::Database(format!("invalid lease: {}", e)))?;
        let cutoff = Utc::now() - lease;
        let mut state = self.state.lock().await;
        let mut released = 0;
        for entry in state.outbox.values_mut() {
            let stale = entry.status == OutboxStatus::Processing
                && entry.claimed_at.is_some_and(|at| at < cutoff);
            if stale {
                entry.status = OutboxStatus::Pending;
                entry.version += 1;
                entry.claimed_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxEntry>, OutboxError> {
        Ok(self.state.lock().await.outbox.get(&id).cloned())
    }

    async fn counts_by_status(&self) -> Result<StatusCounts, OutboxError> {
        let state = self.state.lock().await;
        let mut counts = StatusCounts::default();
        for entry in state.outbox.values() {
            match entry.status {
                OutboxStatus::Pending => counts.pending += 1,
                OutboxStatus::Processing => counts.processing += 1,
                OutboxStatus::Delivered => counts.delivered += 1,
                OutboxStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
