//! Outbox writer
//!
//! Builds outbox rows and appends them through the caller's open
//! [`LedgerTx`]. There is no way to write an event outside a transaction
//! from here; standalone writes go through `OutboxRepository::save`.

use serde::Serialize;
use tracing::debug;

use super::error::OutboxError;
use super::types::NewOutboxEntry;
use crate::core_types::{DealId, OutboxId};
use crate::ledger::error::LedgerError;
use crate::ledger::store::LedgerTx;

#[derive(Debug, Clone, Default)]
pub struct OutboxWriter {
    topic_prefix: Option<String>,
}

impl OutboxWriter {
    pub fn new(topic_prefix: Option<String>) -> Self {
        Self {
            topic_prefix: topic_prefix.filter(|p| !p.is_empty()),
        }
    }

    /// Fully qualified topic name
    pub fn topic(&self, topic: &str) -> String {
        match &self.topic_prefix {
            Some(prefix) => format!("{}.{}", prefix, topic),
            None => topic.to_string(),
        }
    }

    /// Build an event row; the deal id doubles as partition key so all events
    /// of one deal stay ordered on the broker.
    pub fn event<T: Serialize>(
        &self,
        topic: &str,
        deal_id: Option<DealId>,
        idempotency_key: Option<&str>,
        payload: &T,
    ) -> Result<NewOutboxEntry, OutboxError> {
        Ok(NewOutboxEntry {
            deal_id,
            idempotency_key: idempotency_key.map(str::to_string),
            topic: self.topic(topic),
            partition_key: deal_id.map(|d| d.to_string()),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Append inside the caller's transaction
    pub async fn append(
        &self,
        tx: &mut dyn LedgerTx,
        entry: &NewOutboxEntry,
    ) -> Result<OutboxId, LedgerError> {
        let id = tx.append_outbox(entry).await?;
        debug!(
            outbox_id = id,
            topic = %entry.topic,
            deal_id = ?entry.deal_id,
            "Outbox entry appended"
        );
        Ok(id)
    }
}
