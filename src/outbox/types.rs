//! Outbox Types
//!
//! Status IDs are stored as SMALLINT.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_types::{DealId, OutboxId};

/// Outbox entry states
///
/// ```text
/// PENDING ──claim──▶ PROCESSING ──ok──▶ DELIVERED
///    ▲                   │
///    └───retry / lease───┤
///                        └──exhausted──▶ FAILED
/// ```
///
/// Terminal: DELIVERED (20), FAILED (-10)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum OutboxStatus {
    /// Waiting to be claimed by a poller
    Pending = 0,
    /// Claimed by exactly one poller, publish in progress
    Processing = 10,
    /// Terminal: broker acknowledged the event
    Delivered = 20,
    /// Terminal: retries exhausted, needs operator attention
    Failed = -10,
}

impl OutboxStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Delivered | OutboxStatus::Failed)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(OutboxStatus::Pending),
            10 => Some(OutboxStatus::Processing),
            20 => Some(OutboxStatus::Delivered),
            -10 => Some(OutboxStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processing => "PROCESSING",
            OutboxStatus::Delivered => "DELIVERED",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An event to append to the outbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxEntry {
    pub deal_id: Option<DealId>,
    pub idempotency_key: Option<String>,
    pub topic: String,
    pub partition_key: Option<String>,
    pub payload: serde_json::Value,
}

/// A persisted outbox row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: OutboxId,
    pub deal_id: Option<DealId>,
    pub idempotency_key: Option<String>,
    pub topic: String,
    pub partition_key: Option<String>,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub next_attempt_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl OutboxEntry {
    /// Materialize a freshly inserted row
    pub fn pending(id: OutboxId, entry: NewOutboxEntry, now: DateTime<Utc>) -> Self {
        Self {
            id,
            deal_id: entry.deal_id,
            idempotency_key: entry.idempotency_key,
            topic: entry.topic,
            partition_key: entry.partition_key,
            payload: entry.payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            version: 0,
            created_at: now,
            processed_at: None,
            next_attempt_at: now,
            claimed_at: None,
            last_error: None,
        }
    }

    /// Event id consumers dedupe on: the idempotency key, else the row id
    pub fn event_id(&self) -> String {
        self.idempotency_key
            .clone()
            .unwrap_or_else(|| format!("outbox-{}", self.id))
    }
}

/// Row counts per status, for health checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub delivered: u64,
    pub failed: u64,
}
