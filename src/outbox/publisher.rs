//! Event publishers
//!
//! A publisher is the only suspending external call in the delivery path.
//! The poller bounds every call with its own timeout, so implementations do
//! not need to be cancellation-aware beyond being drop-safe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use super::error::PublishError;
use super::types::OutboxEntry;
use crate::core_types::DealId;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, entry: &OutboxEntry) -> Result<(), PublishError>;
}

/// Wire body posted to the broker gateway
#[derive(Debug, Serialize)]
struct PublishBody<'a> {
    event_id: String,
    deal_id: Option<DealId>,
    partition_key: Option<&'a str>,
    payload: &'a serde_json::Value,
}

/// Publishes to an HTTP broker gateway: `POST {endpoint}/topics/{topic}`
pub struct HttpPublisher {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpPublisher {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                PublishError::Unavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, topic: &str) -> String {
        format!("{}/topics/{}", self.endpoint, topic)
    }
}

#[async_trait]
impl EventPublisher for HttpPublisher {
    fn name(&self) -> &str {
        "http"
    }

    async fn publish(&self, entry: &OutboxEntry) -> Result<(), PublishError> {
        let event_id = entry.event_id();
        let body = PublishBody {
            event_id: event_id.clone(),
            deal_id: entry.deal_id,
            partition_key: entry.partition_key.as_deref(),
            payload: &entry.payload,
        };

        let response = self
            .client
            .post(self.url(&entry.topic))
            .header("Idempotency-Key", &event_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PublishError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    PublishError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(outbox_id = entry.id, topic = %entry.topic, "Broker accepted event");
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        if status.is_server_error() || status.as_u16() == 429 {
            Err(PublishError::Unavailable(format!("HTTP {}: {}", status, text)))
        } else {
            Err(PublishError::Rejected(format!("HTTP {}: {}", status, text)))
        }
    }
}

/// Dev publisher: records each event in the log and acknowledges it
#[derive(Debug, Default)]
pub struct LogPublisher {
    published: AtomicU64,
}

impl LogPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventPublisher for LogPublisher {
    fn name(&self) -> &str {
        "log"
    }

    async fn publish(&self, entry: &OutboxEntry) -> Result<(), PublishError> {
        self.published.fetch_add(1, Ordering::Relaxed);
        info!(
            outbox_id = entry.id,
            event_id = %entry.event_id(),
            topic = %entry.topic,
            partition_key = ?entry.partition_key,
            payload = %entry.payload,
            "Event published"
        );
        Ok(())
    }
}
