//! Outbox Poller
//!
//! Background worker that claims due PENDING rows and hands them to the
//! publisher. Every publish failure, including a publisher panic, becomes
//! retry bookkeeping; one bad entry never halts the batch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::error::{OutboxError, PublishError};
use super::metrics::OutboxMetrics;
use super::publisher::EventPublisher;
use super::repository::OutboxRepository;
use super::types::OutboxEntry;

/// Configuration for the outbox poller
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Pause between cycles
    pub poll_interval: Duration,
    /// Maximum rows claimed per cycle
    pub batch_size: usize,
    /// Attempts before an entry is parked as FAILED
    pub max_retries: i32,
    /// Upper bound on a single publish call
    pub publish_timeout: Duration,
    /// How long a PROCESSING claim is honoured before it is reclaimed
    pub lease: Duration,
    /// First retry delay; zero retries on the next cycle
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
            max_retries: 5,
            publish_timeout: Duration::from_secs(5),
            lease: Duration::from_secs(60),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(300),
        }
    }
}

impl PollerConfig {
    /// Delay before the attempt following `retry_count` failures.
    /// Exponential in the retry count, capped, with up to 25% jitter.
    pub fn backoff(&self, retry_count: i32) -> Duration {
        if self.backoff_base.is_zero() {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(retry_count.clamp(0, 31) as u32);
        let delay = self
            .backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max);

        let jitter_ms = delay.as_millis() as u64 / 4;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        delay + Duration::from_millis(jitter)
    }
}

/// Outcome of one poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub claimed: usize,
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
    pub reclaimed: u64,
    /// Claimed but not attempted: the lease could end mid-publish. They stay
    /// PROCESSING until the lease returns them to PENDING.
    pub deferred: usize,
}

pub struct OutboxPoller {
    repo: Arc<dyn OutboxRepository>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<OutboxMetrics>,
    config: PollerConfig,
}

impl OutboxPoller {
    pub fn new(
        repo: Arc<dyn OutboxRepository>,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<OutboxMetrics>,
        config: PollerConfig,
    ) -> Self {
        Self {
            repo,
            publisher,
            metrics,
            config,
        }
    }

    pub fn metrics(&self) -> &Arc<OutboxMetrics> {
        &self.metrics
    }

    /// Run until the shutdown signal flips to `true` (or its sender is dropped).
    /// The signal is observed between cycles; an in-flight batch is finished.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            publisher = self.publisher.name(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            max_retries = self.config.max_retries,
            "Starting outbox poller"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.poll_once().await {
                error!(error = %e, code = e.code(), "Outbox poll cycle failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Outbox poller stopped");
    }

    /// Run a single reclaim + claim + publish cycle
    pub async fn poll_once(&self) -> Result<PollReport, OutboxError> {
        let mut report = PollReport::default();

        report.reclaimed = self.repo.release_stale_claims(self.config.lease).await?;
        if report.reclaimed > 0 {
            warn!(
                count = report.reclaimed,
                lease_secs = self.config.lease.as_secs(),
                "Reclaimed outbox entries with expired lease"
            );
            self.metrics.add_stale_reclaimed(report.reclaimed);
        }

        // Taken before the claim, so it is never later than the stored claimed_at
        let claimed_at = Instant::now();
        let batch = self.repo.find_pending_batch(self.config.batch_size).await?;
        if batch.is_empty() {
            debug!("No pending outbox entries");
            return Ok(report);
        }
        report.claimed = batch.len();
        debug!(count = batch.len(), "Claimed outbox entries");

        // A publish started after this point could still be running when the
        // lease expires and another poller reclaims the row.
        let start_window = self.config.lease.saturating_sub(self.config.publish_timeout);
        let last_start = claimed_at + start_window;

        for (i, entry) in batch.iter().enumerate() {
            if Instant::now() >= last_start {
                report.deferred = batch.len() - i;
                warn!(
                    deferred = report.deferred,
                    outbox_id = entry.id,
                    lease_ms = self.config.lease.as_millis() as u64,
                    "Lease too short to finish batch; leaving rest for reclaim"
                );
                break;
            }

            let outcome = self.publish_bounded(entry).await;
            if let Err(e) = self.settle(entry, outcome, &mut report).await {
                // row stays PROCESSING; the lease returns it to PENDING
                error!(
                    outbox_id = entry.id,
                    error = %e,
                    "Failed to record publish outcome"
                );
            }
        }

        if report.delivered > 0 || report.failed > 0 {
            info!(
                delivered = report.delivered,
                retried = report.retried,
                failed = report.failed,
                "Outbox batch processed"
            );
        }

        Ok(report)
    }

    /// Publish on its own task so a panic surfaces as a `JoinError`
    async fn publish_bounded(&self, entry: &OutboxEntry) -> Result<(), PublishError> {
        let publisher = Arc::clone(&self.publisher);
        let owned = entry.clone();
        let handle = tokio::spawn(async move { publisher.publish(&owned).await });
        let abort = handle.abort_handle();

        match tokio::time::timeout(self.config.publish_timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(PublishError::Crashed(join_err.to_string())),
            Err(_) => {
                abort.abort();
                Err(PublishError::Timeout(
                    self.config.publish_timeout.as_millis() as u64,
                ))
            }
        }
    }

    async fn settle(
        &self,
        entry: &OutboxEntry,
        outcome: Result<(), PublishError>,
        report: &mut PollReport,
    ) -> Result<(), OutboxError> {
        let error = match outcome {
            Ok(()) => {
                if self.repo.mark_delivered(entry.id, entry.version).await? {
                    debug!(outbox_id = entry.id, topic = %entry.topic, "Outbox entry delivered");
                    self.metrics.incr_delivered();
                    report.delivered += 1;
                } else {
                    self.lost_claim(entry);
                }
                return Ok(());
            }
            Err(e) => e,
        };

        let attempts = entry.retry_count + 1;
        if attempts < self.config.max_retries {
            let delay = self.config.backoff(entry.retry_count);
            let next_attempt_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            if self
                .repo
                .increment_retry(entry.id, entry.version, next_attempt_at, &error.to_string())
                .await?
            {
                warn!(
                    outbox_id = entry.id,
                    topic = %entry.topic,
                    attempts,
                    max_retries = self.config.max_retries,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %error,
                    "Publish failed, will retry"
                );
                self.metrics.incr_retried();
                report.retried += 1;
            } else {
                self.lost_claim(entry);
            }
        } else if self
            .repo
            .mark_failed(entry.id, entry.version, &error.to_string())
            .await?
        {
            error!(
                alert = "outbox_failed",
                outbox_id = entry.id,
                topic = %entry.topic,
                deal_id = ?entry.deal_id,
                attempts,
                error = %error,
                "Outbox entry FAILED after exhausting retries"
            );
            self.metrics.incr_failed();
            report.failed += 1;
        } else {
            self.lost_claim(entry);
        }

        Ok(())
    }

    fn lost_claim(&self, entry: &OutboxEntry) {
        warn!(
            outbox_id = entry.id,
            version = entry.version,
            "Outbox claim lost to another poller"
        );
        self.metrics.incr_lost_claims();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedgerStore;
    use crate::outbox::types::{NewOutboxEntry, OutboxStatus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails, panics or hangs depending on the topic
    #[derive(Default)]
    struct ScriptedPublisher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventPublisher for ScriptedPublisher {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn publish(&self, entry: &OutboxEntry) -> Result<(), PublishError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match entry.topic.as_str() {
                "fail" => Err(PublishError::Unavailable("broker down".into())),
                "panic" => panic!("publisher bug"),
                "hang" => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
                _ => Ok(()),
            }
        }
    }

    fn event(topic: &str) -> NewOutboxEntry {
        NewOutboxEntry {
            deal_id: Some(1),
            idempotency_key: None,
            topic: topic.into(),
            partition_key: Some("1".into()),
            payload: serde_json::json!({}),
        }
    }

    fn config(max_retries: i32) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(10),
            batch_size: 10,
            max_retries,
            publish_timeout: Duration::from_millis(100),
            lease: Duration::from_secs(60),
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
        }
    }

    fn poller(
        store: &InMemoryLedgerStore,
        publisher: Arc<ScriptedPublisher>,
        max_retries: i32,
    ) -> OutboxPoller {
        OutboxPoller::new(
            Arc::new(store.clone()),
            publisher,
            Arc::new(OutboxMetrics::new()),
            config(max_retries),
        )
    }

    #[tokio::test]
    async fn test_delivers_pending() {
        let store = InMemoryLedgerStore::new();
        let id = store.save(&event("ok")).await.unwrap();
        let poller = poller(&store, Arc::new(ScriptedPublisher::default()), 3);

        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.delivered, 1);

        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Delivered);
        assert!(row.processed_at.is_some());
        assert_eq!(poller.poll_once().await.unwrap().claimed, 0);
    }

    #[tokio::test]
    async fn test_failed_after_max_retries_and_never_again() {
        let store = InMemoryLedgerStore::new();
        let id = store.save(&event("fail")).await.unwrap();
        let publisher = Arc::new(ScriptedPublisher::default());
        let poller = poller(&store, publisher.clone(), 3);

        for _ in 0..2 {
            assert_eq!(poller.poll_once().await.unwrap().retried, 1);
            let row = store.get(id).await.unwrap().unwrap();
            assert_eq!(row.status, OutboxStatus::Pending);
        }
        assert_eq!(poller.poll_once().await.unwrap().failed, 1);

        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Failed);
        assert_eq!(row.retry_count, 3);
        assert!(row.last_error.unwrap().contains("broker down"));

        for _ in 0..3 {
            assert_eq!(poller.poll_once().await.unwrap().claimed, 0);
        }
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 3);
        assert_eq!(poller.metrics().snapshot().failed, 1);
        assert_eq!(poller.metrics().snapshot().retried, 2);
    }

    #[tokio::test]
    async fn test_panicking_publisher_does_not_halt_batch() {
        let store = InMemoryLedgerStore::new();
        let bad = store.save(&event("panic")).await.unwrap();
        let good = store.save(&event("ok")).await.unwrap();
        let poller = poller(&store, Arc::new(ScriptedPublisher::default()), 3);

        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.retried, 1);

        let bad_row = store.get(bad).await.unwrap().unwrap();
        assert_eq!(bad_row.status, OutboxStatus::Pending);
        assert!(bad_row.last_error.unwrap().contains("Publisher crashed"));
        assert_eq!(
            store.get(good).await.unwrap().unwrap().status,
            OutboxStatus::Delivered
        );
    }

    #[tokio::test]
    async fn test_publish_timeout_counts_as_failure() {
        let store = InMemoryLedgerStore::new();
        let id = store.save(&event("hang")).await.unwrap();
        let poller = poller(&store, Arc::new(ScriptedPublisher::default()), 1);

        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.failed, 1);

        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Failed);
        assert_eq!(row.last_error.as_deref(), Some("Publish timed out after 100ms"));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = InMemoryLedgerStore::new();
        let id = store.save(&event("ok")).await.unwrap();
        let poller = Arc::new(poller(&store, Arc::new(ScriptedPublisher::default()), 3));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let poller = poller.clone();
            async move { poller.run(rx).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("poller did not stop")
            .unwrap();

        assert_eq!(
            store.get(id).await.unwrap().unwrap().status,
            OutboxStatus::Delivered
        );
    }

    /// Sleeps on every publish and records per-row calls and overlap
    #[derive(Default)]
    struct SlowPublisher {
        calls: std::sync::Mutex<std::collections::HashMap<i64, usize>>,
        in_flight: std::sync::Mutex<std::collections::HashSet<i64>>,
        overlaps: AtomicUsize,
    }

    #[async_trait]
    impl EventPublisher for SlowPublisher {
        fn name(&self) -> &str {
            "slow"
        }

        async fn publish(&self, entry: &OutboxEntry) -> Result<(), PublishError> {
            *self.calls.lock().unwrap().entry(entry.id).or_default() += 1;
            if !self.in_flight.lock().unwrap().insert(entry.id) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
            self.in_flight.lock().unwrap().remove(&entry.id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_batch_stops_before_lease_can_expire_mid_publish() {
        let store = InMemoryLedgerStore::new();
        for _ in 0..3 {
            store.save(&event("ok")).await.unwrap();
        }
        let publisher = Arc::new(SlowPublisher::default());
        let lease_config = PollerConfig {
            publish_timeout: Duration::from_millis(200),
            lease: Duration::from_millis(400),
            ..config(3)
        };
        let first = Arc::new(OutboxPoller::new(
            Arc::new(store.clone()),
            publisher.clone(),
            Arc::new(OutboxMetrics::new()),
            lease_config.clone(),
        ));
        let second = OutboxPoller::new(
            Arc::new(store.clone()),
            publisher.clone(),
            Arc::new(OutboxMetrics::new()),
            lease_config,
        );

        let handle = tokio::spawn({
            let first = first.clone();
            async move { first.poll_once().await }
        });
        tokio::time::sleep(Duration::from_millis(440)).await;
        let second_report = second.poll_once().await.unwrap();
        let first_report = handle.await.unwrap().unwrap();

        assert_eq!(first_report.claimed, 3);
        // 150ms publishes against a 200ms start window: the third is left
        assert_eq!(first_report.delivered, 2);
        assert_eq!(first_report.deferred, 1);
        assert_eq!(second_report.reclaimed, 1);
        assert_eq!(second_report.delivered, 1);

        let calls = publisher.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        assert!(calls.values().all(|&n| n == 1));
        assert_eq!(publisher.overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(first.metrics().snapshot().lost_claims, 0);
        assert_eq!(store.counts_by_status().await.unwrap().delivered, 3);
    }

    #[test]
    fn test_backoff_growth() {
        let cfg = PollerConfig {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(1000),
            ..PollerConfig::default()
        };
        let first = cfg.backoff(0);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        let third = cfg.backoff(2);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(500));
        let capped = cfg.backoff(30);
        assert!(capped >= Duration::from_millis(1000) && capped <= Duration::from_millis(1250));

        assert_eq!(config(3).backoff(4), Duration::ZERO);
    }
}
