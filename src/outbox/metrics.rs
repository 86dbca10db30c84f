//! Poller counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct OutboxMetrics {
    /// Entries acknowledged by the broker
    pub delivered: AtomicU64,
    /// Failed publishes that went back to PENDING
    pub retried: AtomicU64,
    /// Entries that exhausted retries (alertable)
    pub failed: AtomicU64,
    /// PROCESSING rows reclaimed after the lease expired
    pub stale_reclaimed: AtomicU64,
    /// CAS marks lost to another poller
    pub lost_claims: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub delivered: u64,
    pub retried: u64,
    pub failed: u64,
    pub stale_reclaimed: u64,
    pub lost_claims: u64,
}

impl OutboxMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_stale_reclaimed(&self, n: u64) {
        self.stale_reclaimed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_lost_claims(&self) {
        self.lost_claims.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            stale_reclaimed: self.stale_reclaimed.load(Ordering::Relaxed),
            lost_claims: self.lost_claims.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let metrics = OutboxMetrics::new();
        metrics.incr_delivered();
        metrics.incr_delivered();
        metrics.incr_failed();
        metrics.add_stale_reclaimed(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.delivered, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.stale_reclaimed, 3);
        assert_eq!(snap.retried, 0);
    }
}
