//! Several pollers draining one outbox must never deliver an event twice.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{ONE_TON, RecordingPublisher, memory_stack};
use escrow_ledger::Money;
use escrow_ledger::escrow::EscrowPort;
use escrow_ledger::outbox::{
    OutboxMetrics, OutboxPoller, OutboxRepository, OutboxStatus, PollerConfig,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pollers_deliver_each_event_once() {
    let stack = memory_stack();
    let events = 50;
    for deal in 1..=events {
        stack
            .escrow
            .confirm_deposit(
                deal,
                &format!("tx-{}", deal),
                Money::from_nano(ONE_TON),
                1,
                "EQadvertiser",
            )
            .await
            .unwrap();
    }

    let publisher = Arc::new(RecordingPublisher::default());
    let metrics = Arc::new(OutboxMetrics::new());
    let config = PollerConfig {
        batch_size: 7,
        backoff_base: Duration::ZERO,
        backoff_max: Duration::ZERO,
        ..PollerConfig::default()
    };

    let mut handles = Vec::new();
    for _ in 0..4 {
        let poller = OutboxPoller::new(
            Arc::new(stack.store.clone()),
            publisher.clone(),
            metrics.clone(),
            config.clone(),
        );
        handles.push(tokio::spawn(async move {
            let mut delivered = 0;
            loop {
                let report = poller.poll_once().await.unwrap();
                if report.claimed == 0 {
                    break;
                }
                delivered += report.delivered;
            }
            delivered
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }

    let ids = publisher.event_ids();
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(ids.len(), events as usize);
    assert_eq!(unique.len(), events as usize);
    assert_eq!(total, events as usize);
    assert_eq!(metrics.snapshot().delivered, events as u64);
    assert_eq!(metrics.snapshot().lost_claims, 0);

    let counts = stack.store.counts_by_status().await.unwrap();
    assert_eq!(counts.delivered, events as u64);
    assert_eq!(counts.pending + counts.processing + counts.failed, 0);

    let first = stack.store.get(1).await.unwrap().unwrap();
    assert_eq!(first.status, OutboxStatus::Delivered);
    assert!(first.processed_at.is_some());
}
