#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use escrow_ledger::escrow::{EscrowService, InMemoryDepositAddressRepository, MockTonWallet};
use escrow_ledger::ledger::{InMemoryLedgerStore, InProcessBalanceCache, TransferEngine};
use escrow_ledger::outbox::{EventPublisher, OutboxEntry, OutboxWriter, PublishError};

pub const ONE_TON: u64 = 1_000_000_000;

/// Publisher that records every event id it acknowledges
#[derive(Default)]
pub struct RecordingPublisher {
    seen: Mutex<Vec<(String, String)>>,
}

impl RecordingPublisher {
    pub fn event_ids(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn topics(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, topic)| topic.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    fn name(&self) -> &str {
        "recording"
    }

    async fn publish(&self, entry: &OutboxEntry) -> Result<(), PublishError> {
        // yield so concurrent pollers interleave
        tokio::task::yield_now().await;
        self.seen
            .lock()
            .unwrap()
            .push((entry.event_id(), entry.topic.clone()));
        Ok(())
    }
}

pub struct MemoryStack {
    pub store: InMemoryLedgerStore,
    pub engine: Arc<TransferEngine>,
    pub escrow: Arc<EscrowService>,
}

pub fn memory_stack() -> MemoryStack {
    let store = InMemoryLedgerStore::new();
    let engine = Arc::new(TransferEngine::new(
        Arc::new(store.clone()),
        Arc::new(InProcessBalanceCache::new(1024)),
        OutboxWriter::default(),
    ));
    let escrow = Arc::new(EscrowService::new(
        engine.clone(),
        Arc::new(InMemoryDepositAddressRepository::new()),
        Arc::new(MockTonWallet::default()),
        Default::default(),
    ));
    MemoryStack {
        store,
        engine,
        escrow,
    }
}
