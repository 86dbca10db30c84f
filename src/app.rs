//! Service assembly
//!
//! Builds the ledger, escrow service and outbox poller from an [`AppConfig`].
//! The binary uses it to run the poller; a host process (the deal lifecycle
//! service) uses the same [`App`] to reach [`EscrowPort`] in-process.

use std::sync::Arc;

use anyhow::Context;

use crate::config::{AppConfig, PublisherConfig, StorageBackend};
use crate::db::Database;
use crate::escrow::{
    DepositAddressRepository, EscrowPort, EscrowService, InMemoryDepositAddressRepository,
    MockTonWallet, PgDepositAddressRepository,
};
use crate::ledger::{
    InMemoryLedgerStore, InProcessBalanceCache, LedgerStore, PgLedgerStore, TransferEngine,
};
use crate::outbox::{
    EventPublisher, HttpPublisher, LogPublisher, OutboxMetrics, OutboxPoller, OutboxRepository,
    OutboxWriter, PgOutboxRepository,
};

/// The assembled service graph
pub struct App {
    pub engine: Arc<TransferEngine>,
    pub escrow: Arc<EscrowService>,
    pub outbox: Arc<dyn OutboxRepository>,
    /// `None` unless `outbox.enabled` is set and a publisher is configured
    pub poller: Option<OutboxPoller>,
}

impl App {
    pub async fn build(config: &AppConfig) -> anyhow::Result<Self> {
        let (ledger, outbox, addresses) = build_backends(config).await?;

        let engine = Arc::new(TransferEngine::new(
            ledger,
            Arc::new(InProcessBalanceCache::new(config.cache.capacity)),
            OutboxWriter::new(config.outbox.topic_prefix.clone()),
        ));
        let escrow = Arc::new(EscrowService::new(
            engine.clone(),
            addresses,
            Arc::new(MockTonWallet::new(
                &config.escrow.wallet_seed,
                config.escrow.workchain,
            )),
            config.escrow.escrow_config(),
        ));
        tracing::info!(
            min_confirmations = config.escrow.min_confirmations,
            workchain = config.escrow.workchain,
            "Escrow service ready"
        );

        let poller = match (&config.publisher, config.outbox.enabled) {
            (Some(publisher_config), true) => {
                let poller_config = config.outbox.poller_config();
                let publisher =
                    build_publisher(publisher_config, poller_config.publish_timeout)?;
                tracing::info!(publisher = publisher.name(), "Outbox poller enabled");
                Some(OutboxPoller::new(
                    outbox.clone(),
                    publisher,
                    Arc::new(OutboxMetrics::new()),
                    poller_config,
                ))
            }
            (None, true) => {
                tracing::warn!("outbox.enabled is set but no publisher is configured");
                None
            }
            _ => None,
        };

        Ok(Self {
            engine,
            escrow,
            outbox,
            poller,
        })
    }

    /// Escrow operations as the port collaborators call
    pub fn escrow_port(&self) -> Arc<dyn EscrowPort> {
        self.escrow.clone()
    }
}

type Backends = (
    Arc<dyn LedgerStore>,
    Arc<dyn OutboxRepository>,
    Arc<dyn DepositAddressRepository>,
);

async fn build_backends(config: &AppConfig) -> anyhow::Result<Backends> {
    match config.storage {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; state is lost on exit");
            let store = InMemoryLedgerStore::new();
            Ok((
                Arc::new(store.clone()),
                Arc::new(store),
                Arc::new(InMemoryDepositAddressRepository::new()),
            ))
        }
        StorageBackend::Postgres => {
            let url = config
                .postgres_url
                .as_deref()
                .context("postgres_url is required when storage is postgres")?;
            let db = Database::connect(url, &config.database)
                .await
                .context("Failed to connect to PostgreSQL")?;
            if config.database.ensure_schema {
                db.ensure_schema()
                    .await
                    .context("Failed to initialize schema")?;
            }
            let pool = db.pool().clone();
            Ok((
                Arc::new(PgLedgerStore::new(pool.clone())),
                Arc::new(PgOutboxRepository::new(pool.clone())),
                Arc::new(PgDepositAddressRepository::new(pool)),
            ))
        }
    }
}

fn build_publisher(
    config: &PublisherConfig,
    timeout: std::time::Duration,
) -> anyhow::Result<Arc<dyn EventPublisher>> {
    Ok(match config {
        PublisherConfig::Log => Arc::new(LogPublisher::new()),
        PublisherConfig::Http { endpoint } => Arc::new(
            HttpPublisher::new(endpoint, timeout).context("Failed to build HTTP publisher")?,
        ),
    })
}
