use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::escrow::EscrowConfig;
use crate::outbox::PollerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub storage: StorageBackend,
    /// Required when `storage: postgres`
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub escrow: EscrowSettings,
    #[serde(default)]
    pub outbox: OutboxSettings,
    #[serde(default)]
    pub publisher: Option<PublisherConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    /// Run the idempotent DDL on start
    pub ensure_schema: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            acquire_timeout_ms: 5000,
            ensure_schema: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    /// Max cached balances; 0 disables the cache
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 100_000 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EscrowSettings {
    pub min_confirmations: u32,
    /// Seed of the mock TON wallet used for deposit addresses
    pub wallet_seed: String,
    pub workchain: i8,
}

impl Default for EscrowSettings {
    fn default() -> Self {
        Self {
            min_confirmations: 1,
            wallet_seed: "escrow".to_string(),
            workchain: 0,
        }
    }
}

impl EscrowSettings {
    pub fn escrow_config(&self) -> EscrowConfig {
        EscrowConfig {
            min_confirmations: self.min_confirmations,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutboxSettings {
    pub enabled: bool,
    /// Prepended to every topic as `{prefix}.{topic}`
    #[serde(default)]
    pub topic_prefix: Option<String>,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub max_retries: i32,
    pub publish_timeout_ms: u64,
    pub lease_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            topic_prefix: None,
            poll_interval_ms: 1000,
            batch_size: 100,
            max_retries: 5,
            publish_timeout_ms: 5000,
            lease_ms: 60_000,
            backoff_base_ms: 1000,
            backoff_max_ms: 300_000,
        }
    }
}

impl OutboxSettings {
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            publish_timeout: Duration::from_millis(self.publish_timeout_ms),
            lease: Duration::from_millis(self.lease_ms),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PublisherConfig {
    /// Log every event and acknowledge it
    Log,
    /// POST to a broker gateway
    Http { endpoint: String },
}

impl AppConfig {
    /// Load `config/{env}.yaml` and validate it
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.storage == StorageBackend::Postgres
            && self.postgres_url.as_deref().is_none_or(str::is_empty)
        {
            return invalid("postgres_url is required when storage is postgres");
        }
        if self.database.max_connections == 0 {
            return invalid("database.max_connections must be >= 1");
        }

        let outbox = &self.outbox;
        if outbox.poll_interval_ms == 0 || outbox.publish_timeout_ms == 0 || outbox.lease_ms == 0 {
            return invalid("outbox intervals must be positive");
        }
        if outbox.batch_size == 0 {
            return invalid("outbox.batch_size must be >= 1");
        }
        if outbox.max_retries < 1 {
            return invalid("outbox.max_retries must be >= 1");
        }
        if outbox.publish_timeout_ms >= outbox.lease_ms {
            return invalid("outbox.publish_timeout_ms must be shorter than outbox.lease_ms");
        }
        if outbox.backoff_base_ms > outbox.backoff_max_ms {
            return invalid("outbox.backoff_base_ms must not exceed outbox.backoff_max_ms");
        }

        if let Some(PublisherConfig::Http { endpoint }) = &self.publisher {
            if endpoint.trim().is_empty() {
                return invalid("publisher.endpoint is required for the http publisher");
            }
        }

        Ok(())
    }
}
