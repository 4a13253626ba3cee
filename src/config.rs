//! Pipeline configuration.
//!
//! Everything is optional; a missing file or section falls back to the
//! defaults below.
//!
//! ```toml
//! [tables]
//! source = "users"
//! snapshots = "user_snapshots"
//! audit = "sync_audit_log"
//! queue = "sync_queue"
//!
//! [poller]
//! interval = "5s"
//!
//! [consumer]
//! batch_size = 10
//! workers = 1
//! idle_interval = "1s"
//! visibility_timeout = "60s"
//!
//! [retry]
//! max_retries = 5
//! base_delay = "5s"
//! max_delay = "300s"
//! retry_validation_errors = false
//!
//! [server]
//! listen = "0.0.0.0:3000"
//! ```

pub mod duration;

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use snapshot_store::StorageTables;
use sync_core::RetryPolicy;
use sync_pipeline::ConsumerConfig;
use sync_postgresql::TableName;

use self::duration::{format_duration, serde_duration};

/// Upper bound for every configured interval and delay.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub tables: TablesConfig,
    pub poller: PollerConfig,
    pub consumer: ConsumerSection,
    pub retry: RetrySection,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TablesConfig {
    /// Read-only table owned by the application
    pub source: String,
    pub snapshots: String,
    pub audit: String,
    pub queue: String,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            source: "users".to_string(),
            snapshots: "user_snapshots".to_string(),
            audit: "sync_audit_log".to_string(),
            queue: "sync_queue".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollerConfig {
    #[serde(with = "serde_duration")]
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerSection {
    pub batch_size: usize,
    pub workers: usize,
    #[serde(with = "serde_duration")]
    pub idle_interval: Duration,
    /// How long a received message stays leased before redelivery
    #[serde(with = "serde_duration")]
    pub visibility_timeout: Duration,
}

impl Default for ConsumerSection {
    fn default() -> Self {
        Self {
            batch_size: 10,
            workers: 1,
            idle_interval: Duration::from_secs(1),
            visibility_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_retries: u32,
    #[serde(with = "serde_duration")]
    pub base_delay: Duration,
    #[serde(with = "serde_duration")]
    pub max_delay: Duration,
    pub retry_validation_errors: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            base_delay: policy.base_delay,
            max_delay: policy.max_delay,
            retry_validation_errors: policy.retry_validation_errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
        }
    }
}

impl Config {
    /// Load from `path`, or use the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {path:?}"))?;
                Self::from_toml_str(&text)
                    .with_context(|| format!("Invalid config file {path:?}"))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.storage_tables()?;
        self.queue_table()?;
        ensure!(self.consumer.batch_size > 0, "consumer.batch_size must be at least 1");
        ensure!(self.consumer.workers > 0, "consumer.workers must be at least 1");
        ensure!(!self.poller.interval.is_zero(), "poller.interval must be positive");
        ensure!(
            !self.consumer.visibility_timeout.is_zero(),
            "consumer.visibility_timeout must be positive"
        );
        ensure!(
            self.retry.max_delay >= self.retry.base_delay,
            "retry.max_delay must not be smaller than retry.base_delay"
        );

        for (key, value) in [
            ("poller.interval", self.poller.interval),
            ("consumer.idle_interval", self.consumer.idle_interval),
            ("consumer.visibility_timeout", self.consumer.visibility_timeout),
            ("retry.base_delay", self.retry.base_delay),
            ("retry.max_delay", self.retry.max_delay),
        ] {
            ensure!(
                value <= MAX_DURATION,
                "{key} must be at most {}",
                format_duration(MAX_DURATION)
            );
        }
        Ok(())
    }

    pub fn storage_tables(&self) -> Result<StorageTables> {
        Ok(StorageTables {
            source: TableName::parse(&self.tables.source)?,
            snapshots: TableName::parse(&self.tables.snapshots)?,
            audit: TableName::parse(&self.tables.audit)?,
        })
    }

    pub fn queue_table(&self) -> Result<TableName> {
        Ok(TableName::parse(&self.tables.queue)?)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: self.retry.base_delay,
            max_delay: self.retry.max_delay,
            retry_validation_errors: self.retry.retry_validation_errors,
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            batch_size: self.consumer.batch_size,
            idle_interval: self.consumer.idle_interval,
        }
    }
}
