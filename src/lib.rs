//! snapshot-sync
//!
//! Keeps a document-shaped snapshot table eventually consistent with a
//! relational source table. A poller diffs both tables on a timer and
//! enqueues INSERT/UPDATE/DELETE intents; a consumer applies them
//! idempotently, audits every attempt and retries failures with bounded
//! exponential backoff.
//!
//! # Crates
//!
//! - `sync_core` - data model, diff and retry policy
//! - `snapshot_store` - source reader, snapshot store and audit log backends
//! - `sync_queue` - intent queue with delayed visibility and leases
//! - `sync_pipeline` - poller, consumer, reconciler and operator operations
//!
//! # CLI Usage
//!
//! ```bash
//! # Create the snapshot, audit and queue tables
//! snapshot-sync --database-url postgres://... migrate
//!
//! # Run the poller, consumer and HTTP API
//! snapshot-sync --database-url postgres://... --config sync.toml serve
//!
//! # One-shot operations print JSON
//! snapshot-sync reconcile
//! snapshot-sync logs --status failed --limit 20
//! ```

use std::path::PathBuf;

use clap::Parser;

pub mod api;
pub mod app;
pub mod config;

pub use app::{App, PostgresBackends};
pub use config::Config;

#[derive(Parser, Clone, Debug)]
pub struct GlobalOpts {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Pipeline configuration file (TOML)
    #[arg(long, env = "SNAPSHOT_SYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

impl GlobalOpts {
    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--database-url or DATABASE_URL is required"))
    }
}
