//! PostgreSQL backends.
//!
//! All three backends share one [`PostgresConnection`]. Table names come
//! from configuration and are validated by [`TableName`] before they are
//! spliced into SQL text; every value goes through a bind parameter.

mod audit;
mod snapshots;
mod source;

use std::sync::Arc;

use anyhow::{Context, Result};
use sync_postgresql::{PostgresConnection, TableName};
use tracing::info;

pub use audit::PostgresAuditLog;
pub use snapshots::PostgresSnapshotStore;
pub use source::PostgresSource;

/// Table names used by the PostgreSQL backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageTables {
    pub source: TableName,
    pub snapshots: TableName,
    pub audit: TableName,
}

/// Entry point for the PostgreSQL backends.
pub struct PostgresStorage {
    connection: Arc<PostgresConnection>,
    tables: StorageTables,
}

impl PostgresStorage {
    pub fn new(connection: Arc<PostgresConnection>, tables: StorageTables) -> Self {
        Self { connection, tables }
    }

    pub fn tables(&self) -> &StorageTables {
        &self.tables
    }

    pub fn source(&self) -> PostgresSource {
        PostgresSource::new(Arc::clone(&self.connection), self.tables.source.clone())
    }

    pub fn snapshots(&self) -> PostgresSnapshotStore {
        PostgresSnapshotStore::new(Arc::clone(&self.connection), self.tables.snapshots.clone())
    }

    pub fn audit_log(&self) -> PostgresAuditLog {
        PostgresAuditLog::new(Arc::clone(&self.connection), self.tables.audit.clone())
    }

    /// Create the snapshot and audit tables and their indexes if missing.
    ///
    /// The source table belongs to the application and is never created
    /// or altered here.
    pub async fn ensure_schema(&self) -> Result<()> {
        let client = self.connection.client().await?;
        let snapshots = &self.tables.snapshots;
        let audit = &self.tables.audit;

        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {snapshots_q} (
                id BIGSERIAL PRIMARY KEY,
                source_id BIGINT NOT NULL UNIQUE,
                document JSONB,
                sync_status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (sync_status IN ('pending', 'synced', 'failed', 'deleted')),
                last_synced_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS {snapshots_status_idx} ON {snapshots_q} (sync_status);

            CREATE TABLE IF NOT EXISTS {audit_q} (
                id BIGSERIAL PRIMARY KEY,
                record_id BIGINT NOT NULL,
                operation TEXT NOT NULL,
                status TEXT NOT NULL,
                error_details TEXT,
                metadata JSONB NOT NULL DEFAULT '{{}}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS {audit_record_idx} ON {audit_q} (record_id, id);
            CREATE INDEX IF NOT EXISTS {audit_status_idx} ON {audit_q} (status, id);",
            snapshots_q = snapshots.quoted(),
            snapshots_status_idx = snapshots.index("status_idx"),
            audit_q = audit.quoted(),
            audit_record_idx = audit.index("record_idx"),
            audit_status_idx = audit.index("status_idx"),
        );

        client
            .batch_execute(&ddl)
            .await
            .with_context(|| format!("Failed to create tables {snapshots} and {audit}"))?;

        info!("Ensured PostgreSQL tables {snapshots} and {audit}");
        Ok(())
    }
}
