use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sync_core::{Snapshot, StatusCounts, SyncStatus};
use sync_postgresql::{PostgresConnection, TableName};
use tokio_postgres::Row;

use crate::error::StoreError;
use crate::store::SnapshotStore;

const COLUMNS: &str = "source_id, document, sync_status, last_synced_at";

pub struct PostgresSnapshotStore {
    connection: Arc<PostgresConnection>,
    table: TableName,
}

impl PostgresSnapshotStore {
    pub fn new(connection: Arc<PostgresConnection>, table: TableName) -> Self {
        Self { connection, table }
    }

    fn decode(&self, row: &Row) -> Result<Snapshot> {
        let status: String = row.try_get(2)?;
        let sync_status = status.parse().map_err(|e| StoreError::CorruptRow {
            table: self.table.to_string(),
            reason: format!("{e}"),
        })?;

        Ok(Snapshot {
            source_id: row.try_get(0)?,
            document: row.try_get(1)?,
            sync_status,
            last_synced_at: row.try_get(3)?,
        })
    }

    async fn query(&self, sql: &str, status: Option<SyncStatus>) -> Result<Vec<Snapshot>> {
        let client = self.connection.client().await?;
        let rows = match status {
            Some(status) => client.query(sql, &[&status.as_str()]).await,
            None => client.query(sql, &[]).await,
        }
        .with_context(|| format!("Failed to read snapshots from {}", self.table))?;

        rows.iter().map(|row| self.decode(row)).collect()
    }
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    async fn list(&self) -> Result<Vec<Snapshot>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} ORDER BY source_id",
            self.table.quoted()
        );
        self.query(&sql, None).await
    }

    async fn get(&self, source_id: i64) -> Result<Option<Snapshot>> {
        let client = self.connection.client().await?;
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE source_id = $1",
            self.table.quoted()
        );
        let row = client
            .query_opt(&sql, &[&source_id])
            .await
            .with_context(|| format!("Failed to read snapshot {source_id}"))?;

        row.as_ref().map(|row| self.decode(row)).transpose()
    }

    async fn list_by_status(&self, status: SyncStatus) -> Result<Vec<Snapshot>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE sync_status = $1 ORDER BY source_id",
            self.table.quoted()
        );
        self.query(&sql, Some(status)).await
    }

    async fn counts(&self) -> Result<StatusCounts> {
        let client = self.connection.client().await?;
        let sql = format!(
            "SELECT sync_status, COUNT(*) FROM {} GROUP BY sync_status",
            self.table.quoted()
        );
        let rows = client
            .query(&sql, &[])
            .await
            .with_context(|| format!("Failed to count snapshots in {}", self.table))?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get(0)?;
            let n: i64 = row.try_get(1)?;
            let status: SyncStatus = status.parse().map_err(|e| StoreError::CorruptRow {
                table: self.table.to_string(),
                reason: format!("{e}"),
            })?;
            counts.add(status, u64::try_from(n).unwrap_or_default());
        }
        Ok(counts)
    }

    async fn upsert(
        &self,
        source_id: i64,
        document: &Value,
        at: DateTime<Utc>,
    ) -> Result<Snapshot> {
        let client = self.connection.client().await?;
        // JSONB equality ignores key order, which matches documents_match.
        let sql = format!(
            "INSERT INTO {table} AS s (source_id, document, sync_status, last_synced_at)
             VALUES ($1, $2, 'synced', $3)
             ON CONFLICT (source_id) DO UPDATE SET
                 last_synced_at = CASE
                     WHEN s.sync_status = 'synced' AND s.document = EXCLUDED.document
                         THEN s.last_synced_at
                     ELSE EXCLUDED.last_synced_at
                 END,
                 document = EXCLUDED.document,
                 sync_status = 'synced',
                 updated_at = now()
             RETURNING {COLUMNS}",
            table = self.table.quoted()
        );
        let row = client
            .query_one(&sql, &[&source_id, document, &at])
            .await
            .with_context(|| format!("Failed to upsert snapshot {source_id}"))?;

        self.decode(&row)
    }

    async fn mark_deleted(&self, source_id: i64, at: DateTime<Utc>) -> Result<Option<Snapshot>> {
        let client = self.connection.client().await?;
        let sql = format!(
            "UPDATE {} SET
                 last_synced_at = CASE
                     WHEN sync_status = 'deleted' AND document IS NULL THEN last_synced_at
                     ELSE $2
                 END,
                 document = NULL,
                 sync_status = 'deleted',
                 updated_at = now()
             WHERE source_id = $1
             RETURNING {COLUMNS}",
            self.table.quoted()
        );
        let row = client
            .query_opt(&sql, &[&source_id, &at])
            .await
            .with_context(|| format!("Failed to mark snapshot {source_id} deleted"))?;

        row.as_ref().map(|row| self.decode(row)).transpose()
    }

    async fn mark_failed(&self, source_id: i64) -> Result<bool> {
        let client = self.connection.client().await?;
        let sql = format!(
            "UPDATE {} SET sync_status = 'failed', updated_at = now() WHERE source_id = $1",
            self.table.quoted()
        );
        let updated = client
            .execute(&sql, &[&source_id])
            .await
            .with_context(|| format!("Failed to mark snapshot {source_id} failed"))?;

        Ok(updated > 0)
    }
}
