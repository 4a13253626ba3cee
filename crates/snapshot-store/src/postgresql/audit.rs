use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sync_core::{AuditEntry, AuditMetadata, StoredAuditEntry};
use sync_postgresql::{PostgresConnection, TableName};
use tokio_postgres::Row;

use crate::error::StoreError;
use crate::store::{AuditLog, AuditQuery};

pub struct PostgresAuditLog {
    connection: Arc<PostgresConnection>,
    table: TableName,
}

impl PostgresAuditLog {
    pub fn new(connection: Arc<PostgresConnection>, table: TableName) -> Self {
        Self { connection, table }
    }

    fn corrupt(&self, reason: impl std::fmt::Display) -> StoreError {
        StoreError::CorruptRow {
            table: self.table.to_string(),
            reason: reason.to_string(),
        }
    }

    fn decode(&self, row: &Row) -> Result<StoredAuditEntry> {
        let operation: String = row.try_get(2)?;
        let status: String = row.try_get(3)?;
        let metadata: Value = row.try_get(5)?;

        let entry = AuditEntry {
            record_id: row.try_get(1)?,
            operation: operation.parse().map_err(|e| self.corrupt(e))?,
            status: status.parse().map_err(|e| self.corrupt(e))?,
            error_details: row.try_get(4)?,
            metadata: serde_json::from_value::<AuditMetadata>(metadata)
                .map_err(|e| self.corrupt(e))?,
            timestamp: row.try_get(6)?,
        };

        Ok(StoredAuditEntry {
            id: row.try_get(0)?,
            entry,
        })
    }
}

#[async_trait]
impl AuditLog for PostgresAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<i64> {
        let client = self.connection.client().await?;
        let metadata = serde_json::to_value(&entry.metadata)?;
        let sql = format!(
            "INSERT INTO {} (record_id, operation, status, error_details, metadata, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
            self.table.quoted()
        );
        let row = client
            .query_one(
                &sql,
                &[
                    &entry.record_id,
                    &entry.operation.as_str(),
                    &entry.status.as_str(),
                    &entry.error_details,
                    &metadata,
                    &entry.timestamp,
                ],
            )
            .await
            .with_context(|| format!("Failed to append audit entry for {}", entry.record_id))?;

        Ok(row.try_get(0)?)
    }

    async fn list(&self, query: &AuditQuery) -> Result<Vec<StoredAuditEntry>> {
        let client = self.connection.client().await?;
        let sql = format!(
            "SELECT id, record_id, operation, status, error_details, metadata, created_at
             FROM {}
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::bigint IS NULL OR record_id = $2)
             ORDER BY id DESC
             LIMIT $3",
            self.table.quoted()
        );
        let status = query.status.map(|s| s.as_str());
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let rows = client
            .query(&sql, &[&status, &query.record_id, &limit])
            .await
            .with_context(|| format!("Failed to read audit log {}", self.table))?;

        rows.iter().map(|row| self.decode(row)).collect()
    }
}
