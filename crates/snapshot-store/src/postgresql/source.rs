use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sync_core::SourceRecord;
use sync_postgresql::{PostgresConnection, TableName};
use tokio_postgres::Row;

use crate::error::StoreError;
use crate::store::SourceReader;

/// Reads the application's table.
///
/// Every column except `id`, `created_at` and `updated_at` is folded into
/// the record's fields with `to_jsonb`, so any column set works without
/// per-table mapping code.
pub struct PostgresSource {
    connection: Arc<PostgresConnection>,
    table: TableName,
}

impl PostgresSource {
    pub fn new(connection: Arc<PostgresConnection>, table: TableName) -> Self {
        Self { connection, table }
    }

    fn select(&self) -> String {
        format!(
            "SELECT t.id::bigint, t.created_at::timestamptz, t.updated_at::timestamptz,
                    (to_jsonb(t) - 'id' - 'created_at' - 'updated_at') AS fields
             FROM {} t",
            self.table.quoted()
        )
    }

    fn decode(&self, row: &Row) -> Result<SourceRecord> {
        let id: i64 = row.try_get(0)?;
        let fields = match row.try_get::<_, Value>(3)? {
            Value::Object(fields) => fields,
            _ => {
                return Err(StoreError::NotAnObject {
                    table: self.table.to_string(),
                    id,
                }
                .into())
            }
        };

        Ok(SourceRecord {
            id,
            fields,
            created_at: row.try_get(1)?,
            updated_at: row.try_get(2)?,
        })
    }
}

#[async_trait]
impl SourceReader for PostgresSource {
    async fn fetch_all(&self) -> Result<Vec<SourceRecord>> {
        let client = self.connection.client().await?;
        let rows = client
            .query(&format!("{} ORDER BY t.id", self.select()), &[])
            .await
            .with_context(|| format!("Failed to read source table {}", self.table))?;

        rows.iter().map(|row| self.decode(row)).collect()
    }

    async fn fetch_one(&self, id: i64) -> Result<Option<SourceRecord>> {
        let client = self.connection.client().await?;
        let row = client
            .query_opt(&format!("{} WHERE t.id::bigint = $1", self.select()), &[&id])
            .await
            .with_context(|| format!("Failed to read row {id} from {}", self.table))?;

        row.as_ref().map(|row| self.decode(row)).transpose()
    }
}
