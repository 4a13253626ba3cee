use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sync_core::SyncIntent;
use sync_postgresql::{PostgresConnection, TableName};
use tokio_postgres::Client;
use tracing::{debug, error, info};

use crate::error::{QueueError, Result};
use crate::queue::{Delivery, QueueDepth, SyncQueue};

/// Queue backed by a PostgreSQL table.
///
/// A message is a row with a `visible_at` timestamp. Receiving bumps
/// `visible_at` by the visibility timeout inside a single `UPDATE` whose
/// candidate rows are picked with `FOR UPDATE SKIP LOCKED`, so concurrent
/// consumers never lease the same row twice.
pub struct PostgresQueue {
    connection: Arc<PostgresConnection>,
    table: TableName,
    visibility_timeout: Duration,
}

impl PostgresQueue {
    pub fn new(
        connection: Arc<PostgresConnection>,
        table: TableName,
        visibility_timeout: Duration,
    ) -> Self {
        Self {
            connection,
            table,
            visibility_timeout,
        }
    }

    async fn client(&self) -> Result<Arc<Client>> {
        self.connection.client().await.map_err(QueueError::Connection)
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        let client = self.client().await?;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                body JSONB NOT NULL,
                visible_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS {visible_idx} ON {table} (visible_at, id);",
            table = self.table.quoted(),
            visible_idx = self.table.index("visible_idx"),
        );
        client.batch_execute(&ddl).await?;

        info!("Ensured PostgreSQL queue table {}", self.table);
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let client = self.client().await?;
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table.quoted());
        client.execute(&sql, &[&id]).await?;
        Ok(())
    }
}

fn seconds(d: Duration) -> f64 {
    d.as_secs_f64()
}

#[async_trait]
impl SyncQueue for PostgresQueue {
    async fn send(&self, intent: &SyncIntent, delay: Option<Duration>) -> Result<i64> {
        let body = serde_json::to_value(intent).map_err(QueueError::Encode)?;
        let delay = seconds(delay.unwrap_or_default());
        let client = self.client().await?;
        let sql = format!(
            "INSERT INTO {} (body, visible_at)
             VALUES ($1, now() + make_interval(secs => $2::float8))
             RETURNING id",
            self.table.quoted()
        );
        let row = client.query_one(&sql, &[&body, &delay]).await?;
        let id: i64 = row.try_get(0)?;

        debug!(
            "Enqueued {} for record {} as message {id}",
            intent.operation, intent.record_id
        );
        Ok(id)
    }

    async fn send_batch(&self, intents: &[SyncIntent]) -> Result<usize> {
        if intents.is_empty() {
            return Ok(0);
        }
        let bodies = intents
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<Value>, _>>()
            .map_err(QueueError::Encode)?;

        let client = self.client().await?;
        let sql = format!(
            "INSERT INTO {} (body) SELECT unnest($1::jsonb[])",
            self.table.quoted()
        );
        let inserted = client.execute(&sql, &[&bodies]).await?;
        Ok(inserted as usize)
    }

    async fn receive_batch(&self, max: usize) -> Result<Vec<Delivery>> {
        let client = self.client().await?;
        let sql = format!(
            "UPDATE {table}
             SET visible_at = now() + make_interval(secs => $2::float8),
                 attempts = attempts + 1
             WHERE id IN (
                 SELECT id FROM {table}
                 WHERE visible_at <= now()
                 ORDER BY id
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, body, attempts",
            table = self.table.quoted()
        );
        let limit = i64::try_from(max).unwrap_or(i64::MAX);
        let lease = seconds(self.visibility_timeout);
        let rows = client.query(&sql, &[&limit, &lease]).await?;

        let mut deliveries = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get(0)?;
            let body: Value = row.try_get(1)?;
            let attempts: i32 = row.try_get(2)?;

            match serde_json::from_value::<SyncIntent>(body) {
                Ok(intent) => deliveries.push(Delivery {
                    id,
                    intent,
                    attempts: u32::try_from(attempts).unwrap_or_default(),
                }),
                Err(source) => {
                    error!("Dropping message: {}", QueueError::Decode { id, source });
                    self.delete(id).await?;
                }
            }
        }
        // RETURNING does not preserve the subquery order
        deliveries.sort_by_key(|d| d.id);
        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.delete(delivery.id).await
    }

    async fn retry(&self, delivery: &Delivery, delay: Duration) -> Result<()> {
        let client = self.client().await?;
        let sql = format!(
            "UPDATE {} SET visible_at = now() + make_interval(secs => $2::float8) WHERE id = $1",
            self.table.quoted()
        );
        client.execute(&sql, &[&delivery.id, &seconds(delay)]).await?;
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT COUNT(*) FILTER (WHERE visible_at <= now()), COUNT(*) FROM {}",
            self.table.quoted()
        );
        let row = client.query_one(&sql, &[]).await?;
        let ready: i64 = row.try_get(0)?;
        let total: i64 = row.try_get(1)?;
        Ok(QueueDepth {
            ready: u64::try_from(ready).unwrap_or_default(),
            total: u64::try_from(total).unwrap_or_default(),
        })
    }
}
