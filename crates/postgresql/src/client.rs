//! PostgreSQL client utilities
//!
//! `tokio_postgres::Client` is dead for good once its connection task exits.
//! The poller and the consumer are long-running loops that must survive a
//! database restart, so they go through [`PostgresConnection`], which
//! replaces a closed client on the next call.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};
use tracing::{error, info, warn};

/// Create a new PostgreSQL client with connection handling
pub async fn new_postgresql_client(connection_string: &str) -> Result<Client> {
    let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
        .await
        .context("Failed to connect to PostgreSQL")?;

    // Spawn connection handler
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("PostgreSQL connection error: {e}");
        }
    });

    Ok(client)
}

/// Lazily reconnecting handle shared by every PostgreSQL backend.
pub struct PostgresConnection {
    connection_string: String,
    client: Mutex<Option<Arc<Client>>>,
}

impl PostgresConnection {
    /// Connect eagerly so that a bad connection string fails at startup.
    pub async fn connect(connection_string: impl Into<String>) -> Result<Arc<Self>> {
        let connection_string = connection_string.into();
        let client = new_postgresql_client(&connection_string).await?;
        info!("Connected to PostgreSQL");
        Ok(Arc::new(Self {
            connection_string,
            client: Mutex::new(Some(Arc::new(client))),
        }))
    }

    /// Current client, reconnecting first if the previous one was closed.
    pub async fn client(&self) -> Result<Arc<Client>> {
        let mut guard = self.client.lock().await;

        if let Some(client) = guard.as_ref() {
            if !client.is_closed() {
                return Ok(Arc::clone(client));
            }
            warn!("PostgreSQL connection closed, reconnecting");
        }

        let client = Arc::new(new_postgresql_client(&self.connection_string).await?);
        *guard = Some(Arc::clone(&client));
        Ok(client)
    }
}
