//! Wiring of backends, background loops and the HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use snapshot_store::PostgresStorage;
use sync_pipeline::{Backends, Consumer, Poller, SyncService};
use sync_postgresql::PostgresConnection;
use sync_queue::PostgresQueue;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api;
use crate::config::Config;

/// PostgreSQL-backed storage and queue sharing one connection.
pub struct PostgresBackends {
    storage: PostgresStorage,
    queue: Arc<PostgresQueue>,
}

impl PostgresBackends {
    pub async fn connect(database_url: &str, config: &Config) -> Result<Self> {
        let connection = PostgresConnection::connect(database_url).await?;
        let storage = PostgresStorage::new(Arc::clone(&connection), config.storage_tables()?);
        let queue = PostgresQueue::new(
            connection,
            config.queue_table()?,
            config.consumer.visibility_timeout,
        );
        Ok(Self {
            storage,
            queue: Arc::new(queue),
        })
    }

    /// Create the snapshot, audit and queue tables.
    pub async fn migrate(&self) -> Result<()> {
        self.storage.ensure_schema().await?;
        self.queue.ensure_schema().await?;
        Ok(())
    }

    pub fn backends(&self) -> Backends {
        Backends::new(
            Arc::new(self.storage.source()),
            Arc::new(self.storage.snapshots()),
            Arc::new(self.storage.audit_log()),
            self.queue.clone(),
        )
    }
}

/// A fully assembled pipeline.
pub struct App {
    pub poller: Arc<Poller>,
    pub consumer: Arc<Consumer>,
    pub service: SyncService,
    workers: usize,
}

impl App {
    pub fn new(backends: Backends, config: &Config) -> Self {
        let poller = Arc::new(Poller::new(backends.clone(), config.poller.interval));
        let consumer = Arc::new(Consumer::new(
            backends.clone(),
            config.retry_policy(),
            config.consumer_config(),
        ));
        let service = SyncService::new(backends, Arc::clone(&poller));
        Self {
            poller,
            consumer,
            service,
            workers: config.consumer.workers,
        }
    }

    pub fn router(&self) -> Router {
        api::router(self.service.clone())
    }

    /// Run the poller, the consumer workers and the HTTP server until
    /// `shutdown` resolves, then stop the loops and wait for them.
    pub async fn serve(
        self,
        listen: SocketAddr,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let listener = TcpListener::bind(listen)
            .await
            .with_context(|| format!("Failed to bind {listen}"))?;
        info!("Listening on {}", listener.local_addr()?);

        let cancel = CancellationToken::new();
        let poller_handle = self.poller.start();
        let worker_handles = self.consumer.spawn_workers(self.workers, cancel.clone());

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .context("HTTP server failed");

        info!("Shutting down");
        self.poller.stop();
        cancel.cancel();
        poller_handle.await.context("Poller task panicked")?;
        for handle in worker_handles {
            handle.await.context("Consumer task panicked")?;
        }
        served
    }
}
