//! Operator-facing operations.
//!
//! The CLI and the HTTP API are both thin wrappers around [`SyncService`].

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use snapshot_store::AuditQuery;
use sync_core::{DriftReport, Snapshot, StatusCounts, StoredAuditEntry, SyncIntent, SyncStatus};
use sync_queue::QueueDepth;
use tracing::info;

use crate::backends::Backends;
use crate::poller::{CycleReport, PollOutcome, Poller};
use crate::reconciler::Reconciler;

/// Aggregate view returned by the status operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub counts: StatusCounts,
    pub total: u64,
    pub queue: QueueDepth,
    pub last_cycle: Option<CycleReport>,
}

#[derive(Clone)]
pub struct SyncService {
    backends: Backends,
    poller: Arc<Poller>,
    reconciler: Arc<Reconciler>,
}

impl SyncService {
    pub fn new(backends: Backends, poller: Arc<Poller>) -> Self {
        Self {
            reconciler: Arc::new(Reconciler::new(backends.clone())),
            backends,
            poller,
        }
    }

    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }

    /// Enqueue an INSERT for every source row, whatever the snapshots hold.
    pub async fn backfill(&self) -> Result<usize> {
        let sources = self.backends.source.fetch_all().await?;
        let intents: Vec<SyncIntent> = sources.iter().map(SyncIntent::insert).collect();
        let queued = self.backends.queue.send_batch(&intents).await?;

        info!("Backfill enqueued {queued} inserts");
        Ok(queued)
    }

    pub async fn status(&self) -> Result<StatusSummary> {
        let counts = self.backends.snapshots.counts().await?;
        Ok(StatusSummary {
            counts,
            total: counts.total(),
            queue: self.backends.queue.depth().await?,
            last_cycle: self.poller.last_cycle().await,
        })
    }

    pub async fn snapshot(&self, source_id: i64) -> Result<Option<Snapshot>> {
        self.backends.snapshots.get(source_id).await
    }

    /// Audit entries, newest first.
    pub async fn logs(&self, query: &AuditQuery) -> Result<Vec<StoredAuditEntry>> {
        self.backends.audit.list(query).await
    }

    pub async fn reconcile(&self) -> Result<DriftReport> {
        self.reconciler.run().await
    }

    /// Re-enqueue every snapshot marked `failed`.
    ///
    /// The intent is built from the source row as it is now: an UPDATE if
    /// the row still exists, a DELETE otherwise.
    pub async fn retry_failed(&self) -> Result<usize> {
        let failed = self
            .backends
            .snapshots
            .list_by_status(SyncStatus::Failed)
            .await?;

        let mut intents = Vec::with_capacity(failed.len());
        for snapshot in &failed {
            let intent = match self.backends.source.fetch_one(snapshot.source_id).await? {
                Some(record) => SyncIntent::update(&record),
                None => SyncIntent::delete(snapshot.source_id),
            };
            intents.push(intent);
        }
        let queued = self.backends.queue.send_batch(&intents).await?;

        info!("Re-enqueued {queued} failed snapshots");
        Ok(queued)
    }

    pub async fn poll_now(&self) -> Result<PollOutcome> {
        self.poller.poll_once().await
    }
}
