//! Storage traits
//!
//! These traits abstract the backend so the poller, consumer and
//! reconciler can run against:
//! - In-memory maps (`MemorySource`, `MemorySnapshotStore`, `MemoryAuditLog`)
//! - PostgreSQL tables (`PostgresSource`, `PostgresSnapshotStore`, `PostgresAuditLog`)

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sync_core::{
    AuditEntry, AuditStatus, Snapshot, SourceRecord, StatusCounts, StoredAuditEntry, SyncStatus,
};

/// Read-only access to the source table.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Every source row, ordered by id.
    async fn fetch_all(&self) -> Result<Vec<SourceRecord>>;

    async fn fetch_one(&self, id: i64) -> Result<Option<SourceRecord>>;
}

/// The target table: one snapshot per source id.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Every snapshot, ordered by source id.
    async fn list(&self) -> Result<Vec<Snapshot>>;

    async fn get(&self, source_id: i64) -> Result<Option<Snapshot>>;

    async fn list_by_status(&self, status: SyncStatus) -> Result<Vec<Snapshot>>;

    async fn counts(&self) -> Result<StatusCounts>;

    /// Create the snapshot, or overwrite its document, and mark it `synced`.
    ///
    /// Re-applying the document a `synced` snapshot already holds leaves
    /// `last_synced_at` unchanged.
    async fn upsert(&self, source_id: i64, document: &Value, at: DateTime<Utc>) -> Result<Snapshot>;

    /// Soft delete: null the document and mark the snapshot `deleted`.
    ///
    /// Returns `None` when there is no snapshot for `source_id`. Applying
    /// this to an already deleted snapshot changes nothing.
    async fn mark_deleted(&self, source_id: i64, at: DateTime<Utc>) -> Result<Option<Snapshot>>;

    /// Returns whether a snapshot existed.
    async fn mark_failed(&self, source_id: i64) -> Result<bool>;
}

/// Filter for reading the audit log, newest entries first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditQuery {
    pub limit: usize,
    pub status: Option<AuditStatus>,
    pub record_id: Option<i64>,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            status: None,
            record_id: None,
        }
    }
}

impl AuditQuery {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.status.map_or(true, |status| entry.status == status)
            && self.record_id.map_or(true, |id| entry.record_id == id)
    }
}

/// Append-only audit trail.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Returns the id assigned to the entry.
    async fn append(&self, entry: &AuditEntry) -> Result<i64>;

    async fn list(&self, query: &AuditQuery) -> Result<Vec<StoredAuditEntry>>;
}
