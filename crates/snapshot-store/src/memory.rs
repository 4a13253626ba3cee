//! In-memory backends.
//!
//! Same semantics as the PostgreSQL tables, held in maps behind async
//! locks. Each method takes the write lock once, which gives the same
//! per-row atomicity as a single SQL statement.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sync_core::{
    documents_match, AuditEntry, Snapshot, SourceRecord, StatusCounts, StoredAuditEntry,
    SyncStatus,
};
use tokio::sync::RwLock;

use crate::store::{AuditLog, AuditQuery, SnapshotStore, SourceReader};

/// Mutable stand-in for the source table.
#[derive(Default)]
pub struct MemorySource {
    rows: RwLock<BTreeMap<i64, SourceRecord>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, record: SourceRecord) {
        self.rows.write().await.insert(record.id, record);
    }

    /// Insert a new row or replace the fields of an existing one,
    /// bumping `updated_at` the way an application write would.
    pub async fn write(&self, id: i64, fields: Map<String, Value>) -> SourceRecord {
        let mut rows = self.rows.write().await;
        let record = match rows.get(&id) {
            Some(existing) => SourceRecord {
                fields,
                updated_at: Utc::now().max(existing.updated_at),
                ..existing.clone()
            },
            None => SourceRecord::new(id, fields),
        };
        rows.insert(id, record.clone());
        record
    }

    pub async fn remove(&self, id: i64) -> Option<SourceRecord> {
        self.rows.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn fetch_all(&self) -> Result<Vec<SourceRecord>> {
        Ok(self.rows.read().await.values().cloned().collect())
    }

    async fn fetch_one(&self, id: i64) -> Result<Option<SourceRecord>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }
}

#[derive(Default)]
pub struct MemorySnapshotStore {
    rows: RwLock<BTreeMap<i64, Snapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a snapshot directly, bypassing the apply path.
    pub async fn put(&self, snapshot: Snapshot) {
        self.rows.write().await.insert(snapshot.source_id, snapshot);
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn list(&self) -> Result<Vec<Snapshot>> {
        Ok(self.rows.read().await.values().cloned().collect())
    }

    async fn get(&self, source_id: i64) -> Result<Option<Snapshot>> {
        Ok(self.rows.read().await.get(&source_id).cloned())
    }

    async fn list_by_status(&self, status: SyncStatus) -> Result<Vec<Snapshot>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|s| s.sync_status == status)
            .cloned()
            .collect())
    }

    async fn counts(&self) -> Result<StatusCounts> {
        let mut counts = StatusCounts::default();
        for snapshot in self.rows.read().await.values() {
            counts.add(snapshot.sync_status, 1);
        }
        Ok(counts)
    }

    async fn upsert(
        &self,
        source_id: i64,
        document: &Value,
        at: DateTime<Utc>,
    ) -> Result<Snapshot> {
        let mut rows = self.rows.write().await;
        let snapshot = rows.entry(source_id).or_insert_with(|| Snapshot {
            source_id,
            document: None,
            sync_status: SyncStatus::Pending,
            last_synced_at: None,
        });

        let unchanged = snapshot.sync_status == SyncStatus::Synced
            && documents_match(snapshot.document.as_ref(), document);
        if !unchanged {
            snapshot.last_synced_at = Some(at);
        }
        snapshot.document = Some(document.clone());
        snapshot.sync_status = SyncStatus::Synced;

        Ok(snapshot.clone())
    }

    async fn mark_deleted(&self, source_id: i64, at: DateTime<Utc>) -> Result<Option<Snapshot>> {
        let mut rows = self.rows.write().await;
        let Some(snapshot) = rows.get_mut(&source_id) else {
            return Ok(None);
        };

        if snapshot.sync_status != SyncStatus::Deleted || snapshot.document.is_some() {
            snapshot.document = None;
            snapshot.sync_status = SyncStatus::Deleted;
            snapshot.last_synced_at = Some(at);
        }

        Ok(Some(snapshot.clone()))
    }

    async fn mark_failed(&self, source_id: i64) -> Result<bool> {
        match self.rows.write().await.get_mut(&source_id) {
            Some(snapshot) => {
                snapshot.sync_status = SyncStatus::Failed;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct MemoryAuditLog {
    entries: RwLock<Vec<StoredAuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry in append order.
    pub async fn entries(&self) -> Vec<StoredAuditEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<i64> {
        let mut entries = self.entries.write().await;
        let id = entries.len() as i64 + 1;
        entries.push(StoredAuditEntry {
            id,
            entry: entry.clone(),
        });
        Ok(id)
    }

    async fn list(&self, query: &AuditQuery) -> Result<Vec<StoredAuditEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .rev()
            .filter(|stored| query.matches(&stored.entry))
            .take(query.limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use sync_core::{AuditStatus, SyncIntent};

    fn fields(name: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("name".to_string(), json!(name));
        m
    }

    #[tokio::test]
    async fn test_source_write_bumps_updated_at() {
        let source = MemorySource::new();
        let first = source.write(1, fields("A")).await;
        let second = source.write(1, fields("B")).await;

        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(source.fetch_one(1).await.unwrap().unwrap().fields["name"], json!("B"));
        assert_eq!(source.len().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemorySnapshotStore::new();
        let doc = json!({"id": 1, "name": "A"});
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::seconds(10);

        let first = store.upsert(1, &doc, t1).await.unwrap();
        let second = store.upsert(1, &doc, t2).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.last_synced_at, Some(t1));
        assert_eq!(second.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_changed_document() {
        let store = MemorySnapshotStore::new();
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::seconds(10);
        store.upsert(1, &json!({"name": "A"}), t1).await.unwrap();
        let updated = store.upsert(1, &json!({"name": "B"}), t2).await.unwrap();

        assert_eq!(updated.document, Some(json!({"name": "B"})));
        assert_eq!(updated.last_synced_at, Some(t2));
    }

    #[tokio::test]
    async fn test_upsert_revives_failed_snapshot() {
        let store = MemorySnapshotStore::new();
        let doc = json!({"name": "A"});
        store.upsert(1, &doc, Utc::now()).await.unwrap();
        assert!(store.mark_failed(1).await.unwrap());

        let revived = store.upsert(1, &doc, Utc::now()).await.unwrap();
        assert_eq!(revived.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_mark_deleted_is_soft_and_idempotent() {
        let store = MemorySnapshotStore::new();
        let t1 = Utc::now();
        store.upsert(1, &json!({"name": "A"}), t1).await.unwrap();

        let deleted = store.mark_deleted(1, t1).await.unwrap().unwrap();
        let again = store
            .mark_deleted(1, t1 + chrono::Duration::seconds(5))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(deleted, again);
        assert_eq!(again.document, None);
        assert_eq!(again.sync_status, SyncStatus::Deleted);
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.mark_deleted(2, t1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_counts_and_status_filter() {
        let store = MemorySnapshotStore::new();
        for id in 1..=3 {
            store.upsert(id, &json!({"id": id}), Utc::now()).await.unwrap();
        }
        store.mark_failed(2).await.unwrap();
        store.mark_deleted(3, Utc::now()).await.unwrap();
        assert!(!store.mark_failed(9).await.unwrap());

        let counts = store.counts().await.unwrap();
        assert_eq!((counts.synced, counts.failed, counts.deleted), (1, 1, 1));
        let failed = store.list_by_status(SyncStatus::Failed).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].source_id, 2);
    }

    #[tokio::test]
    async fn test_audit_list_newest_first_with_filters() {
        let log = MemoryAuditLog::new();
        let intent = SyncIntent::delete(1);
        let err = sync_core::ApplyError::Storage(anyhow::anyhow!("down"));

        log.append(&AuditEntry::retry(&intent, &err, Duration::from_secs(5), Duration::ZERO))
            .await
            .unwrap();
        log.append(&AuditEntry::success(&intent.next_attempt(), Duration::ZERO))
            .await
            .unwrap();
        log.append(&AuditEntry::success(&SyncIntent::delete(2), Duration::ZERO))
            .await
            .unwrap();

        let all = log.list(&AuditQuery::default()).await.unwrap();
        assert_eq!(all.iter().map(|e| e.id).collect::<Vec<_>>(), vec![3, 2, 1]);

        let retries = log
            .list(&AuditQuery {
                status: Some(AuditStatus::Retry),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(retries.len(), 1);

        let record_one = log
            .list(&AuditQuery {
                record_id: Some(1),
                limit: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(record_one.len(), 1);
        assert_eq!(record_one[0].entry.status, AuditStatus::Success);
    }
}
