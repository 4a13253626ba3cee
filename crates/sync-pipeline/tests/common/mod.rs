#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use snapshot_store::{AuditLog, AuditQuery, MemoryAuditLog, MemorySnapshotStore, SnapshotStore};
use sync_core::{AuditEntry, RetryPolicy, Snapshot, StatusCounts, StoredAuditEntry, SyncStatus};
use sync_pipeline::{Backends, Consumer, ConsumerConfig, MemoryHandles, Poller, SyncService};

pub fn fields(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) => m,
        other => panic!("not an object: {other}"),
    }
}

pub struct Pipeline {
    pub backends: Backends,
    pub handles: MemoryHandles,
    pub poller: Arc<Poller>,
    pub consumer: Arc<Consumer>,
    pub service: SyncService,
}

pub fn config() -> ConsumerConfig {
    ConsumerConfig {
        batch_size: 10,
        idle_interval: Duration::from_millis(500),
    }
}

/// All-memory pipeline, optionally with the snapshot store and audit log
/// swapped for wrappers.
pub fn pipeline_with(
    policy: RetryPolicy,
    wrap: impl FnOnce(&MemoryHandles) -> (Arc<dyn SnapshotStore>, Arc<dyn AuditLog>),
) -> Pipeline {
    let (mut backends, handles) = Backends::in_memory();
    let (snapshots, audit) = wrap(&handles);
    backends.snapshots = snapshots;
    backends.audit = audit;

    let poller = Arc::new(Poller::new(backends.clone(), Duration::from_secs(5)));
    let consumer = Arc::new(Consumer::new(backends.clone(), policy, config()));
    let service = SyncService::new(backends.clone(), Arc::clone(&poller));
    Pipeline {
        backends,
        handles,
        poller,
        consumer,
        service,
    }
}

pub fn pipeline() -> Pipeline {
    pipeline_with(RetryPolicy::default(), |h| {
        let snapshots: Arc<dyn SnapshotStore> = h.snapshots.clone();
        let audit: Arc<dyn AuditLog> = h.audit.clone();
        (snapshots, audit)
    })
}

/// Snapshot store whose upserts fail for chosen ids.
pub struct FlakyStore {
    inner: Arc<MemorySnapshotStore>,
    /// Remaining failures per source id
    failures: Mutex<HashMap<i64, u32>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemorySnapshotStore>) -> Self {
        Self {
            inner,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn fail(self, source_id: i64, times: u32) -> Self {
        self.failures.lock().unwrap().insert(source_id, times);
        self
    }

    fn should_fail(&self, source_id: i64) -> bool {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&source_id) {
            Some(0) | None => false,
            Some(n) => {
                *n -= 1;
                true
            }
        }
    }
}

#[async_trait]
impl SnapshotStore for FlakyStore {
    async fn list(&self) -> Result<Vec<Snapshot>> {
        self.inner.list().await
    }

    async fn get(&self, source_id: i64) -> Result<Option<Snapshot>> {
        self.inner.get(source_id).await
    }

    async fn list_by_status(&self, status: SyncStatus) -> Result<Vec<Snapshot>> {
        self.inner.list_by_status(status).await
    }

    async fn counts(&self) -> Result<StatusCounts> {
        self.inner.counts().await
    }

    async fn upsert(
        &self,
        source_id: i64,
        document: &Value,
        at: DateTime<Utc>,
    ) -> Result<Snapshot> {
        if self.should_fail(source_id) {
            return Err(anyhow!("connection reset by peer"));
        }
        self.inner.upsert(source_id, document, at).await
    }

    async fn mark_deleted(&self, source_id: i64, at: DateTime<Utc>) -> Result<Option<Snapshot>> {
        self.inner.mark_deleted(source_id, at).await
    }

    async fn mark_failed(&self, source_id: i64) -> Result<bool> {
        self.inner.mark_failed(source_id).await
    }
}

/// Audit log that rejects the first `n` appends.
pub struct BrokenAuditLog {
    inner: Arc<MemoryAuditLog>,
    remaining: Mutex<u32>,
}

impl BrokenAuditLog {
    pub fn new(inner: Arc<MemoryAuditLog>, n: u32) -> Self {
        Self {
            inner,
            remaining: Mutex::new(n),
        }
    }
}

#[async_trait]
impl AuditLog for BrokenAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<i64> {
        {
            let mut remaining = self.remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(anyhow!("audit log unavailable"));
            }
        }
        self.inner.append(entry).await
    }

    async fn list(&self, query: &AuditQuery) -> Result<Vec<StoredAuditEntry>> {
        self.inner.list(query).await
    }
}
