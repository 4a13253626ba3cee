use std::sync::Arc;

use snapshot_store::{
    AuditLog, MemoryAuditLog, MemorySnapshotStore, MemorySource, SnapshotStore, SourceReader,
};
use sync_queue::{MemoryQueue, SyncQueue};

/// The storage and queue handles every pipeline component is built from.
#[derive(Clone)]
pub struct Backends {
    pub source: Arc<dyn SourceReader>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub audit: Arc<dyn AuditLog>,
    pub queue: Arc<dyn SyncQueue>,
}

impl Backends {
    pub fn new(
        source: Arc<dyn SourceReader>,
        snapshots: Arc<dyn SnapshotStore>,
        audit: Arc<dyn AuditLog>,
        queue: Arc<dyn SyncQueue>,
    ) -> Self {
        Self {
            source,
            snapshots,
            audit,
            queue,
        }
    }

    /// All-memory backends, returned alongside the concrete handles so
    /// callers can seed and inspect them.
    pub fn in_memory() -> (Self, MemoryHandles) {
        let handles = MemoryHandles {
            source: Arc::new(MemorySource::new()),
            snapshots: Arc::new(MemorySnapshotStore::new()),
            audit: Arc::new(MemoryAuditLog::new()),
            queue: Arc::new(MemoryQueue::default()),
        };
        let backends = Self::new(
            handles.source.clone(),
            handles.snapshots.clone(),
            handles.audit.clone(),
            handles.queue.clone(),
        );
        (backends, handles)
    }
}

/// Concrete views of the backends created by [`Backends::in_memory`].
#[derive(Clone)]
pub struct MemoryHandles {
    pub source: Arc<MemorySource>,
    pub snapshots: Arc<MemorySnapshotStore>,
    pub audit: Arc<MemoryAuditLog>,
    pub queue: Arc<MemoryQueue>,
}
