//! Storage for snapshot-sync
//!
//! Provides the three storage seams the pipeline is written against:
//!
//! - [`SourceReader`] - read-only access to the system-of-record table
//! - [`SnapshotStore`] - the document-shaped target table
//! - [`AuditLog`] - append-only record of every apply attempt
//!
//! ## Backends
//!
//! - `Memory*` - process-local maps, used by tests and for dry runs
//! - `Postgres*` - tables in a PostgreSQL database, created by
//!   [`PostgresStorage::ensure_schema`]
//!
//! Every mutation a backend exposes is atomic on its own (a single
//! statement with a conflict clause for PostgreSQL), so several consumer
//! processes can apply intents against the same tables without
//! application-level locking.

mod error;
mod memory;
pub mod postgresql;
pub mod store;

pub use error::StoreError;
pub use memory::{MemoryAuditLog, MemorySnapshotStore, MemorySource};
pub use postgresql::{
    PostgresAuditLog, PostgresSnapshotStore, PostgresSource, PostgresStorage, StorageTables,
};
pub use store::{AuditLog, AuditQuery, SnapshotStore, SourceReader};
