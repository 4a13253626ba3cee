//! Core types for the snapshot-sync pipeline.
//!
//! This crate provides the foundational pieces shared by every other crate
//! in the workspace:
//!
//! - [`SourceRecord`], [`Snapshot`], [`SyncIntent`] and [`AuditEntry`] - the data model
//! - [`detect_changes`] and [`reconcile`] - the source/target comparison
//! - [`RetryPolicy`] - bounded exponential backoff for failed intents
//! - [`ApplyError`] - the transient/validation error taxonomy
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── snapshot-store   (persists Snapshot / AuditEntry, reads SourceRecord)
//!    ├─── sync-queue       (carries SyncIntent between producer and consumer)
//!    └─── sync-pipeline    (poller, consumer, reconciler)
//! ```
//!
//! Nothing in this crate performs I/O; the diff and the backoff schedule are
//! plain functions so they can be tested exhaustively.

pub mod diff;
pub mod error;
pub mod model;
pub mod retry;

pub use diff::{
    detect_changes, documents_match, reconcile, DetectionMode, DriftIssue, DriftReport, OutOfSync,
};
pub use error::ApplyError;
pub use model::{
    AuditEntry, AuditMetadata, AuditStatus, Operation, ParseEnumError, Snapshot, SourceRecord,
    StatusCounts, StoredAuditEntry, SyncIntent, SyncStatus,
};
pub use retry::{RetryDecision, RetryPolicy};
