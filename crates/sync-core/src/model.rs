//! Data model shared by the poller, the consumer and the stores.
//!
//! The wire format of [`SyncIntent`] is fixed: it is what travels on the
//! queue, so field names are serialized in camelCase and the payload is
//! carried under `data`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ApplyError;

/// Error returned when a stored enum label cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// A row of the system of record.
///
/// The core only ever reads these; upstream application code owns them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    /// Stable identity of the row
    pub id: i64,
    /// Every column other than the identity and the timestamps
    pub fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SourceRecord {
    pub fn new(id: i64, fields: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id,
            fields,
            created_at: now,
            updated_at: now,
        }
    }

    /// Canonical document for this row.
    ///
    /// This is the value written to the snapshot and the value compared
    /// against it on every poll, so it must be a pure function of the row.
    /// Timestamps are rendered with fixed microsecond precision.
    pub fn to_document(&self) -> Value {
        let mut doc = self.fields.clone();
        doc.insert("id".to_string(), Value::from(self.id));
        doc.insert(
            "created_at".to_string(),
            Value::String(format_timestamp(&self.created_at)),
        );
        doc.insert(
            "updated_at".to_string(),
            Value::String(format_timestamp(&self.updated_at)),
        );
        Value::Object(doc)
    }
}

/// RFC 3339 with microseconds and a `Z` suffix.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Lifecycle of a snapshot row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
    Deleted,
}

impl SyncStatus {
    pub const ALL: [SyncStatus; 4] = [
        SyncStatus::Pending,
        SyncStatus::Synced,
        SyncStatus::Failed,
        SyncStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
            SyncStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "failed" => Ok(SyncStatus::Failed),
            "deleted" => Ok(SyncStatus::Deleted),
            other => Err(ParseEnumError::new("sync status", other)),
        }
    }
}

/// Target-side materialization of one source row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub source_id: i64,
    /// `None` once the source row has been deleted (soft delete)
    pub document: Option<Value>,
    pub sync_status: SyncStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Kind of change an intent carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(Operation::Insert),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            other => Err(ParseEnumError::new("operation", other)),
        }
    }
}

/// A unit of work travelling from the poller to the consumer.
///
/// Serialized as `{recordId, operation, data, retryCount, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncIntent {
    pub record_id: i64,
    pub operation: Operation,
    /// Full source document at detection time, `None` for deletes
    #[serde(rename = "data")]
    pub payload: Option<Value>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(rename = "timestamp")]
    pub detected_at: DateTime<Utc>,
}

impl SyncIntent {
    pub fn insert(record: &SourceRecord) -> Self {
        Self::with_payload(record.id, Operation::Insert, record.to_document())
    }

    pub fn update(record: &SourceRecord) -> Self {
        Self::with_payload(record.id, Operation::Update, record.to_document())
    }

    pub fn delete(record_id: i64) -> Self {
        Self {
            record_id,
            operation: Operation::Delete,
            payload: None,
            retry_count: 0,
            detected_at: Utc::now(),
        }
    }

    fn with_payload(record_id: i64, operation: Operation, payload: Value) -> Self {
        Self {
            record_id,
            operation,
            payload: Some(payload),
            retry_count: 0,
            detected_at: Utc::now(),
        }
    }

    /// The same intent, scheduled as its next attempt.
    ///
    /// `detected_at` is preserved so the audit trail still points at the
    /// poll cycle that produced the original intent.
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }
}

/// Outcome recorded for one apply attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failed,
    Retry,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failed => "failed",
            AuditStatus::Retry => "retry",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AuditStatus::Success),
            "failed" => Ok(AuditStatus::Failed),
            "retry" => Ok(AuditStatus::Retry),
            other => Err(ParseEnumError::new("audit status", other)),
        }
    }
}

/// Retry bookkeeping attached to every audit entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditMetadata {
    /// Retry count of the attempt this entry describes
    pub retry_count: u32,
    /// Wall time spent applying the intent
    pub duration_ms: u64,
    /// Visibility delay of the follow-up attempt, for `retry` entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_secs: Option<u64>,
    /// Set on the terminal entry of an intent that will not be retried
    #[serde(rename = "final", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

/// Immutable record of one apply attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub record_id: i64,
    pub operation: Operation,
    pub status: AuditStatus,
    /// Present iff `status` is not `success`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    pub metadata: AuditMetadata,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn success(intent: &SyncIntent, elapsed: Duration) -> Self {
        Self::new(intent, AuditStatus::Success, None, metadata(intent, elapsed))
    }

    /// Entry for a failed attempt that has been rescheduled after `delay`.
    pub fn retry(
        intent: &SyncIntent,
        error: &ApplyError,
        delay: Duration,
        elapsed: Duration,
    ) -> Self {
        let metadata = AuditMetadata {
            delay_secs: Some(delay.as_secs()),
            error_kind: Some(error.kind().to_string()),
            ..metadata(intent, elapsed)
        };
        Self::new(
            intent,
            AuditStatus::Retry,
            Some(format!("{error}")),
            metadata,
        )
    }

    /// Terminal entry: the intent is dropped and will not be retried.
    pub fn failed(intent: &SyncIntent, error: &ApplyError, elapsed: Duration) -> Self {
        let metadata = AuditMetadata {
            is_final: true,
            error_kind: Some(error.kind().to_string()),
            ..metadata(intent, elapsed)
        };
        Self::new(
            intent,
            AuditStatus::Failed,
            Some(format!("{error}")),
            metadata,
        )
    }

    fn new(
        intent: &SyncIntent,
        status: AuditStatus,
        error_details: Option<String>,
        metadata: AuditMetadata,
    ) -> Self {
        Self {
            record_id: intent.record_id,
            operation: intent.operation,
            status,
            error_details,
            metadata,
            timestamp: Utc::now(),
        }
    }
}

fn metadata(intent: &SyncIntent, elapsed: Duration) -> AuditMetadata {
    AuditMetadata {
        retry_count: intent.retry_count,
        duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        ..Default::default()
    }
}

/// An audit entry as read back from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAuditEntry {
    pub id: i64,
    #[serde(flatten)]
    pub entry: AuditEntry,
}

/// Number of snapshots per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub synced: u64,
    pub failed: u64,
    pub deleted: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: SyncStatus, n: u64) {
        match status {
            SyncStatus::Pending => self.pending += n,
            SyncStatus::Synced => self.synced += n,
            SyncStatus::Failed => self.failed += n,
            SyncStatus::Deleted => self.deleted += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.synced + self.failed + self.deleted
    }
}
