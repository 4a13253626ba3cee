//! Source/target comparison.
//!
//! Both the poller and the reconciler call into this module so that "in
//! sync" means exactly the same thing in both places.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Snapshot, SourceRecord, SyncIntent, SyncStatus};

/// How much of the diff a poll cycle runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// First cycle after start: only rows without any snapshot are queued.
    Bootstrap,
    /// Inserts, updates and deletes.
    Full,
}

/// Deep structural equality between a stored document and a source document.
///
/// Object key order never matters. Numbers compare by value, so `1` and
/// `1.0` are equal even if a storage round trip changed their representation.
pub fn documents_match(stored: Option<&Value>, current: &Value) -> bool {
    stored.is_some_and(|stored| values_equal(stored, current))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => match (x.as_u64(), y.as_u64()) {
                (Some(x), Some(y)) => x == y,
                _ => x.as_f64() == y.as_f64(),
            },
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(key, x)| y.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Compute the intents that converge the snapshots toward the source rows.
///
/// Inserts and updates are emitted in id order, followed by deletes.
pub fn detect_changes(
    sources: &[SourceRecord],
    snapshots: &[Snapshot],
    mode: DetectionMode,
) -> Vec<SyncIntent> {
    let source_by_id: BTreeMap<i64, &SourceRecord> = sources.iter().map(|r| (r.id, r)).collect();
    let snapshot_by_id: BTreeMap<i64, &Snapshot> =
        snapshots.iter().map(|s| (s.source_id, s)).collect();

    let mut intents = Vec::new();

    for (id, record) in &source_by_id {
        match snapshot_by_id.get(id) {
            None => intents.push(SyncIntent::insert(record)),
            Some(snapshot) if mode == DetectionMode::Full => {
                if !documents_match(snapshot.document.as_ref(), &record.to_document()) {
                    intents.push(SyncIntent::update(record));
                }
            }
            Some(_) => {}
        }
    }

    if mode == DetectionMode::Full {
        for (id, snapshot) in &snapshot_by_id {
            if !source_by_id.contains_key(id) && snapshot.sync_status != SyncStatus::Deleted {
                intents.push(SyncIntent::delete(*id));
            }
        }
    }

    intents
}

/// Kind of drift found by [`reconcile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftIssue {
    MissingInTarget,
    DataMismatch,
    OrphanedInTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutOfSync {
    pub id: i64,
    pub issue: DriftIssue,
}

/// Read-only comparison of the whole source and snapshot sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub total_source: usize,
    pub total_snapshots: usize,
    pub out_of_sync: Vec<OutOfSync>,
}

impl DriftReport {
    pub fn is_in_sync(&self) -> bool {
        self.out_of_sync.is_empty()
    }

    pub fn count(&self, issue: DriftIssue) -> usize {
        self.out_of_sync.iter().filter(|o| o.issue == issue).count()
    }
}

/// Classify every divergence between the two sets, sorted by id.
///
/// Soft-deleted snapshots whose source row is gone are consistent and are
/// not reported.
pub fn reconcile(sources: &[SourceRecord], snapshots: &[Snapshot]) -> DriftReport {
    let source_by_id: BTreeMap<i64, &SourceRecord> = sources.iter().map(|r| (r.id, r)).collect();
    let snapshot_by_id: BTreeMap<i64, &Snapshot> =
        snapshots.iter().map(|s| (s.source_id, s)).collect();

    let mut out_of_sync = Vec::new();

    for (id, record) in &source_by_id {
        let issue = match snapshot_by_id.get(id) {
            None => Some(DriftIssue::MissingInTarget),
            Some(snapshot)
                if !documents_match(snapshot.document.as_ref(), &record.to_document()) =>
            {
                Some(DriftIssue::DataMismatch)
            }
            Some(_) => None,
        };
        if let Some(issue) = issue {
            out_of_sync.push(OutOfSync { id: *id, issue });
        }
    }

    for (id, snapshot) in &snapshot_by_id {
        if !source_by_id.contains_key(id) && snapshot.sync_status != SyncStatus::Deleted {
            out_of_sync.push(OutOfSync {
                id: *id,
                issue: DriftIssue::OrphanedInTarget,
            });
        }
    }

    out_of_sync.sort_by_key(|o| o.id);

    DriftReport {
        total_source: sources.len(),
        total_snapshots: snapshots.len(),
        out_of_sync,
    }
}
