use anyhow::Result;
use sync_core::{reconcile, DriftIssue, DriftReport};
use tracing::info;

use crate::backends::Backends;

/// Read-only drift check between the source table and the snapshots.
///
/// Uses the same document comparison as the poller, so a clean report
/// means the next full poll cycle would enqueue nothing.
pub struct Reconciler {
    backends: Backends,
}

impl Reconciler {
    pub fn new(backends: Backends) -> Self {
        Self { backends }
    }

    pub async fn run(&self) -> Result<DriftReport> {
        let sources = self.backends.source.fetch_all().await?;
        let snapshots = self.backends.snapshots.list().await?;
        let report = reconcile(&sources, &snapshots);

        info!(
            "Reconciled {} source rows against {} snapshots: {} missing, {} mismatched, {} orphaned",
            report.total_source,
            report.total_snapshots,
            report.count(DriftIssue::MissingInTarget),
            report.count(DriftIssue::DataMismatch),
            report.count(DriftIssue::OrphanedInTarget),
        );
        Ok(report)
    }
}
