//! Timer-driven change detection.
//!
//! Each cycle reads both tables in full, classifies the differences and
//! enqueues one intent per difference. The poller never writes to the
//! snapshot store or the audit log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sync_core::{detect_changes, DetectionMode, Operation, SyncIntent};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backends::Backends;

/// Summary of one completed poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub mode: DetectionMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl CycleReport {
    pub fn enqueued(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome {
    Completed(CycleReport),
    /// Another cycle was already running
    Skipped,
}

#[derive(Default)]
struct PollerState {
    bootstrapped: bool,
    last_cycle: Option<CycleReport>,
}

/// Clears the in-flight flag when dropped, including when the cycle's
/// future is cancelled mid-await.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Poller {
    backends: Backends,
    interval: Duration,
    state: Mutex<PollerState>,
    in_flight: AtomicBool,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(backends: Backends, interval: Duration) -> Self {
        Self {
            backends,
            interval,
            state: Mutex::new(PollerState::default()),
            in_flight: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Start in full detection mode, as if a cycle had already completed.
    ///
    /// For one-shot runs, where every invocation is a fresh process.
    pub fn skip_bootstrap(self) -> Self {
        Self {
            state: Mutex::new(PollerState {
                bootstrapped: true,
                ..Default::default()
            }),
            ..self
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a cycle has completed since the poller was created.
    pub async fn is_bootstrapped(&self) -> bool {
        self.state.lock().await.bootstrapped
    }

    pub async fn last_cycle(&self) -> Option<CycleReport> {
        self.state.lock().await.last_cycle.clone()
    }

    /// Run the timer loop until [`Poller::stop`] is called.
    ///
    /// A failed cycle is logged and the next one runs after the usual
    /// interval.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let poller = Arc::clone(self);
        tokio::spawn(async move {
            info!("Poller started, interval {:?}", poller.interval);
            loop {
                if let Err(e) = poller.poll_once().await {
                    warn!("Poll cycle failed, retrying in {:?}: {e:#}", poller.interval);
                }
                tokio::select! {
                    _ = poller.cancel.cancelled() => break,
                    _ = tokio::time::sleep(poller.interval) => {}
                }
            }
            info!("Poller stopped");
        })
    }

    /// Stop the timer loop after the current cycle.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run one cycle now, unless one is already running.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Poll cycle already in flight, skipping");
            return Ok(PollOutcome::Skipped);
        }
        let _in_flight = InFlight(&self.in_flight);

        let mode = if self.state.lock().await.bootstrapped {
            DetectionMode::Full
        } else {
            DetectionMode::Bootstrap
        };

        let report = self.run_cycle(mode).await?;

        let mut state = self.state.lock().await;
        state.bootstrapped = true;
        state.last_cycle = Some(report.clone());
        Ok(PollOutcome::Completed(report))
    }

    async fn run_cycle(&self, mode: DetectionMode) -> Result<CycleReport> {
        let started_at = Utc::now();
        let sources = self.backends.source.fetch_all().await?;
        let snapshots = self.backends.snapshots.list().await?;

        let intents = detect_changes(&sources, &snapshots, mode);
        self.backends.queue.send_batch(&intents).await?;

        let report = CycleReport {
            mode,
            started_at,
            finished_at: Utc::now(),
            inserts: count(&intents, Operation::Insert),
            updates: count(&intents, Operation::Update),
            deletes: count(&intents, Operation::Delete),
        };

        if report.enqueued() > 0 {
            info!(
                "Poll cycle ({mode:?}) enqueued {} inserts, {} updates, {} deletes",
                report.inserts, report.updates, report.deletes
            );
        } else {
            debug!(
                "Poll cycle ({mode:?}) found no changes across {} source rows",
                sources.len()
            );
        }
        Ok(report)
    }
}

fn count(intents: &[SyncIntent], operation: Operation) -> usize {
    intents.iter().filter(|i| i.operation == operation).count()
}
