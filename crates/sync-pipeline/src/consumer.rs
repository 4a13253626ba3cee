//! Queue consumer.
//!
//! Every delivery goes through [`Consumer::handle`]:
//!
//! 1. apply the intent to the snapshot store,
//! 2. append exactly one audit entry for the attempt,
//! 3. on failure, either enqueue a fresh message with `retryCount + 1` and
//!    a backoff delay, or give up, mark the snapshot `failed` and write a
//!    terminal entry,
//! 4. ack the delivery.
//!
//! If steps 2-4 themselves fail (the audit log or the queue is
//! unreachable) the delivery is left unacked and comes back once its lease
//! expires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sync_core::{ApplyError, AuditEntry, Operation, RetryDecision, RetryPolicy, SyncIntent};
use sync_queue::{Delivery, QueueDepth};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::backends::Backends;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Maximum deliveries leased per batch
    pub batch_size: usize,
    /// Pause after an empty batch
    pub idle_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            idle_interval: Duration::from_secs(1),
        }
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// A follow-up attempt was enqueued
    Retried { delay: Duration },
    /// Retries exhausted or the error is permanent
    Failed,
}

/// Tally of one or more batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub received: usize,
    pub applied: usize,
    pub retried: usize,
    pub failed: usize,
    /// Deliveries left unacked because the audit log or queue failed
    pub errors: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: &Result<ApplyOutcome>) {
        match outcome {
            Ok(ApplyOutcome::Applied) => self.applied += 1,
            Ok(ApplyOutcome::Retried { .. }) => self.retried += 1,
            Ok(ApplyOutcome::Failed) => self.failed += 1,
            Err(_) => self.errors += 1,
        }
    }

    fn merge(&mut self, other: BatchReport) {
        self.received += other.received;
        self.applied += other.applied;
        self.retried += other.retried;
        self.failed += other.failed;
        self.errors += other.errors;
    }
}

pub struct Consumer {
    backends: Backends,
    policy: RetryPolicy,
    config: ConsumerConfig,
}

impl Consumer {
    pub fn new(backends: Backends, policy: RetryPolicy, config: ConsumerConfig) -> Self {
        Self {
            backends,
            policy,
            config,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Write the intent to the snapshot store.
    pub async fn apply(&self, intent: &SyncIntent) -> Result<(), ApplyError> {
        let snapshots = &self.backends.snapshots;
        match intent.operation {
            Operation::Insert | Operation::Update => {
                let document = validate_payload(intent)?;
                snapshots
                    .upsert(intent.record_id, document, Utc::now())
                    .await?;
            }
            Operation::Delete => {
                if snapshots
                    .mark_deleted(intent.record_id, Utc::now())
                    .await?
                    .is_none()
                {
                    debug!("No snapshot to delete");
                }
            }
        }
        Ok(())
    }

    /// Apply, audit, reschedule and ack one delivery.
    pub async fn handle(&self, delivery: &Delivery) -> Result<ApplyOutcome> {
        let intent = &delivery.intent;
        let span = info_span!(
            "apply",
            record_id = intent.record_id,
            operation = %intent.operation,
            retry_count = intent.retry_count
        );

        async {
            let started = Instant::now();
            let result = self.apply(intent).await;
            let elapsed = started.elapsed();
            let queue = &self.backends.queue;
            let audit = &self.backends.audit;

            let outcome = match result {
                Ok(()) => {
                    audit.append(&AuditEntry::success(intent, elapsed)).await?;
                    debug!("Applied in {elapsed:?}");
                    ApplyOutcome::Applied
                }
                Err(err) => match self.policy.decide(intent.retry_count, &err) {
                    RetryDecision::Retry { delay } => {
                        audit
                            .append(&AuditEntry::retry(intent, &err, delay, elapsed))
                            .await?;
                        queue.send(&intent.next_attempt(), Some(delay)).await?;
                        warn!("Apply failed, retrying in {delay:?}: {err}");
                        ApplyOutcome::Retried { delay }
                    }
                    RetryDecision::GiveUp => {
                        self.backends.snapshots.mark_failed(intent.record_id).await?;
                        audit.append(&AuditEntry::failed(intent, &err, elapsed)).await?;
                        error!("Apply failed permanently: {err}");
                        ApplyOutcome::Failed
                    }
                },
            };

            queue.ack(delivery).await?;
            Ok::<_, anyhow::Error>(outcome)
        }
        .instrument(span)
        .await
    }

    /// Lease one batch and handle every delivery in it.
    ///
    /// A delivery that cannot be handled does not affect the others.
    pub async fn process_batch(&self) -> Result<BatchReport> {
        let deliveries = self
            .backends
            .queue
            .receive_batch(self.config.batch_size)
            .await?;

        let mut report = BatchReport {
            received: deliveries.len(),
            ..Default::default()
        };
        for delivery in &deliveries {
            let outcome = self.handle(delivery).await;
            if let Err(e) = &outcome {
                error!(
                    "Left message {} for record {} unacked: {e:#}",
                    delivery.id, delivery.intent.record_id
                );
            }
            report.record(&outcome);
        }

        if report.received > 0 {
            debug!("Processed batch: {report:?}");
        }
        Ok(report)
    }

    /// Process batches until cancelled, pausing when the queue is idle.
    pub async fn run(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let pause = match self.process_batch().await {
                Ok(report) if report.received > 0 => continue,
                Ok(_) => self.config.idle_interval,
                Err(e) => {
                    warn!("Failed to receive from queue: {e:#}");
                    self.config.idle_interval
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Start `n` independent consumer loops sharing the same queue.
    pub fn spawn_workers(
        self: &Arc<Self>,
        n: usize,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        (0..n.max(1))
            .map(|worker| {
                let consumer = Arc::clone(self);
                let cancel = cancel.clone();
                tokio::spawn(
                    async move {
                        info!("Consumer worker started");
                        consumer.run(cancel).await;
                        info!("Consumer worker stopped");
                    }
                    .instrument(info_span!("consumer", worker)),
                )
            })
            .collect()
    }

    /// Process batches until the queue holds no messages at all.
    ///
    /// Delayed retries are waited for, so this returns only once every
    /// intent has been applied or has failed permanently.
    pub async fn drain(&self) -> Result<BatchReport> {
        let mut total = BatchReport::default();
        loop {
            let report = self.process_batch().await?;
            total.merge(report);
            if report.received > 0 {
                continue;
            }

            let depth: QueueDepth = self.backends.queue.depth().await?;
            if depth.is_empty() {
                break;
            }
            debug!("Waiting for {} delayed or leased messages", depth.total);
            tokio::time::sleep(self.config.idle_interval).await;
        }
        info!(
            "Drained queue: {} applied, {} retried, {} failed",
            total.applied, total.retried, total.failed
        );
        Ok(total)
    }
}

/// The payload must be an object whose `id` is the intent's record id.
fn validate_payload(intent: &SyncIntent) -> Result<&Value, ApplyError> {
    let invalid = |reason: &str| ApplyError::validation(intent.record_id, reason);

    let document = intent
        .payload
        .as_ref()
        .ok_or_else(|| invalid("payload is missing"))?;
    let object = document
        .as_object()
        .ok_or_else(|| invalid("payload is not an object"))?;

    match object.get("id").and_then(Value::as_i64) {
        Some(id) if id == intent.record_id => Ok(document),
        Some(id) => Err(invalid(&format!("payload id {id} does not match"))),
        None => Err(invalid("payload has no integer 'id'")),
    }
}
