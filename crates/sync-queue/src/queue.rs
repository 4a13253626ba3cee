use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sync_core::SyncIntent;

use crate::error::Result;

/// A leased message.
///
/// Until it is acked or retried, the message stays invisible to other
/// receivers for the queue's visibility timeout; after that it is
/// delivered again.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: i64,
    pub intent: SyncIntent,
    /// Number of times this message has been received, including this one
    pub attempts: u32,
}

/// Message counts at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    /// Visible now
    pub ready: u64,
    /// Visible now, delayed or leased
    pub total: u64,
}

impl QueueDepth {
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// At-least-once queue of sync intents.
#[async_trait]
pub trait SyncQueue: Send + Sync {
    /// Enqueue one intent, invisible until `delay` has elapsed.
    async fn send(&self, intent: &SyncIntent, delay: Option<Duration>) -> Result<i64>;

    /// Enqueue several intents at once, immediately visible.
    async fn send_batch(&self, intents: &[SyncIntent]) -> Result<usize>;

    /// Lease up to `max` visible messages, oldest first.
    ///
    /// Returns an empty batch rather than waiting when nothing is visible.
    async fn receive_batch(&self, max: usize) -> Result<Vec<Delivery>>;

    /// Remove a delivered message for good.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Release a delivered message so it is delivered again after `delay`.
    async fn retry(&self, delivery: &Delivery, delay: Duration) -> Result<()>;

    async fn depth(&self) -> Result<QueueDepth>;
}
