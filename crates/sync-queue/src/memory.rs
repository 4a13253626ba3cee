use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use sync_core::SyncIntent;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::error;

use crate::error::{QueueError, Result};
use crate::queue::{Delivery, QueueDepth, SyncQueue};

struct StoredMessage {
    body: String,
    visible_at: Instant,
    attempts: u32,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    messages: BTreeMap<i64, StoredMessage>,
}

/// Process-local queue.
///
/// Bodies are kept in their JSON wire form so that everything sent through
/// this queue has gone through the same codec as the PostgreSQL backend.
/// Visibility uses `tokio::time`, so paused-clock tests can step through
/// retry delays and lease expiry.
pub struct MemoryQueue {
    visibility_timeout: Duration,
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            visibility_timeout,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Every queued intent regardless of visibility, oldest first.
    pub async fn snapshot(&self) -> Result<Vec<SyncIntent>> {
        let inner = self.inner.lock().await;
        inner
            .messages
            .iter()
            .map(|(id, message)| decode(*id, &message.body))
            .collect()
    }

    fn push(inner: &mut Inner, body: String, visible_at: Instant) -> i64 {
        inner.next_id += 1;
        let id = inner.next_id;
        inner.messages.insert(
            id,
            StoredMessage {
                body,
                visible_at,
                attempts: 0,
            },
        );
        id
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

fn encode(intent: &SyncIntent) -> Result<String> {
    serde_json::to_string(intent).map_err(QueueError::Encode)
}

fn decode(id: i64, body: &str) -> Result<SyncIntent> {
    serde_json::from_str(body).map_err(|source| QueueError::Decode { id, source })
}

#[async_trait]
impl SyncQueue for MemoryQueue {
    async fn send(&self, intent: &SyncIntent, delay: Option<Duration>) -> Result<i64> {
        let body = encode(intent)?;
        let visible_at = Instant::now() + delay.unwrap_or_default();
        let mut inner = self.inner.lock().await;
        Ok(Self::push(&mut inner, body, visible_at))
    }

    async fn send_batch(&self, intents: &[SyncIntent]) -> Result<usize> {
        let bodies = intents.iter().map(encode).collect::<Result<Vec<_>>>()?;
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        for body in bodies {
            Self::push(&mut inner, body, now);
        }
        Ok(intents.len())
    }

    async fn receive_batch(&self, max: usize) -> Result<Vec<Delivery>> {
        let now = Instant::now();
        let lease_until = now + self.visibility_timeout;
        let mut inner = self.inner.lock().await;

        let ready: Vec<i64> = inner
            .messages
            .iter()
            .filter(|(_, message)| message.visible_at <= now)
            .map(|(id, _)| *id)
            .take(max)
            .collect();

        let mut deliveries = Vec::with_capacity(ready.len());
        for id in ready {
            let Some(message) = inner.messages.get_mut(&id) else {
                continue;
            };
            match decode(id, &message.body) {
                Ok(intent) => {
                    message.visible_at = lease_until;
                    message.attempts += 1;
                    deliveries.push(Delivery {
                        id,
                        intent,
                        attempts: message.attempts,
                    });
                }
                Err(e) => {
                    error!("Dropping message: {e}");
                    inner.messages.remove(&id);
                }
            }
        }
        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.inner.lock().await.messages.remove(&delivery.id);
        Ok(())
    }

    async fn retry(&self, delivery: &Delivery, delay: Duration) -> Result<()> {
        if let Some(message) = self.inner.lock().await.messages.get_mut(&delivery.id) {
            message.visible_at = Instant::now() + delay;
        }
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth> {
        let now = Instant::now();
        let inner = self.inner.lock().await;
        let ready = inner
            .messages
            .values()
            .filter(|message| message.visible_at <= now)
            .count();
        Ok(QueueDepth {
            ready: ready as u64,
            total: inner.messages.len() as u64,
        })
    }
}
