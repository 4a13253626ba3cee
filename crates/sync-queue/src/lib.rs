//! Work queue between the poller and the consumer
//!
//! Messages carry a [`sync_core::SyncIntent`] serialized as JSON. Delivery
//! is at-least-once: a received message is leased, and a lease that is
//! neither acked nor retried expires so the message is delivered again.
//!
//! Two backends are provided:
//!
//! - [`MemoryQueue`] for tests and single-process runs
//! - [`PostgresQueue`], a table that several consumers can lease from
//!   concurrently with `FOR UPDATE SKIP LOCKED`

mod error;
mod memory;
mod postgresql;
mod queue;

pub use error::{QueueError, Result};
pub use memory::MemoryQueue;
pub use postgresql::PostgresQueue;
pub use queue::{Delivery, QueueDepth, SyncQueue};
