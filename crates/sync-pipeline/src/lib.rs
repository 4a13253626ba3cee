//! The snapshot sync pipeline
//!
//! - [`Poller`] diffs the source table against the snapshots on a timer
//!   and enqueues one intent per difference.
//! - [`Consumer`] drains the queue, applies intents to the snapshot store,
//!   audits every attempt and reschedules failures with backoff.
//! - [`Reconciler`] reports drift on demand without changing anything.
//! - [`SyncService`] bundles the operator-facing operations used by the
//!   CLI and the HTTP API.

mod backends;
mod consumer;
mod poller;
mod reconciler;
mod service;

pub use backends::{Backends, MemoryHandles};
pub use consumer::{ApplyOutcome, BatchReport, Consumer, ConsumerConfig};
pub use poller::{CycleReport, PollOutcome, Poller};
pub use reconciler::Reconciler;
pub use service::{StatusSummary, SyncService};
