use crate::types::BatchStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One incremental progress update from a benchmark run.
///
/// Emitted by the orchestrator as batches change state and settle. The web
/// layer relays these to live clients; the core only guarantees that counts
/// are monotonic and that `batch_statuses` is a consistent snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Tests covered by settled batches so far.
    pub completed: usize,
    /// Total tests in the run.
    pub total: usize,
    pub message: String,
    /// Batch this event concerns, 0 for run-level events.
    pub batch_num: u32,
    pub num_batches: u32,
    pub failed: u32,
    pub batch_statuses: BTreeMap<u32, BatchStatus>,
}

/// Sink for progress events.
///
/// Implementations must be cheap and non-blocking; events are forwarded by
/// a single consumer task, so a slow sink delays reporting but never the
/// batch workers themselves.
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Sink that drops every event.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn on_event(&self, _event: ProgressEvent) {}
}
