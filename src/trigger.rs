//! Event-count flush policy.

use crate::buffer::AggregationBuffer;
use crate::counter_map::CounterDelta;
use crate::error::{TallyError, TallyResult};
use crate::flush_worker::{FlushReason, FlushWorker};
use crate::metrics::Metrics;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Wraps a buffer and requests a flush after every `threshold` events.
///
/// The flush itself runs on the [`FlushWorker`]; `record` only applies the
/// increment and bumps a counter, so callers never wait for store writes.
pub struct FlushTrigger {
    buffer: Arc<dyn AggregationBuffer>,
    worker: Arc<FlushWorker>,
    metrics: Arc<Metrics>,
    threshold: NonZeroU64,
    events: AtomicU64,
}

impl FlushTrigger {
    /// Fails with [`TallyError::InvalidConfig`] for a zero threshold.
    pub fn new(
        buffer: Arc<dyn AggregationBuffer>,
        worker: Arc<FlushWorker>,
        metrics: Arc<Metrics>,
        threshold: u64,
    ) -> TallyResult<Self> {
        let threshold = NonZeroU64::new(threshold).ok_or_else(|| {
            TallyError::InvalidConfig("flush threshold must be a positive integer".to_string())
        })?;

        Ok(Self {
            buffer,
            worker,
            metrics,
            threshold,
            events: AtomicU64::new(0),
        })
    }

    pub fn threshold(&self) -> u64 {
        self.threshold.get()
    }

    /// Events counted so far.
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Acquire)
    }

    pub fn worker(&self) -> &Arc<FlushWorker> {
        &self.worker
    }

    /// Apply one event. Returns its 1-based sequence number.
    pub async fn record(&self, delta: CounterDelta) -> u64 {
        self.buffer.increment(&delta.key, delta.delta).await;
        self.count_event()
    }

    /// Apply every delta of one record (e.g. all tags of a post), counted as
    /// a single event.
    pub async fn record_many<I>(&self, deltas: I) -> u64
    where
        I: IntoIterator<Item = CounterDelta> + Send,
        I::IntoIter: Send,
    {
        for delta in deltas {
            self.buffer.increment(&delta.key, delta.delta).await;
        }
        self.count_event()
    }

    fn count_event(&self) -> u64 {
        // Counted after the increment landed, so the flush requested for
        // event N captures at least events 1..=N.
        let seq = self.events.fetch_add(1, Ordering::AcqRel) + 1;
        if seq % self.threshold.get() == 0 {
            self.trigger(seq);
        }
        seq
    }

    fn trigger(&self, events: u64) {
        match self.worker.submit(FlushReason::Threshold { events }) {
            Ok(()) => debug!(events, "Flush requested"),
            Err(TallyError::FlushQueueFull) => {
                self.metrics.buffer.record_trigger_dropped();
                warn!(events, "Flush queue full, deltas stay buffered until the next flush");
            }
            Err(e) => warn!(events, error = %e, "Could not request flush"),
        }
    }
}
