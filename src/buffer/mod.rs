//! Counter aggregation buffers.
//!
//! All variants accept increments from many concurrent callers and export the
//! accumulated deltas to a [`CounterStore`] on `flush()`. They differ in how
//! long ingestion is blocked while a flush runs:
//!
//! - [`NaiveBuffer`] holds its lock across every store call.
//! - [`DeepCopyBuffer`] holds its lock only while copying the map.
//! - [`SwapBuffer`] holds its lock only for a pointer swap, and serializes
//!   flush generations with a single-permit completion token.
//!
//! Every increment applied before a `flush()` call is exported by that flush
//! or an earlier one, and no increment is exported twice.

mod deep_copy;
mod naive;
mod swap;

pub use deep_copy::DeepCopyBuffer;
pub use naive::NaiveBuffer;
pub use swap::SwapBuffer;

use crate::config::BufferConfig;
use crate::counter_map::CounterMap;
use crate::error::StoreError;
use crate::metrics::Metrics;
use crate::store::CounterStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strum::{Display, EnumString};
use tracing::{info, warn};

/// Which buffer strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum BufferKind {
    Naive,
    DeepCopy,
    #[default]
    Swap,
}

/// Order in which [`SwapBuffer::flush`] takes its two primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum FlushOrdering {
    /// Wait for the completion token, then lock. Increments never wait on a
    /// flush that is queued behind another flush.
    #[default]
    TokenFirst,
    /// Lock, then wait for the completion token. A queued flush holds the lock
    /// while it waits, so increments stall until the previous export ends.
    LockFirst,
}

/// Store write that failed during a flush. The delta is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedWrite {
    pub key: String,
    pub delta: i64,
    pub error: StoreError,
}

/// Outcome of one flush generation.
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    /// Per-buffer sequence number of this flush, starting at 1
    pub generation: u64,
    /// Keys captured in the generation, including zero-valued ones
    pub keys: usize,
    /// Keys successfully written
    pub written: usize,
    /// Keys skipped because their net delta was zero
    pub skipped_zero: usize,
    pub failures: Vec<FailedWrite>,
    pub elapsed: Duration,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Shared interface of the aggregation buffers.
#[async_trait]
pub trait AggregationBuffer: Send + Sync {
    fn kind(&self) -> BufferKind;

    /// Add `delta` to `key` in the live generation.
    async fn increment(&self, key: &str, delta: i64);

    /// Capture the live generation and write it to the store.
    async fn flush(&self) -> FlushReport;

    /// Accumulated, not yet captured, delta for `key`.
    async fn get(&self, key: &str) -> i64;

    /// Number of keys in the live generation.
    async fn pending_keys(&self) -> usize;
}

/// Build the buffer selected by configuration.
pub fn build_buffer(
    config: &BufferConfig,
    store: Arc<dyn CounterStore>,
    metrics: Arc<Metrics>,
) -> Arc<dyn AggregationBuffer> {
    match config.kind {
        BufferKind::Naive => Arc::new(NaiveBuffer::new(store, metrics)),
        BufferKind::DeepCopy => Arc::new(DeepCopyBuffer::new(store, metrics)),
        BufferKind::Swap => Arc::new(SwapBuffer::with_ordering(
            store,
            metrics,
            config.flush_ordering,
        )),
    }
}

/// Write every non-zero entry of `generation` to the store.
///
/// A failing key is logged and skipped; the loop always runs to the end.
pub(crate) async fn export_generation(
    store: &dyn CounterStore,
    metrics: &Metrics,
    generation_id: u64,
    generation: &CounterMap,
) -> FlushReport {
    let start = Instant::now();
    let mut report = FlushReport {
        generation: generation_id,
        keys: generation.len(),
        ..Default::default()
    };

    metrics
        .buffer
        .record_flush_started(generation_id, generation.len());
    info!(
        generation = generation_id,
        keys = generation.len(),
        "flushing {} keys",
        generation.len()
    );

    for (key, delta) in generation.non_zero() {
        metrics.store.record_request(key);
        let call_start = Instant::now();
        match store.increment_counter(key, delta).await {
            Ok(()) => {
                metrics.store.record_success(key, call_start.elapsed());
                report.written += 1;
            }
            Err(error) => {
                metrics.store.record_failure(key, &error.to_string());
                warn!(key = %key, delta, error = %error, "Failed to update store for key");
                report.failures.push(FailedWrite {
                    key: key.to_owned(),
                    delta,
                    error,
                });
            }
        }
    }

    report.skipped_zero = report.keys - report.written - report.failures.len();
    report.elapsed = start.elapsed();
    metrics.buffer.record_flush_completed(
        report.written,
        report.skipped_zero,
        report.failures.len(),
        report.elapsed,
    );
    report
}
