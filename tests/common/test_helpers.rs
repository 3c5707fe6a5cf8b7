//! Store doubles and buffer builders shared by the integration tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tag_tally::buffer::{
    AggregationBuffer, BufferKind, DeepCopyBuffer, FlushOrdering, NaiveBuffer, SwapBuffer,
};
use tag_tally::error::{StoreError, StoreResult};
use tag_tally::{CounterStore, Metrics};

/// One `increment_counter` call as seen by the store.
#[derive(Debug, Clone)]
pub struct StoreCall {
    pub key: String,
    pub delta: i64,
    pub started: Instant,
    pub finished: Instant,
}

/// Store that records every call, optionally sleeps per call and fails
/// selected keys.
#[derive(Default)]
pub struct RecordingStore {
    calls: Mutex<Vec<StoreCall>>,
    totals: DashMap<String, i64>,
    latency: Duration,
    fail_keys: HashSet<String>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn failing_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fail_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, key: &str) -> Vec<i64> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.key == key)
            .map(|c| c.delta)
            .collect()
    }

    pub fn get(&self, key: &str) -> i64 {
        self.totals.get(key).map(|v| *v).unwrap_or(0)
    }

    pub fn total(&self) -> i64 {
        self.totals.iter().map(|e| *e.value()).sum()
    }
}

#[async_trait]
impl CounterStore for RecordingStore {
    async fn increment_counter(&self, key: &str, delta: i64) -> StoreResult<()> {
        let started = Instant::now();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let result = if self.fail_keys.contains(key) {
            Err(StoreError::Unavailable(format!("injected failure for {}", key)))
        } else {
            *self.totals.entry(key.to_string()).or_insert(0) += delta;
            Ok(())
        };

        self.calls.lock().unwrap().push(StoreCall {
            key: key.to_string(),
            delta,
            started,
            finished: Instant::now(),
        });
        result
    }
}

/// Build a buffer of `kind` writing to `store`.
pub fn build_buffer(kind: BufferKind, store: Arc<dyn CounterStore>) -> Arc<dyn AggregationBuffer> {
    build_buffer_with_ordering(kind, store, FlushOrdering::TokenFirst)
}

pub fn build_buffer_with_ordering(
    kind: BufferKind,
    store: Arc<dyn CounterStore>,
    ordering: FlushOrdering,
) -> Arc<dyn AggregationBuffer> {
    let metrics = Arc::new(Metrics::new());
    match kind {
        BufferKind::Naive => Arc::new(NaiveBuffer::new(store, metrics)),
        BufferKind::DeepCopy => Arc::new(DeepCopyBuffer::new(store, metrics)),
        BufferKind::Swap => Arc::new(SwapBuffer::with_ordering(store, metrics, ordering)),
    }
}
