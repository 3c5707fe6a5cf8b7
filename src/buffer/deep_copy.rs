use super::{export_generation, AggregationBuffer, BufferKind, FlushReport};
use crate::counter_map::CounterMap;
use crate::metrics::Metrics;
use crate::store::CounterStore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

/// One map, one lock; a flush copies the map under the lock and writes the
/// copy without it.
///
/// Ingestion waits only for the O(map size) copy. Flushes are not serialized:
/// if a second flush starts while an earlier one is still writing, both write
/// to the store at the same time, each with its own disjoint snapshot.
pub struct DeepCopyBuffer {
    counts: Mutex<CounterMap>,
    store: Arc<dyn CounterStore>,
    metrics: Arc<Metrics>,
    generations: AtomicU64,
}

impl DeepCopyBuffer {
    pub fn new(store: Arc<dyn CounterStore>, metrics: Arc<Metrics>) -> Self {
        Self {
            counts: Mutex::new(CounterMap::new()),
            store,
            metrics,
            generations: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl AggregationBuffer for DeepCopyBuffer {
    fn kind(&self) -> BufferKind {
        BufferKind::DeepCopy
    }

    async fn increment(&self, key: &str, delta: i64) {
        self.counts.lock().await.add(key, delta);
        self.metrics.buffer.record_increment();
    }

    async fn flush(&self) -> FlushReport {
        let (generation, snapshot) = {
            let mut counts = self.counts.lock().await;
            // Full element copy under the lock
            let snapshot = counts.clone();
            *counts = CounterMap::new();
            let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
            (generation, snapshot)
        };
        trace!(generation, keys = snapshot.len(), "Snapshot taken, lock released");

        export_generation(self.store.as_ref(), &self.metrics, generation, &snapshot).await
    }

    async fn get(&self, key: &str) -> i64 {
        self.counts.lock().await.get(key)
    }

    async fn pending_keys(&self) -> usize {
        self.counts.lock().await.len()
    }
}
