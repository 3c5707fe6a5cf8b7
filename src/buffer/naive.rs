use super::{export_generation, AggregationBuffer, BufferKind, FlushReport};
use crate::counter_map::CounterMap;
use crate::metrics::Metrics;
use crate::store::CounterStore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Baseline buffer: one map, one lock, lock held for the whole flush.
///
/// Every increment issued while a flush is writing waits for all of that
/// flush's store calls, so ingestion stalls for roughly
/// `store latency × key count` per flush.
pub struct NaiveBuffer {
    counts: Mutex<CounterMap>,
    store: Arc<dyn CounterStore>,
    metrics: Arc<Metrics>,
    generations: AtomicU64,
}

impl NaiveBuffer {
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
impl AggregationBuffer for NaiveBuffer {
    fn kind(&self) -> BufferKind {
        BufferKind::Naive
    }

    async fn increment(&self, key: &str, delta: i64) {
        self.counts.lock().await.add(key, delta);
        self.metrics.buffer.record_increment();
    }

    async fn flush(&self) -> FlushReport {
        let mut counts = self.counts.lock().await;
        let generation_id = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        // Taken before the first write so a cancelled flush cannot leave
        // already-written keys behind. The guard stays held for the export.
        let generation = std::mem::take(&mut *counts);

        export_generation(self.store.as_ref(), &self.metrics, generation_id, &generation).await
    }

    async fn get(&self, key: &str) -> i64 {
        self.counts.lock().await.get(key)
    }

    async fn pending_keys(&self) -> usize {
        self.counts.lock().await.len()
    }
}
