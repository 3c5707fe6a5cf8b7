use super::{export_generation, AggregationBuffer, BufferKind, FlushOrdering, FlushReport};
use crate::counter_map::CounterMap;
use crate::metrics::Metrics;
use crate::store::CounterStore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, Semaphore, SemaphorePermit};
use tracing::{debug, error, warn};

/// Active/passive double buffer.
///
/// Increments always go to the active map. A flush exchanges the roles of
/// the two maps (no element copy), releases the lock, and writes the passive
/// map to the store while ingestion continues on the new active map.
///
/// The completion token is a one-permit semaphore held from the swap until
/// the passive map has been written and cleared, so at most one generation is
/// exported at a time and a swap never overwrites a generation still being
/// written. It is independent of the data lock: the lock protects the active
/// map, the token protects the passive map.
///
/// Both maps live as long as the buffer; clearing keeps their capacity.
pub struct SwapBuffer {
    active: Mutex<CounterMap>,
    /// Only locked by the holder of `completion`.
    passive: Mutex<CounterMap>,
    completion: Semaphore,
    ordering: FlushOrdering,
    store: Arc<dyn CounterStore>,
    metrics: Arc<Metrics>,
    generations: AtomicU64,
}

impl SwapBuffer {
    pub fn new(store: Arc<dyn CounterStore>, metrics: Arc<Metrics>) -> Self {
        Self::with_ordering(store, metrics, FlushOrdering::default())
    }

    pub fn with_ordering(
        store: Arc<dyn CounterStore>,
        metrics: Arc<Metrics>,
        ordering: FlushOrdering,
    ) -> Self {
        Self {
            active: Mutex::new(CounterMap::new()),
            passive: Mutex::new(CounterMap::new()),
            completion: Semaphore::new(1),
            ordering,
            store,
            metrics,
            generations: AtomicU64::new(0),
        }
    }

    /// Whether a generation is currently being exported.
    pub fn is_exporting(&self) -> bool {
        self.completion.available_permits() == 0
    }

    async fn acquire_token(&self) -> Option<SemaphorePermit<'_>> {
        match self.completion.acquire().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                error!("Completion token closed, skipping flush");
                None
            }
        }
    }

    /// Exchange roles. Caller holds both the token and the data lock.
    fn swap_roles(
        &self,
        active: &mut MutexGuard<'_, CounterMap>,
        passive: &mut MutexGuard<'_, CounterMap>,
    ) -> u64 {
        if !passive.is_empty() {
            // Left behind by a flush that was cancelled mid-export. Part of it
            // may already be in the store, so exporting it again could count
            // twice.
            warn!(
                keys = passive.len(),
                "Discarding generation abandoned by a cancelled flush"
            );
            passive.clear();
        }
        std::mem::swap(&mut **active, &mut **passive);
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl AggregationBuffer for SwapBuffer {
    fn kind(&self) -> BufferKind {
        BufferKind::Swap
    }

    async fn increment(&self, key: &str, delta: i64) {
        self.active.lock().await.add(key, delta);
        self.metrics.buffer.record_increment();
    }

    async fn flush(&self) -> FlushReport {
        let (permit, mut passive, generation) = match self.ordering {
            FlushOrdering::TokenFirst => {
                let Some(permit) = self.acquire_token().await else {
                    return FlushReport::default();
                };
                let mut passive = self.passive.lock().await;
                let mut active = self.active.lock().await;
                let generation = self.swap_roles(&mut active, &mut passive);
                (permit, passive, generation)
            }
            FlushOrdering::LockFirst => {
                let mut active = self.active.lock().await;
                // Increments queue up behind `active` while this waits
                let Some(permit) = self.acquire_token().await else {
                    return FlushReport::default();
                };
                let mut passive = self.passive.lock().await;
                let generation = self.swap_roles(&mut active, &mut passive);
                (permit, passive, generation)
            }
        };
        debug!(generation, keys = passive.len(), "Buffers swapped, lock released");

        let report =
            export_generation(self.store.as_ref(), &self.metrics, generation, &passive).await;

        passive.clear();
        drop(passive);
        drop(permit);
        report
    }

    async fn get(&self, key: &str) -> i64 {
        self.active.lock().await.get(key)
    }

    async fn pending_keys(&self) -> usize {
        self.active.lock().await.len()
    }
}
