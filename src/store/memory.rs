use super::CounterStore;
use crate::error::StoreResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// In-process store backed by a concurrent map.
///
/// Optional per-call latency simulates a remote store so the buffer
/// variants can be compared under realistic write costs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: DashMap<String, i64>,
    calls: AtomicU64,
    latency: Duration,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `latency` inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Stored value for `key`, `None` if no call ever created it.
    pub fn get(&self, key: &str) -> Option<i64> {
        self.counters.get(key).map(|v| *v)
    }

    /// Copy of every stored counter.
    pub fn snapshot(&self) -> HashMap<String, i64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Sum of all stored counters.
    pub fn total(&self) -> i64 {
        self.counters.iter().map(|entry| *entry.value()).sum()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Number of `increment_counter` calls served.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment_counter(&self, key: &str, delta: i64) -> StoreResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        // Entry lock makes the read-modify-write atomic per key
        *self.counters.entry(key.to_owned()).or_insert(0) += delta;
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
