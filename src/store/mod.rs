//! Persistent key-count store adapters.
//!
//! The buffers only ever call [`CounterStore::increment_counter`], an
//! upsert-increment: create the counter with `delta` if it does not exist,
//! otherwise add `delta` to it.

pub mod circuit_breaker;
pub mod http;
pub mod memory;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use http::HttpStore;
pub use memory::MemoryStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{StoreResult, TallyResult};
use crate::metrics::StoreMetrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Upsert-increment counter store.
///
/// Implementations must be safe to call concurrently for different keys;
/// concurrent calls for the same key only need to be individually atomic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn increment_counter(&self, key: &str, delta: i64) -> StoreResult<()>;
}

#[async_trait]
impl<S: CounterStore + ?Sized> CounterStore for Arc<S> {
    async fn increment_counter(&self, key: &str, delta: i64) -> StoreResult<()> {
        (**self).increment_counter(key, delta).await
    }
}

/// Build the store selected by configuration.
///
/// The memory store is returned separately so the caller can inspect totals
/// after a run.
pub fn build_store(
    config: &StoreConfig,
    metrics: Arc<StoreMetrics>,
) -> TallyResult<(Arc<dyn CounterStore>, Option<Arc<MemoryStore>>)> {
    match config.backend {
        StoreBackend::Memory => {
            let store = Arc::new(
                MemoryStore::new().with_latency(Duration::from_millis(config.latency_ms)),
            );
            Ok((store.clone() as Arc<dyn CounterStore>, Some(store)))
        }
        StoreBackend::Http => {
            let breaker = CircuitBreaker::new(
                config.failure_threshold,
                Duration::from_secs(config.reset_timeout),
            )
            .with_metrics(metrics);
            let store = HttpStore::new(
                &config.url,
                Duration::from_secs(config.request_timeout),
                breaker,
            )?;
            Ok((Arc::new(store), None))
        }
    }
}
