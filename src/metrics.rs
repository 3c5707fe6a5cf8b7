use crate::sharded_counter::ShardedCounter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Metrics for buffer ingestion and flushes
#[derive(Debug, Default)]
pub struct BufferMetrics {
    /// Total number of increments applied to a buffer
    pub increments: ShardedCounter,
    /// Total number of flushes that captured a generation
    pub flushes_started: AtomicU64,
    /// Total number of flushes whose store loop finished
    pub flushes_completed: AtomicU64,
    /// Total keys written to the store
    pub keys_written: AtomicU64,
    /// Total keys skipped because their net delta was zero
    pub zero_keys_skipped: AtomicU64,
    /// Total keys whose store write failed
    pub keys_failed: AtomicU64,
    /// Total time spent in flushes (nanoseconds)
    pub flush_latency_ns: AtomicU64,
    /// Flush triggers dropped because the flush queue was full
    pub triggers_dropped: AtomicU64,
}

impl BufferMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_increment(&self) {
        self.increments.increment();
    }

    pub fn record_flush_started(&self, generation: u64, keys: usize) {
        self.flushes_started.fetch_add(1, Ordering::Relaxed);
        trace!(buffer_op = "flush_started", generation, keys);
    }

    /// Record a finished flush with its outcome and latency
    pub fn record_flush_completed(
        &self,
        written: usize,
        skipped_zero: usize,
        failed: usize,
        latency: Duration,
    ) {
        self.flushes_completed.fetch_add(1, Ordering::Relaxed);
        self.keys_written.fetch_add(written as u64, Ordering::Relaxed);
        self.zero_keys_skipped
            .fetch_add(skipped_zero as u64, Ordering::Relaxed);
        self.keys_failed.fetch_add(failed as u64, Ordering::Relaxed);
        self.flush_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        trace!(
            buffer_op = "flush_completed",
            written,
            skipped_zero,
            failed,
            latency_ns = latency.as_nanos() as u64
        );
    }

    pub fn record_trigger_dropped(&self) {
        self.triggers_dropped.fetch_add(1, Ordering::Relaxed);
        debug!(buffer_op = "trigger_dropped");
    }

    /// Number of increments seen so far
    pub fn increments(&self) -> u64 {
        self.increments.sum()
    }

    /// Calculate average flush latency in milliseconds
    pub fn avg_flush_latency_ms(&self) -> f64 {
        let count = self.flushes_completed.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total_ns = self.flush_latency_ns.load(Ordering::Relaxed);
        (total_ns as f64 / count as f64) / 1_000_000.0
    }

    /// Increments folded into a single store write, on average
    pub fn amortization_ratio(&self) -> f64 {
        let written = self.keys_written.load(Ordering::Relaxed);
        if written == 0 {
            return 0.0;
        }
        self.increments() as f64 / written as f64
    }

    /// Log a summary of buffer metrics
    pub fn log_summary(&self, elapsed_secs: f64) {
        let increments = self.increments();
        let flushes = self.flushes_completed.load(Ordering::Relaxed);
        let written = self.keys_written.load(Ordering::Relaxed);
        let skipped = self.zero_keys_skipped.load(Ordering::Relaxed);
        let failed = self.keys_failed.load(Ordering::Relaxed);
        let dropped = self.triggers_dropped.load(Ordering::Relaxed);

        info!(
            operation = "buffer_metrics_summary",
            increments = increments,
            flushes = flushes,
            keys_written = written,
            zero_keys_skipped = skipped,
            keys_failed = failed,
            triggers_dropped = dropped,
            avg_flush_latency_ms = self.avg_flush_latency_ms(),
            amortization_ratio = self.amortization_ratio(),
            duration_secs = elapsed_secs,
        );
    }
}

/// Metrics for store operations
#[derive(Debug, Default)]
pub struct StoreMetrics {
    /// Total number of store calls
    pub request_count: AtomicU64,
    /// Total number of successful calls
    pub success_count: AtomicU64,
    /// Total number of failed calls
    pub failure_count: AtomicU64,
    /// Total time spent in store calls (nanoseconds)
    pub total_latency_ns: AtomicU64,
    /// Circuit breaker state changes
    pub circuit_breaker_opens: AtomicU64,
    pub circuit_breaker_closes: AtomicU64,
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, key: &str) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        trace!(store_op = "request", key = key);
    }

    pub fn record_success(&self, key: &str, latency: Duration) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        trace!(
            store_op = "success",
            key = key,
            latency_us = latency.as_micros() as u64
        );
    }

    pub fn record_failure(&self, key: &str, error: &str) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        trace!(store_op = "failure", key = key, error = error);
    }

    pub fn record_circuit_breaker_open(&self) {
        self.circuit_breaker_opens.fetch_add(1, Ordering::Relaxed);
        warn!(store_op = "circuit_breaker", state = "opened");
    }

    pub fn record_circuit_breaker_close(&self) {
        self.circuit_breaker_closes.fetch_add(1, Ordering::Relaxed);
        info!(store_op = "circuit_breaker", state = "closed");
    }

    /// Calculate average latency in milliseconds
    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.success_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total_ns = self.total_latency_ns.load(Ordering::Relaxed);
        (total_ns as f64 / count as f64) / 1_000_000.0
    }

    /// Get success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.request_count.load(Ordering::Relaxed);
        if total == 0 {
            return 100.0;
        }
        let success = self.success_count.load(Ordering::Relaxed);
        (success as f64 / total as f64) * 100.0
    }

    /// Log a summary of store metrics
    pub fn log_summary(&self) {
        let total = self.request_count.load(Ordering::Relaxed);
        let success = self.success_count.load(Ordering::Relaxed);
        let failures = self.failure_count.load(Ordering::Relaxed);
        let opens = self.circuit_breaker_opens.load(Ordering::Relaxed);

        info!(
            operation = "store_metrics_summary",
            total_requests = total,
            successful = success,
            failed = failures,
            circuit_breaker_opens = opens,
            success_rate_pct = self.success_rate(),
            avg_latency_ms = self.avg_latency_ms(),
        );
    }
}

/// Combined metrics for the entire system
#[derive(Debug)]
pub struct Metrics {
    pub buffer: Arc<BufferMetrics>,
    pub store: Arc<StoreMetrics>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(BufferMetrics::new()),
            store: Arc::new(StoreMetrics::new()),
            start_time: Instant::now(),
        }
    }

    /// Log a complete metrics summary
    pub fn log_full_summary(&self) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        info!("=== tag-tally Metrics Summary ===");
        self.buffer.log_summary(elapsed);
        self.store.log_summary();
        info!("=================================");
    }

    /// Log periodic metrics summary (for background task)
    pub fn log_periodic(&self) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        info!("--- tag-tally Metrics (periodic) ---");
        self.buffer.log_summary(elapsed);
        self.store.log_summary();
        info!("------------------------------------");
    }

    /// Create a periodic logging background task
    pub fn spawn_periodic_logging(
        self: &Arc<Self>,
        interval_secs: u64,
        stop: Arc<std::sync::atomic::AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        let metrics = Arc::clone(self);
        tokio::spawn(async move {
            use tokio::time::{interval, Duration};

            let mut ticker = interval(Duration::from_secs(interval_secs));
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if stop.load(std::sync::atomic::Ordering::Relaxed) {
                    break;
                }

                metrics.log_periodic();
            }
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_metrics() {
        let metrics = BufferMetrics::new();

        for _ in 0..10 {
            metrics.record_increment();
        }
        metrics.record_flush_started(1, 4);
        metrics.record_flush_completed(3, 1, 0, Duration::from_millis(10));
        metrics.record_flush_started(2, 2);
        metrics.record_flush_completed(2, 0, 0, Duration::from_millis(20));

        assert_eq!(metrics.increments(), 10);
        assert_eq!(metrics.flushes_started.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.keys_written.load(Ordering::Relaxed), 5);
        assert_eq!(metrics.zero_keys_skipped.load(Ordering::Relaxed), 1);

        let avg_latency = metrics.avg_flush_latency_ms();
        assert!(avg_latency > 14.0 && avg_latency < 16.0);
        assert!((metrics.amortization_ratio() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_store_metrics() {
        let metrics = StoreMetrics::new();

        metrics.record_request("go");
        metrics.record_success("go", Duration::from_millis(50));

        metrics.record_request("rust");
        metrics.record_failure("rust", "unavailable");

        assert_eq!(metrics.request_count.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.success_count.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.failure_count.load(Ordering::Relaxed), 1);

        let success_rate = metrics.success_rate();
        assert!((success_rate - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_store_avg_latency() {
        let metrics = StoreMetrics::new();

        assert_eq!(metrics.avg_latency_ms(), 0.0);

        metrics.record_request("a");
        metrics.record_success("a", Duration::from_millis(100));
        metrics.record_request("b");
        metrics.record_success("b", Duration::from_millis(300));

        let avg = metrics.avg_latency_ms();
        assert!(avg > 199.0 && avg < 201.0);
    }

    #[test]
    fn test_trigger_dropped() {
        let metrics = BufferMetrics::new();
        metrics.record_trigger_dropped();
        assert_eq!(metrics.triggers_dropped.load(Ordering::Relaxed), 1);
    }
}
