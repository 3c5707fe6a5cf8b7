pub mod buffer;
pub mod config;
pub mod counter_map;
pub mod error;
pub mod flush_worker;
pub mod metrics;
pub mod pipeline;
pub mod sharded_counter;
pub mod source;
pub mod store;
pub mod trigger;

pub use buffer::{AggregationBuffer, BufferKind, FlushOrdering, FlushReport};
pub use config::{CliArgs, Config};
pub use counter_map::{CounterDelta, CounterMap};
pub use error::{StoreError, TallyError, TallyResult};
pub use flush_worker::FlushWorker;
pub use metrics::Metrics;
pub use pipeline::{IngestReport, Pipeline};
pub use sharded_counter::ShardedCounter;
pub use store::{CounterStore, HttpStore, MemoryStore};
pub use trigger::FlushTrigger;

use anyhow::{Context, Result};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub async fn run(config: Config) -> Result<IngestReport> {
    tracing::info!(operation = "startup", message = "tag-tally starting");
    tracing::debug!(config = ?config, "Configuration loaded");

    config.validate().context("Invalid configuration")?;

    let metrics = Arc::new(Metrics::new());
    let stop_metrics = Arc::new(AtomicBool::new(false));
    let metrics_task = config.logging.metrics_enabled.then(|| {
        metrics.spawn_periodic_logging(
            config.logging.metrics_interval_secs,
            Arc::clone(&stop_metrics),
        )
    });

    let (store, memory_store) = store::build_store(&config.store, Arc::clone(&metrics.store))
        .context("Failed to create counter store")?;

    let buffer = buffer::build_buffer(&config.buffer, store, Arc::clone(&metrics));
    tracing::info!(
        buffer = %buffer.kind(),
        flush_threshold = config.trigger.flush_threshold,
        workers = config.ingest.workers,
        "Aggregation buffer ready"
    );

    let worker = Arc::new(FlushWorker::new(
        Arc::clone(&buffer),
        config.flush.queue_capacity,
        config.flush.max_concurrent,
        config.flush.final_flush,
    ));

    let trigger = Arc::new(
        FlushTrigger::new(
            Arc::clone(&buffer),
            Arc::clone(&worker),
            Arc::clone(&metrics),
            config.trigger.flush_threshold,
        )
        .context("Failed to create flush trigger")?,
    );

    let source = source::PostSource::new(
        config.ingest.events,
        config.ingest.tag_len,
        config.ingest.max_tags,
    );
    let report = Pipeline::new(source, trigger, config.ingest.workers)
        .with_progress_every((config.ingest.events / 10).max(1))
        .run()
        .await;

    // Drain pending flushes before exit
    tracing::info!(in_flight = worker.in_flight(), "Waiting for pending flushes");
    worker.shutdown().await;

    stop_metrics.store(true, std::sync::atomic::Ordering::Relaxed);
    if let Some(task) = metrics_task {
        task.abort();
    }
    metrics.log_full_summary();

    if let Some(store) = memory_store {
        let stored = store.total();
        let pending = buffer.pending_keys().await;
        if config.flush.final_flush && stored != report.increments as i64 {
            tracing::warn!(
                ingested = report.increments,
                stored,
                pending_keys = pending,
                "Stored total does not match ingested events"
            );
        } else {
            tracing::info!(
                posts = report.events,
                ingested = report.increments,
                stored,
                distinct_keys = store.len(),
                store_calls = store.call_count(),
                "Store totals"
            );

            let mut top: Vec<_> = store.snapshot().into_iter().collect();
            top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            for (tag, count) in top.iter().take(5) {
                tracing::info!(tag = %tag, count, "Top tag");
            }
        }
    }

    Ok(report)
}
