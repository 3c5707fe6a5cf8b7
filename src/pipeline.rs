//! Concurrent ingestion: several workers pull from one source and feed the
//! flush trigger.

use crate::source::RecordSource;
use crate::trigger::FlushTrigger;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Totals of one ingestion run.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestReport {
    /// Records consumed, each one trigger event
    pub events: u64,
    /// Deltas applied across all records
    pub increments: u64,
    pub elapsed: Duration,
}

impl IngestReport {
    pub fn events_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.events as f64 / secs
    }
}

/// Ingestion workers sharing one source.
pub struct Pipeline<S> {
    source: Arc<Mutex<S>>,
    trigger: Arc<FlushTrigger>,
    workers: usize,
    /// Log progress every this many events, 0 disables
    progress_every: u64,
}

impl<S> Pipeline<S>
where
    S: RecordSource + 'static,
{
    pub fn new(source: S, trigger: Arc<FlushTrigger>, workers: usize) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            trigger,
            workers: workers.max(1),
            progress_every: 0,
        }
    }

    pub fn with_progress_every(mut self, events: u64) -> Self {
        self.progress_every = events;
        self
    }

    /// Run until the source is exhausted.
    pub async fn run(self) -> IngestReport {
        let start = Instant::now();
        let mut workers = JoinSet::new();

        for worker_id in 0..self.workers {
            let source = Arc::clone(&self.source);
            let trigger = Arc::clone(&self.trigger);
            let progress_every = self.progress_every;

            workers.spawn(async move {
                let mut handled = 0u64;
                let mut increments = 0u64;
                loop {
                    // Lock only for the pull, not for the increments
                    let record = source.lock().await.next_record().await;
                    let Some(record) = record else { break };

                    increments += record.len() as u64;
                    let seq = trigger.record_many(record).await;
                    handled += 1;
                    if progress_every > 0 && seq % progress_every == 0 {
                        info!(
                            events = seq,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "Consumed {} events",
                            seq
                        );
                    }
                }
                debug!(worker_id, handled, increments, "Ingestion worker finished");
                (handled, increments)
            });
        }

        let mut events = 0;
        let mut increments = 0;
        while let Some(result) = workers.join_next().await {
            match result {
                Ok((handled, applied)) => {
                    events += handled;
                    increments += applied;
                }
                Err(e) => error!(error = %e, "Ingestion worker failed"),
            }
        }

        let report = IngestReport {
            events,
            increments,
            elapsed: start.elapsed(),
        };
        info!(
            events = report.events,
            increments = report.increments,
            elapsed_ms = report.elapsed.as_millis() as u64,
            events_per_sec = report.events_per_sec(),
            "All events consumed"
        );
        report
    }
}
