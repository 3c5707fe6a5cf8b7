use crate::buffer::{AggregationBuffer, FlushReport};
use crate::error::{TallyError, TallyResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Why a flush was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Event threshold reached
    Threshold { events: u64 },
    /// Explicit caller request
    Manual,
}

/// Request sent to the flush worker task.
#[derive(Debug)]
pub struct FlushRequest {
    pub reason: FlushReason,
    /// Receives the report once the flush finished
    pub response_tx: Option<oneshot::Sender<FlushReport>>,
}

/// Runs flushes in the background on behalf of ingestion callers.
///
/// Requests travel over a bounded channel to a single dispatcher task, which
/// runs each flush as a tracked task in a `JoinSet`, at most `max_concurrent`
/// at a time. Callers never wait for store writes unless they ask to with
/// [`flush_now`](Self::flush_now).
///
/// `in_flight` counts flushes that were accepted and have not finished yet,
/// queued or running. [`shutdown`](Self::shutdown) stops accepting requests,
/// runs everything already queued, waits for running flushes, and optionally
/// performs one final flush of whatever is still buffered.
pub struct FlushWorker {
    request_tx: mpsc::Sender<FlushRequest>,
    in_flight: Arc<AtomicUsize>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl FlushWorker {
    /// Spawn the dispatcher task. Must be called inside a tokio runtime.
    ///
    /// `queue_capacity` and `max_concurrent` are clamped to at least 1.
    pub fn new(
        buffer: Arc<dyn AggregationBuffer>,
        queue_capacity: usize,
        max_concurrent: usize,
        final_flush: bool,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::channel::<FlushRequest>(queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let in_flight = Arc::new(AtomicUsize::new(0));

        let dispatcher = Dispatcher {
            buffer,
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Arc::clone(&in_flight),
            tasks: JoinSet::new(),
        };
        let worker_handle =
            tokio::spawn(dispatcher.run(request_rx, shutdown_rx, final_flush));

        Self {
            request_tx,
            in_flight,
            worker_handle: Mutex::new(Some(worker_handle)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        }
    }

    /// Queue a flush without waiting for it.
    ///
    /// Returns [`TallyError::FlushQueueFull`] when the queue is at capacity.
    /// Nothing is lost in that case: the deltas stay buffered and go out with
    /// the next flush.
    pub fn submit(&self, reason: FlushReason) -> TallyResult<()> {
        self.enqueue(FlushRequest {
            reason,
            response_tx: None,
        })
    }

    /// Queue a flush and wait for its report.
    pub async fn flush_now(&self) -> TallyResult<FlushReport> {
        let (tx, rx) = oneshot::channel();
        let request = FlushRequest {
            reason: FlushReason::Manual,
            response_tx: Some(tx),
        };

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if self.request_tx.send(request).await.is_err() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(TallyError::WorkerStopped);
        }
        rx.await.map_err(|_| TallyError::WorkerStopped)
    }

    fn enqueue(&self, request: FlushRequest) -> TallyResult<()> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        match self.request_tx.try_send(request) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                Err(TallyError::FlushQueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                Err(TallyError::WorkerStopped)
            }
        }
    }

    /// Flushes accepted but not finished, queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Stop accepting requests and wait until every accepted flush finished.
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let shutdown_tx = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = shutdown_tx {
            info!("Sending shutdown signal to FlushWorker");
            let _ = tx.send(());
        }

        let handle = self
            .worker_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "FlushWorker task failed");
            }
        }
    }
}

impl Drop for FlushWorker {
    fn drop(&mut self) {
        // Best effort; pending flushes still drain in the background
        let shutdown_tx = self
            .shutdown_tx
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }
    }
}

struct Dispatcher {
    buffer: Arc<dyn AggregationBuffer>,
    limiter: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    tasks: JoinSet<()>,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut request_rx: mpsc::Receiver<FlushRequest>,
        mut shutdown_rx: oneshot::Receiver<()>,
        final_flush: bool,
    ) {
        info!("FlushWorker started");

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown_rx => {
                    info!("FlushWorker received shutdown signal");
                    break;
                }

                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    Self::log_join(result);
                }

                request = request_rx.recv() => match request {
                    Some(request) => self.dispatch(request).await,
                    None => break,
                },
            }
        }

        // Drain: run what was accepted before the signal
        request_rx.close();
        while let Some(request) = request_rx.recv().await {
            self.dispatch(request).await;
        }
        while let Some(result) = self.tasks.join_next().await {
            Self::log_join(result);
        }

        if final_flush {
            let report = self.buffer.flush().await;
            info!(
                generation = report.generation,
                keys = report.keys,
                written = report.written,
                failed = report.failures.len(),
                "Final flush complete"
            );
        }

        info!("FlushWorker shut down");
    }

    async fn dispatch(&mut self, request: FlushRequest) {
        let permit = match Arc::clone(&self.limiter).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Flush limiter closed, dropping request");
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                return;
            }
        };

        let buffer = Arc::clone(&self.buffer);
        let in_flight = Arc::clone(&self.in_flight);
        debug!(reason = ?request.reason, "Starting flush");

        self.tasks.spawn(async move {
            let report = buffer.flush().await;
            drop(permit);
            in_flight.fetch_sub(1, Ordering::AcqRel);

            if !report.is_clean() {
                warn!(
                    generation = report.generation,
                    failed = report.failures.len(),
                    "Flush finished with store errors"
                );
            }
            if let Some(tx) = request.response_tx {
                // Receiver may have given up waiting
                let _ = tx.send(report);
            }
        });
    }

    fn log_join(result: Result<(), tokio::task::JoinError>) {
        if let Err(e) = result {
            error!(error = %e, "Flush task panicked or was cancelled");
        }
    }
}
