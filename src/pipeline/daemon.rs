//! Polling scheduler shared by both daemons.
//!
//! Each cycle lists the stage's queue, runs the optional pre-batch hook, and
//! hands every document to a bounded pool. A failing document is logged and
//! dropped for this cycle; it stays queued for the next poll. Panics count as
//! failures, for one document or a whole cycle. The loop only
//! stops through the shutdown flag, which is checked between cycles and
//! during the poll sleep.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use uuid::Uuid;

use super::classify::ClassifyWorker;
use super::ocr::OcrWorker;
use super::PipelineError;
use crate::config::Settings;
use crate::paperless::{DocumentId, DocumentSummary};

/// Sleep granularity for shutdown responsiveness.
const SLEEP_GRANULARITY: Duration = Duration::from_millis(250);

/// One pipeline stage as seen by the scheduler.
pub trait StageWorker: Send + Sync {
    /// Short stage name used in logs and thread names.
    fn stage(&self) -> &'static str;

    fn fetch_batch(&self) -> Result<Vec<DocumentSummary>, PipelineError>;

    /// Runs once before a non-empty batch is dispatched.
    fn before_batch(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn process(&self, doc_id: DocumentId) -> Result<(), PipelineError>;
}

impl StageWorker for OcrWorker {
    fn stage(&self) -> &'static str {
        "ocr"
    }

    fn fetch_batch(&self) -> Result<Vec<DocumentSummary>, PipelineError> {
        Ok(OcrWorker::fetch_batch(self)?)
    }

    fn process(&self, doc_id: DocumentId) -> Result<(), PipelineError> {
        let outcome = OcrWorker::process(self, doc_id)?;
        tracing::debug!(doc_id, outcome = ?outcome, "OCR finished");
        Ok(())
    }
}

impl StageWorker for ClassifyWorker {
    fn stage(&self) -> &'static str {
        "classify"
    }

    fn fetch_batch(&self) -> Result<Vec<DocumentSummary>, PipelineError> {
        Ok(ClassifyWorker::fetch_batch(self)?)
    }

    fn before_batch(&self) -> Result<(), PipelineError> {
        Ok(ClassifyWorker::before_batch(self)?)
    }

    fn process(&self, doc_id: DocumentId) -> Result<(), PipelineError> {
        let outcome = ClassifyWorker::process(self, doc_id)?;
        tracing::debug!(doc_id, outcome = ?outcome, "Classification finished");
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Scheduler
// ──────────────────────────────────────────────

pub struct Scheduler<W: StageWorker> {
    worker: Arc<W>,
    pool: rayon::ThreadPool,
    poll_interval: Duration,
}

impl<W: StageWorker + 'static> Scheduler<W> {
    pub fn new(worker: Arc<W>, settings: &Settings) -> Result<Self, PipelineError> {
        Self::with_options(
            worker,
            settings.document_workers,
            Duration::from_secs(settings.poll_interval_secs),
        )
    }

    pub fn with_options(
        worker: Arc<W>,
        document_workers: usize,
        poll_interval: Duration,
    ) -> Result<Self, PipelineError> {
        let stage = worker.stage();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(document_workers.max(1))
            .thread_name(move |i| format!("{stage}-doc-{i}"))
            .build()
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;
        Ok(Self {
            worker,
            pool,
            poll_interval,
        })
    }

    /// Fetch and process one batch. Returns how many documents were dispatched.
    ///
    /// Per-document failures are logged, never returned.
    pub fn run_once(&self) -> Result<usize, PipelineError> {
        let batch = self.worker.fetch_batch()?;
        if batch.is_empty() {
            return Ok(0);
        }

        let batch_id = Uuid::new_v4();
        let _span = tracing::info_span!("batch", stage = self.worker.stage(), %batch_id).entered();
        let start = Instant::now();
        tracing::info!(count = batch.len(), "Found documents to process");

        self.worker.before_batch()?;

        let failures: usize = self.pool.install(|| {
            batch
                .par_iter()
                .map(|doc| match guarded(|| self.worker.process(doc.id)) {
                    Ok(()) => 0,
                    Err(e) => {
                        tracing::error!(doc_id = doc.id, error = %e, "Failed to process document");
                        1
                    }
                })
                .sum()
        });

        tracing::info!(
            count = batch.len(),
            failures,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Batch finished"
        );
        Ok(batch.len())
    }

    /// Poll until `shutdown` is set.
    pub fn run(&self, shutdown: &AtomicBool) {
        tracing::info!(
            stage = self.worker.stage(),
            poll_interval_secs = self.poll_interval.as_secs_f64(),
            "Polling loop started"
        );
        let mut idle = false;
        while !shutdown.load(Ordering::Relaxed) {
            match guarded(|| self.run_once()) {
                Ok(0) => {
                    if !idle {
                        tracing::info!(stage = self.worker.stage(), "No documents queued; waiting");
                        idle = true;
                    }
                }
                Ok(_) => idle = false,
                Err(e) => {
                    idle = false;
                    tracing::error!(stage = self.worker.stage(), error = %e, "Polling loop error");
                }
            }
            sleep_unless_shutdown(self.poll_interval, shutdown);
        }
        tracing::info!(stage = self.worker.stage(), "Polling loop stopped");
    }

    /// Run the loop on its own thread.
    pub fn spawn(self) -> Result<DaemonHandle, PipelineError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let name = format!("{}-scheduler", self.worker.stage());

        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || self.run(&flag))
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;

        Ok(DaemonHandle {
            shutdown,
            handle: Some(handle),
        })
    }
}

/// Run `f`, turning a panic into `PipelineError::Panicked`.
fn guarded<T>(f: impl FnOnce() -> Result<T, PipelineError>) -> Result<T, PipelineError> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(PipelineError::Panicked(panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn sleep_unless_shutdown(total: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(SLEEP_GRANULARITY.min(deadline - now));
    }
}

/// Handle for a running scheduler thread.
///
/// `shutdown()` lets the current batch finish and stops before the next one.
/// Dropping the handle shuts down and joins.
pub struct DaemonHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl DaemonHandle {
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                tracing::error!("Scheduler thread panicked");
            }
        }
    }
}
