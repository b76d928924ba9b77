//! Batch coordinator: a bounded pool of worker threads over a shared FIFO of
//! conversion requests, with per-batch counters and cooperative cancellation.
//!
//! State per batch goes `Idle -> Running -> {Completed, Cancelled} -> Idle`.
//! Every request reaches exactly one terminal [`Outcome`], including requests
//! still queued when the batch is cancelled, so `AllCompleted` always fires.

mod cancel;
mod events;
mod queue;

pub use cancel::CancellationToken;
pub use events::{BatchEvent, BatchEventEmitter, EventBus, Outcome};

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::AppError;
use crate::ffmpeg::{ConversionOptions, ProgressCallback, Transcoder};
use crate::files::{create_output_directory, delete_file_safely, generate_output_filename};
use queue::PendingQueue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub input_path: PathBuf,
    pub display_name: String,
}

impl ConversionRequest {
    /// Display name defaults to the file name of `input_path`.
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        let input_path = input_path.into();
        let display_name = input_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| input_path.to_string_lossy().to_string());
        Self {
            input_path,
            display_name,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }
}

/// Counters for one batch. Only mutated under the batch lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchState {
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub cancelled: bool,
    pub in_progress: bool,
    /// FileCompleted events already delivered; AllCompleted goes out after the last one.
    announced: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub batch_id: Option<u64>,
    pub running: bool,
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub cancelled: bool,
    pub progress_percentage: f64,
}

impl BatchStatus {
    /// Status before any batch has run.
    pub fn idle() -> Self {
        Self {
            batch_id: None,
            running: false,
            total: 0,
            completed: 0,
            succeeded: 0,
            cancelled: false,
            progress_percentage: 0.0,
        }
    }
}

#[derive(Debug)]
pub enum StartOutcome {
    Started(BatchHandle),
    /// A batch was already running; nothing changed and no event was emitted.
    AlreadyRunning,
}

/// Worker threads of one batch.
#[derive(Debug)]
pub struct BatchHandle {
    batch_id: u64,
    workers: Vec<JoinHandle<()>>,
}

impl BatchHandle {
    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn is_finished(&self) -> bool {
        self.workers.iter().all(JoinHandle::is_finished)
    }

    /// Blocks until every worker has exited, i.e. after `AllCompleted` was emitted.
    pub fn join(self) {
        for worker in self.workers {
            if worker.join().is_err() {
                log::error!(target: "tiny_mp3::batch", "Worker thread panicked");
            }
        }
    }
}

struct BatchRun {
    id: u64,
    cancel: CancellationToken,
    state: Mutex<BatchState>,
    queue: PendingQueue,
    options: ConversionOptions,
}

impl BatchRun {
    fn status(&self) -> BatchStatus {
        let state = self.state.lock();
        let progress_percentage = if state.total == 0 {
            0.0
        } else {
            state.completed as f64 / state.total as f64 * 100.0
        };
        BatchStatus {
            batch_id: Some(self.id),
            running: state.in_progress,
            total: state.total,
            completed: state.completed,
            succeeded: state.succeeded,
            cancelled: state.cancelled,
            progress_percentage,
        }
    }
}

struct Shared {
    transcoder: Arc<dyn Transcoder>,
    events: EventBus,
    /// Most recent batch, finished or not.
    current: Mutex<Option<Arc<BatchRun>>>,
    next_batch_id: AtomicU64,
    active_workers: AtomicUsize,
}

pub struct BatchCoordinator {
    shared: Arc<Shared>,
}

impl BatchCoordinator {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            shared: Arc::new(Shared {
                transcoder,
                events: EventBus::default(),
                current: Mutex::new(None),
                next_batch_id: AtomicU64::new(1),
                active_workers: AtomicUsize::new(0),
            }),
        }
    }

    pub fn subscribe(&self, subscriber: BatchEventEmitter) {
        self.shared.events.subscribe(subscriber);
    }

    pub fn is_running(&self) -> bool {
        self.shared
            .current
            .lock()
            .as_ref()
            .is_some_and(|run| run.state.lock().in_progress)
    }

    /// Counters of the running batch, or of the last one when idle.
    pub fn status(&self) -> BatchStatus {
        self.shared
            .current
            .lock()
            .as_ref()
            .map_or_else(BatchStatus::idle, |run| run.status())
    }

    /// Number of conversions executing right now, across all batches.
    pub fn active_workers(&self) -> usize {
        self.shared.active_workers.load(Ordering::Acquire)
    }

    fn reject(&self, error: AppError) -> Result<StartOutcome, AppError> {
        log::warn!(target: "tiny_mp3::batch", "Batch rejected: {}", error);
        self.shared.events.emit(BatchEvent::Error {
            batch_id: None,
            message: error.to_string(),
        });
        Err(error)
    }

    pub fn start(
        &self,
        requests: Vec<ConversionRequest>,
        options: ConversionOptions,
    ) -> Result<StartOutcome, AppError> {
        let mut current = self.shared.current.lock();
        if current
            .as_ref()
            .is_some_and(|run| run.state.lock().in_progress)
        {
            log::info!(target: "tiny_mp3::batch", "start ignored: a batch is already running");
            return Ok(StartOutcome::AlreadyRunning);
        }
        drop(current);

        if requests.is_empty() {
            return self.reject(AppError::EmptyBatch);
        }
        if let Err(e) = options.validate() {
            return self.reject(e);
        }
        if let Err(e) = create_output_directory(&options.output_directory) {
            return self.reject(e);
        }

        current = self.shared.current.lock();
        // Another caller may have started a batch while the lock was released.
        if current
            .as_ref()
            .is_some_and(|run| run.state.lock().in_progress)
        {
            return Ok(StartOutcome::AlreadyRunning);
        }

        let total = requests.len();
        let id = self.shared.next_batch_id.fetch_add(1, Ordering::Relaxed);
        let worker_count = options.max_concurrency.min(total);
        let run = Arc::new(BatchRun {
            id,
            cancel: CancellationToken::new(),
            state: Mutex::new(BatchState {
                total,
                in_progress: true,
                ..Default::default()
            }),
            queue: PendingQueue::new(requests),
            options,
        });
        *current = Some(Arc::clone(&run));
        drop(current);

        log::info!(
            target: "tiny_mp3::batch",
            "Batch {} started: {} files, {} workers",
            id,
            total,
            worker_count
        );
        self.shared.events.emit(BatchEvent::Started {
            batch_id: id,
            total,
        });

        let mut workers = Vec::with_capacity(worker_count);
        for slot in 0..worker_count {
            let shared = Arc::clone(&self.shared);
            let worker_run = Arc::clone(&run);
            let spawned = thread::Builder::new()
                .name(format!("tiny-mp3-batch{}-worker{}", id, slot))
                .spawn(move || worker_loop(&shared, &worker_run));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    log::error!(
                        target: "tiny_mp3::batch",
                        "Failed to spawn worker {} for batch {}: {}",
                        slot,
                        id,
                        e
                    );
                    break;
                }
            }
        }

        if workers.is_empty() {
            // No worker will ever drain the queue; settle the batch here.
            run.cancel.cancel();
            {
                let mut state = run.state.lock();
                state.cancelled = true;
                state.in_progress = false;
            }
            worker_loop(&self.shared, &run);
        }

        Ok(StartOutcome::Started(BatchHandle {
            batch_id: id,
            workers,
        }))
    }

    /// Cancels the running batch. Returns false (and does nothing) when idle.
    ///
    /// Returns without waiting: in-flight conversions finish on their own and are
    /// reported as cancelled, queued ones are drained as cancelled.
    pub fn cancel(&self) -> bool {
        let current = self.shared.current.lock();
        let Some(run) = current.as_ref() else {
            return false;
        };
        let mut state = run.state.lock();
        if !state.in_progress {
            return false;
        }
        run.cancel.cancel();
        state.cancelled = true;
        state.in_progress = false;
        log::info!(
            target: "tiny_mp3::batch",
            "Batch {} cancelled ({}/{} completed)",
            run.id,
            state.completed,
            state.total
        );
        true
    }
}

fn worker_loop(shared: &Arc<Shared>, run: &Arc<BatchRun>) {
    while let Some(request) = run.queue.pop() {
        let output_path = run.options.output_directory.join(generate_output_filename(
            &request.input_path,
            &run.options.output_naming_pattern,
            &run.options.output_suffix,
        ));

        let (outcome, message) = if run.cancel.is_cancelled() {
            (Outcome::Cancelled, Some(AppError::Cancelled.to_string()))
        } else {
            shared.active_workers.fetch_add(1, Ordering::AcqRel);
            let result = convert_one(shared, run, &request, &output_path);
            shared.active_workers.fetch_sub(1, Ordering::AcqRel);
            result
        };

        finish_file(shared, run, request, output_path, outcome, message);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn convert_one(
    shared: &Arc<Shared>,
    run: &Arc<BatchRun>,
    request: &ConversionRequest,
    output_path: &Path,
) -> (Outcome, Option<String>) {
    let on_progress: ProgressCallback = {
        let shared = Arc::clone(shared);
        let run = Arc::clone(run);
        let file_name = request.display_name.clone();
        Arc::new(move |progress| {
            if run.cancel.is_cancelled() {
                return;
            }
            let (completed, total) = {
                let state = run.state.lock();
                (state.completed, state.total)
            };
            shared.events.emit(BatchEvent::Progress {
                batch_id: run.id,
                file_name: file_name.clone(),
                progress,
                completed,
                total,
            });
        })
    };

    log::debug!(
        target: "tiny_mp3::batch",
        "Batch {}: converting {} -> {}",
        run.id,
        request.input_path.display(),
        output_path.display()
    );

    let result = catch_unwind(AssertUnwindSafe(|| {
        shared.transcoder.run(
            &request.input_path,
            output_path,
            &run.options,
            on_progress,
            &run.cancel,
        )
    }));

    match result {
        _ if run.cancel.is_cancelled() => (Outcome::Cancelled, Some(AppError::Cancelled.to_string())),
        Ok(Ok(())) => {
            if run.options.delete_original {
                delete_file_safely(&request.input_path);
            }
            (Outcome::Succeeded, None)
        }
        Ok(Err(e)) if e.is_cancelled() => (Outcome::Cancelled, Some(e.to_string())),
        Ok(Err(e)) => {
            log::error!(
                target: "tiny_mp3::batch",
                "Conversion failed for {}: {}",
                request.input_path.display(),
                e
            );
            (Outcome::Failed, Some(e.to_string()))
        }
        Err(payload) => {
            let message = format!("Transcoder panicked: {}", panic_message(payload.as_ref()));
            log::error!(
                target: "tiny_mp3::batch",
                "{} ({})",
                message,
                request.input_path.display()
            );
            (Outcome::Failed, Some(message))
        }
    }
}

fn finish_file(
    shared: &Arc<Shared>,
    run: &Arc<BatchRun>,
    request: ConversionRequest,
    output_path: PathBuf,
    outcome: Outcome,
    message: Option<String>,
) {
    {
        let mut state = run.state.lock();
        state.completed += 1;
        if outcome.is_success() {
            state.succeeded += 1;
        }
    }

    log::info!(
        target: "tiny_mp3::batch",
        "Batch {}: {} {:?}",
        run.id,
        request.display_name,
        outcome
    );
    shared.events.emit(BatchEvent::FileCompleted {
        batch_id: run.id,
        file_name: request.display_name,
        input_path: request.input_path,
        output_path,
        outcome,
        success: outcome.is_success(),
        message,
    });

    let finished = {
        let mut state = run.state.lock();
        state.announced += 1;
        if state.announced == state.total {
            state.in_progress = false;
            Some((state.succeeded, state.total))
        } else {
            None
        }
    };
    if let Some((succeeded, total)) = finished {
        log::info!(
            target: "tiny_mp3::batch",
            "Batch {} finished: {}/{} succeeded",
            run.id,
            succeeded,
            total
        );
        shared.events.emit(BatchEvent::AllCompleted {
            batch_id: run.id,
            succeeded,
            total,
            output_directory: run.options.output_directory.clone(),
        });
    }
}
