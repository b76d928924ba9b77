//! Test-only wrappers exposed for integration test targets.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::batch::{BatchCoordinator, BatchEvent, BatchStatus, ConversionRequest, StartOutcome};
use crate::error::AppError;
use crate::ffmpeg::discovery::get_ffprobe_path;
use crate::ffmpeg::ffprobe::{MediaMetadata, get_media_metadata};
use crate::ffmpeg::{ConversionOptions, FfmpegTranscoder, Transcoder};

#[derive(Debug, Clone)]
pub struct BatchRunForTest {
    pub events: Vec<BatchEvent>,
    pub status: BatchStatus,
}

impl BatchRunForTest {
    pub fn progress_for(&self, file_name: &str) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::Progress {
                    file_name: name,
                    progress,
                    ..
                } if name == file_name => Some(*progress),
                _ => None,
            })
            .collect()
    }

    pub fn all_completed(&self) -> Option<(usize, usize)> {
        self.events.iter().find_map(|e| match e {
            BatchEvent::AllCompleted {
                succeeded, total, ..
            } => Some((*succeeded, *total)),
            _ => None,
        })
    }
}

/// Runs a whole batch through real FFmpeg and waits for it.
pub fn run_batch_for_test(
    paths: &[PathBuf],
    options: ConversionOptions,
) -> Result<BatchRunForTest, AppError> {
    let transcoder: Arc<dyn Transcoder> = Arc::new(FfmpegTranscoder::locate()?);
    let coordinator = BatchCoordinator::new(transcoder);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    coordinator.subscribe(Arc::new(move |e: &BatchEvent| sink.lock().push(e.clone())));

    let requests = paths.iter().cloned().map(ConversionRequest::new).collect();
    match coordinator.start(requests, options)? {
        StartOutcome::Started(handle) => handle.join(),
        StartOutcome::AlreadyRunning => {
            return Err(AppError::from("fresh coordinator reported a running batch"));
        }
    }

    let events = events.lock().clone();
    Ok(BatchRunForTest {
        events,
        status: coordinator.status(),
    })
}

pub fn probe_for_test(path: &Path) -> Result<MediaMetadata, AppError> {
    get_media_metadata(&get_ffprobe_path()?, path)
}
