//! FFmpeg process spawning and output collection.
//!
//! Spawns FFmpeg as a child process and drains stdout/stderr on background
//! threads while the calling worker thread reports progress. Stderr is kept
//! (bounded) as the diagnostic text for failures. The child is never killed
//! here: cancellation only stops progress reporting, the process runs to exit.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};

#[cfg(windows)]
use std::os::windows::process::CommandExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::thread;

use parking_lot::Mutex;

use super::error::stderr_tail;
use super::progress::{SyntheticRamp, parse_ffmpeg_progress};
use super::{ProgressCallback, ProgressMode};
use crate::batch::CancellationToken;
use crate::error::AppError;

/// Sentinel for "duration not yet known". AtomicU64 cannot hold Option<f64>,
/// so we encode duration as f64 bits; u64::MAX means "not yet known".
const NONE_DURATION_BITS: u64 = u64::MAX;
/// Keep only the last N bytes of stderr to avoid unbounded memory growth.
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// Configuration for FFmpeg output stream reading (stdout or stderr).
struct ReadStreamConfig {
    collect_stderr: Option<Arc<Mutex<Vec<u8>>>>,
    duration: Arc<AtomicU64>,
    /// Set only in ffmpeg progress mode.
    progress: Option<(ProgressCallback, Arc<AtomicU8>, CancellationToken)>,
}

fn load_duration(duration: &AtomicU64) -> Option<f64> {
    let bits = duration.load(Ordering::Relaxed);
    (bits != NONE_DURATION_BITS).then(|| f64::from_bits(bits))
}

/// Reports `percent` unless it would move backwards or the batch was cancelled.
fn report_monotonic(cb: &ProgressCallback, last: &AtomicU8, percent: u8, cancel: &CancellationToken) {
    if cancel.is_cancelled() {
        return;
    }
    let previous = last.fetch_max(percent, Ordering::AcqRel);
    if percent > previous {
        cb(percent);
    }
}

fn read_stream<R: std::io::Read + Send + 'static>(
    reader: R,
    config: ReadStreamConfig,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut current_duration = load_duration(&config.duration);
        let mut stream_reader = BufReader::new(reader);
        let mut line_buf = Vec::with_capacity(256);
        while stream_reader.read_until(b'\n', &mut line_buf).unwrap_or(0) > 0 {
            let line = String::from_utf8_lossy(&line_buf);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(ref buf) = config.collect_stderr {
                let mut guard = buf.lock();
                guard.extend_from_slice(line.as_bytes());
                guard.push(b'\n');
                if guard.len() > MAX_STDERR_BYTES {
                    let excess = guard.len() - MAX_STDERR_BYTES;
                    guard.drain(..excess);
                }
            }
            if current_duration.is_none() {
                current_duration = load_duration(&config.duration);
            }
            let (progress, d) = parse_ffmpeg_progress(line, current_duration);
            if let Some(new_dur) = d
                && current_duration != Some(new_dur)
            {
                current_duration = Some(new_dur);
                config.duration.store(new_dur.to_bits(), Ordering::Relaxed);
            }
            if let (Some(p), Some((cb, last, cancel))) = (progress, config.progress.as_ref()) {
                let percent = (p * 100.0).floor().clamp(0.0, 100.0) as u8;
                report_monotonic(cb, last, percent, cancel);
            }
            line_buf.clear();
        }
    })
}

/// Run FFmpeg at `ffmpeg` and block until it exits.
///
/// Progress:
/// - `ProgressMode::Synthetic`: the calling thread runs a fixed ramp (0..=100) while
///   the process works; the values say nothing about the real state of the conversion.
/// - `ProgressMode::Ffmpeg`: percentages come from `out_time_ms` lines on stdout
///   (the args must carry `-progress pipe:1`), measured against `duration_secs`
///   or the `Duration:` banner on stderr. A final 100 is reported on success.
///
/// Once `cancel` fires no further progress is reported, but the process is still
/// awaited and its exit status returned.
pub fn run_ffmpeg_blocking(
    ffmpeg: &Path,
    args: Vec<String>,
    progress_mode: ProgressMode,
    duration_secs: Option<f64>,
    on_progress: Option<ProgressCallback>,
    cancel: &CancellationToken,
) -> Result<(), AppError> {
    let input_arg = args
        .iter()
        .position(|a| a == "-i")
        .and_then(|i| args.get(i + 1));
    let output_arg = args.last();
    log::debug!(
        target: "tiny_mp3::ffmpeg::runner",
        "Spawning FFmpeg: path={}, input={:?}, output={:?}",
        ffmpeg.display(),
        input_arg,
        output_arg
    );

    let mut cmd = Command::new(ffmpeg);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let mut child = cmd
        .spawn()
        .map_err(|e| AppError::external_tool(-1, format!("Failed to spawn FFmpeg: {}", e)))?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(AppError::external_tool(-1, "Failed to capture FFmpeg output"));
    };

    let duration = Arc::new(AtomicU64::new(
        duration_secs
            .filter(|&d| d > 0.0)
            .map(f64::to_bits)
            .unwrap_or(NONE_DURATION_BITS),
    ));
    let stderr_buffer = Arc::new(Mutex::new(Vec::new()));
    let last_percent = Arc::new(AtomicU8::new(0));

    let parsed_progress = match (progress_mode, on_progress.as_ref()) {
        (ProgressMode::Ffmpeg, Some(cb)) => {
            if !cancel.is_cancelled() {
                cb(0);
            }
            Some((Arc::clone(cb), Arc::clone(&last_percent), cancel.clone()))
        }
        _ => None,
    };

    let stdout_handle = read_stream(
        stdout,
        ReadStreamConfig {
            collect_stderr: None,
            duration: Arc::clone(&duration),
            progress: parsed_progress,
        },
    );
    let stderr_handle = read_stream(
        stderr,
        ReadStreamConfig {
            collect_stderr: Some(Arc::clone(&stderr_buffer)),
            duration: Arc::clone(&duration),
            progress: None,
        },
    );

    if let (ProgressMode::Synthetic, Some(cb)) = (progress_mode, on_progress.as_ref()) {
        let reported = SyntheticRamp::default().run(&|p| cb(p), cancel);
        last_percent.store(reported, Ordering::Release);
    }

    let _ = stdout_handle.join();
    let _ = stderr_handle.join();
    let status = child.wait()?;

    let stderr_bytes = stderr_buffer.lock().clone();
    let stderr_str = String::from_utf8_lossy(&stderr_bytes).to_string();

    if status.success() {
        if let Some(cb) = on_progress.as_ref() {
            report_monotonic(cb, &last_percent, 100, cancel);
        }
        log::info!(
            target: "tiny_mp3::ffmpeg::runner",
            "FFmpeg completed successfully"
        );
        Ok(())
    } else {
        let code = status.code().unwrap_or(-1);
        log::error!(
            target: "tiny_mp3::ffmpeg::runner",
            "FFmpeg failed (code={}): {}",
            code,
            stderr_tail(&stderr_str, 3)
        );
        Err(AppError::ExternalTool {
            code,
            stderr: stderr_str,
        })
    }
}
