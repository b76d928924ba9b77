use std::fs;
use std::path::{Path, PathBuf};

use super::builder::build_ffmpeg_command;
use super::discovery::{ffmpeg_version, ffprobe_for, get_ffmpeg_path};
use super::disk::{check_disk_space, estimated_output_size};
use super::ffprobe::probe_duration;
use super::runner::run_ffmpeg_blocking;
use super::{ConversionOptions, ProgressCallback, path_to_string};
use crate::batch::CancellationToken;
use crate::error::AppError;

/// One blocking file conversion. The batch coordinator only talks to this seam,
/// so tests can substitute a scripted implementation for FFmpeg.
pub trait Transcoder: Send + Sync {
    fn run(
        &self,
        input: &Path,
        output: &Path,
        options: &ConversionOptions,
        on_progress: ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<(), AppError>;
}

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: Option<PathBuf>,
}

impl FfmpegTranscoder {
    /// Locates FFmpeg (and, if present, ffprobe next to it). Fails with `ToolNotFound`.
    pub fn locate() -> Result<Self, AppError> {
        Ok(Self::with_ffmpeg(get_ffmpeg_path()?.to_path_buf()))
    }

    pub fn with_ffmpeg(ffmpeg: PathBuf) -> Self {
        let ffprobe = match ffprobe_for(&ffmpeg) {
            Ok(p) => Some(p),
            Err(e) => {
                log::warn!(
                    target: "tiny_mp3::ffmpeg::transcoder",
                    "{}; fade-out will be skipped",
                    e
                );
                None
            }
        };
        Self { ffmpeg, ffprobe }
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }

    pub fn ffprobe_path(&self) -> Option<&Path> {
        self.ffprobe.as_deref()
    }

    pub fn version(&self) -> Option<String> {
        ffmpeg_version(&self.ffmpeg)
    }

    fn probe_duration(&self, input: &Path) -> Option<f64> {
        self.ffprobe
            .as_deref()
            .and_then(|probe| probe_duration(probe, input))
    }

    /// Full argument list for one conversion. Probes the media duration only when
    /// the options need it; without a duration, fade-out is dropped.
    pub fn build_command(
        &self,
        input: &Path,
        output: &Path,
        options: &ConversionOptions,
    ) -> (Vec<String>, Option<f64>) {
        let duration = if options.needs_duration() {
            self.probe_duration(input)
        } else {
            None
        };
        let args = build_ffmpeg_command(
            &path_to_string(input),
            &path_to_string(output),
            options,
            duration,
        );
        (args, duration)
    }
}

/// Input must be a non-empty, existing path; the output directory needs room for
/// roughly a tenth of the input. Returns the input size.
fn check_preconditions(input: &Path, output: &Path) -> Result<u64, AppError> {
    if input.as_os_str().is_empty() {
        return Err(AppError::validation(input, "Input file path is empty"));
    }
    let metadata = fs::metadata(input)
        .map_err(|_| AppError::validation(input, "Input file not found"))?;
    let input_size = metadata.len();

    let output_dir = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    check_disk_space(output_dir, estimated_output_size(input_size))?;
    Ok(input_size)
}

impl Transcoder for FfmpegTranscoder {
    fn run(
        &self,
        input: &Path,
        output: &Path,
        options: &ConversionOptions,
        on_progress: ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        let input_size = check_preconditions(input, output)?;
        let (args, duration) = self.build_command(input, output, options);

        log::info!(
            target: "tiny_mp3::ffmpeg::transcoder",
            "Starting conversion: {} ({} bytes) -> {}",
            input.display(),
            input_size,
            output.display()
        );

        run_ffmpeg_blocking(
            &self.ffmpeg,
            args,
            options.progress_mode,
            duration,
            Some(on_progress),
            cancel,
        )?;

        log::info!(
            target: "tiny_mp3::ffmpeg::transcoder",
            "Conversion completed successfully: {}",
            output.display()
        );
        Ok(())
    }
}
