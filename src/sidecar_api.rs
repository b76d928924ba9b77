//! Request handlers behind the `tiny-mp3-sidecar` JSON-lines protocol.
//!
//! The binary owns stdin/stdout; everything here works on `serde_json::Value`
//! params and results so it can be driven directly from tests.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::batch::{
    BatchCoordinator, BatchEvent, BatchEventEmitter, BatchHandle, BatchStatus, ConversionRequest,
    StartOutcome,
};
use crate::error::AppError;
use crate::ffmpeg::discovery::get_ffprobe_path;
use crate::ffmpeg::ffprobe::{MediaMetadata, get_media_metadata};
use crate::ffmpeg::{
    Bitrate, ConversionOptions, FfmpegTranscoder, Transcoder, build_ffmpeg_command,
    format_args_for_display_multiline,
};
use crate::files::{
    FileInfo, SUPPORTED_EXTENSIONS, get_file_info, validate_input_files, validate_single_file,
};
use crate::settings::{NAMING_PATTERNS, Settings, SettingsStore};

const PROTOCOL_VERSION: u8 = 1;

type TranscoderFactory = Box<dyn Fn() -> Result<Arc<dyn Transcoder>, AppError> + Send + Sync>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BitrateInfo {
    pub kbps: u32,
    pub description: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamingPatternInfo {
    pub pattern: &'static str,
    pub example: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilitiesResult {
    pub protocol_version: u8,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffmpeg_version: Option<String>,
    pub ffprobe_available: bool,
    pub bitrates: Vec<BitrateInfo>,
    pub supported_extensions: Vec<&'static str>,
    pub naming_patterns: Vec<NamingPatternInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateFilesResult {
    pub valid: Vec<PathBuf>,
    pub invalid: Vec<InvalidFile>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBatchResult {
    pub started: bool,
    pub batch_id: Option<u64>,
    pub accepted: usize,
    pub rejected: Vec<InvalidFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PathsParams {
    paths: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PathParams {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandPreviewParams {
    input_path: Option<String>,
    #[serde(default)]
    options: Option<ConversionOptions>,
    #[serde(default)]
    duration_secs: Option<f64>,
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::from(format!("Invalid params payload: {}", e)))
}

fn to_result_value<T: Serialize>(value: T, what: &str) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::from(format!("Failed to serialize {}: {}", what, e)))
}

pub fn app_capabilities() -> AppCapabilitiesResult {
    let transcoder = FfmpegTranscoder::locate().ok();
    AppCapabilitiesResult {
        protocol_version: PROTOCOL_VERSION,
        ffmpeg_path: transcoder.as_ref().map(|t| t.ffmpeg_path().to_path_buf()),
        ffmpeg_version: transcoder.as_ref().and_then(|t| t.version()),
        ffprobe_available: transcoder
            .as_ref()
            .is_some_and(|t| t.ffprobe_path().is_some()),
        bitrates: Bitrate::ALL
            .into_iter()
            .map(|b| BitrateInfo {
                kbps: b.kbps(),
                description: b.description(),
            })
            .collect(),
        supported_extensions: SUPPORTED_EXTENSIONS.to_vec(),
        naming_patterns: NAMING_PATTERNS
            .into_iter()
            .map(|(pattern, example)| NamingPatternInfo { pattern, example })
            .collect(),
    }
}

pub fn validate_files(paths: &[PathBuf]) -> ValidateFilesResult {
    let (valid, invalid) = validate_input_files(paths);
    let invalid = invalid
        .into_iter()
        .map(|path| {
            let reason = match validate_single_file(&path) {
                Err(AppError::Validation { message, .. }) => message,
                Err(e) => e.to_string(),
                Ok(_) => "File changed during validation".to_string(),
            };
            InvalidFile { path, reason }
        })
        .collect();
    ValidateFilesResult { valid, invalid }
}

pub fn inspect_files(paths: &[PathBuf]) -> Vec<FileInfo> {
    paths.iter().map(|p| get_file_info(p)).collect()
}

pub fn media_metadata(path: &Path) -> Result<MediaMetadata, AppError> {
    let ffprobe = get_ffprobe_path()?;
    get_media_metadata(&ffprobe, path)
}

pub fn preview_ffmpeg_command(
    options: &ConversionOptions,
    input_path: Option<&str>,
    duration_secs: Option<f64>,
) -> String {
    let input = input_path.unwrap_or("<input>");
    let args = build_ffmpeg_command(input, "<output>", options, duration_secs);
    format!("ffmpeg\n{}", format_args_for_display_multiline(&args))
}

/// Best-effort "reveal in file manager".
fn open_folder(dir: &Path) {
    #[cfg(target_os = "macos")]
    let opener = "open";
    #[cfg(target_os = "windows")]
    let opener = "explorer";
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let opener = "xdg-open";

    if let Err(e) = Command::new(opener).arg(dir).spawn() {
        log::warn!(
            target: "tiny_mp3::sidecar",
            "Could not open {}: {}",
            dir.display(),
            e
        );
    }
}

/// Long-lived sidecar state: settings plus a lazily created batch coordinator.
pub struct Sidecar {
    settings: Arc<SettingsStore>,
    emitter: BatchEventEmitter,
    transcoder_factory: TranscoderFactory,
    coordinator: Mutex<Option<Arc<BatchCoordinator>>>,
    handles: Mutex<Vec<BatchHandle>>,
}

impl Sidecar {
    /// FFmpeg is located on the first `batch.start`, not here.
    pub fn new(settings: SettingsStore, emitter: BatchEventEmitter) -> Self {
        Self::with_transcoder_factory(
            settings,
            emitter,
            Box::new(|| Ok(Arc::new(FfmpegTranscoder::locate()?) as Arc<dyn Transcoder>)),
        )
    }

    pub fn with_transcoder(
        settings: SettingsStore,
        emitter: BatchEventEmitter,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self::with_transcoder_factory(
            settings,
            emitter,
            Box::new(move || Ok(Arc::clone(&transcoder))),
        )
    }

    fn with_transcoder_factory(
        settings: SettingsStore,
        emitter: BatchEventEmitter,
        transcoder_factory: TranscoderFactory,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            emitter,
            transcoder_factory,
            coordinator: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> Settings {
        self.settings.get()
    }

    fn coordinator(&self) -> Result<Arc<BatchCoordinator>, AppError> {
        let mut guard = self.coordinator.lock();
        if let Some(existing) = guard.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let coordinator = Arc::new(BatchCoordinator::new((self.transcoder_factory)()?));
        coordinator.subscribe(Arc::clone(&self.emitter));

        let settings = Arc::clone(&self.settings);
        coordinator.subscribe(Arc::new(move |event: &BatchEvent| {
            if let BatchEvent::AllCompleted {
                succeeded,
                output_directory,
                ..
            } = event
                && *succeeded > 0
                && settings.get().auto_open_folder
            {
                open_folder(output_directory);
            }
        }));

        *guard = Some(Arc::clone(&coordinator));
        Ok(coordinator)
    }

    pub fn start_batch(&self, paths: &[PathBuf]) -> Result<StartBatchResult, AppError> {
        let coordinator = self.coordinator()?;
        let validated = validate_files(paths);
        let requests: Vec<ConversionRequest> = validated
            .valid
            .iter()
            .cloned()
            .map(ConversionRequest::new)
            .collect();
        let accepted = requests.len();
        let options = self.settings.get().conversion_options();

        let result = match coordinator.start(requests, options)? {
            StartOutcome::Started(handle) => {
                let batch_id = handle.batch_id();
                let mut handles = self.handles.lock();
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
                StartBatchResult {
                    started: true,
                    batch_id: Some(batch_id),
                    accepted,
                    rejected: validated.invalid,
                }
            }
            StartOutcome::AlreadyRunning => StartBatchResult {
                started: false,
                batch_id: coordinator.status().batch_id,
                accepted: 0,
                rejected: validated.invalid,
            },
        };
        Ok(result)
    }

    pub fn cancel_batch(&self) -> bool {
        self.coordinator
            .lock()
            .as_ref()
            .is_some_and(|c| c.cancel())
    }

    pub fn batch_status(&self) -> BatchStatus {
        self.coordinator
            .lock()
            .as_ref()
            .map_or_else(BatchStatus::idle, |c| c.status())
    }

    /// Blocks until the workers of every started batch have exited.
    pub fn wait_for_batches(&self) {
        let handles: Vec<BatchHandle> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            handle.join();
        }
    }

    /// Cancels any running batch and waits for every worker to exit.
    pub fn shutdown(&self) {
        if self.cancel_batch() {
            log::info!(target: "tiny_mp3::sidecar", "Cancelled running batch on shutdown");
        }
        self.wait_for_batches();
    }

    pub fn dispatch(&self, method: &str, params: Value) -> Result<Value, AppError> {
        log::debug!(target: "tiny_mp3::sidecar", "dispatch {}", method);
        match method {
            "app.capabilities" => to_result_value(app_capabilities(), "app capabilities"),
            "files.validate" => {
                let parsed: PathsParams = params_from_value(params)?;
                to_result_value(validate_files(&parsed.paths), "validation result")
            }
            "files.inspect" => {
                let parsed: PathsParams = params_from_value(params)?;
                to_result_value(inspect_files(&parsed.paths), "file info")
            }
            "media.inspect" => {
                let parsed: PathParams = params_from_value(params)?;
                to_result_value(media_metadata(&parsed.path)?, "metadata")
            }
            "command.preview" => {
                let parsed: CommandPreviewParams = params_from_value(params)?;
                let options = parsed
                    .options
                    .unwrap_or_else(|| self.settings.get().conversion_options());
                Ok(Value::String(preview_ffmpeg_command(
                    &options,
                    parsed.input_path.as_deref(),
                    parsed.duration_secs,
                )))
            }
            "settings.get" => to_result_value(self.settings.get(), "settings"),
            "settings.update" => to_result_value(self.settings.update(params)?, "settings"),
            "settings.reset" => to_result_value(self.settings.reset()?, "settings"),
            "settings.import" => {
                let parsed: PathParams = params_from_value(params)?;
                to_result_value(self.settings.import(&parsed.path)?, "settings")
            }
            "settings.export" => {
                let parsed: PathParams = params_from_value(params)?;
                self.settings.export(&parsed.path)?;
                Ok(json!({ "exported": true, "path": parsed.path }))
            }
            "batch.start" => {
                let parsed: PathsParams = params_from_value(params)?;
                to_result_value(self.start_batch(&parsed.paths)?, "batch start result")
            }
            "batch.cancel" => Ok(json!({ "cancelled": self.cancel_batch() })),
            "batch.status" => to_result_value(self.batch_status(), "batch status"),
            _ => Err(AppError::from(format!("Unknown method: {}", method))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::CancellationToken;
    use crate::ffmpeg::ProgressCallback;
    use parking_lot::Condvar;
    use std::fs;

    struct InstantTranscoder;

    impl Transcoder for InstantTranscoder {
        fn run(
            &self,
            _input: &Path,
            output: &Path,
            _options: &ConversionOptions,
            on_progress: ProgressCallback,
            _cancel: &CancellationToken,
        ) -> Result<(), AppError> {
            on_progress(100);
            fs::write(output, b"ID3")?;
            Ok(())
        }
    }

    /// Blocks every conversion until `release` is called.
    #[derive(Default)]
    struct HeldTranscoder {
        held: Mutex<bool>,
        cv: Condvar,
    }

    impl HeldTranscoder {
        fn holding() -> Arc<Self> {
            let t = Arc::new(Self::default());
            *t.held.lock() = true;
            t
        }

        fn release(&self) {
            *self.held.lock() = false;
            self.cv.notify_all();
        }
    }

    impl Transcoder for HeldTranscoder {
        fn run(
            &self,
            input: &Path,
            output: &Path,
            options: &ConversionOptions,
            on_progress: ProgressCallback,
            cancel: &CancellationToken,
        ) -> Result<(), AppError> {
            let mut held = self.held.lock();
            while *held {
                self.cv.wait(&mut held);
            }
            drop(held);
            InstantTranscoder.run(input, output, options, on_progress, cancel)
        }
    }

    type Events = Arc<Mutex<Vec<BatchEvent>>>;

    fn sidecar_with(dir: &Path, transcoder: Arc<dyn Transcoder>) -> (Sidecar, Events) {
        let events: Events = Arc::default();
        let sink = Arc::clone(&events);
        let store = SettingsStore::open(dir.join("settings.json"));
        store
            .update(json!({
                "outputDirectory": dir.join("out"),
                "autoOpenFolder": false
            }))
            .unwrap();
        let sidecar = Sidecar::with_transcoder(
            store,
            Arc::new(move |e: &BatchEvent| sink.lock().push(e.clone())),
            transcoder,
        );
        (sidecar, events)
    }

    fn sidecar(dir: &Path) -> (Sidecar, Events) {
        sidecar_with(dir, Arc::new(InstantTranscoder))
    }

    /// Points `outputDirectory` below a regular file so it can never be created.
    fn block_output_directory(sidecar: &Sidecar, dir: &Path) -> PathBuf {
        let blocker = dir.join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();
        let unusable = blocker.join("sub");
        sidecar
            .dispatch("settings.update", json!({ "outputDirectory": unusable }))
            .unwrap();
        unusable
    }

    fn video(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, vec![1u8; 2048]).unwrap();
        path
    }

    #[test]
    fn unknown_method_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let (sidecar, _) = sidecar(dir.path());
        let err = sidecar.dispatch("media.explode", Value::Null).unwrap_err();
        assert!(err.to_string().contains("Unknown method"));
    }

    #[test]
    fn files_validate_reports_reasons() {
        let dir = tempfile::tempdir().unwrap();
        let (sidecar, _) = sidecar(dir.path());
        let good = video(dir.path(), "good.mp4");
        let bad = video(dir.path(), "notes.txt");
        let result = sidecar
            .dispatch("files.validate", json!({ "paths": [good, bad] }))
            .unwrap();
        assert_eq!(result["valid"], json!([good]));
        assert_eq!(result["invalid"][0]["path"], json!(bad));
        assert!(
            result["invalid"][0]["reason"]
                .as_str()
                .unwrap()
                .contains("Unsupported")
        );
    }

    #[test]
    fn bad_params_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (sidecar, _) = sidecar(dir.path());
        let err = sidecar
            .dispatch("files.inspect", json!({ "wrong": 1 }))
            .unwrap_err();
        assert!(err.to_string().contains("Invalid params payload"));
    }

    #[test]
    fn command_preview_uses_settings_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (sidecar, _) = sidecar(dir.path());
        sidecar
            .dispatch("settings.update", json!({ "audioQuality": 320 }))
            .unwrap();
        let preview = sidecar
            .dispatch("command.preview", json!({ "inputPath": "in.mp4" }))
            .unwrap();
        let text = preview.as_str().unwrap();
        assert!(text.starts_with("ffmpeg\n"));
        assert!(text.contains("320k"));
        assert!(text.contains("in.mp4"));
    }

    #[test]
    fn settings_round_trip_through_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let (sidecar, _) = sidecar(dir.path());
        let updated = sidecar
            .dispatch("settings.update", json!({ "outputSuffix": "_a" }))
            .unwrap();
        assert_eq!(updated["outputSuffix"], "_a");
        let export = dir.path().join("exported.json");
        sidecar
            .dispatch("settings.export", json!({ "path": export }))
            .unwrap();
        let reset = sidecar.dispatch("settings.reset", Value::Null).unwrap();
        assert_eq!(reset["outputSuffix"], "_converted");
        let imported = sidecar
            .dispatch("settings.import", json!({ "path": export }))
            .unwrap();
        assert_eq!(imported["outputSuffix"], "_a");
    }

    #[test]
    fn batch_start_skips_invalid_files_and_completes() {
        let dir = tempfile::tempdir().unwrap();
        let (sidecar, events) = sidecar(dir.path());
        let a = video(dir.path(), "a.mp4");
        let b = video(dir.path(), "b.mov");
        let junk = video(dir.path(), "junk.doc");

        let result = sidecar
            .dispatch("batch.start", json!({ "paths": [a, junk, b] }))
            .unwrap();
        assert_eq!(result["started"], true);
        assert_eq!(result["accepted"], 2);
        assert_eq!(result["rejected"].as_array().unwrap().len(), 1);
        sidecar.wait_for_batches();

        assert!(dir.path().join("out").join("a_converted.mp3").exists());
        assert!(dir.path().join("out").join("b_converted.mp3").exists());
        let status = sidecar.dispatch("batch.status", Value::Null).unwrap();
        assert_eq!(status["completed"], 2);
        assert_eq!(status["running"], false);
        assert!(
            events
                .lock()
                .iter()
                .any(|e| matches!(e, BatchEvent::AllCompleted { succeeded: 2, total: 2, .. }))
        );
    }

    #[test]
    fn batch_start_with_no_valid_files_is_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (sidecar, events) = sidecar(dir.path());
        let junk = video(dir.path(), "junk.doc");
        let err = sidecar
            .dispatch("batch.start", json!({ "paths": [junk] }))
            .unwrap_err();
        assert!(matches!(err, AppError::EmptyBatch));
        assert_eq!(events.lock().len(), 1);
        assert_eq!(events.lock()[0].name(), "batch.error");
    }

    #[test]
    fn cancel_and_status_before_any_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (sidecar, events) = sidecar(dir.path());
        let cancelled = sidecar.dispatch("batch.cancel", Value::Null).unwrap();
        assert_eq!(cancelled["cancelled"], false);
        let status = sidecar.dispatch("batch.status", Value::Null).unwrap();
        assert_eq!(status["running"], false);
        assert_eq!(status["batchId"], Value::Null);
        assert!(events.lock().is_empty());
    }

    #[test]
    fn unusable_output_directory_rejects_start_with_error_event() {
        let dir = tempfile::tempdir().unwrap();
        let (sidecar, events) = sidecar(dir.path());
        let unusable = block_output_directory(&sidecar, dir.path());
        let a = video(dir.path(), "a.mp4");

        let err = sidecar
            .dispatch("batch.start", json!({ "paths": [a] }))
            .unwrap_err();
        assert!(matches!(err, AppError::OutputDirectory(ref p) if *p == unusable));
        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], BatchEvent::Error { batch_id: None, .. }));
        assert_eq!(sidecar.batch_status().batch_id, None);
    }

    #[test]
    fn no_valid_files_is_empty_batch_even_with_unusable_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (sidecar, events) = sidecar(dir.path());
        block_output_directory(&sidecar, dir.path());
        let junk = video(dir.path(), "junk.doc");

        let err = sidecar
            .dispatch("batch.start", json!({ "paths": [junk] }))
            .unwrap_err();
        assert!(matches!(err, AppError::EmptyBatch));
        assert_eq!(events.lock()[0].name(), "batch.error");
    }

    #[test]
    fn batch_start_while_running_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let held = HeldTranscoder::holding();
        let (sidecar, events) =
            sidecar_with(dir.path(), Arc::clone(&held) as Arc<dyn Transcoder>);
        let a = video(dir.path(), "a.mp4");
        let b = video(dir.path(), "b.mp4");

        let first = sidecar
            .dispatch("batch.start", json!({ "paths": [a] }))
            .unwrap();
        assert_eq!(first["started"], true);

        block_output_directory(&sidecar, dir.path());
        let second = sidecar
            .dispatch("batch.start", json!({ "paths": [b] }))
            .unwrap();
        assert_eq!(second["started"], false);
        assert_eq!(second["batchId"], first["batchId"]);
        assert_eq!(second["accepted"], 0);

        held.release();
        sidecar.wait_for_batches();
        let events = events.lock();
        assert_eq!(events.iter().filter(|e| e.name() == "batch.started").count(), 1);
        assert_eq!(events.iter().filter(|e| e.name() == "batch.error").count(), 0);
    }

    #[test]
    fn all_completed_names_the_directory_the_batch_wrote_to() {
        let dir = tempfile::tempdir().unwrap();
        let held = HeldTranscoder::holding();
        let (sidecar, events) =
            sidecar_with(dir.path(), Arc::clone(&held) as Arc<dyn Transcoder>);
        let a = video(dir.path(), "a.mp4");

        sidecar
            .dispatch("batch.start", json!({ "paths": [a] }))
            .unwrap();
        let elsewhere = dir.path().join("elsewhere");
        sidecar
            .dispatch("settings.update", json!({ "outputDirectory": elsewhere }))
            .unwrap();
        held.release();
        sidecar.wait_for_batches();

        let written_to = events.lock().iter().find_map(|e| match e {
            BatchEvent::AllCompleted {
                output_directory, ..
            } => Some(output_directory.clone()),
            _ => None,
        });
        assert_eq!(written_to, Some(dir.path().join("out")));
        assert!(dir.path().join("out").join("a_converted.mp3").exists());
        assert!(!dir.path().join("elsewhere").exists());
    }
}
