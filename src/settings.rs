//! Persisted user settings and the per-batch `ConversionOptions` snapshot.
//!
//! Stored as pretty JSON with camelCase keys. Missing keys take their defaults and
//! unknown keys are ignored, so older or hand-edited files keep loading.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::ffmpeg::{Bitrate, ConversionOptions, DEFAULT_MAX_CONCURRENCY, ProgressMode};

pub const SETTINGS_PATH_ENV: &str = "TINY_MP3_SETTINGS";
pub const MAX_CONCURRENCY_LIMIT: usize = 8;

/// Naming patterns offered in the settings UI, with an example of the result.
pub const NAMING_PATTERNS: [(&str, &str); 4] = [
    ("{original}_converted", "video_converted.mp3"),
    ("{original}_audio", "video_audio.mp3"),
    ("{original}", "video.mp3"),
    ("converted_{original}", "converted_video.mp3"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub audio_quality: Bitrate,
    pub output_suffix: String,
    pub auto_open_folder: bool,
    pub delete_original: bool,
    pub max_concurrent_conversions: usize,
    /// None means the default folder on the desktop.
    pub output_directory: Option<PathBuf>,
    pub file_naming_pattern: String,
    pub preserve_metadata: bool,
    pub volume_normalization: bool,
    pub fade_in: f64,
    pub fade_out: f64,
    pub progress_mode: ProgressMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            audio_quality: Bitrate::default(),
            output_suffix: "_converted".to_string(),
            auto_open_folder: true,
            delete_original: false,
            max_concurrent_conversions: DEFAULT_MAX_CONCURRENCY,
            output_directory: None,
            file_naming_pattern: "{original}_converted".to_string(),
            preserve_metadata: true,
            volume_normalization: false,
            fade_in: 0.0,
            fade_out: 0.0,
            progress_mode: ProgressMode::default(),
        }
    }
}

/// `~/Desktop/MP3_Conversions`, falling back to the working directory without a home.
pub fn default_output_directory() -> PathBuf {
    dirs_next::desktop_dir()
        .or_else(|| dirs_next::home_dir().map(|home| home.join("Desktop")))
        .map(|desktop| desktop.join("MP3_Conversions"))
        .unwrap_or_else(|| PathBuf::from("MP3_Conversions"))
}

/// `TINY_MP3_SETTINGS` if set, else `~/.tiny-mp3/settings.json`.
pub fn default_settings_path() -> PathBuf {
    if let Some(path) = std::env::var_os(SETTINGS_PATH_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tiny-mp3")
        .join("settings.json")
}

impl Settings {
    pub fn validate(&self) -> Result<(), AppError> {
        if !(1..=MAX_CONCURRENCY_LIMIT).contains(&self.max_concurrent_conversions) {
            return Err(AppError::Settings(format!(
                "maxConcurrentConversions must be between 1 and {}, got {}",
                MAX_CONCURRENCY_LIMIT, self.max_concurrent_conversions
            )));
        }
        self.conversion_options().validate()
    }

    pub fn output_directory(&self) -> PathBuf {
        self.output_directory
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(default_output_directory)
    }

    /// Snapshot handed to the batch coordinator at start.
    pub fn conversion_options(&self) -> ConversionOptions {
        ConversionOptions {
            bitrate: self.audio_quality,
            preserve_metadata: self.preserve_metadata,
            normalize_volume: self.volume_normalization,
            fade_in_seconds: self.fade_in,
            fade_out_seconds: self.fade_out,
            output_naming_pattern: self.file_naming_pattern.clone(),
            output_suffix: self.output_suffix.clone(),
            max_concurrency: self.max_concurrent_conversions,
            output_directory: self.output_directory(),
            delete_original: self.delete_original,
            progress_mode: self.progress_mode,
            ..ConversionOptions::default()
        }
    }

    /// Overlays the keys present in `patch` onto `self`.
    fn merged(&self, patch: Value) -> Result<Settings, AppError> {
        let Value::Object(patch) = patch else {
            return Err(AppError::Settings("expected a JSON object".to_string()));
        };
        let mut base = serde_json::to_value(self)
            .map_err(|e| AppError::Settings(format!("serialize settings: {}", e)))?;
        if let Value::Object(base) = &mut base {
            base.extend(patch);
        }
        let merged: Settings =
            serde_json::from_value(base).map_err(|e| AppError::Settings(e.to_string()))?;
        merged.validate()?;
        Ok(merged)
    }
}

fn read_settings_file(path: &Path) -> Result<Value, AppError> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| AppError::Settings(format!("{}: {}", path.display(), e)))
}

fn write_settings_file(path: &Path, settings: &Settings) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| AppError::Settings(format!("serialize settings: {}", e)))?;
    fs::write(path, json)?;
    Ok(())
}

/// Settings file plus the in-memory copy. Every successful change is written through.
pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<Settings>,
}

impl SettingsStore {
    /// Loads `path`. A missing file yields defaults; an unreadable or invalid
    /// one is logged and replaced by defaults on the next save.
    pub fn open(path: PathBuf) -> Self {
        let settings = if path.exists() {
            match read_settings_file(&path).and_then(|v| Settings::default().merged(v)) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!(
                        target: "tiny_mp3::settings",
                        "Ignoring settings file {}: {}",
                        path.display(),
                        e
                    );
                    Settings::default()
                }
            }
        } else {
            Settings::default()
        };
        log::debug!(
            target: "tiny_mp3::settings",
            "Settings loaded from {}",
            path.display()
        );
        Self {
            path,
            current: RwLock::new(settings),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Settings {
        self.current.read().clone()
    }

    fn replace(&self, settings: Settings) -> Result<Settings, AppError> {
        write_settings_file(&self.path, &settings)?;
        *self.current.write() = settings.clone();
        Ok(settings)
    }

    /// Applies a partial camelCase object. Nothing changes if the result is invalid.
    pub fn update(&self, patch: Value) -> Result<Settings, AppError> {
        let merged = self.get().merged(patch)?;
        log::info!(target: "tiny_mp3::settings", "Settings updated");
        self.replace(merged)
    }

    pub fn reset(&self) -> Result<Settings, AppError> {
        log::info!(target: "tiny_mp3::settings", "Settings reset to defaults");
        self.replace(Settings::default())
    }

    /// Applies the known keys from a previously exported file.
    pub fn import(&self, path: &Path) -> Result<Settings, AppError> {
        let patch = read_settings_file(path)?;
        let merged = self.get().merged(patch)?;
        log::info!(
            target: "tiny_mp3::settings",
            "Settings imported from {}",
            path.display()
        );
        self.replace(merged)
    }

    pub fn export(&self, path: &Path) -> Result<(), AppError> {
        write_settings_file(path, &self.get())?;
        log::info!(
            target: "tiny_mp3::settings",
            "Settings exported to {}",
            path.display()
        );
        Ok(())
    }
}
