mod builder;
pub mod discovery;
pub mod disk;
mod error;
pub mod ffprobe;
mod progress;
mod runner;
mod timeout;
mod transcoder;

pub use builder::{build_ffmpeg_command, format_args_for_display_multiline};
pub use error::{FfmpegErrorPayload, parse_ffmpeg_error, stderr_tail};
pub use progress::{SyntheticRamp, parse_ffmpeg_progress};
pub use runner::run_ffmpeg_blocking;
pub use transcoder::{FfmpegTranscoder, Transcoder};

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Receives conversion progress as a percentage in [0, 100].
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

pub const DEFAULT_CHANNELS: u32 = 2;
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// MP3 bitrates offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Bitrate {
    Kbps128,
    #[default]
    Kbps192,
    Kbps320,
}

impl Bitrate {
    pub const ALL: [Bitrate; 3] = [Bitrate::Kbps128, Bitrate::Kbps192, Bitrate::Kbps320];

    pub fn kbps(self) -> u32 {
        match self {
            Bitrate::Kbps128 => 128,
            Bitrate::Kbps192 => 192,
            Bitrate::Kbps320 => 320,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Bitrate::Kbps128 => "128 kbps - small files, standard quality",
            Bitrate::Kbps192 => "192 kbps - balanced quality",
            Bitrate::Kbps320 => "320 kbps - highest quality",
        }
    }
}

impl TryFrom<u32> for Bitrate {
    type Error = String;

    fn try_from(kbps: u32) -> Result<Self, Self::Error> {
        Bitrate::ALL
            .into_iter()
            .find(|b| b.kbps() == kbps)
            .ok_or_else(|| format!("unsupported bitrate {} kbps (expected 128, 192 or 320)", kbps))
    }
}

impl From<Bitrate> for u32 {
    fn from(b: Bitrate) -> Self {
        b.kbps()
    }
}

/// Where per-file progress numbers come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    /// Fixed time-based ramp, independent of what FFmpeg is doing.
    #[default]
    Synthetic,
    /// Parsed from FFmpeg's `-progress pipe:1` output.
    Ffmpeg,
}

/// Read-only snapshot of everything a conversion needs. Taken once per batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOptions {
    pub bitrate: Bitrate,
    pub channels: u32,
    pub sample_rate: u32,
    pub preserve_metadata: bool,
    pub normalize_volume: bool,
    pub fade_in_seconds: f64,
    pub fade_out_seconds: f64,
    pub output_naming_pattern: String,
    pub output_suffix: String,
    pub max_concurrency: usize,
    pub output_directory: PathBuf,
    pub delete_original: bool,
    pub progress_mode: ProgressMode,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            bitrate: Bitrate::default(),
            channels: DEFAULT_CHANNELS,
            sample_rate: DEFAULT_SAMPLE_RATE,
            preserve_metadata: true,
            normalize_volume: false,
            fade_in_seconds: 0.0,
            fade_out_seconds: 0.0,
            output_naming_pattern: "{original}_converted".to_string(),
            output_suffix: "_converted".to_string(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            output_directory: PathBuf::from("."),
            delete_original: false,
            progress_mode: ProgressMode::default(),
        }
    }
}

impl ConversionOptions {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_concurrency == 0 {
            return Err(AppError::Settings(
                "maxConcurrency must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("fadeInSeconds", self.fade_in_seconds),
            ("fadeOutSeconds", self.fade_out_seconds),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::Settings(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        if self.channels == 0 || self.sample_rate == 0 {
            return Err(AppError::Settings(
                "channels and sampleRate must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Fade-out placement and real progress both need the media duration up front.
    pub fn needs_duration(&self) -> bool {
        self.fade_out_seconds > 0.0 || self.progress_mode == ProgressMode::Ffmpeg
    }
}

/// Path to string for FFmpeg args or logging.
pub fn path_to_string(path: &(impl AsRef<std::path::Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        ConversionOptions::default().validate().unwrap();
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let opts = ConversionOptions {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(AppError::Settings(_))));
    }

    #[test]
    fn negative_fade_is_rejected() {
        let opts = ConversionOptions {
            fade_out_seconds: -1.0,
            ..Default::default()
        };
        let err = opts.validate().unwrap_err();
        assert!(err.to_string().contains("fadeOutSeconds"));
    }

    #[test]
    fn bitrate_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Bitrate::Kbps320).unwrap(), "320");
        let parsed: Bitrate = serde_json::from_str("128").unwrap();
        assert_eq!(parsed, Bitrate::Kbps128);
    }

    #[test]
    fn bitrate_outside_fixed_set_fails() {
        assert!(serde_json::from_str::<Bitrate>("256").is_err());
    }

    #[test]
    fn options_deserialize_camel_case() {
        let json = r#"{
            "bitrate": 320,
            "channels": 1,
            "sampleRate": 48000,
            "preserveMetadata": false,
            "normalizeVolume": true,
            "fadeInSeconds": 1.5,
            "fadeOutSeconds": 2,
            "outputNamingPattern": "{original}",
            "outputSuffix": "_a",
            "maxConcurrency": 2,
            "outputDirectory": "/music",
            "deleteOriginal": true,
            "progressMode": "ffmpeg"
        }"#;
        let opts: ConversionOptions = serde_json::from_str(json).unwrap();
        assert_eq!(opts.bitrate, Bitrate::Kbps320);
        assert_eq!(opts.sample_rate, 48_000);
        assert_eq!(opts.progress_mode, ProgressMode::Ffmpeg);
        assert!(opts.needs_duration());
    }
}
