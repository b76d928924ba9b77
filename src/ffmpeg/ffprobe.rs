//! FFprobe-based media inspection: container duration plus the first audio stream.

use std::path::Path;

use serde::Deserialize;

use super::path_to_string;
use super::timeout::{PROBE_TIMEOUT, output_with_timeout};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    #[serde(default)]
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    channels: Option<u32>,
    #[serde(default)]
    sample_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    streams: Option<Vec<FfprobeStream>>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    /// Seconds; None when the container does not report one.
    pub duration: Option<f64>,
    pub size: u64,
    pub format_name: Option<String>,
    pub audio_stream_count: u32,
    pub audio_codec_name: Option<String>,
    pub audio_channels: Option<u32>,
    pub audio_sample_rate: Option<u32>,
}

impl MediaMetadata {
    pub fn has_audio(&self) -> bool {
        self.audio_stream_count > 0
    }
}

pub fn parse_ffprobe_json(json: &str) -> Result<MediaMetadata, AppError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| AppError::from(format!("Failed to parse ffprobe JSON: {}", e)))?;

    let format = output.format.as_ref();
    let duration = format
        .and_then(|f| f.duration.as_deref())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);
    let size = format
        .and_then(|f| f.size.as_deref())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let format_name = format.and_then(|f| f.format_name.clone());

    let audio_streams: Vec<&FfprobeStream> = output
        .streams
        .iter()
        .flatten()
        .filter(|s| s.codec_type.as_deref() == Some("audio"))
        .collect();
    let first_audio = audio_streams.first();

    Ok(MediaMetadata {
        duration,
        size,
        format_name,
        audio_stream_count: audio_streams.len() as u32,
        audio_codec_name: first_audio.and_then(|s| s.codec_name.clone()),
        audio_channels: first_audio.and_then(|s| s.channels),
        audio_sample_rate: first_audio
            .and_then(|s| s.sample_rate.as_deref())
            .and_then(|s| s.parse().ok()),
    })
}

/// Run ffprobe on a media file and return metadata. Gives up after 10 seconds.
pub fn get_media_metadata(ffprobe: &Path, path: &Path) -> Result<MediaMetadata, AppError> {
    let path_str = path_to_string(path);

    log::debug!(
        target: "tiny_mp3::ffmpeg::ffprobe",
        "get_media_metadata: path={}",
        path_str
    );

    let output = output_with_timeout(
        ffprobe,
        &[
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            &path_str,
        ],
        PROBE_TIMEOUT,
    )?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::from(format!("ffprobe failed: {}", stderr.trim())));
    }

    let json = String::from_utf8(output.stdout)
        .map_err(|_| AppError::from("ffprobe output was not valid UTF-8"))?;

    parse_ffprobe_json(&json)
}

/// Total media duration in seconds, or None if it cannot be determined for any reason.
pub fn probe_duration(ffprobe: &Path, path: &Path) -> Option<f64> {
    match get_media_metadata(ffprobe, path) {
        Ok(meta) => meta.duration,
        Err(e) => {
            log::debug!(
                target: "tiny_mp3::ffmpeg::ffprobe",
                "duration probe failed for {}: {}",
                path.display(),
                e
            );
            None
        }
    }
}
