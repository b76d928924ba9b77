#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use tiny_mp3_core::ffmpeg::ConversionOptions;
use tiny_mp3_core::ffmpeg::ffprobe::MediaMetadata;

pub enum VideoKind {
    WithAudio,
    Silent,
}

pub struct IntegrationEnv {
    pub ffmpeg: PathBuf,
    dir: tempfile::TempDir,
}

impl IntegrationEnv {
    pub fn new() -> Self {
        let ffmpeg = tiny_mp3_core::ffmpeg::discovery::get_ffmpeg_path()
            .expect("FFmpeg not found")
            .to_path_buf();
        let dir = tempfile::tempdir().expect("tempdir");
        Self { ffmpeg, dir }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path("out")
    }

    pub fn options_with(&self, overrides: impl FnOnce(&mut ConversionOptions)) -> ConversionOptions {
        let mut options = ConversionOptions {
            output_directory: self.output_dir(),
            ..Default::default()
        };
        overrides(&mut options);
        options
    }

    pub fn with_test_video(&self, input_name: &str, duration_secs: f32, kind: VideoKind) -> PathBuf {
        let output_path = self.path(input_name);
        let status = create_test_video(&self.ffmpeg, &output_path, duration_secs, kind)
            .expect("failed to create test video");
        assert!(status.success(), "ffmpeg failed to create test video");
        output_path
    }
}

/// Small mpeg4 clip from lavfi sources, with an AAC sine track unless `Silent`.
pub fn create_test_video(
    ffmpeg: &Path,
    output_path: &Path,
    duration_secs: f32,
    kind: VideoKind,
) -> std::io::Result<ExitStatus> {
    let duration_arg = format!("{}", duration_secs);
    let mut args = vec![
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-f".to_string(),
        "lavfi".to_string(),
        "-i".to_string(),
        format!("testsrc=duration={}:size=320x240:rate=30", duration_arg),
    ];
    if let VideoKind::WithAudio = kind {
        args.extend([
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!("sine=frequency=440:duration={}", duration_arg),
            "-c:a".to_string(),
            "aac".to_string(),
            "-shortest".to_string(),
        ]);
    }
    args.extend([
        "-c:v".to_string(),
        "mpeg4".to_string(),
        "-metadata".to_string(),
        "title=Integration Clip".to_string(),
        output_path.to_string_lossy().to_string(),
    ]);

    Command::new(ffmpeg)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
}

pub fn assert_mp3(path: &Path) -> MediaMetadata {
    assert!(path.exists(), "missing output {}", path.display());
    assert!(fs::metadata(path).expect("stat output").len() > 0, "empty output");
    let meta = tiny_mp3_core::test_support::probe_for_test(path).expect("probe output");
    assert_eq!(meta.format_name.as_deref(), Some("mp3"));
    assert_eq!(meta.audio_codec_name.as_deref(), Some("mp3"));
    meta
}
