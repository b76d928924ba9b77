use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use super::timeout::{VERSION_CHECK_TIMEOUT, output_with_timeout};
use crate::error::AppError;

#[cfg(target_os = "windows")]
const SEARCH_COMMAND: &str = "where";
#[cfg(not(target_os = "windows"))]
const SEARCH_COMMAND: &str = "which";

fn find_in_path(name: &str) -> Option<PathBuf> {
    let output = Command::new(SEARCH_COMMAND).arg(name).output().ok()?;
    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout);
        let first = path.lines().next()?.trim();
        if !first.is_empty() {
            return Some(PathBuf::from(first));
        }
    }
    None
}

fn common_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
            PathBuf::from("/opt/local/bin/ffmpeg"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin\\ffmpeg.exe"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

/// FFmpeg shipped next to the running executable (zero-install bundles).
fn bundled_path() -> Option<PathBuf> {
    let exe_dir = std::env::current_exe().ok()?.parent()?.to_path_buf();
    #[cfg(windows)]
    let path = exe_dir.join("ffmpeg.exe");
    #[cfg(not(windows))]
    let path = exe_dir.join("ffmpeg");
    path.is_file().then_some(path)
}

static FFMPEG_PATH_CACHE: OnceLock<PathBuf> = OnceLock::new();

fn resolve_ffmpeg_path() -> Result<PathBuf, AppError> {
    for path in common_paths() {
        if path.exists() {
            log::debug!(
                target: "tiny_mp3::ffmpeg::discovery",
                "FFmpeg found in common path: {}",
                path.display()
            );
            return Ok(path);
        }
    }

    if let Some(p) = find_in_path("ffmpeg")
        && p.exists()
    {
        log::debug!(
            target: "tiny_mp3::ffmpeg::discovery",
            "FFmpeg found in PATH: {}",
            p.display()
        );
        return Ok(p);
    }

    if let Some(p) = bundled_path() {
        log::debug!(
            target: "tiny_mp3::ffmpeg::discovery",
            "FFmpeg found next to executable: {}",
            p.display()
        );
        return Ok(p);
    }

    log::error!(
        target: "tiny_mp3::ffmpeg::discovery",
        "FFmpeg not found in PATH or common locations"
    );
    Err(AppError::ToolNotFound(
        "FFmpeg not found. Please install FFmpeg on your system:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html"
            .to_string(),
    ))
}

/// Locate FFmpeg. Cached for process lifetime.
/// Env override: FFMPEG_PATH takes precedence (for tests/CI or bundled binaries),
/// then common installation paths, then PATH, then a copy next to the executable.
pub fn get_ffmpeg_path() -> Result<&'static Path, AppError> {
    if let Some(path) = FFMPEG_PATH_CACHE.get() {
        return Ok(path.as_path());
    }
    let env_path = std::env::var_os("FFMPEG_PATH")
        .map(PathBuf::from)
        .filter(|p| p.exists());
    let path = match env_path {
        Some(p) => {
            log::debug!(
                target: "tiny_mp3::ffmpeg::discovery",
                "FFmpeg path from FFMPEG_PATH env: {}",
                p.display()
            );
            p
        }
        None => resolve_ffmpeg_path()?,
    };
    // Another thread may have won the race; either value is a valid FFmpeg.
    Ok(FFMPEG_PATH_CACHE.get_or_init(|| path).as_path())
}

/// Paths to try for ffprobe given an ffmpeg binary path (suffixed first, then plain).
pub fn ffprobe_candidates(ffmpeg_path: &Path) -> Vec<PathBuf> {
    let Some(parent) = ffmpeg_path.parent() else {
        return vec![];
    };
    let mut candidates = Vec::with_capacity(2);
    if let Some(suffix) = ffmpeg_path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|stem| stem.strip_prefix("ffmpeg"))
        .filter(|suffix| !suffix.is_empty())
    {
        #[cfg(target_os = "windows")]
        candidates.push(parent.join(format!("ffprobe{suffix}.exe")));
        #[cfg(not(target_os = "windows"))]
        candidates.push(parent.join(format!("ffprobe{suffix}")));
    }
    #[cfg(target_os = "windows")]
    candidates.push(parent.join("ffprobe.exe"));
    #[cfg(not(target_os = "windows"))]
    candidates.push(parent.join("ffprobe"));
    candidates
}

/// ffprobe that ships alongside the given FFmpeg binary.
pub fn ffprobe_for(ffmpeg: &Path) -> Result<PathBuf, AppError> {
    ffprobe_candidates(ffmpeg)
        .into_iter()
        .find(|candidate| candidate.exists())
        .ok_or_else(|| {
            AppError::ToolNotFound(format!(
                "ffprobe not found next to FFmpeg ({})",
                ffmpeg.display()
            ))
        })
}

pub fn get_ffprobe_path() -> Result<PathBuf, AppError> {
    ffprobe_for(get_ffmpeg_path()?)
}

/// First line of `ffmpeg -version`, e.g. "ffmpeg version 7.1 Copyright ...".
pub fn ffmpeg_version(ffmpeg: &Path) -> Option<String> {
    let output = output_with_timeout(ffmpeg, &["-version"], VERSION_CHECK_TIMEOUT).ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
}
