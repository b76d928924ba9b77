//! Input file checks and output naming.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::AppError;

/// Lowercase, without the dot.
pub const SUPPORTED_EXTENSIONS: [&str; 7] = ["mp4", "m4v", "mov", "avi", "mkv", "flv", "wmv"];

pub const MIN_FILE_SIZE: u64 = 1024;
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

const PLACEHOLDER_ORIGINAL: &str = "{original}";
const PLACEHOLDER_SUFFIX: &str = "{suffix}";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub size_mb: f64,
    /// Lowercase with the leading dot, e.g. ".mp4"; empty when unknown.
    pub extension: String,
    pub is_valid: bool,
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_supported_extension(path: &Path) -> bool {
    lowercase_extension(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Checks one candidate input and returns its size in bytes.
pub fn validate_single_file(path: &Path) -> Result<u64, AppError> {
    let metadata = fs::metadata(path).map_err(|_| AppError::validation(path, "File does not exist"))?;
    if !metadata.is_file() {
        return Err(AppError::validation(path, "Not a regular file"));
    }
    if !is_supported_extension(path) {
        let ext = lowercase_extension(path).unwrap_or_default();
        return Err(AppError::validation(
            path,
            format!("Unsupported file type '.{}'", ext),
        ));
    }
    let size = metadata.len();
    if size < MIN_FILE_SIZE {
        return Err(AppError::validation(path, "File is too small"));
    }
    if size > MAX_FILE_SIZE {
        return Err(AppError::validation(path, "File is too large"));
    }
    Ok(size)
}

/// Splits `paths` into (valid, invalid), both in input order.
pub fn validate_input_files<P: AsRef<Path>>(paths: &[P]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    for path in paths {
        let path = path.as_ref();
        match validate_single_file(path) {
            Ok(_) => valid.push(path.to_path_buf()),
            Err(e) => {
                log::warn!(target: "tiny_mp3::files", "Invalid file: {}", e);
                invalid.push(path.to_path_buf());
            }
        }
    }
    log::debug!(
        target: "tiny_mp3::files",
        "validate_input_files: valid={}, invalid={}",
        valid.len(),
        invalid.len()
    );
    (valid, invalid)
}

/// Output file name (not path) for `input_path`.
///
/// `{original}` becomes the input stem and `{suffix}` becomes `suffix`. A pattern
/// that renders empty or to the bare stem falls back to `stem + suffix`.
pub fn generate_output_filename(input_path: &Path, naming_pattern: &str, suffix: &str) -> String {
    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut name = naming_pattern
        .replace(PLACEHOLDER_ORIGINAL, &stem)
        .replace(PLACEHOLDER_SUFFIX, suffix);
    if name.is_empty() || name == stem {
        name = format!("{}{}", stem, suffix);
    }
    format!("{}.mp3", name)
}

pub fn get_file_info(path: &Path) -> FileInfo {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match fs::metadata(path) {
        Ok(meta) => {
            let size_bytes = meta.len();
            FileInfo {
                name,
                path: absolute,
                size_bytes,
                size_mb: (size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
                extension: lowercase_extension(path)
                    .map(|e| format!(".{}", e))
                    .unwrap_or_default(),
                is_valid: is_supported_extension(path),
            }
        }
        Err(_) => FileInfo {
            name,
            path: absolute,
            size_bytes: 0,
            size_mb: 0.0,
            extension: String::new(),
            is_valid: false,
        },
    }
}

pub fn create_output_directory(dir: &Path) -> Result<(), AppError> {
    fs::create_dir_all(dir).map_err(|e| {
        log::error!(
            target: "tiny_mp3::files",
            "Cannot create output directory {}: {}",
            dir.display(),
            e
        );
        AppError::OutputDirectory(dir.to_path_buf())
    })
}

/// Best-effort removal. Failures are logged and reported as `false`.
pub fn delete_file_safely(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            log::info!(target: "tiny_mp3::files", "Deleted file: {}", path.display());
            true
        }
        Err(e) => {
            log::error!(
                target: "tiny_mp3::files",
                "Failed to delete file {}: {}",
                path.display(),
                e
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sized(dir: &Path, name: &str, size: usize) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, vec![0u8; size]).unwrap();
        path
    }

    #[test]
    fn output_name_from_default_pattern() {
        assert_eq!(
            generate_output_filename(Path::new("video.mp4"), "{original}_converted", "_x"),
            "video_converted.mp3"
        );
    }

    #[test]
    fn output_name_substitutes_suffix() {
        assert_eq!(
            generate_output_filename(Path::new("/in/clip.MOV"), "{original}{suffix}", "_audio"),
            "clip_audio.mp3"
        );
    }

    #[test]
    fn output_name_bare_stem_falls_back_to_suffix() {
        assert_eq!(
            generate_output_filename(Path::new("clip.mkv"), "{original}", "_converted"),
            "clip_converted.mp3"
        );
        assert_eq!(
            generate_output_filename(Path::new("clip.mkv"), "", "_converted"),
            "clip_converted.mp3"
        );
    }

    #[test]
    fn output_name_prefix_pattern() {
        assert_eq!(
            generate_output_filename(Path::new("a/b/talk.avi"), "converted_{original}", "_c"),
            "converted_talk.mp3"
        );
    }

    #[test]
    fn validate_sorts_valid_and_invalid_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_sized(dir.path(), "a.mp4", 2048);
        let b = write_sized(dir.path(), "b.txt", 2048);
        let c = write_sized(dir.path(), "c.MKV", 4096);
        let tiny = write_sized(dir.path(), "tiny.mov", 10);
        let missing = dir.path().join("missing.avi");

        let (valid, invalid) =
            validate_input_files(&[a.clone(), b.clone(), c.clone(), tiny.clone(), missing.clone()]);
        assert_eq!(valid, vec![a, c]);
        assert_eq!(invalid, vec![b, tiny, missing]);
    }

    #[test]
    fn directory_with_video_extension_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("folder.mp4");
        fs::create_dir(&fake).unwrap();
        let err = validate_single_file(&fake).unwrap_err();
        assert!(err.to_string().contains("Not a regular file"));
    }

    #[test]
    fn validate_single_file_returns_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sized(dir.path(), "clip.wmv", 1024);
        assert_eq!(validate_single_file(&path).unwrap(), 1024);
    }

    #[test]
    fn unsupported_extension_reason_names_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sized(dir.path(), "song.wav", 4096);
        let err = validate_single_file(&path).unwrap_err();
        assert!(err.to_string().contains(".wav"));
    }

    #[test]
    fn file_info_for_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sized(dir.path(), "Clip.MP4", 3 * 1024 * 1024);
        let info = get_file_info(&path);
        assert_eq!(info.name, "Clip.MP4");
        assert_eq!(info.size_bytes, 3 * 1024 * 1024);
        assert_eq!(info.size_mb, 3.0);
        assert_eq!(info.extension, ".mp4");
        assert!(info.is_valid);
    }

    #[test]
    fn file_info_for_missing_file() {
        let info = get_file_info(Path::new("/no/such/file.mp4"));
        assert_eq!(info.name, "file.mp4");
        assert_eq!(info.size_bytes, 0);
        assert_eq!(info.extension, "");
        assert!(!info.is_valid);
    }

    #[test]
    fn create_output_directory_is_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        create_output_directory(&nested).unwrap();
        assert!(nested.is_dir());
        create_output_directory(&nested).unwrap();
    }

    #[test]
    fn create_output_directory_over_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_sized(dir.path(), "blocker", 1);
        let err = create_output_directory(&file.join("sub")).unwrap_err();
        assert!(matches!(err, AppError::OutputDirectory(_)));
    }

    #[test]
    fn delete_file_safely_reports_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sized(dir.path(), "gone.mp4", 1);
        assert!(delete_file_safely(&path));
        assert!(!path.exists());
        assert!(!delete_file_safely(&path));
    }
}
