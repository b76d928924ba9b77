//! Free-space heuristic for the output directory.

use std::path::{Path, PathBuf};

use sysinfo::Disks;

use crate::error::AppError;

/// Expected MP3 size as a fraction of the source video size. A rough estimate.
pub const OUTPUT_SIZE_RATIO: f64 = 0.1;

pub fn estimated_output_size(input_size: u64) -> u64 {
    (input_size as f64 * OUTPUT_SIZE_RATIO) as u64
}

/// Free bytes on the volume holding `dir`, picked by longest matching mount point.
/// None when no mounted volume matches.
pub fn available_space(dir: &Path) -> Option<u64> {
    let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| dir.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

/// Fails with `InsufficientSpace` when the volume is known to be too small.
/// An undeterminable free-space figure lets the conversion proceed.
pub fn check_disk_space(dir: &Path, required: u64) -> Result<(), AppError> {
    let Some(available) = available_space(dir) else {
        log::debug!(
            target: "tiny_mp3::ffmpeg::disk",
            "Free space unknown for {}, skipping check",
            dir.display()
        );
        return Ok(());
    };
    ensure_space(dir.to_path_buf(), required, available)
}

fn ensure_space(dir: PathBuf, required: u64, available: u64) -> Result<(), AppError> {
    if available < required {
        log::warn!(
            target: "tiny_mp3::ffmpeg::disk",
            "Insufficient space in {}: required={}, available={}",
            dir.display(),
            required,
            available
        );
        return Err(AppError::InsufficientSpace {
            dir,
            required,
            available,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_is_ten_percent() {
        assert_eq!(estimated_output_size(1_000_000), 100_000);
        assert_eq!(estimated_output_size(0), 0);
    }

    #[test]
    fn ensure_space_rejects_small_volume() {
        let err = ensure_space(PathBuf::from("/out"), 500, 100).unwrap_err();
        match err {
            AppError::InsufficientSpace {
                required,
                available,
                ..
            } => {
                assert_eq!(required, 500);
                assert_eq!(available, 100);
            }
            other => panic!("expected InsufficientSpace, got {:?}", other),
        }
    }

    #[test]
    fn ensure_space_accepts_exact_fit() {
        ensure_space(PathBuf::from("/out"), 100, 100).unwrap();
    }

    #[test]
    fn zero_requirement_always_passes() {
        let dir = tempfile::tempdir().unwrap();
        check_disk_space(dir.path(), 0).unwrap();
    }
}
