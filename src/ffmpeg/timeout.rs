//! Short-lived helper processes (version check, duration probe) with a hard timeout.
//! The conversion itself never goes through here; it has no timeout.

use std::future::Future;
use std::path::Path;
use std::process::Output;
use std::time::Duration;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use crate::error::AppError;

pub(crate) const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

fn block_on_async<T>(future: impl Future<Output = Result<T, AppError>>) -> Result<T, AppError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| AppError::from(format!("Failed to initialize async runtime: {}", e)))?;
    runtime.block_on(future)
}

/// Runs `program args...` and collects its output. The child is killed if it
/// outlives `limit`.
pub(crate) fn output_with_timeout(
    program: &Path,
    args: &[&str],
    limit: Duration,
) -> Result<Output, AppError> {
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args).kill_on_drop(true);
    #[cfg(windows)]
    cmd.as_std_mut().creation_flags(0x08000000); // CREATE_NO_WINDOW

    block_on_async(async move {
        match tokio::time::timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(AppError::from(format!(
                "Failed to run {}: {}",
                program.display(),
                e
            ))),
            Err(_) => {
                log::warn!(
                    target: "tiny_mp3::ffmpeg::timeout",
                    "{} timed out after {:?}",
                    program.display(),
                    limit
                );
                Err(AppError::from(format!(
                    "{} timed out after {}s",
                    program.display(),
                    limit.as_secs()
                )))
            }
        }
    })
}
