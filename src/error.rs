//! App error type shared by the converter core and the sidecar. Implements Display and
//! Serialize so failures can be forwarded to a front end as `{summary, detail}`.

use std::path::PathBuf;

use crate::ffmpeg::parse_ffmpeg_error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{message}: {}", path.display())]
    Validation { path: PathBuf, message: String },

    #[error("{0}")]
    ToolNotFound(String),

    #[error(
        "Insufficient disk space in {}: {required} bytes required, {available} available",
        dir.display()
    )]
    InsufficientSpace {
        dir: PathBuf,
        required: u64,
        available: u64,
    },

    #[error("FFmpeg failed (code {code}): {stderr}")]
    ExternalTool { code: i32, stderr: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("No files to convert")]
    EmptyBatch,

    #[error("Cannot access output directory: {}", .0.display())]
    OutputDirectory(PathBuf),

    #[error("Invalid settings: {0}")]
    Settings(String),
}

impl AppError {
    pub fn validation(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn external_tool(code: i32, stderr: impl Into<String>) -> Self {
        Self::ExternalTool {
            code,
            stderr: stderr.into(),
        }
    }

    /// Short message suitable for a status line. Full text stays in `to_string()`.
    pub fn summary(&self) -> String {
        match self {
            AppError::Io(_) => "File operation failed.".to_string(),
            AppError::Validation { .. } => "Unsupported or invalid video file.".to_string(),
            AppError::ToolNotFound(_) => "FFmpeg is not installed.".to_string(),
            AppError::InsufficientSpace { .. } => {
                "Not enough free space in the output folder.".to_string()
            }
            // -1 carries ad-hoc messages (spawn failures, bad requests) verbatim.
            AppError::ExternalTool { code: -1, stderr } => parse_ffmpeg_error(stderr, None).summary,
            AppError::ExternalTool { code, stderr } => {
                parse_ffmpeg_error(stderr, Some(*code)).summary
            }
            AppError::Cancelled => "Conversion was cancelled.".to_string(),
            AppError::EmptyBatch => "There are no files to convert.".to_string(),
            AppError::OutputDirectory(_) => "Cannot access the output folder.".to_string(),
            AppError::Settings(_) => "Invalid settings.".to_string(),
        }
    }

    /// Full diagnostic text. FFmpeg failures keep their trimmed stderr.
    pub fn detail(&self) -> String {
        match self {
            AppError::ExternalTool { stderr, .. } => stderr.trim().to_string(),
            _ => self.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let json = serde_json::json!({ "summary": self.summary(), "detail": self.detail() });
        serializer.serialize_str(&json.to_string())
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        if s == "Cancelled" {
            AppError::Cancelled
        } else {
            AppError::ExternalTool {
                code: -1,
                stderr: s,
            }
        }
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}
