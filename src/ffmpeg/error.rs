//! Map FFmpeg exit codes to short user-facing messages.
//!
//! Exit codes come from ffmpeg.c: 1 (general), 69 (rate exceeded),
//! 123 (hard exit), 255 (signal). -1 marks a spawn failure on our side.
//! Stderr is kept verbatim as detail.

use serde::Serialize;

const SUMMARY_MAX_LEN: usize = 120;
const ELLIPSIS: &str = "…";

/// Payload for a per-file failure. Front end shows summary; detail is expandable.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegErrorPayload {
    pub summary: String,
    pub detail: String,
}

pub fn parse_ffmpeg_error(stderr: &str, exit_code: Option<i32>) -> FfmpegErrorPayload {
    let summary = match exit_code {
        Some(code) => known_exit_code_summary(code)
            .map(str::to_string)
            .unwrap_or_else(|| format!("FFmpeg failed (exit code {}).", code)),
        None => first_line_truncated(stderr, SUMMARY_MAX_LEN),
    };
    FfmpegErrorPayload {
        summary,
        detail: stderr.trim().to_string(),
    }
}

fn known_exit_code_summary(code: i32) -> Option<&'static str> {
    match code {
        -1 => Some("FFmpeg not found or failed to start."),
        1 => Some("FFmpeg failed."),
        69 => Some("Encoding rate limit exceeded."),
        123 | 255 => Some("Conversion was stopped."),
        _ => None,
    }
}

/// Last non-empty stderr lines, newest last. Used for compact log lines.
pub fn stderr_tail(stderr: &str, lines: usize) -> String {
    let mut tail: Vec<&str> = stderr
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(lines)
        .collect();
    tail.reverse();
    tail.join("; ")
}

fn first_line_truncated(stderr: &str, max_len: usize) -> String {
    let first = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if first.len() <= max_len {
        return first.to_string();
    }
    let mut cut = max_len.saturating_sub(ELLIPSIS.len());
    while !first.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &first[..cut], ELLIPSIS)
}
