use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use regex::Regex;

use crate::batch::CancellationToken;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration: (\d+):(\d+):([\d.]+)").expect("invalid duration regex")
});
static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"out_time_ms=(\d+)").expect("invalid time regex"));

/// Parse one FFmpeg output line. Returns (progress 0.0-1.0 or None, duration in seconds or None).
pub fn parse_ffmpeg_progress(
    output: &str,
    current_duration: Option<f64>,
) -> (Option<f64>, Option<f64>) {
    if let Some(caps) = DURATION_RE.captures(output) {
        let hours: f64 = caps[1].parse().unwrap_or(0.0);
        let minutes: f64 = caps[2].parse().unwrap_or(0.0);
        let seconds: f64 = caps[3].parse().unwrap_or(0.0);
        let duration = hours * 3600.0 + minutes * 60.0 + seconds;
        // Keep a duration we were handed (probe) over the banner; they agree anyway.
        return (None, current_duration.or(Some(duration)));
    }

    if let Some(caps) = TIME_RE.captures(output)
        && let Some(dur) = current_duration
        && dur > 0.0
    {
        // out_time_ms is in microseconds despite the name.
        let current_time_us: i64 = caps[1].parse().unwrap_or(0);
        let current_time = current_time_us.max(0) as f64 / 1_000_000.0;
        return (Some((current_time / dur).min(1.0)), Some(dur));
    }

    (None, current_duration)
}

/// Fixed, data-independent progress ramp: 0, step, 2*step, ..., 100 with a pause
/// between ticks. Used while FFmpeg runs without reporting anything back.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticRamp {
    pub step: u8,
    pub interval: Duration,
}

impl Default for SyntheticRamp {
    /// 20 ticks over roughly one second.
    fn default() -> Self {
        Self {
            step: 5,
            interval: Duration::from_millis(50),
        }
    }
}

impl SyntheticRamp {
    /// Blocks for the whole ramp. Stops early, without reaching 100, once `cancel` fires.
    /// Returns the last value reported.
    pub fn run(&self, on_progress: &dyn Fn(u8), cancel: &CancellationToken) -> u8 {
        let step = self.step.max(1);
        let mut last = 0;
        let mut value: u8 = 0;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            on_progress(value);
            last = value;
            if value >= 100 {
                break;
            }
            thread::sleep(self.interval);
            value = value.saturating_add(step).min(100);
        }
        last
    }
}
