use super::{ConversionOptions, ProgressMode};

const AUDIO_CODEC: &str = "libmp3lame";

/// Audio filter chain for the requested effects, or None when no filter applies.
/// Fade-out is skipped unless the duration is known and longer than the fade.
fn build_audio_filters(options: &ConversionOptions, duration_secs: Option<f64>) -> Option<String> {
    let mut filters = Vec::new();
    if options.normalize_volume {
        filters.push("loudnorm".to_string());
    }
    let fade_in = options.fade_in_seconds;
    if fade_in > 0.0 {
        filters.push(format!("afade=t=in:st=0:d={}", fade_in));
    }
    let fade_out = options.fade_out_seconds;
    if fade_out > 0.0 {
        match duration_secs {
            Some(duration) if duration > fade_out => {
                let start = duration - fade_out;
                filters.push(format!("afade=t=out:st={}:d={}", start, fade_out));
            }
            _ => {
                log::debug!(
                    target: "tiny_mp3::ffmpeg::builder",
                    "Skipping fade-out: duration={:?}, fade_out={}",
                    duration_secs,
                    fade_out
                );
            }
        }
    }
    if filters.is_empty() {
        None
    } else {
        Some(filters.join(","))
    }
}

pub fn build_ffmpeg_command(
    input_path: &str,
    output_path: &str,
    options: &ConversionOptions,
    duration_secs: Option<f64>,
) -> Vec<String> {
    let bitrate = options.bitrate.kbps();

    log::debug!(
        target: "tiny_mp3::ffmpeg::builder",
        "Building FFmpeg command: bitrate={}k, channels={}, rate={}, input={} -> output={}",
        bitrate,
        options.channels,
        options.sample_rate,
        input_path,
        output_path
    );

    let mut args = vec!["-nostdin".to_string()];
    if options.progress_mode == ProgressMode::Ffmpeg {
        args.extend(["-progress".to_string(), "pipe:1".to_string()]);
    }
    args.extend([
        "-i".to_string(),
        input_path.to_string(),
        "-vn".to_string(),
        "-c:a".to_string(),
        AUDIO_CODEC.to_string(),
        "-b:a".to_string(),
        format!("{}k", bitrate),
        "-ac".to_string(),
        options.channels.to_string(),
        "-ar".to_string(),
        options.sample_rate.to_string(),
    ]);

    if options.preserve_metadata {
        args.extend(["-map_metadata".to_string(), "0".to_string()]);
    }

    if let Some(filters) = build_audio_filters(options, duration_secs) {
        args.extend(["-af".to_string(), filters]);
    }

    args.push("-y".to_string());
    args.push(output_path.to_string());
    args
}

/// Formats args for readable display: option and value on the same line when the next arg is a value.
pub fn format_args_for_display_multiline(args: &[String]) -> String {
    let mut lines = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        let line = if arg.starts_with('-') && i + 1 < args.len() && !args[i + 1].starts_with('-') {
            let value = &args[i + 1];
            i += 2;
            format!("  {} {}", arg, value)
        } else {
            i += 1;
            format!("  {}", arg)
        };
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::Bitrate;

    fn opts() -> ConversionOptions {
        ConversionOptions::default()
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn default_options_produce_expected_args() {
        let args = build_ffmpeg_command("/in.mp4", "/out.mp3", &opts(), None);
        assert_eq!(value_after(&args, "-i"), Some("/in.mp4"));
        assert_eq!(value_after(&args, "-c:a"), Some("libmp3lame"));
        assert_eq!(value_after(&args, "-b:a"), Some("192k"));
        assert_eq!(value_after(&args, "-ac"), Some("2"));
        assert_eq!(value_after(&args, "-ar"), Some("44100"));
        assert_eq!(value_after(&args, "-map_metadata"), Some("0"));
        assert!(args.contains(&"-vn".to_string()));
        assert!(!args.contains(&"-af".to_string()));
        assert!(!args.contains(&"-progress".to_string()));
        assert_eq!(args[args.len() - 2], "-y");
        assert_eq!(args.last().map(String::as_str), Some("/out.mp3"));
    }

    #[test]
    fn bitrate_is_suffixed_with_k() {
        let mut o = opts();
        o.bitrate = Bitrate::Kbps320;
        let args = build_ffmpeg_command("/in.mp4", "/out.mp3", &o, None);
        assert_eq!(value_after(&args, "-b:a"), Some("320k"));
    }

    #[test]
    fn metadata_flag_omitted_when_disabled() {
        let mut o = opts();
        o.preserve_metadata = false;
        let args = build_ffmpeg_command("/in.mp4", "/out.mp3", &o, None);
        assert!(!args.contains(&"-map_metadata".to_string()));
    }

    #[test]
    fn normalize_and_fades_share_one_filter_chain() {
        let mut o = opts();
        o.normalize_volume = true;
        o.fade_in_seconds = 2.0;
        o.fade_out_seconds = 3.0;
        let args = build_ffmpeg_command("/in.mp4", "/out.mp3", &o, Some(60.0));
        assert_eq!(args.iter().filter(|a| *a == "-af").count(), 1);
        assert_eq!(
            value_after(&args, "-af"),
            Some("loudnorm,afade=t=in:st=0:d=2,afade=t=out:st=57:d=3")
        );
    }

    #[test]
    fn fade_out_skipped_without_duration() {
        let mut o = opts();
        o.fade_out_seconds = 3.0;
        let args = build_ffmpeg_command("/in.mp4", "/out.mp3", &o, None);
        assert!(!args.contains(&"-af".to_string()));
    }

    #[test]
    fn fade_out_skipped_when_longer_than_media() {
        let mut o = opts();
        o.fade_in_seconds = 1.0;
        o.fade_out_seconds = 10.0;
        let args = build_ffmpeg_command("/in.mp4", "/out.mp3", &o, Some(5.0));
        assert_eq!(value_after(&args, "-af"), Some("afade=t=in:st=0:d=1"));
    }

    #[test]
    fn ffmpeg_progress_mode_requests_progress_pipe() {
        let mut o = opts();
        o.progress_mode = ProgressMode::Ffmpeg;
        let args = build_ffmpeg_command("/in.mp4", "/out.mp3", &o, None);
        assert_eq!(value_after(&args, "-progress"), Some("pipe:1"));
        let progress_idx = args.iter().position(|a| a == "-progress").unwrap();
        let input_idx = args.iter().position(|a| a == "-i").unwrap();
        assert!(progress_idx < input_idx);
    }

    #[test]
    fn display_multiline_pairs_flags_with_values() {
        let args: Vec<String> = ["-nostdin", "-i", "/in.mp4", "-vn", "-y", "/out.mp3"]
            .into_iter()
            .map(String::from)
            .collect();
        let text = format_args_for_display_multiline(&args);
        assert_eq!(text, "  -nostdin\n  -i /in.mp4\n  -vn\n  -y /out.mp3");
    }
}
