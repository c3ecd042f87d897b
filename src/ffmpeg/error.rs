//! Short, user-facing summaries for failed FFmpeg runs.
//!
//! Exit codes come from ffmpeg.c: 1 (general), 69 (rate exceeded),
//! 123 (hard exit), 255 (signal). -1 marks a spawn failure. The stderr tail is
//! kept as detail.

use serde::Serialize;

const ELLIPSIS: &str = "…";
const MAX_SUMMARY_LEN: usize = 120;

/// Known stderr fragments and the summary shown for them.
const STDERR_HINTS: &[(&str, &str)] = &[
    ("Unknown encoder", "This FFmpeg build lacks the encoder for the chosen output format."),
    ("Invalid too big or non positive size", "Crop or scale produced an invalid frame size."),
    ("Invalid data found when processing input", "The source file is not a readable video."),
    ("No such file or directory", "Input file could not be found."),
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegErrorPayload {
    pub summary: String,
    pub detail: String,
}

pub fn parse_ffmpeg_error(stderr: &str, exit_code: Option<i32>) -> FfmpegErrorPayload {
    let summary = stderr_hint(stderr)
        .map(str::to_string)
        .or_else(|| exit_code.and_then(known_exit_code_summary))
        .unwrap_or_else(|| match exit_code {
            Some(code) => format!("FFmpeg failed (exit code {}).", code),
            None => first_line_truncated(stderr, MAX_SUMMARY_LEN),
        });
    FfmpegErrorPayload {
        summary,
        detail: stderr.trim().to_string(),
    }
}

fn stderr_hint(stderr: &str) -> Option<&'static str> {
    STDERR_HINTS
        .iter()
        .find(|(needle, _)| stderr.contains(needle))
        .map(|(_, hint)| *hint)
}

fn known_exit_code_summary(code: i32) -> Option<String> {
    match code {
        -1 => Some("FFmpeg not found or failed to start.".into()),
        1 => Some("FFmpeg failed.".into()),
        69 => Some("Encoding rate limit exceeded.".into()),
        123 | 255 => Some("Encoding was stopped.".into()),
        _ => None,
    }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_1() {
        let p = parse_ffmpeg_error("", Some(1));
        assert_eq!(p.summary, "FFmpeg failed.");
    }

    #[test]
    fn exit_code_255_means_stopped() {
        let p = parse_ffmpeg_error("", Some(255));
        assert_eq!(p.summary, "Encoding was stopped.");
    }

    #[test]
    fn unknown_code_short_summary() {
        let p = parse_ffmpeg_error("something odd", Some(42));
        assert_eq!(p.summary, "FFmpeg failed (exit code 42).");
        assert_eq!(p.detail, "something odd");
    }

    #[test]
    fn missing_encoder_hint_wins_over_exit_code() {
        let p = parse_ffmpeg_error("Unknown encoder 'libwebp'\n", Some(1));
        assert!(p.summary.contains("encoder"));
        assert_eq!(p.detail, "Unknown encoder 'libwebp'");
    }

    #[test]
    fn bad_crop_size_hint() {
        let p = parse_ffmpeg_error(
            "[Parsed_crop_1] Invalid too big or non positive size for width '0' or height '0'",
            Some(1),
        );
        assert_eq!(p.summary, "Crop or scale produced an invalid frame size.");
    }

    #[test]
    fn no_code_uses_first_line() {
        let p = parse_ffmpeg_error("\nSome random error\nSecond line", None);
        assert_eq!(p.summary, "Some random error");
    }

    #[test]
    fn long_stderr_truncated() {
        let long = "é".repeat(100);
        let p = parse_ffmpeg_error(&long, None);
        assert!(p.summary.len() <= MAX_SUMMARY_LEN);
        assert!(p.summary.ends_with('…'));
    }
}
