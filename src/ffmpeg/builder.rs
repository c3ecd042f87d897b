//! Turns a [`TransformState`] plus source metadata into FFmpeg arguments.
//!
//! Filter order is fixed (hflip, vflip, scale, crop) because it changes the
//! pixels that come out. Crop coordinates are computed against the scaled
//! frame. Every pixel dimension is floored to an even number so 4:2:0
//! encoders accept it.

use std::fmt;

use super::VideoMeta;
use crate::transform::{OutputFormat, TransformState};

const H264_PRESET: &str = "veryfast";
const WEBP_COMPRESSION_LEVEL: &str = "6";
const MIN_CROP_PX: u32 = 2;

/// Largest even integer not above `n`. Non-finite and negative input give 0.
pub fn even(n: f64) -> u32 {
    if !n.is_finite() || n <= 0.0 {
        return 0;
    }
    ((n / 2.0).floor() * 2.0) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStage {
    HFlip,
    VFlip,
    Scale { width: u32, height: u32 },
    Crop { width: u32, height: u32, x: u32, y: u32 },
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterStage::HFlip => f.write_str("hflip"),
            FilterStage::VFlip => f.write_str("vflip"),
            FilterStage::Scale { width, height } => write!(f, "scale={}:{}", width, height),
            FilterStage::Crop {
                width,
                height,
                x,
                y,
            } => write!(f, "crop={}:{}:{}:{}", width, height, x, y),
        }
    }
}

/// Trim arguments after clamping. `None` fields are omitted from the command.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrimWindow {
    pub start: Option<f64>,
    pub duration: Option<f64>,
}

fn known_duration(meta: &VideoMeta) -> Option<f64> {
    Some(meta.duration).filter(|d| d.is_finite() && *d > 0.0)
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
}

/// Keeps `[offset, offset + len)` inside `[0, total)` with even values and a
/// minimum span of two pixels.
fn fit_span(offset: u32, len: u32, total: u32) -> (u32, u32) {
    let total = total - total % 2;
    let len = len.min(total.saturating_sub(offset)).max(MIN_CROP_PX.min(total));
    let offset = offset.min(total.saturating_sub(len));
    (offset, len)
}

/// Frame size after the optional scale stage. A downscale never goes below
/// two pixels per side; `scale=0` would mean "keep the input size".
pub fn scaled_dimensions(state: &TransformState, meta: &VideoMeta) -> (u32, u32) {
    let scale = state.effective_scale();
    if scale < 1.0 {
        (
            even(meta.width as f64 * scale).max(MIN_CROP_PX),
            even(meta.height as f64 * scale).max(MIN_CROP_PX),
        )
    } else {
        (meta.width, meta.height)
    }
}

fn crop_stage(state: &TransformState, meta: &VideoMeta) -> Option<FilterStage> {
    if state.is_full_frame() {
        return None;
    }
    let (ax, ay, aw, ah) = state.area?;
    let (ax, ay, aw, ah) = (clamp_unit(ax), clamp_unit(ay), clamp_unit(aw), clamp_unit(ah));
    if aw <= 0.0 || ah <= 0.0 {
        log::warn!(
            target: "crop_mov::ffmpeg::builder",
            "Ignoring crop area with empty size: {:?}",
            state.area
        );
        return None;
    }
    if (ax, ay, aw, ah) == crate::transform::FULL_FRAME {
        return None;
    }

    let scale = state.effective_scale();
    let w = meta.width as f64;
    let h = meta.height as f64;
    let (frame_w, frame_h) = scaled_dimensions(state, meta);
    let (x, width) = fit_span(even(scale * ax * w), even(scale * aw * w), frame_w);
    let (y, height) = fit_span(even(scale * ay * h), even(scale * ah * h), frame_h);
    Some(FilterStage::Crop {
        width,
        height,
        x,
        y,
    })
}

/// Filter stages in application order.
pub fn filter_stages(state: &TransformState, meta: &VideoMeta) -> Vec<FilterStage> {
    let mut stages = Vec::with_capacity(4);
    if state.flip_h {
        stages.push(FilterStage::HFlip);
    }
    if state.flip_v {
        stages.push(FilterStage::VFlip);
    }
    if state.effective_scale() < 1.0 {
        let (width, height) = scaled_dimensions(state, meta);
        stages.push(FilterStage::Scale { width, height });
    }
    if let Some(crop) = crop_stage(state, meta) {
        stages.push(crop);
    }
    stages
}

/// Clamps the requested time window to the source and decides which trim
/// arguments are needed. An inverted or empty window means full duration.
pub fn trim_window(state: &TransformState, meta: &VideoMeta) -> TrimWindow {
    let Some((start, end)) = state.time else {
        return TrimWindow::default();
    };
    let duration = known_duration(meta);
    let clamp = |t: f64| {
        let t = if t.is_finite() { t.max(0.0) } else { 0.0 };
        match duration {
            Some(d) => t.min(d),
            None => t,
        }
    };
    let (start, end) = (clamp(start), clamp(end));
    if end <= start {
        log::warn!(
            target: "crop_mov::ffmpeg::builder",
            "Ignoring time window with end <= start: {:?}",
            state.time
        );
        return TrimWindow::default();
    }

    let ends_early = match duration {
        Some(d) => end < d,
        None => true,
    };
    TrimWindow {
        start: (start > 0.0).then_some(start),
        duration: ends_early.then_some(end - start),
    }
}

/// Seconds of video the render will produce, used to turn FFmpeg's
/// `out_time_ms` into a fraction.
pub fn expected_output_duration(state: &TransformState, meta: &VideoMeta) -> Option<f64> {
    let trim = trim_window(state, meta);
    if let Some(d) = trim.duration {
        return Some(d);
    }
    let total = known_duration(meta)?;
    Some(total - trim.start.unwrap_or(0.0))
}

fn codec_args(state: &TransformState) -> Vec<String> {
    match state.output_format {
        OutputFormat::Webp => vec![
            "-c:v".to_string(),
            "libwebp".to_string(),
            "-lossless".to_string(),
            "0".to_string(),
            "-quality".to_string(),
            state.effective_webp_quality().to_string(),
            "-r".to_string(),
            state.effective_webp_frame_rate().to_string(),
            "-loop".to_string(),
            "0".to_string(),
            "-compression_level".to_string(),
            WEBP_COMPRESSION_LEVEL.to_string(),
        ],
        OutputFormat::Mp4 => vec![
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            H264_PRESET.to_string(),
        ],
    }
}

/// Filter, trim, codec, audio and format arguments for one render, in that order.
pub fn build_transform_args(state: &TransformState, meta: &VideoMeta) -> Vec<String> {
    let mut args = Vec::new();

    let stages = filter_stages(state, meta);
    if !stages.is_empty() {
        let chain = stages
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        args.extend(["-vf".to_string(), chain]);
    }

    let trim = trim_window(state, meta);
    if let Some(start) = trim.start {
        args.extend(["-ss".to_string(), start.to_string()]);
    }
    if let Some(duration) = trim.duration {
        args.extend(["-t".to_string(), duration.to_string()]);
    }

    args.extend(codec_args(state));

    if state.mute {
        args.push("-an".to_string());
    } else {
        args.extend(["-c:a".to_string(), "copy".to_string()]);
    }

    args.extend(["-f".to_string(), state.output_format.as_str().to_string()]);

    log::debug!(
        target: "crop_mov::ffmpeg::builder",
        "Built transform args: stages={}, trim={:?}, format={}",
        stages.len(),
        trim,
        state.output_format
    );
    args
}

/// Complete argument list: input and progress plumbing around
/// [`build_transform_args`], output path last.
pub fn build_ffmpeg_command(
    input_path: &str,
    output_path: &str,
    state: &TransformState,
    meta: &VideoMeta,
) -> Vec<String> {
    let mut args = vec![
        "-nostdin".to_string(),
        "-y".to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-i".to_string(),
        input_path.to_string(),
    ];
    args.extend(build_transform_args(state, meta));
    args.push(output_path.to_string());
    args
}

/// Formats args for readable display: option and value on the same line when the next arg is a value.
pub fn format_args_for_display_multiline(args: &[String]) -> String {
    if args.is_empty() {
        return String::new();
    }
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
