//! FFprobe-based source metadata: display size, duration, and a few
//! descriptive fields shown when a file is opened.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use serde::Deserialize;

use super::VideoMeta;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    #[serde(default)]
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    #[serde(default)]
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    streams: Option<Vec<FfprobeStream>>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub duration: f64,
    /// Display width, i.e. after applying container rotation.
    pub width: u32,
    pub height: u32,
    pub size: u64,
    pub fps: f64,
    pub codec_name: Option<String>,
    pub format_name: Option<String>,
    pub audio_stream_count: u32,
}

impl VideoMetadata {
    pub fn meta(&self) -> VideoMeta {
        VideoMeta {
            width: self.width,
            height: self.height,
            duration: self.duration,
        }
    }
}

fn parse_frame_rate(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

fn rotation_degrees(stream: &FfprobeStream) -> i64 {
    let from_side_data = stream
        .side_data_list
        .iter()
        .find_map(|sd| sd.rotation)
        .map(|r| r.round() as i64);
    let from_tags = stream
        .tags
        .get("rotate")
        .and_then(|r| r.trim().parse::<i64>().ok());
    from_side_data.or(from_tags).unwrap_or(0)
}

pub fn parse_ffprobe_json(json: &str) -> Result<VideoMetadata, AppError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| AppError::from(format!("Failed to parse ffprobe JSON: {}", e)))?;

    let streams = output.streams.unwrap_or_default();
    let video_stream = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio_stream_count = streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("audio"))
        .count() as u32;

    let format = output.format.as_ref();
    let duration = format
        .and_then(|f| f.duration.as_deref())
        .or_else(|| video_stream.and_then(|s| s.duration.as_deref()))
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);
    let size = format
        .and_then(|f| f.size.as_deref())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let mut width = video_stream.and_then(|s| s.width).unwrap_or(0);
    let mut height = video_stream.and_then(|s| s.height).unwrap_or(0);
    if let Some(stream) = video_stream
        && rotation_degrees(stream).rem_euclid(180) == 90
    {
        std::mem::swap(&mut width, &mut height);
    }
    let fps = video_stream
        .and_then(|s| s.r_frame_rate.as_deref())
        .and_then(parse_frame_rate)
        .unwrap_or(0.0);

    Ok(VideoMetadata {
        duration,
        width,
        height,
        size,
        fps,
        codec_name: video_stream.and_then(|s| s.codec_name.clone()),
        format_name: format.and_then(|f| f.format_name.clone()),
        audio_stream_count,
    })
}

/// Runs `ffprobe` on `path`.
pub fn probe_video(ffprobe: &Path, path: &Path) -> Result<VideoMetadata, AppError> {
    let path_str = path.to_string_lossy();
    log::debug!(
        target: "crop_mov::ffmpeg::ffprobe",
        "Probing source: path={}",
        path_str
    );

    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            &path_str,
        ])
        .output()
        .map_err(|e| AppError::from(format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::from(format!("ffprobe failed: {}", stderr.trim())));
    }

    let json = String::from_utf8(output.stdout)
        .map_err(|_| AppError::from("ffprobe output was not valid UTF-8"))?;
    let meta = parse_ffprobe_json(&json)?;
    if meta.width == 0 || meta.height == 0 {
        return Err(AppError::from(format!(
            "No video stream found in {}",
            path_str
        )));
    }
    Ok(meta)
}
