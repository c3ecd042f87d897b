mod builder;
pub mod discovery;
mod engine;
mod error;
pub mod ffprobe;
mod progress;
mod runner;
mod temp;

pub use builder::{
    FilterStage, TrimWindow, build_ffmpeg_command, build_transform_args, even,
    expected_output_duration, filter_stages, format_args_for_display_multiline,
    scaled_dimensions, trim_window,
};
pub use engine::FfmpegEngine;
pub use error::{FfmpegErrorPayload, parse_ffmpeg_error};
pub use progress::ProgressParser;
pub use runner::{ProcessSlot, run_ffmpeg_blocking};
pub use temp::{WorkDir, cleanup_old_work_dirs};

/// Natural size and length of the source video.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    /// Seconds.
    pub duration: f64,
}

/// Path to string for FFmpeg args or logging.
pub fn path_to_string(path: &(impl AsRef<std::path::Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}
