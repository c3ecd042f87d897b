use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::EngineConfig;
use crate::error::AppError;

#[cfg(target_os = "windows")]
const LOOKUP_TOOL: &str = "where";
#[cfg(not(target_os = "windows"))]
const LOOKUP_TOOL: &str = "which";

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let output = Command::new(LOOKUP_TOOL).arg(binary).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next()?.trim();
    (!first.is_empty()).then(|| PathBuf::from(first))
}

fn common_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
            PathBuf::from("/opt/local/bin/ffmpeg"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin\\ffmpeg.exe"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

/// Finds FFmpeg: configured path, then common install locations, then PATH.
pub fn resolve_ffmpeg_path(config: &EngineConfig) -> Result<PathBuf, AppError> {
    if let Some(configured) = &config.ffmpeg_path {
        if configured.exists() {
            log::debug!(
                target: "crop_mov::ffmpeg::discovery",
                "FFmpeg path from config: {}",
                configured.display()
            );
            return Ok(configured.clone());
        }
        log::warn!(
            target: "crop_mov::ffmpeg::discovery",
            "Configured FFmpeg path does not exist, falling back to discovery: {}",
            configured.display()
        );
    }

    if let Some(path) = common_paths().into_iter().find(|p| p.exists()) {
        log::debug!(
            target: "crop_mov::ffmpeg::discovery",
            "FFmpeg found in common path: {}",
            path.display()
        );
        return Ok(path);
    }

    if let Some(path) = find_in_path("ffmpeg").filter(|p| p.exists()) {
        log::debug!(
            target: "crop_mov::ffmpeg::discovery",
            "FFmpeg found in PATH: {}",
            path.display()
        );
        return Ok(path);
    }

    log::error!(
        target: "crop_mov::ffmpeg::discovery",
        "FFmpeg not found in config, PATH or common locations"
    );
    Err(AppError::FfmpegNotFound(
        "FFmpeg not found. Install it or set CROP_MOV_FFMPEG:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html"
            .to_string(),
    ))
}

/// Paths to try for ffprobe given an ffmpeg binary path (suffixed first, then plain).
pub fn ffprobe_candidates(ffmpeg_path: &Path) -> Vec<PathBuf> {
    let Some(parent) = ffmpeg_path.parent() else {
        return vec![];
    };
    let mut candidates = Vec::with_capacity(2);
    let suffix = ffmpeg_path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|stem| stem.strip_prefix("ffmpeg"))
        .filter(|suffix| !suffix.is_empty());
    if let Some(suffix) = suffix {
        #[cfg(target_os = "windows")]
        candidates.push(parent.join(format!("ffprobe{suffix}.exe")));
        #[cfg(not(target_os = "windows"))]
        candidates.push(parent.join(format!("ffprobe{suffix}")));
    }
    #[cfg(target_os = "windows")]
    candidates.push(parent.join("ffprobe.exe"));
    #[cfg(not(target_os = "windows"))]
    candidates.push(parent.join("ffprobe"));
    candidates
}

/// ffprobe ships next to ffmpeg; PATH is the last resort.
pub fn resolve_ffprobe_path(ffmpeg_path: &Path) -> Result<PathBuf, AppError> {
    if let Some(found) = ffprobe_candidates(ffmpeg_path)
        .into_iter()
        .find(|c| c.exists())
    {
        return Ok(found);
    }
    find_in_path("ffprobe").ok_or_else(|| {
        AppError::FfmpegNotFound(format!(
            "ffprobe not found next to {} or in PATH",
            ffmpeg_path.display()
        ))
    })
}
