use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;

use super::discovery::{resolve_ffmpeg_path, resolve_ffprobe_path};
use super::ffprobe::{VideoMetadata, probe_video};
use super::runner::{ProcessSlot, run_ffmpeg_blocking};
use super::temp::WorkDir;
use crate::config::EngineConfig;
use crate::engine::{EngineEvents, MediaProbe, TranscodeEngine};
use crate::error::AppError;

struct Loaded {
    ffmpeg: PathBuf,
    work_dir: WorkDir,
}

/// [`TranscodeEngine`] backed by a local FFmpeg binary. Staged files live in
/// a private scratch directory that FFmpeg runs in, so argument lists can
/// refer to them by bare name.
pub struct FfmpegEngine {
    config: EngineConfig,
    loaded: Mutex<Option<Loaded>>,
    slot: ProcessSlot,
}

impl FfmpegEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            loaded: Mutex::new(None),
            slot: ProcessSlot::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().is_some()
    }

    /// Resolved FFmpeg binary, once loaded.
    pub fn ffmpeg_path(&self) -> Option<PathBuf> {
        self.loaded.lock().as_ref().map(|l| l.ffmpeg.clone())
    }

    fn staged_path(&self, name: &str) -> Result<PathBuf, AppError> {
        let guard = self.loaded.lock();
        let loaded = guard
            .as_ref()
            .ok_or_else(|| AppError::from("Transcoding engine is not loaded"))?;
        Ok(loaded.work_dir.file(name)?)
    }

}

impl MediaProbe for FfmpegEngine {
    /// Probes with the ffprobe that ships next to the resolved FFmpeg.
    fn probe(&self, path: &std::path::Path) -> Result<VideoMetadata, AppError> {
        let ffmpeg = match self.ffmpeg_path() {
            Some(p) => p,
            None => resolve_ffmpeg_path(&self.config)?,
        };
        let ffprobe = resolve_ffprobe_path(&ffmpeg)?;
        probe_video(&ffprobe, path)
    }
}

/// Output length requested with `-t`, if any.
fn requested_duration(args: &[String]) -> Option<f64> {
    let idx = args.iter().position(|a| a == "-t")?;
    args.get(idx + 1)?.parse().ok()
}

/// Length progress is measured against. The caller's expectation wins;
/// without one a `-t` argument is used, and failing that the runner falls
/// back to the input's `Duration:` banner.
fn progress_duration(args: &[String], events: &EngineEvents) -> Option<f64> {
    events
        .expected_duration
        .filter(|d| d.is_finite() && *d > 0.0)
        .or_else(|| requested_duration(args))
}

impl TranscodeEngine for FfmpegEngine {
    fn load(&self, events: &EngineEvents) -> Result<(), AppError> {
        let mut guard = self.loaded.lock();
        if guard.is_some() {
            events.load_progress(1.0);
            return Ok(());
        }
        events.load_progress(0.0);
        let ffmpeg = resolve_ffmpeg_path(&self.config)?;
        events.load_progress(0.5);
        let work_dir = WorkDir::create_in(&self.config.effective_work_root())?;
        log::info!(
            target: "crop_mov::ffmpeg::engine",
            "Engine loaded: ffmpeg={}, work_dir={}",
            ffmpeg.display(),
            work_dir.path().display()
        );
        *guard = Some(Loaded { ffmpeg, work_dir });
        events.load_progress(1.0);
        Ok(())
    }

    fn write_input(&self, name: &str, bytes: &[u8]) -> Result<(), AppError> {
        let path = self.staged_path(name)?;
        log::debug!(
            target: "crop_mov::ffmpeg::engine",
            "Staging {} bytes as {}",
            bytes.len(),
            path.display()
        );
        fs::write(&path, bytes)?;
        Ok(())
    }

    fn exec(&self, args: &[String], events: &EngineEvents) -> Result<(), AppError> {
        let (ffmpeg, cwd) = {
            let guard = self.loaded.lock();
            let loaded = guard
                .as_ref()
                .ok_or_else(|| AppError::from("Transcoding engine is not loaded"))?;
            (loaded.ffmpeg.clone(), loaded.work_dir.path().to_path_buf())
        };
        run_ffmpeg_blocking(
            &ffmpeg,
            args,
            Some(&cwd),
            progress_duration(args, events),
            &self.slot,
            events,
        )
    }

    fn read_output(&self, name: &str) -> Result<Vec<u8>, AppError> {
        let path = self.staged_path(name)?;
        let bytes = fs::read(&path)?;
        // The output is handed to the caller; the next render starts clean.
        let _ = fs::remove_file(&path);
        Ok(bytes)
    }

    fn cancel(&self) {
        if !self.slot.terminate() {
            log::debug!(
                target: "crop_mov::ffmpeg::engine",
                "Cancel requested with no FFmpeg process running"
            );
        }
    }
}
