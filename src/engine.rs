//! The transcoding engine seam.
//!
//! Renders only talk to a [`TranscodeEngine`]: stage bytes, run one argument
//! list, read bytes back, and abort on request. The FFmpeg-backed
//! implementation lives in [`crate::ffmpeg::FfmpegEngine`]; tests use a fake.

use std::path::Path;
use std::sync::Arc;

use crate::error::AppError;
use crate::ffmpeg::ffprobe::VideoMetadata;

pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;
pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks an engine reports through. Every field is optional.
#[derive(Clone, Default)]
pub struct EngineEvents {
    /// Initialization progress in [0, 1].
    pub on_load_progress: Option<ProgressCallback>,
    /// Conversion progress in [0, 1].
    pub on_progress: Option<ProgressCallback>,
    /// Free-text log lines as the engine prints them.
    pub on_log: Option<LogCallback>,
    /// Seconds of output the caller expects `exec` to produce. Progress is
    /// measured against it instead of the input length when set.
    pub expected_duration: Option<f64>,
}

impl EngineEvents {
    pub fn load_progress(&self, progress: f64) {
        if let Some(cb) = &self.on_load_progress {
            cb(progress.clamp(0.0, 1.0));
        }
    }

    pub fn progress(&self, progress: f64) {
        if let Some(cb) = &self.on_progress {
            cb(progress.clamp(0.0, 1.0));
        }
    }

    pub fn log(&self, line: &str) {
        if let Some(cb) = &self.on_log {
            cb(line);
        }
    }
}

impl std::fmt::Debug for EngineEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineEvents")
            .field("on_load_progress", &self.on_load_progress.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("on_log", &self.on_log.is_some())
            .field("expected_duration", &self.expected_duration)
            .finish()
    }
}

pub trait TranscodeEngine: Send + Sync {
    /// Prepares the engine. Safe to call more than once.
    fn load(&self, events: &EngineEvents) -> Result<(), AppError>;

    /// Stages `bytes` under `name` for the next [`TranscodeEngine::exec`].
    fn write_input(&self, name: &str, bytes: &[u8]) -> Result<(), AppError>;

    /// Runs one invocation to completion. Returns [`AppError::Aborted`] when
    /// [`TranscodeEngine::cancel`] interrupted it.
    fn exec(&self, args: &[String], events: &EngineEvents) -> Result<(), AppError>;

    /// Reads a file the last invocation produced.
    fn read_output(&self, name: &str) -> Result<Vec<u8>, AppError>;

    /// Best-effort abort of the in-flight invocation. No-op when idle.
    fn cancel(&self);
}

/// Reads size and length of a source file before it is edited.
pub trait MediaProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<VideoMetadata, AppError>;
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn progress_is_clamped_before_delivery() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let events = EngineEvents {
            on_progress: Some(Arc::new(move |p| sink.lock().push(p))),
            ..Default::default()
        };
        events.progress(1.7);
        events.progress(-0.2);
        events.progress(0.4);
        assert_eq!(*seen.lock(), vec![1.0, 0.0, 0.4]);
    }

    #[test]
    fn missing_callbacks_are_ignored() {
        let events = EngineEvents::default();
        events.load_progress(0.5);
        events.progress(0.5);
        events.log("line");
    }
}
