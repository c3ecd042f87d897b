//! Scriptable in-memory engine for unit and integration tests.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use parking_lot::{Condvar, Mutex};

use crate::engine::{EngineEvents, MediaProbe, TranscodeEngine};
use crate::error::AppError;
use crate::ffmpeg::ffprobe::VideoMetadata;

/// What the next `exec` does.
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// Writes the bytes to the output path (last argument) and returns.
    Succeed(Vec<u8>),
    /// Exits with the given code and stderr.
    Fail(i32, String),
    /// Blocks until [`FakeEngine::release`] (then succeeds) or until
    /// cancelled (then returns [`AppError::Aborted`]).
    BlockUntilReleased(Vec<u8>),
    /// Like `BlockUntilReleased` but never honours cancellation.
    IgnoreCancel(Vec<u8>),
}

struct FakeState {
    behavior: FakeBehavior,
    files: HashMap<String, Vec<u8>>,
    last_args: Option<Vec<String>>,
    last_expected_duration: Option<f64>,
    exec_started: bool,
    released: bool,
    /// Sticky until the next `set_behavior`.
    cancelled: bool,
    cancel_count: usize,
    load_count: usize,
    load_error: Option<String>,
    script_progress: Vec<f64>,
    script_logs: Vec<String>,
    metadata: VideoMetadata,
}

pub struct FakeEngine {
    state: Mutex<FakeState>,
    wake: Condvar,
}

pub fn sample_metadata() -> VideoMetadata {
    VideoMetadata {
        duration: 10.0,
        width: 1920,
        height: 1080,
        size: 1_000_000,
        fps: 30.0,
        codec_name: Some("h264".to_string()),
        format_name: Some("mov,mp4,m4a,3gp,3g2,mj2".to_string()),
        audio_stream_count: 1,
    }
}

impl FakeEngine {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            state: Mutex::new(FakeState {
                behavior,
                files: HashMap::new(),
                last_args: None,
                last_expected_duration: None,
                exec_started: false,
                released: false,
                cancelled: false,
                cancel_count: 0,
                load_count: 0,
                load_error: None,
                script_progress: Vec::new(),
                script_logs: Vec::new(),
                metadata: sample_metadata(),
            }),
            wake: Condvar::new(),
        }
    }

    /// Replaces the behavior and clears any earlier cancel.
    pub fn set_behavior(&self, behavior: FakeBehavior) {
        let mut state = self.state.lock();
        state.behavior = behavior;
        state.cancelled = false;
    }

    /// Progress values and log lines emitted by every following `exec`.
    pub fn set_script(&self, progress: Vec<f64>, logs: Vec<String>) {
        let mut state = self.state.lock();
        state.script_progress = progress;
        state.script_logs = logs;
    }

    pub fn fail_load(&self, message: Option<&str>) {
        self.state.lock().load_error = message.map(str::to_string);
    }

    pub fn set_metadata(&self, metadata: VideoMetadata) {
        self.state.lock().metadata = metadata;
    }

    pub fn release(&self) {
        self.state.lock().released = true;
        self.wake.notify_all();
    }

    pub fn exec_started(&self) -> bool {
        self.state.lock().exec_started
    }

    pub fn last_args(&self) -> Option<Vec<String>> {
        self.state.lock().last_args.clone()
    }

    /// Output length the caller announced to the last `exec`.
    pub fn last_expected_duration(&self) -> Option<f64> {
        self.state.lock().last_expected_duration
    }

    pub fn staged_input(&self) -> Option<Vec<u8>> {
        self.state.lock().files.get(crate::render::INPUT_NAME).cloned()
    }

    pub fn cancel_count(&self) -> usize {
        self.state.lock().cancel_count
    }

    pub fn load_count(&self) -> usize {
        self.state.lock().load_count
    }

    fn wait_for_release(&self, honour_cancel: bool) -> Result<(), AppError> {
        let mut state = self.state.lock();
        loop {
            if honour_cancel && state.cancelled {
                return Err(AppError::aborted());
            }
            if state.released {
                return Ok(());
            }
            self.wake.wait(&mut state);
        }
    }
}

impl TranscodeEngine for FakeEngine {
    fn load(&self, events: &EngineEvents) -> Result<(), AppError> {
        let error = {
            let mut state = self.state.lock();
            state.load_count += 1;
            state.load_error.clone()
        };
        events.load_progress(0.0);
        if let Some(message) = error {
            return Err(AppError::FfmpegNotFound(message));
        }
        events.load_progress(1.0);
        Ok(())
    }

    fn write_input(&self, name: &str, bytes: &[u8]) -> Result<(), AppError> {
        self.state
            .lock()
            .files
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn exec(&self, args: &[String], events: &EngineEvents) -> Result<(), AppError> {
        let (behavior, progress, logs) = {
            let mut state = self.state.lock();
            state.last_args = Some(args.to_vec());
            state.last_expected_duration = events.expected_duration;
            state.exec_started = true;
            state.released = false;
            (
                state.behavior.clone(),
                state.script_progress.clone(),
                state.script_logs.clone(),
            )
        };
        for line in &logs {
            events.log(line);
        }
        for p in progress {
            events.progress(p);
        }

        let output = match behavior {
            FakeBehavior::Succeed(bytes) => bytes,
            FakeBehavior::Fail(code, stderr) => return Err(AppError::ffmpeg_failed(code, stderr)),
            FakeBehavior::BlockUntilReleased(bytes) => {
                self.wait_for_release(true)?;
                bytes
            }
            FakeBehavior::IgnoreCancel(bytes) => {
                self.wait_for_release(false)?;
                bytes
            }
        };
        if let Some(name) = args.last() {
            self.state.lock().files.insert(name.clone(), output);
        }
        Ok(())
    }

    fn read_output(&self, name: &str) -> Result<Vec<u8>, AppError> {
        self.state.lock().files.remove(name).ok_or_else(|| {
            AppError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} was not produced", name),
            ))
        })
    }

    fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancel_count += 1;
        state.cancelled = true;
        drop(state);
        self.wake.notify_all();
    }
}

impl MediaProbe for FakeEngine {
    fn probe(&self, path: &Path) -> Result<VideoMetadata, AppError> {
        if path.as_os_str().is_empty() {
            return Err(AppError::InvalidParams("empty path".to_string()));
        }
        Ok(self.state.lock().metadata.clone())
    }
}
