//! The editing context a front end drives: one source, one transform, one renderer.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::engine::{EngineEvents, MediaProbe, TranscodeEngine};
use crate::error::AppError;
use crate::ffmpeg::{FfmpegEngine, VideoMeta, build_ffmpeg_command, path_to_string};
use crate::render::{
    INPUT_NAME, RenderHandle, RenderRequest, RenderState, RenderStatus, Renderer,
};
use crate::store::TransformStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceVideo {
    pub path: PathBuf,
    pub meta: VideoMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum EngineStatus {
    Loading { progress: f64 },
    Ready,
}

pub struct EditingSession {
    engine: Arc<dyn TranscodeEngine>,
    probe: Option<Arc<dyn MediaProbe>>,
    store: TransformStore,
    renderer: Renderer,
    source: Mutex<Option<SourceVideo>>,
    engine_status: Arc<Mutex<EngineStatus>>,
}

impl EditingSession {
    pub fn new(engine: Arc<dyn TranscodeEngine>) -> Self {
        Self {
            renderer: Renderer::new(Arc::clone(&engine)),
            engine,
            probe: None,
            store: TransformStore::new(),
            source: Mutex::new(None),
            engine_status: Arc::new(Mutex::new(EngineStatus::Loading { progress: 0.0 })),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn MediaProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Session backed by a local FFmpeg, which also probes sources.
    pub fn with_ffmpeg(config: EngineConfig) -> Self {
        let engine = Arc::new(FfmpegEngine::new(config));
        Self::new(engine.clone()).with_probe(engine)
    }

    /// Initializes the engine. On failure the status stays `Loading`.
    pub fn load_engine(&self) -> Result<(), AppError> {
        let status = Arc::clone(&self.engine_status);
        let events = EngineEvents {
            on_load_progress: Some(Arc::new(move |progress| {
                let mut guard = status.lock();
                if *guard != EngineStatus::Ready {
                    *guard = EngineStatus::Loading { progress };
                }
            })),
            ..Default::default()
        };
        match self.engine.load(&events) {
            Ok(()) => {
                *self.engine_status.lock() = EngineStatus::Ready;
                log::info!(target: "crop_mov::session", "Engine ready");
                Ok(())
            }
            Err(e) => {
                log::error!(target: "crop_mov::session", "Engine failed to load: {}", e);
                Err(e)
            }
        }
    }

    pub fn engine_status(&self) -> EngineStatus {
        *self.engine_status.lock()
    }

    /// Probes `path` and makes it the current source.
    pub fn open_source(&self, path: &Path) -> Result<SourceVideo, AppError> {
        let probe = self
            .probe
            .as_ref()
            .ok_or_else(|| AppError::InvalidParams("No media probe configured".to_string()))?;
        let metadata = probe.probe(path)?;
        let source = SourceVideo {
            path: path.to_path_buf(),
            meta: metadata.meta(),
        };
        self.select_source(source.clone());
        Ok(source)
    }

    /// Makes `source` current and resets the transform to defaults.
    pub fn select_source(&self, source: SourceVideo) {
        log::info!(
            target: "crop_mov::session",
            "Source selected: path={}, {}x{}, duration={:.3}s",
            source.path.display(),
            source.meta.width,
            source.meta.height,
            source.meta.duration
        );
        *self.source.lock() = Some(source);
        self.store.reset();
    }

    pub fn source(&self) -> Option<SourceVideo> {
        self.source.lock().clone()
    }

    pub fn transform(&self) -> &TransformStore {
        &self.store
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// The argument list a render would run right now.
    pub fn command_preview(&self) -> Result<Vec<String>, AppError> {
        let source = self.source().ok_or(AppError::NoSource)?;
        let state = self.store.snapshot();
        let output = format!("output.{}", state.output_format.extension());
        Ok(build_ffmpeg_command(INPUT_NAME, &output, &state, &source.meta))
    }

    /// Reads the source and starts a render of the current transform.
    pub fn render(&self) -> Result<RenderHandle, AppError> {
        if let RenderState::Running { job_id, .. } = self.renderer.state() {
            return Err(AppError::Busy { job_id });
        }
        let source = self.source().ok_or(AppError::NoSource)?;
        let bytes = fs::read(&source.path)?;
        self.renderer.start(RenderRequest {
            source: bytes.into(),
            state: self.store.snapshot(),
            meta: source.meta,
        })
    }

    pub fn cancel_render(&self) -> Option<u64> {
        self.renderer.cancel()
    }

    pub fn render_state(&self) -> RenderState {
        self.renderer.state()
    }

    pub fn render_status(&self) -> RenderStatus {
        self.renderer.status()
    }

    pub fn progress(&self) -> f64 {
        self.renderer.progress()
    }

    pub fn logs(&self) -> Vec<String> {
        self.renderer.logs()
    }

    /// Writes the completed output to `dest`, or to `dest/cropped.<ext>`
    /// when `dest` is a directory. Returns the written path.
    pub fn save_output(&self, dest: &Path) -> Result<PathBuf, AppError> {
        let output = self.renderer.output().ok_or(AppError::NoOutput)?;
        let target = if dest.is_dir() {
            dest.join(&output.file_name)
        } else {
            dest.to_path_buf()
        };
        fs::write(&target, &output.bytes)?;
        log::info!(
            target: "crop_mov::session",
            "Saved {} bytes to {}",
            output.bytes.len(),
            path_to_string(&target)
        );
        Ok(target)
    }
}
