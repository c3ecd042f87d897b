//! One render at a time: stage the source, run the engine once, keep the result.
//!
//! State machine: `Idle → Running → {Completed | Cancelled | Failed}`. Any
//! non-running state may start a fresh render. Cancelling flips the state to
//! `Cancelled` immediately; whatever the engine produces afterwards is dropped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use parking_lot::Mutex;
use serde::Serialize;

use crate::engine::{EngineEvents, TranscodeEngine};
use crate::error::AppError;
use crate::ffmpeg::{VideoMeta, build_ffmpeg_command, expected_output_duration};
use crate::observe::{SubscriptionId, Subscribers};
use crate::transform::{OutputFormat, TransformState};

/// Name the source is staged under inside the engine.
pub const INPUT_NAME: &str = "input";

/// Upper bound on retained engine log lines per render.
const MAX_LOG_LINES: usize = 2000;

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutput {
    pub bytes: Arc<[u8]>,
    pub format: OutputFormat,
    /// `cropped.mp4` or `cropped.webp`.
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderFailure {
    pub summary: String,
    pub detail: String,
}

impl From<&AppError> for RenderFailure {
    fn from(err: &AppError) -> Self {
        let (summary, detail) = err.summary_and_detail();
        Self { summary, detail }
    }
}

#[derive(Debug, Clone)]
pub enum RenderState {
    Idle,
    Running { job_id: u64, token: CancelToken },
    Completed { job_id: u64, output: RenderOutput },
    Cancelled { job_id: u64 },
    Failed { job_id: u64, error: RenderFailure },
}

impl RenderState {
    pub fn job_id(&self) -> Option<u64> {
        match self {
            RenderState::Idle => None,
            RenderState::Running { job_id, .. }
            | RenderState::Completed { job_id, .. }
            | RenderState::Cancelled { job_id }
            | RenderState::Failed { job_id, .. } => Some(*job_id),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, RenderState::Running { .. })
    }

    pub fn output(&self) -> Option<&RenderOutput> {
        match self {
            RenderState::Completed { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Serializable view of [`RenderState`] for front ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum RenderStatus {
    Idle,
    #[serde(rename_all = "camelCase")]
    Running { job_id: u64, progress: f64 },
    #[serde(rename_all = "camelCase")]
    Completed {
        job_id: u64,
        file_name: String,
        format: OutputFormat,
        size: u64,
    },
    #[serde(rename_all = "camelCase")]
    Cancelled { job_id: u64 },
    #[serde(rename_all = "camelCase")]
    Failed {
        job_id: u64,
        summary: String,
        detail: String,
    },
}

impl RenderStatus {
    fn of(state: &RenderState, progress: f64) -> Self {
        match state {
            RenderState::Idle => RenderStatus::Idle,
            RenderState::Running { job_id, .. } => RenderStatus::Running {
                job_id: *job_id,
                progress,
            },
            RenderState::Completed { job_id, output } => RenderStatus::Completed {
                job_id: *job_id,
                file_name: output.file_name.clone(),
                format: output.format,
                size: output.bytes.len() as u64,
            },
            RenderState::Cancelled { job_id } => RenderStatus::Cancelled { job_id: *job_id },
            RenderState::Failed { job_id, error } => RenderStatus::Failed {
                job_id: *job_id,
                summary: error.summary.clone(),
                detail: error.detail.clone(),
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RenderStatus::Completed { .. }
                | RenderStatus::Cancelled { .. }
                | RenderStatus::Failed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RenderEvent {
    State { status: RenderStatus },
    #[serde(rename_all = "camelCase")]
    Progress { job_id: u64, progress: f64 },
    #[serde(rename_all = "camelCase")]
    Log { job_id: u64, line: String },
}

/// Everything a render needs, captured when it starts.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub source: Arc<[u8]>,
    pub state: TransformState,
    pub meta: VideoMeta,
}

struct RendererInner {
    engine: Arc<dyn TranscodeEngine>,
    state: Mutex<RenderState>,
    progress: Mutex<f64>,
    logs: Mutex<Vec<String>>,
    next_job_id: AtomicU64,
    /// Serializes engine use so a new job waits for a cancelled one to unwind.
    exec_lock: Mutex<()>,
    subscribers: Subscribers<RenderEvent>,
}

impl RendererInner {
    fn is_current(&self, job_id: u64) -> bool {
        matches!(&*self.state.lock(), RenderState::Running { job_id: id, .. } if *id == job_id)
    }

    fn status(&self) -> RenderStatus {
        let state = self.state.lock();
        RenderStatus::of(&state, *self.progress.lock())
    }

    fn report_progress(&self, job_id: u64, progress: f64) {
        if !self.is_current(job_id) {
            return;
        }
        *self.progress.lock() = progress;
        self.subscribers
            .notify(&RenderEvent::Progress { job_id, progress });
    }

    fn push_log(&self, job_id: u64, line: &str) {
        if !self.is_current(job_id) {
            return;
        }
        {
            let mut logs = self.logs.lock();
            logs.push(line.to_string());
            if logs.len() > MAX_LOG_LINES {
                let excess = logs.len() - MAX_LOG_LINES;
                logs.drain(..excess);
            }
        }
        self.subscribers.notify(&RenderEvent::Log {
            job_id,
            line: line.to_string(),
        });
    }

    fn publish_state(&self) {
        let status = self.status();
        self.subscribers.notify(&RenderEvent::State { status });
    }

    fn cancel_job(&self, only: Option<u64>) -> Option<u64> {
        let cancelled = {
            let mut state = self.state.lock();
            match &*state {
                RenderState::Running { job_id, token }
                    if only.is_none_or(|wanted| wanted == *job_id) =>
                {
                    let job_id = *job_id;
                    token.cancel();
                    *state = RenderState::Cancelled { job_id };
                    // Still under the state lock: no other render can start
                    // until the abort of this one has returned.
                    self.engine.cancel();
                    Some(job_id)
                }
                _ => None,
            }
        };
        if let Some(job_id) = cancelled {
            log::info!(target: "crop_mov::render", "Render cancelled (jobId={})", job_id);
            self.publish_state();
        }
        cancelled
    }

    /// Moves a still-current job to its terminal state. Returns the state the
    /// job ended in from its own point of view.
    fn finish(&self, job_id: u64, result: Result<RenderOutput, AppError>) -> RenderState {
        let final_state = {
            let mut state = self.state.lock();
            let current = matches!(&*state, RenderState::Running { job_id: id, .. } if *id == job_id);
            if !current {
                log::debug!(
                    target: "crop_mov::render",
                    "Discarding result of cancelled job (jobId={})",
                    job_id
                );
                return RenderState::Cancelled { job_id };
            }
            *state = match result {
                Ok(output) => {
                    *self.progress.lock() = 1.0;
                    log::info!(
                        target: "crop_mov::render",
                        "Render completed (jobId={}, file={}, bytes={})",
                        job_id,
                        output.file_name,
                        output.bytes.len()
                    );
                    RenderState::Completed { job_id, output }
                }
                Err(AppError::Aborted) => RenderState::Cancelled { job_id },
                Err(err) => {
                    log::error!(
                        target: "crop_mov::render",
                        "Render failed (jobId={}): {}",
                        job_id,
                        err
                    );
                    RenderState::Failed {
                        job_id,
                        error: RenderFailure::from(&err),
                    }
                }
            };
            state.clone()
        };
        self.publish_state();
        final_state
    }
}

fn run_job(
    inner: &Arc<RendererInner>,
    job_id: u64,
    token: &CancelToken,
    request: &RenderRequest,
) -> Result<RenderOutput, AppError> {
    let _exclusive = inner.exec_lock.lock();
    let check = || {
        if token.is_cancelled() {
            Err(AppError::aborted())
        } else {
            Ok(())
        }
    };
    check()?;

    let progress_inner = Arc::clone(inner);
    let log_inner = Arc::clone(inner);
    let events = EngineEvents {
        on_load_progress: None,
        on_progress: Some(Arc::new(move |p| progress_inner.report_progress(job_id, p))),
        on_log: Some(Arc::new(move |line: &str| log_inner.push_log(job_id, line))),
        expected_duration: expected_output_duration(&request.state, &request.meta),
    };

    inner.engine.load(&events)?;
    let format = request.state.output_format;
    let output_name = format!("output.{}", format.extension());
    inner.engine.write_input(INPUT_NAME, &request.source)?;
    check()?;

    let args = build_ffmpeg_command(INPUT_NAME, &output_name, &request.state, &request.meta);
    inner.engine.exec(&args, &events)?;
    check()?;

    let bytes = inner.engine.read_output(&output_name)?;
    Ok(RenderOutput {
        bytes: bytes.into(),
        format,
        file_name: format.output_file_name(),
    })
}

/// Handle to a started render. Dropping it detaches the render; it still
/// runs to a terminal state.
pub struct RenderHandle {
    job_id: u64,
    token: CancelToken,
    inner: Arc<RendererInner>,
    join: thread::JoinHandle<RenderState>,
}

impl RenderHandle {
    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Cancels this render if it is still running.
    pub fn cancel(&self) -> bool {
        self.inner.cancel_job(Some(self.job_id)).is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Blocks until the worker exits and returns the state this job ended in.
    pub fn wait(self) -> RenderState {
        let job_id = self.job_id;
        self.join.join().unwrap_or_else(|_| RenderState::Failed {
            job_id,
            error: RenderFailure {
                summary: "Render worker panicked".to_string(),
                detail: "Render worker panicked".to_string(),
            },
        })
    }

    /// Async form of [`RenderHandle::wait`]. Must be awaited inside a tokio runtime.
    pub async fn finished(self) -> RenderState {
        let job_id = self.job_id;
        tokio::task::spawn_blocking(move || self.wait())
            .await
            .unwrap_or_else(|e| RenderState::Failed {
                job_id,
                error: RenderFailure {
                    summary: "Render task failed".to_string(),
                    detail: e.to_string(),
                },
            })
    }
}

/// Owns the render state machine for one engine.
#[derive(Clone)]
pub struct Renderer {
    inner: Arc<RendererInner>,
}

impl Renderer {
    pub fn new(engine: Arc<dyn TranscodeEngine>) -> Self {
        Self {
            inner: Arc::new(RendererInner {
                engine,
                state: Mutex::new(RenderState::Idle),
                progress: Mutex::new(0.0),
                logs: Mutex::new(Vec::new()),
                next_job_id: AtomicU64::new(1),
                exec_lock: Mutex::new(()),
                subscribers: Subscribers::new(),
            }),
        }
    }

    pub fn engine(&self) -> &Arc<dyn TranscodeEngine> {
        &self.inner.engine
    }

    /// Starts a render on a worker thread. Rejected with [`AppError::Busy`]
    /// while another render is running.
    pub fn start(&self, request: RenderRequest) -> Result<RenderHandle, AppError> {
        let (job_id, token) = {
            let mut state = self.inner.state.lock();
            if let RenderState::Running { job_id, .. } = &*state {
                log::warn!(
                    target: "crop_mov::render",
                    "Rejected render start while jobId={} is running",
                    job_id
                );
                return Err(AppError::Busy { job_id: *job_id });
            }
            let job_id = self.inner.next_job_id.fetch_add(1, Ordering::Relaxed);
            let token = CancelToken::new();
            *self.inner.progress.lock() = 0.0;
            self.inner.logs.lock().clear();
            *state = RenderState::Running {
                job_id,
                token: token.clone(),
            };
            (job_id, token)
        };
        log::info!(
            target: "crop_mov::render",
            "Render started (jobId={}, format={}, sourceBytes={})",
            job_id,
            request.state.output_format,
            request.source.len()
        );
        self.inner.publish_state();

        let inner = Arc::clone(&self.inner);
        let worker_token = token.clone();
        let join = thread::spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| {
                run_job(&inner, job_id, &worker_token, &request)
            }))
            .unwrap_or_else(|_| Err(AppError::from("Render worker panicked")));
            inner.finish(job_id, result)
        });

        Ok(RenderHandle {
            job_id,
            token,
            inner: Arc::clone(&self.inner),
            join,
        })
    }

    /// Cancels the running render, if any. Returns its job id.
    pub fn cancel(&self) -> Option<u64> {
        self.inner.cancel_job(None)
    }

    pub fn state(&self) -> RenderState {
        self.inner.state.lock().clone()
    }

    pub fn status(&self) -> RenderStatus {
        self.inner.status()
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().is_running()
    }

    pub fn progress(&self) -> f64 {
        *self.inner.progress.lock()
    }

    pub fn logs(&self) -> Vec<String> {
        self.inner.logs.lock().clone()
    }

    /// Output of the last render, only when it completed.
    pub fn output(&self) -> Option<RenderOutput> {
        self.inner.state.lock().output().cloned()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&RenderEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.subscribers.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.unsubscribe(id)
    }
}
