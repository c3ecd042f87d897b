//! Method table behind the JSON-RPC sidecar. The binary owns stdin/stdout;
//! everything that touches a session lives here.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::AppError;
use crate::ffmpeg::{VideoMeta, format_args_for_display_multiline, path_to_string};
use crate::observe::SubscriptionId;
use crate::render::{RenderEvent, RenderState, RenderStatus};
use crate::session::{EditingSession, EngineStatus, SourceVideo};
use crate::store::TransformPatch;
use crate::transform::OutputFormat;

pub const PROTOCOL_VERSION: u8 = 1;

/// Receives `(event name, payload)` for every render event.
pub type EventEmitter = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Error body of an RPC response.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcError {
    pub summary: String,
    pub detail: String,
}

impl RpcError {
    pub fn new(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            detail: detail.into(),
        }
    }
}

impl From<AppError> for RpcError {
    fn from(err: AppError) -> Self {
        let (summary, detail) = err.summary_and_detail();
        Self { summary, detail }
    }
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilities {
    pub protocol_version: u8,
    pub output_formats: Vec<&'static str>,
    pub engine: EngineStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionOpenParams {
    input_path: PathBuf,
    /// Skips probing when the caller already knows the metadata.
    meta: Option<VideoMeta>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RenderCancelParams {
    job_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenderSaveParams {
    output_path: PathBuf,
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    // Requests without params arrive as null; treat them as an empty object.
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params)
        .map_err(|e| AppError::InvalidParams(format!("Invalid params payload: {}", e)))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::from(format!("Failed to serialize result: {}", e)))
}

fn block_on<T>(future: impl Future<Output = T>) -> Result<T, AppError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| AppError::from(format!("Failed to initialize async runtime: {}", e)))?;
    Ok(runtime.block_on(future))
}

fn render_event_payload(event: &RenderEvent) -> (&'static str, Value) {
    match event {
        RenderEvent::State { status } => (
            "render.state",
            serde_json::to_value(status).unwrap_or(Value::Null),
        ),
        RenderEvent::Progress { job_id, progress } => (
            "render.progress",
            json!({ "jobId": job_id, "progress": progress }),
        ),
        RenderEvent::Log { job_id, line } => {
            ("render.log", json!({ "jobId": job_id, "line": line }))
        }
    }
}

/// Only `render.start` blocks for the length of a render.
pub fn is_async_method(method: &str) -> bool {
    method == "render.start"
}

pub struct SidecarApi {
    session: Arc<EditingSession>,
    subscription: SubscriptionId,
}

impl SidecarApi {
    /// Forwards every render event of `session` to `emit` until dropped.
    pub fn new(session: Arc<EditingSession>, emit: EventEmitter) -> Self {
        let subscription = session.renderer().subscribe(move |event| {
            let (name, payload) = render_event_payload(event);
            emit(name, payload);
        });
        Self {
            session,
            subscription,
        }
    }

    pub fn session(&self) -> &Arc<EditingSession> {
        &self.session
    }

    /// Loads the engine, logging instead of failing; the status stays
    /// `Loading` until a later attempt succeeds.
    pub fn load_engine(&self) -> EngineStatus {
        if let Err(e) = self.session.load_engine() {
            log::warn!(
                target: "crop_mov::sidecar_api",
                "Engine not ready yet: {}",
                e
            );
        }
        self.session.engine_status()
    }

    pub fn capabilities(&self) -> AppCapabilities {
        AppCapabilities {
            protocol_version: PROTOCOL_VERSION,
            output_formats: vec![OutputFormat::Mp4.as_str(), OutputFormat::Webp.as_str()],
            engine: self.session.engine_status(),
        }
    }

    pub fn dispatch(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        log::debug!(target: "crop_mov::sidecar_api", "dispatch {}", method);
        match method {
            "render.start" => self.render_start(),
            _ => self.dispatch_sync(method, params).map_err(RpcError::from),
        }
    }

    fn dispatch_sync(&self, method: &str, params: Value) -> Result<Value, AppError> {
        let session = &self.session;
        match method {
            "app.capabilities" => to_value(self.capabilities()),
            "session.open" => {
                let parsed: SessionOpenParams = params_from_value(params)?;
                let source = match parsed.meta {
                    Some(meta) => {
                        let source = SourceVideo {
                            path: parsed.input_path,
                            meta,
                        };
                        session.select_source(source.clone());
                        source
                    }
                    None => session.open_source(&parsed.input_path)?,
                };
                Ok(json!({
                    "source": to_value(source)?,
                    "transform": to_value(session.transform().snapshot())?,
                }))
            }
            "transform.get" => to_value(session.transform().snapshot()),
            "transform.update" => {
                let patch: TransformPatch = params_from_value(params)?;
                let changed = session.transform().apply(patch);
                Ok(json!({
                    "changed": to_value(changed)?,
                    "transform": to_value(session.transform().snapshot())?,
                }))
            }
            "transform.reset" => {
                session.transform().reset();
                to_value(session.transform().snapshot())
            }
            "render.command" => {
                let args = session.command_preview()?;
                Ok(json!({
                    "args": args,
                    "display": format!("ffmpeg\n{}", format_args_for_display_multiline(&args)),
                }))
            }
            "render.cancel" => {
                let parsed: RenderCancelParams = params_from_value(params)?;
                let running = session.render_state();
                match (running, parsed.job_id) {
                    (RenderState::Running { job_id, .. }, Some(wanted)) if job_id != wanted => {
                        Err(AppError::InvalidParams(format!("Unknown jobId: {}", wanted)))
                    }
                    (RenderState::Running { .. }, _) => {
                        let cancelled = session.cancel_render();
                        Ok(json!({ "cancelled": cancelled.is_some(), "jobId": cancelled }))
                    }
                    _ => Ok(json!({ "cancelled": false, "jobId": Value::Null })),
                }
            }
            "render.status" => Ok(json!({
                "status": to_value(session.render_status())?,
                "engine": to_value(session.engine_status())?,
                "logs": session.logs(),
            })),
            "render.save" => {
                let parsed: RenderSaveParams = params_from_value(params)?;
                let saved = session.save_output(&parsed.output_path)?;
                Ok(json!({ "savedPath": path_to_string(&saved) }))
            }
            "render.start" => Err(AppError::from("render.start requires async execution")),
            _ => Err(AppError::from(format!("Unknown method: {}", method))),
        }
    }

    /// Runs a render to its terminal state. Completed and cancelled renders
    /// answer with their status; failed renders answer with an error.
    fn render_start(&self) -> Result<Value, RpcError> {
        if self.session.engine_status() != EngineStatus::Ready {
            self.session.load_engine()?;
        }
        let handle = self.session.render()?;
        let job_id = handle.job_id();
        let final_state = block_on(handle.finished())?;
        match final_state {
            RenderState::Failed { error, .. } => Err(RpcError::new(error.summary, error.detail)),
            RenderState::Completed { output, .. } => Ok(json!({
                "jobId": job_id,
                "status": to_value(RenderStatus::Completed {
                    job_id,
                    file_name: output.file_name.clone(),
                    format: output.format,
                    size: output.bytes.len() as u64,
                })?,
            })),
            _ => Ok(json!({
                "jobId": job_id,
                "status": to_value(RenderStatus::Cancelled { job_id })?,
            })),
        }
    }
}

impl Drop for SidecarApi {
    fn drop(&mut self) {
        self.session.renderer().unsubscribe(self.subscription);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::test_support::{FakeBehavior, FakeEngine};

    type Events = Arc<Mutex<Vec<(String, Value)>>>;

    fn api_with(behavior: FakeBehavior) -> (Arc<FakeEngine>, SidecarApi, Events) {
        let engine = Arc::new(FakeEngine::new(behavior));
        let session = Arc::new(EditingSession::new(engine.clone()).with_probe(engine.clone()));
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let api = SidecarApi::new(
            session,
            Arc::new(move |name: &str, payload: Value| sink.lock().push((name.to_string(), payload))),
        );
        (engine, api, events)
    }

    fn open_source(api: &SidecarApi, dir: &std::path::Path) -> PathBuf {
        let path = dir.join("clip.mov");
        fs::write(&path, b"movie").expect("write source");
        api.dispatch("session.open", json!({ "inputPath": &path }))
            .expect("session.open");
        path
    }

    #[test]
    fn capabilities_report_formats_and_engine() {
        let (_engine, api, _events) = api_with(FakeBehavior::Succeed(vec![]));
        let caps = api.dispatch("app.capabilities", Value::Null).expect("caps");
        assert_eq!(caps["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(caps["outputFormats"], json!(["mp4", "webp"]));
        assert_eq!(caps["engine"]["status"], "loading");

        assert_eq!(api.load_engine(), EngineStatus::Ready);
        let caps = api.dispatch("app.capabilities", Value::Null).expect("caps");
        assert_eq!(caps["engine"]["status"], "ready");
    }

    #[test]
    fn unknown_method_and_bad_params_are_errors() {
        let (_engine, api, _events) = api_with(FakeBehavior::Succeed(vec![]));
        let err = api.dispatch("nope", Value::Null).expect_err("unknown");
        assert!(err.summary.contains("Unknown method"));

        let err = api
            .dispatch("transform.update", json!({ "scale": "big" }))
            .expect_err("bad params");
        assert!(err.summary.contains("Invalid params"));

        let err = api.dispatch("render.save", json!({})).expect_err("missing path");
        assert!(err.summary.contains("outputPath"));
    }

    #[test]
    fn session_open_with_meta_skips_probe() {
        let (_engine, api, _events) = api_with(FakeBehavior::Succeed(vec![]));
        let result = api
            .dispatch(
                "session.open",
                json!({
                    "inputPath": "/videos/a.mp4",
                    "meta": { "width": 320, "height": 240, "duration": 2.0 }
                }),
            )
            .expect("open");
        assert_eq!(result["source"]["meta"]["width"], 320);
        assert_eq!(result["transform"]["outputFormat"], "mp4");
    }

    #[test]
    fn transform_update_reports_changed_fields() {
        let (_engine, api, _events) = api_with(FakeBehavior::Succeed(vec![]));
        let result = api
            .dispatch(
                "transform.update",
                json!({ "flipH": true, "outputFormat": "webp", "area": [0.1, 0.1, 0.5, 0.5] }),
            )
            .expect("update");
        assert_eq!(result["changed"], json!(["area", "flipH", "outputFormat"]));
        assert_eq!(result["transform"]["flipH"], true);

        let reset = api.dispatch("transform.reset", Value::Null).expect("reset");
        assert_eq!(reset["flipH"], false);
        assert!(reset.get("area").is_none());
    }

    #[test]
    fn render_command_needs_source_then_renders_display() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (_engine, api, _events) = api_with(FakeBehavior::Succeed(vec![]));
        let err = api.dispatch("render.command", Value::Null).expect_err("no source");
        assert_eq!(err.summary, "No source video selected");

        open_source(&api, dir.path());
        let result = api.dispatch("render.command", Value::Null).expect("command");
        let display = result["display"].as_str().expect("display");
        assert!(display.starts_with("ffmpeg\n"));
        assert!(display.contains("-c:v libx264"));
    }

    #[test]
    fn render_start_completes_emits_events_and_saves() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, api, events) = api_with(FakeBehavior::Succeed(b"clip".to_vec()));
        engine.set_script(vec![0.5], vec!["frame=1".to_string()]);
        open_source(&api, dir.path());

        let result = api.dispatch("render.start", Value::Null).expect("render");
        assert_eq!(result["status"]["state"], "completed");
        assert_eq!(result["status"]["fileName"], "cropped.mp4");
        assert_eq!(result["status"]["size"], 4);

        let names: Vec<String> = events.lock().iter().map(|(n, _)| n.clone()).collect();
        assert!(names.contains(&"render.progress".to_string()));
        assert!(names.contains(&"render.log".to_string()));
        assert_eq!(names.last().map(String::as_str), Some("render.state"));

        let saved = api
            .dispatch("render.save", json!({ "outputPath": dir.path() }))
            .expect("save");
        let saved_path = saved["savedPath"].as_str().expect("path");
        assert_eq!(fs::read(saved_path).expect("read"), b"clip");

        let status = api.dispatch("render.status", Value::Null).expect("status");
        assert_eq!(status["status"]["state"], "completed");
        assert_eq!(status["logs"], json!(["frame=1"]));
    }

    #[test]
    fn render_start_retries_a_failed_engine_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, api, _events) = api_with(FakeBehavior::Succeed(b"clip".to_vec()));
        open_source(&api, dir.path());

        engine.fail_load(Some("FFmpeg not found"));
        assert_eq!(api.load_engine(), EngineStatus::Loading { progress: 0.0 });
        assert!(api.dispatch("render.start", Value::Null).is_err());
        assert_eq!(engine.load_count(), 2);
        assert!(engine.last_args().is_none(), "no render ran");

        engine.fail_load(None);
        let result = api.dispatch("render.start", Value::Null).expect("render");
        assert_eq!(result["status"]["state"], "completed");
        assert!(engine.load_count() > 2);
        assert_eq!(api.session().engine_status(), EngineStatus::Ready);
    }

    #[test]
    fn failed_render_answers_with_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (_engine, api, _events) =
            api_with(FakeBehavior::Fail(1, "Unknown encoder 'libx264'".to_string()));
        open_source(&api, dir.path());
        let err = api.dispatch("render.start", Value::Null).expect_err("failed");
        assert!(err.summary.contains("encoder"), "summary: {}", err.summary);

        let err = api
            .dispatch("render.save", json!({ "outputPath": dir.path() }))
            .expect_err("nothing to save");
        assert_eq!(err.summary, "No rendered output available");
    }

    #[test]
    fn cancel_from_another_thread_ends_render_cancelled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, api, _events) =
            api_with(FakeBehavior::BlockUntilReleased(b"late".to_vec()));
        open_source(&api, dir.path());
        let api = Arc::new(api);

        let worker_api = Arc::clone(&api);
        let worker = thread::spawn(move || worker_api.dispatch("render.start", Value::Null));
        for _ in 0..500 {
            if engine.exec_started() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        let wrong = api
            .dispatch("render.cancel", json!({ "jobId": 999 }))
            .expect_err("unknown job");
        assert!(wrong.summary.contains("Unknown jobId"));

        let cancelled = api.dispatch("render.cancel", Value::Null).expect("cancel");
        assert_eq!(cancelled["cancelled"], true);

        let result = worker.join().expect("join").expect("render.start answer");
        assert_eq!(result["status"]["state"], "cancelled");

        let again = api.dispatch("render.cancel", Value::Null).expect("cancel idle");
        assert_eq!(again["cancelled"], false);
    }
}
