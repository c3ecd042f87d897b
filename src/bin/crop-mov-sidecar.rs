use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crop_mov_core::config::EngineConfig;
use crop_mov_core::ffmpeg::cleanup_old_work_dirs;
use crop_mov_core::session::EditingSession;
use crop_mov_core::sidecar_api::{self, RpcError, SidecarApi};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};

const STARTUP_CLEANUP_MAX_AGE_HOURS: u64 = 24;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: RpcError,
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent<'a> {
    event: &'a str,
    payload: Value,
}

type SharedWriter = Arc<Mutex<io::Stdout>>;

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn emit_rpc_event(writer: &SharedWriter, event: &str, payload: Value) {
    let _ = write_json_line_shared(writer, &RpcEvent { event, payload });
}

fn respond(writer: &SharedWriter, id: u64, result: Result<Value, RpcError>) {
    let written = match result {
        Ok(result) => write_json_line_shared(writer, &RpcSuccess { id, result }),
        Err(error) => write_json_line_shared(writer, &RpcFailure { id, error }),
    };
    if let Err(err) = written {
        log::error!(target: "crop_mov::sidecar", "Failed to write response {}: {}", id, err);
    }
}

fn fail(writer: &SharedWriter, id: u64, summary: &str, detail: String) {
    respond(writer, id, Err(RpcError::new(summary, detail)));
}

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = EngineConfig::from_env();
    cleanup_old_work_dirs(
        &config.effective_work_root(),
        Duration::from_secs(STARTUP_CLEANUP_MAX_AGE_HOURS * 3600),
    );

    let stdout: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    let session = Arc::new(EditingSession::with_ffmpeg(config));
    let event_writer = Arc::clone(&stdout);
    let api = Arc::new(SidecarApi::new(
        session,
        Arc::new(move |event: &str, payload: Value| {
            emit_rpc_event(&event_writer, event, payload)
        }),
    ));

    let status = api.load_engine();
    emit_rpc_event(&stdout, "engine.status", json!(status));

    let stdin = io::stdin();
    let mut async_workers: Vec<thread::JoinHandle<()>> = Vec::new();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                fail(&stdout, 0, "Invalid input stream", err.to_string());
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                fail(&stdout, 0, "Invalid request", err.to_string());
                continue;
            }
        };

        if sidecar_api::is_async_method(&request.method) {
            let writer = Arc::clone(&stdout);
            let api = Arc::clone(&api);
            let worker = thread::spawn(move || {
                let result = api.dispatch(&request.method, request.params);
                respond(&writer, request.id, result);
            });
            async_workers.retain(|w| !w.is_finished());
            async_workers.push(worker);
        } else {
            let result = api.dispatch(&request.method, request.params);
            respond(&stdout, request.id, result);
        }
    }

    // stdin closed: stop any render still in flight before exiting.
    api.session().cancel_render();
    for worker in async_workers {
        let _ = worker.join();
    }
    Ok(())
}
