//! FFmpeg process spawning and progress parsing.
//!
//! Spawns FFmpeg as a child process, parses `-progress pipe:1` output from
//! stdout and log lines from stderr on two reader threads, and waits for
//! the child. The child lives in a [`ProcessSlot`] so another thread can
//! kill it; an emptied slot at exit means the run was aborted.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, Stdio};

#[cfg(windows)]
use std::os::windows::process::CommandExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::progress::ProgressParser;
use crate::engine::EngineEvents;
use crate::error::AppError;

/// Sentinel for "duration not yet known". AtomicU64 cannot hold Option<f64>,
/// so duration is stored as f64 bits; u64::MAX means "not yet known".
const NONE_DURATION_BITS: u64 = u64::MAX;

/// Minimum interval between progress emits.
const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_millis(150);
/// Keep only the last N bytes of stderr.
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// Holds the running child so it can be terminated from another thread.
#[derive(Debug, Default)]
pub struct ProcessSlot {
    child: Mutex<Option<Child>>,
}

impl ProcessSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn install(&self, child: Child) {
        *self.child.lock() = Some(child);
    }

    fn take(&self) -> Option<Child> {
        self.child.lock().take()
    }

    pub fn is_running(&self) -> bool {
        self.child.lock().is_some()
    }

    /// Kills the child if one is running. Returns whether one was.
    pub fn terminate(&self) -> bool {
        let Some(mut child) = self.take() else {
            return false;
        };
        log::info!(
            target: "crop_mov::ffmpeg::runner",
            "Terminating FFmpeg process (pid={})",
            child.id()
        );
        let _ = child.kill();
        let _ = child.wait();
        true
    }
}

struct SharedDuration(AtomicU64);

impl SharedDuration {
    fn new(initial: Option<f64>) -> Self {
        Self(AtomicU64::new(
            initial
                .filter(|d| *d > 0.0)
                .map(f64::to_bits)
                .unwrap_or(NONE_DURATION_BITS),
        ))
    }

    fn load(&self) -> Option<f64> {
        let bits = self.0.load(Ordering::Relaxed);
        (bits != NONE_DURATION_BITS).then(|| f64::from_bits(bits))
    }

    fn store(&self, duration: f64) {
        self.0.store(duration.to_bits(), Ordering::Relaxed);
    }
}

enum StreamRole {
    /// `-progress pipe:1` key/value lines.
    Progress,
    /// Human-readable log; also carries the `Duration:` banner.
    Log(Arc<Mutex<Vec<u8>>>),
}

fn read_stream<R: std::io::Read + Send + 'static>(
    reader: R,
    role: StreamRole,
    duration: Arc<SharedDuration>,
    events: EngineEvents,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut parser = ProgressParser::new(duration.load());
        let mut last_emit = Instant::now();
        let mut last_progress = 0.0_f64;
        let mut stream_reader = BufReader::new(reader);
        let mut line_buf = Vec::with_capacity(256);
        while stream_reader.read_until(b'\n', &mut line_buf).unwrap_or(0) > 0 {
            let text = String::from_utf8_lossy(&line_buf);
            let line = text.trim_end_matches(['\n', '\r']);
            match &role {
                StreamRole::Log(tail) => {
                    {
                        let mut guard = tail.lock();
                        guard.extend_from_slice(line.as_bytes());
                        guard.push(b'\n');
                        if guard.len() > MAX_STDERR_BYTES {
                            let excess = guard.len() - MAX_STDERR_BYTES;
                            guard.drain(..excess);
                        }
                    }
                    events.log(line);
                    let known = parser.duration();
                    parser.feed(line);
                    if known.is_none()
                        && let Some(found) = parser.duration()
                    {
                        duration.store(found);
                    }
                }
                StreamRole::Progress => {
                    if parser.duration().is_none() {
                        parser = ProgressParser::new(duration.load());
                    }
                    if let Some(p) = parser.feed(line) {
                        let now = Instant::now();
                        let should_emit = now.duration_since(last_emit) >= PROGRESS_EMIT_INTERVAL
                            || (p - last_progress).abs() >= 0.01
                            || p >= 1.0;
                        if should_emit {
                            last_emit = now;
                            last_progress = p;
                            events.progress(p);
                        }
                    }
                }
            }
            line_buf.clear();
        }
    })
}

/// Runs FFmpeg with `args` in `cwd` and blocks until it exits.
///
/// - `expected_duration`: seconds of output expected; lets progress be
///   computed before (or without) the `Duration:` banner.
/// - `slot`: receives the child while it runs; [`ProcessSlot::terminate`]
///   from another thread makes this return [`AppError::Aborted`].
pub fn run_ffmpeg_blocking(
    ffmpeg: &Path,
    args: &[String],
    cwd: Option<&Path>,
    expected_duration: Option<f64>,
    slot: &ProcessSlot,
    events: &EngineEvents,
) -> Result<(), AppError> {
    let input_arg = args
        .iter()
        .position(|a| a == "-i")
        .and_then(|i| args.get(i + 1));
    log::debug!(
        target: "crop_mov::ffmpeg::runner",
        "Spawning FFmpeg: path={}, input={:?}, output={:?}",
        ffmpeg.display(),
        input_arg,
        args.last()
    );

    let mut cmd = Command::new(ffmpeg);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let mut child = cmd
        .spawn()
        .map_err(|e| AppError::from(format!("Failed to spawn FFmpeg: {}", e)))?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(AppError::from("Failed to capture FFmpeg output streams"));
    };

    slot.install(child);

    let duration = Arc::new(SharedDuration::new(expected_duration));
    let stderr_tail = Arc::new(Mutex::new(Vec::new()));

    let stdout_handle = read_stream(
        stdout,
        StreamRole::Progress,
        Arc::clone(&duration),
        events.clone(),
    );
    let stderr_handle = read_stream(
        stderr,
        StreamRole::Log(Arc::clone(&stderr_tail)),
        Arc::clone(&duration),
        events.clone(),
    );

    let _ = stdout_handle.join();
    let _ = stderr_handle.join();

    let status = match slot.take() {
        Some(mut c) => c.wait()?,
        None => {
            log::warn!(
                target: "crop_mov::ffmpeg::runner",
                "FFmpeg process was aborted (terminated externally)"
            );
            return Err(AppError::aborted());
        }
    };

    let stderr_str = String::from_utf8_lossy(&stderr_tail.lock()).to_string();

    if status.success() {
        events.progress(1.0);
        log::info!(
            target: "crop_mov::ffmpeg::runner",
            "FFmpeg completed successfully"
        );
        Ok(())
    } else {
        let code = status.code().unwrap_or(-1);
        let err_preview = stderr_str
            .lines()
            .rev()
            .take(3)
            .collect::<Vec<_>>()
            .join("; ");
        log::error!(
            target: "crop_mov::ffmpeg::runner",
            "FFmpeg failed (code={}): {}",
            code,
            err_preview
        );
        Err(AppError::FfmpegFailed {
            code,
            stderr: stderr_str,
        })
    }
}
