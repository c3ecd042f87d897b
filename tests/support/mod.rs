#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crop_mov_core::config::EngineConfig;
use crop_mov_core::engine::MediaProbe;
use crop_mov_core::ffmpeg::FfmpegEngine;
use crop_mov_core::ffmpeg::discovery::resolve_ffmpeg_path;
use crop_mov_core::ffmpeg::ffprobe::VideoMetadata;
use crop_mov_core::session::EditingSession;
use crop_mov_core::test_support::{FakeBehavior, FakeEngine};

pub enum VideoKind {
    Plain,
    WithAudio,
}

/// Scratch directory plus a resolved FFmpeg, for tests that run the real binary.
pub struct IntegrationEnv {
    pub ffmpeg: PathBuf,
    pub config: EngineConfig,
    dir: tempfile::TempDir,
}

impl IntegrationEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = EngineConfig::from_env().with_work_root(dir.path());
        let ffmpeg = resolve_ffmpeg_path(&config).expect("FFmpeg not found");
        Self {
            ffmpeg,
            config,
            dir,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn with_test_video(&self, name: &str, duration_secs: f32, kind: VideoKind) -> PathBuf {
        let output_path = self.path(name);
        let status = create_test_video(&self.ffmpeg, &output_path, duration_secs, kind)
            .expect("failed to create test video");
        assert!(status.success(), "ffmpeg failed to create test video");
        output_path
    }

    pub fn session(&self) -> (Arc<FfmpegEngine>, EditingSession) {
        let engine = Arc::new(FfmpegEngine::new(self.config.clone()));
        let session = EditingSession::new(engine.clone()).with_probe(engine.clone());
        (engine, session)
    }

    pub fn encoder_available(&self, encoder: &str) -> bool {
        Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-encoders"])
            .output()
            .map(|out| String::from_utf8_lossy(&out.stdout).contains(encoder))
            .unwrap_or(false)
    }

    pub fn metadata(&self, path: &Path) -> VideoMetadata {
        FfmpegEngine::new(self.config.clone())
            .probe(path)
            .expect("probe rendered file")
    }
}

pub fn create_test_video(
    ffmpeg: &Path,
    output_path: &Path,
    duration_secs: f32,
    kind: VideoKind,
) -> std::io::Result<ExitStatus> {
    let duration_arg = format!("{}", duration_secs);
    let mut args = vec![
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-f".to_string(),
        "lavfi".to_string(),
        "-i".to_string(),
        format!("testsrc=duration={}:size=320x240:rate=30", duration_arg),
    ];
    if let VideoKind::WithAudio = kind {
        args.extend([
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!("sine=frequency=440:duration={}", duration_arg),
            "-c:a".to_string(),
            "aac".to_string(),
            "-shortest".to_string(),
        ]);
    }
    args.extend([
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        output_path.to_string_lossy().to_string(),
    ]);

    Command::new(ffmpeg)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
}

/// Session over a [`FakeEngine`] with a small source file on disk.
pub fn fake_session(behavior: FakeBehavior) -> (Arc<FakeEngine>, EditingSession, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("source.mov");
    std::fs::write(&source, b"source-bytes").expect("write source");
    let engine = Arc::new(FakeEngine::new(behavior));
    let session = EditingSession::new(engine.clone()).with_probe(engine.clone());
    session.open_source(&source).expect("open source");
    (engine, session, dir)
}

pub fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached in time");
}
