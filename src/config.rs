//! Engine configuration resolved from the environment.
//!
//! `CROP_MOV_FFMPEG` (or the more common `FFMPEG_PATH`) pins the FFmpeg
//! binary; `CROP_MOV_WORK_DIR` moves scratch directories off the system temp
//! dir. Anything unset falls back to discovery and `std::env::temp_dir()`.

use std::path::PathBuf;

pub const FFMPEG_ENV: &str = "CROP_MOV_FFMPEG";
pub const FFMPEG_FALLBACK_ENV: &str = "FFMPEG_PATH";
pub const WORK_DIR_ENV: &str = "CROP_MOV_WORK_DIR";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub work_root: Option<PathBuf>,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            ffmpeg_path: non_empty(FFMPEG_ENV)
                .or_else(|| non_empty(FFMPEG_FALLBACK_ENV))
                .map(PathBuf::from),
            work_root: non_empty(WORK_DIR_ENV).map(PathBuf::from),
        }
    }

    pub fn with_ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = Some(path.into());
        self
    }

    pub fn with_work_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.work_root = Some(path.into());
        self
    }

    pub fn effective_work_root(&self) -> PathBuf {
        self.work_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serial_test::serial;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn crate_specific_ffmpeg_var_wins() {
        let config = EngineConfig::from_lookup(lookup(&[
            (FFMPEG_ENV, "/opt/ffmpeg"),
            (FFMPEG_FALLBACK_ENV, "/usr/bin/ffmpeg"),
        ]));
        assert_eq!(config.ffmpeg_path, Some(PathBuf::from("/opt/ffmpeg")));
    }

    #[test]
    fn falls_back_to_ffmpeg_path_var() {
        let config = EngineConfig::from_lookup(lookup(&[
            (FFMPEG_ENV, "  "),
            (FFMPEG_FALLBACK_ENV, "/usr/bin/ffmpeg"),
        ]));
        assert_eq!(config.ffmpeg_path, Some(PathBuf::from("/usr/bin/ffmpeg")));
    }

    #[test]
    fn empty_env_uses_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[]));
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.effective_work_root(), std::env::temp_dir());
    }

    #[test]
    fn builder_overrides() {
        let config = EngineConfig::default()
            .with_ffmpeg_path("/x/ffmpeg")
            .with_work_root("/scratch");
        assert_eq!(config.effective_work_root(), PathBuf::from("/scratch"));
        assert_eq!(config.ffmpeg_path, Some(PathBuf::from("/x/ffmpeg")));
    }

    #[test]
    #[serial]
    fn from_env_reads_process_environment() {
        // SAFETY: serialized with every other test that touches these variables.
        unsafe {
            std::env::set_var(FFMPEG_ENV, "/env/ffmpeg");
            std::env::set_var(WORK_DIR_ENV, "/env/work");
        }
        let config = EngineConfig::from_env();
        unsafe {
            std::env::remove_var(FFMPEG_ENV);
            std::env::remove_var(WORK_DIR_ENV);
        }
        assert_eq!(config.ffmpeg_path, Some(PathBuf::from("/env/ffmpeg")));
        assert_eq!(config.work_root, Some(PathBuf::from("/env/work")));
    }
}
