use std::sync::LazyLock;

use regex::Regex;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration: (\d+):(\d+):([\d.]+)").expect("invalid duration regex")
});
static OUT_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^out_time_(?:ms|us)=(\d+)").expect("invalid time regex"));

/// Tracks the expected duration across FFmpeg output lines and turns
/// `-progress` key/value lines into a fraction in [0, 1].
#[derive(Debug, Clone, Default)]
pub struct ProgressParser {
    duration: Option<f64>,
}

impl ProgressParser {
    /// `duration` is the expected output length when known up front (trimmed
    /// renders). A `Duration:` banner line only fills it in when unknown.
    pub fn new(duration: Option<f64>) -> Self {
        Self {
            duration: duration.filter(|d| d.is_finite() && *d > 0.0),
        }
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Returns a progress fraction when `line` carries one.
    pub fn feed(&mut self, line: &str) -> Option<f64> {
        let line = line.trim();
        if line == "progress=end" {
            return Some(1.0);
        }

        if let Some(caps) = DURATION_RE.captures(line) {
            if self.duration.is_none() {
                let hours: f64 = caps[1].parse().unwrap_or(0.0);
                let minutes: f64 = caps[2].parse().unwrap_or(0.0);
                let seconds: f64 = caps[3].parse().unwrap_or(0.0);
                let total = hours * 3600.0 + minutes * 60.0 + seconds;
                if total > 0.0 {
                    self.duration = Some(total);
                }
            }
            return None;
        }

        let caps = OUT_TIME_RE.captures(line)?;
        let duration = self.duration?;
        // FFmpeg reports microseconds under both key names.
        let micros: u64 = caps[1].parse().ok()?;
        let current = micros as f64 / 1_000_000.0;
        Some((current / duration).clamp(0.0, 1.0))
    }
}
