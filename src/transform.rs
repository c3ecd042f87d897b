//! The edit a user has asked for: crop area, time window, flips, mute and output format.
//!
//! Fields are written one at a time by UI controls and are never validated on
//! write. The argument builder normalizes whatever it is given.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// `(start, end)` in seconds.
pub type Time = (f64, f64);

/// `(x, y, width, height)` as fractions of the source frame.
pub type Area = (f64, f64, f64, f64);

pub const FULL_FRAME: Area = (0.0, 0.0, 1.0, 1.0);

pub const DEFAULT_WEBP_FRAME_RATE: f64 = 12.0;
pub const DEFAULT_WEBP_QUALITY: f64 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputFormat {
    #[default]
    Mp4,
    Webp,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webp => "webp",
        }
    }

    pub fn extension(self) -> &'static str {
        self.as_str()
    }

    /// Download name for a finished render, e.g. `cropped.webp`.
    pub fn output_file_name(self) -> String {
        format!("cropped.{}", self.extension())
    }

    /// Lenient parse: anything that is not `webp` falls back to mp4.
    pub fn from_lossy(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mp4" => Ok(OutputFormat::Mp4),
            "webp" => Ok(OutputFormat::Webp),
            other => Err(format!("Unsupported output format: {}", other)),
        }
    }
}

impl Serialize for OutputFormat {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OutputFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(OutputFormat::from_lossy(&raw))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<Area>,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub flip_h: bool,
    #[serde(default)]
    pub flip_v: bool,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webp_frame_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webp_quality: Option<f64>,
}

fn default_scale() -> f64 {
    1.0
}

impl Default for TransformState {
    fn default() -> Self {
        Self {
            time: None,
            area: None,
            scale: default_scale(),
            flip_h: false,
            flip_v: false,
            mute: false,
            output_format: OutputFormat::Mp4,
            webp_frame_rate: None,
            webp_quality: None,
        }
    }
}

impl TransformState {
    /// Scale in (0, 1]; anything else means "no scaling".
    pub fn effective_scale(&self) -> f64 {
        if self.scale.is_finite() && self.scale > 0.0 && self.scale < 1.0 {
            self.scale
        } else {
            1.0
        }
    }

    pub fn effective_webp_quality(&self) -> f64 {
        self.webp_quality.unwrap_or(DEFAULT_WEBP_QUALITY)
    }

    pub fn effective_webp_frame_rate(&self) -> f64 {
        self.webp_frame_rate.unwrap_or(DEFAULT_WEBP_FRAME_RATE)
    }

    pub fn output_file_name(&self) -> String {
        self.output_format.output_file_name()
    }

    /// True when `area` is absent or exactly the whole frame.
    pub fn is_full_frame(&self) -> bool {
        match self.area {
            None => true,
            Some(area) => area == FULL_FRAME,
        }
    }
}
