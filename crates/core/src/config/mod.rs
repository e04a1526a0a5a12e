use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tracker: TrackerConfig,
    pub sensor: SensorConfig,
    pub depth_range: DepthRangeConfig,
}

impl AppConfig {
    /// Parses a configuration document. Missing sections and fields fall back
    /// to their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a configuration file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Behaviour of the user reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Keep users that walked out of the sensor's view instead of dropping
    /// them as lost.
    pub track_out_of_frame: bool,
    /// Smoothing factor handed to the middleware's skeleton filter.
    pub skeleton_smoothing: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            track_out_of_frame: false,
            skeleton_smoothing: 0.5,
        }
    }
}

/// Geometry of the depth stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub width: u32,
    pub height: u32,
    pub horizontal_fov_deg: f32,
    pub vertical_fov_deg: f32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            horizontal_fov_deg: 58.0,
            vertical_fov_deg: 45.0,
        }
    }
}

/// Millimetre window used when turning raw depth into a grey image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthRangeConfig {
    pub near: u16,
    pub far: u16,
    pub invert: bool,
}

impl Default for DepthRangeConfig {
    fn default() -> Self {
        Self {
            near: 500,
            far: 4000,
            invert: false,
        }
    }
}
