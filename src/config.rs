//! Configuration loading and validation.
//!
//! Settings come from an optional TOML file; every field has a default that
//! matches the bench setup the rig was tuned on, so an empty file (or no file
//! at all) yields a runnable configuration.

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::camera::SensorSettings;
use crate::detect::threshold::ThresholdMode;
use crate::detect::{DetectTuning, Roi};
use crate::stream::Rotation;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level service configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub detect: DetectConfig,
    pub stream: StreamConfig,
    pub record: RecordConfig,
}

/// Sensor geometry and initial exposure settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Capture width in pixels.
    pub width: u32,
    /// Capture height in pixels.
    pub height: u32,
    /// Initial exposure time in microseconds.
    pub exposure_us: u32,
    /// Initial analogue gain.
    pub gain: f32,
    /// Target capture rate in frames per second.
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            exposure_us: 1000,
            gain: 1.0,
            fps: 30,
        }
    }
}

impl CameraConfig {
    /// Initial sensor settings handed to the frame source at startup.
    pub fn initial_settings(&self) -> SensorSettings {
        SensorSettings {
            exposure_us: self.exposure_us,
            gain: self.gain,
        }
    }
}

/// Perforation detection parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    /// Region of interest over the perforation track, in frame coordinates.
    pub roi: Roi,
    /// Trigger line x position in frame coordinates.
    pub trigger_x: u32,
    /// Half-width of the trigger band around `trigger_x`.
    pub trigger_margin: u32,
    pub threshold: ThresholdConfig,
    /// Blobs with area <= min_area are ignored.
    pub min_area: u32,
    /// Blobs with area >= max_area are ignored.
    pub max_area: u32,
    /// Radius of the morphological open applied after thresholding; 0 disables.
    pub despeckle_radius: u32,
    /// Optional lower bound on blob width/height ratio.
    pub aspect_min: Option<f32>,
    /// Optional upper bound on blob width/height ratio.
    pub aspect_max: Option<f32>,
    /// Perforation count that advances the film frame counter by one.
    pub perforations_per_frame: u32,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            roi: Roi {
                x: 250,
                y: 40,
                w: 300,
                h: 120,
            },
            trigger_x: 400,
            trigger_margin: 15,
            threshold: ThresholdConfig::default(),
            min_area: 50,
            max_area: 5000,
            despeckle_radius: 0,
            aspect_min: None,
            aspect_max: None,
            perforations_per_frame: 4,
        }
    }
}

impl DetectConfig {
    /// Builds the runtime tuning snapshot the scanner starts from.
    pub fn to_tuning(&self) -> Result<DetectTuning, ConfigError> {
        Ok(DetectTuning {
            roi: self.roi,
            trigger_x: self.trigger_x,
            trigger_margin: self.trigger_margin,
            mode: self.threshold.to_mode()?,
            min_area: self.min_area,
            max_area: self.max_area,
            despeckle_radius: self.despeckle_radius,
            aspect_min: self.aspect_min,
            aspect_max: self.aspect_max,
        })
    }
}

/// Binarization settings. `mode` selects the algorithm; the remaining fields
/// only apply to the mode that reads them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// One of "fixed", "otsu", "adaptive", "dual".
    pub mode: String,
    /// Cutoff for fixed mode.
    pub value: u8,
    /// Window side for adaptive mode; must be odd.
    pub block: u32,
    /// Subtracted from the local mean in adaptive mode.
    pub bias: i32,
    /// Weak seed cutoff for dual mode.
    pub low: u8,
    /// Strong seed cutoff for dual mode.
    pub high: u8,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            mode: "fixed".to_string(),
            value: 110,
            block: 13,
            bias: 2,
            low: 90,
            high: 160,
        }
    }
}

impl ThresholdConfig {
    pub fn to_mode(&self) -> Result<ThresholdMode, ConfigError> {
        match self.mode.as_str() {
            "fixed" => Ok(ThresholdMode::Fixed(self.value)),
            "otsu" => Ok(ThresholdMode::Otsu),
            "adaptive" => Ok(ThresholdMode::Adaptive {
                block: self.block,
                bias: self.bias,
            }),
            "dual" => Ok(ThresholdMode::Dual {
                low: self.low,
                high: self.high,
            }),
            other => Err(ConfigError::Invalid(format!(
                "unknown threshold mode '{other}' (expected fixed, otsu, adaptive or dual)"
            ))),
        }
    }
}

/// HTTP debug stream settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bind address for the HTTP server.
    pub listen: String,
    /// JPEG quality of the streamed view.
    pub quality: u8,
    /// Minimum spacing between parts sent to one client, in milliseconds.
    pub min_interval_ms: u64,
    /// Display rotation applied to the streamed view.
    pub rotation: Rotation,
    /// Append the binarized ROI next to the annotated view.
    pub show_binary: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5000".to_string(),
            quality: 60,
            min_interval_ms: 30,
            rotation: Rotation::Ccw,
            show_binary: false,
        }
    }
}

/// Film frame capture settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    /// Directory that session subdirectories are created under.
    pub root: String,
    /// JPEG quality of saved film frames.
    pub quality: u8,
    /// Capacity of the writer queue; frames beyond it are dropped.
    pub queue_depth: usize,
    /// Session directory name prefix.
    pub session_prefix: String,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            root: "captures".to_string(),
            quality: 95,
            queue_depth: 8,
            session_prefix: "session".to_string(),
        }
    }
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_str(&raw)
    }

    /// Parses and validates configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let cam = &self.camera;
        if cam.width == 0 || cam.height == 0 {
            return Err(ConfigError::Invalid(
                "camera.width and camera.height must be non-zero".into(),
            ));
        }
        if cam.fps == 0 {
            return Err(ConfigError::Invalid("camera.fps must be non-zero".into()));
        }
        if !(cam.gain > 0.0) {
            return Err(ConfigError::Invalid("camera.gain must be positive".into()));
        }

        let det = &self.detect;
        if det.roi.w == 0 || det.roi.h == 0 {
            return Err(ConfigError::Invalid("detect.roi must be non-empty".into()));
        }
        // Sums in u64: corner values near u32::MAX must reject, not wrap.
        let roi_right = det.roi.x as u64 + det.roi.w as u64;
        let roi_bottom = det.roi.y as u64 + det.roi.h as u64;
        if roi_right > cam.width as u64 || roi_bottom > cam.height as u64 {
            return Err(ConfigError::Invalid(format!(
                "detect.roi {}x{}+{}+{} does not fit a {}x{} frame",
                det.roi.w, det.roi.h, det.roi.x, det.roi.y, cam.width, cam.height
            )));
        }
        if det.trigger_x < det.roi.x || det.trigger_x as u64 > roi_right {
            return Err(ConfigError::Invalid(format!(
                "detect.trigger_x {} is outside the ROI x range {}..={}",
                det.trigger_x, det.roi.x, roi_right
            )));
        }
        if det.min_area >= det.max_area {
            return Err(ConfigError::Invalid(
                "detect.min_area must be below detect.max_area".into(),
            ));
        }
        if det.perforations_per_frame == 0 {
            return Err(ConfigError::Invalid(
                "detect.perforations_per_frame must be non-zero".into(),
            ));
        }
        if let (Some(lo), Some(hi)) = (det.aspect_min, det.aspect_max) {
            if lo > hi {
                return Err(ConfigError::Invalid(
                    "detect.aspect_min must not exceed detect.aspect_max".into(),
                ));
            }
        }

        let th = &det.threshold;
        det.to_tuning()?;
        // Per-mode parameters are checked whatever mode is configured: the
        // console can switch modes live and must not activate bad values.
        if th.block < 3 || th.block % 2 == 0 {
            return Err(ConfigError::Invalid(
                "detect.threshold.block must be odd and at least 3".into(),
            ));
        }
        if th.low >= th.high {
            return Err(ConfigError::Invalid(
                "detect.threshold.low must be below detect.threshold.high".into(),
            ));
        }

        if self.stream.listen.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "stream.listen '{}' is not a valid socket address",
                self.stream.listen
            )));
        }
        if self.stream.quality == 0 || self.stream.quality > 100 {
            return Err(ConfigError::Invalid(
                "stream.quality must be in 1..=100".into(),
            ));
        }

        if self.record.quality == 0 || self.record.quality > 100 {
            return Err(ConfigError::Invalid(
                "record.quality must be in 1..=100".into(),
            ));
        }
        if self.record.queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "record.queue_depth must be non-zero".into(),
            ));
        }

        Ok(())
    }
}
