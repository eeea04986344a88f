//! Frame acquisition.
//!
//! The scanner only ever talks to a [`FrameSource`]; the concrete source is
//! picked at startup. On the bench that is the hardware gate camera driven
//! through its own capture stack, here the crate ships [`SimulatedGate`] so
//! the whole pipeline runs without a sensor attached.

use image::codecs::jpeg::JpegEncoder;
use image::GrayImage;
use serde::Serialize;
use thiserror::Error;

mod sim;

pub use sim::{ScriptedSource, SimOptions, SimulatedGate};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("capture backend error: {0}")]
    Backend(String),

    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame source is exhausted")]
    Exhausted,
}

/// Exposure settings applied to the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorSettings {
    /// Exposure time in microseconds.
    pub exposure_us: u32,
    /// Analogue gain.
    pub gain: f32,
}

/// One captured frame: 8-bit luma plus a monotonic capture index.
///
/// The pipeline works in luma end to end. The perforations are backlit, so
/// all the signal the detector needs survives the drop to a single channel,
/// and it keeps a frame at 800x600 under half a megabyte.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Capture index assigned by the source, starting at 0.
    pub seq: u64,
    pub image: GrayImage,
}

impl Frame {
    pub fn new(seq: u64, image: GrayImage) -> Self {
        Self { seq, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Encodes the frame as a baseline JPEG at the given quality.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, image::ImageError> {
        let mut buf = Vec::with_capacity(64 * 1024);
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
        encoder.encode_image(&self.image)?;
        Ok(buf)
    }
}

/// A blocking producer of luma frames.
pub trait FrameSource: Send {
    /// Blocks until the next frame is available.
    fn grab(&mut self) -> Result<Frame, SourceError>;

    /// Applies new sensor settings, taking effect from the next grab.
    fn apply(&mut self, settings: SensorSettings);

    /// Settings currently in effect.
    fn settings(&self) -> SensorSettings;
}
