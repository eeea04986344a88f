//! Perforation-counting capture service for a film-scanning rig.
//!
//! The service drives a film gate camera and exposes everything the scanning
//! bench needs while a roll is running:
//! - a capture loop that binarizes a region of interest, extracts the backlit
//!   sprocket perforations and counts them across a trigger line with an
//!   edge-triggered latch (every N perforations is one film frame),
//! - session-based JPEG capture of each film frame through a bounded async
//!   writer,
//! - an annotated MJPEG debug view plus a JSON status endpoint over HTTP,
//! - live single-letter console tuning of exposure, gain, threshold and the
//!   ROI geometry.
//!
//! # Example
//!
//! ```no_run
//! use miniola::camera::{SimOptions, SimulatedGate};
//! use miniola::detect::{Detector, DetectTuning};
//! use miniola::camera::FrameSource;
//!
//! let mut gate = SimulatedGate::new(800, 600, SimOptions::default());
//! let mut detector = Detector::new(4);
//! let tuning = DetectTuning::default();
//! let frame = gate.grab().unwrap();
//! let report = detector.process(&frame, &tuning);
//! println!("perforations so far: {}", report.perforations);
//! ```

pub mod camera;
pub mod config;
pub mod console;
pub mod detect;
pub mod record;
pub mod scanner;
pub mod stats;
pub mod stream;

// Re-exports for convenience
pub use camera::{Frame, FrameSource, SensorSettings, SimOptions, SimulatedGate, SourceError};
pub use config::{Config, ConfigError};
pub use detect::{DetectTuning, DetectionReport, Detector, Roi};
pub use record::{Recorder, RecorderWriter};
pub use scanner::{ControlMsg, ScanSnapshot, Scanner};
pub use stats::{ScanStats, StatsHandle};
pub use stream::StreamServer;
