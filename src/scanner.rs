//! The scan loop.
//!
//! One blocking task owns the frame source, the detector and the live
//! tuning. Each iteration drains pending control messages, grabs a frame,
//! runs detection, hands completed film frames to the recorder and publishes
//! a snapshot for the HTTP side. Everything else in the process talks to the
//! loop through [`ControlMsg`] or reads the latest [`ScanSnapshot`]; nothing
//! shares the hot state.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::camera::{Frame, FrameSource, SensorSettings, SourceError};
use crate::config::Config;
use crate::detect::{DetectTuning, DetectionReport, Detector, ThresholdMode};
use crate::record::{Recorder, Session};
use crate::stats::StatsHandle;

/// Requests handled between captures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlMsg {
    /// Shift the ROI by a pixel delta, clamped to the frame.
    MoveRoi { dx: i64, dy: i64 },
    /// Shift the trigger line, clamped to the ROI.
    MoveTrigger { dx: i64 },
    /// Switch to fixed thresholding at the given cutoff.
    SetThreshold(u8),
    SetThresholdMode(ThresholdMode),
    /// Exposure time in microseconds.
    SetExposure(u32),
    SetGain(f32),
    /// Open a new session and start saving film frames.
    StartRecording,
    PauseRecording,
    /// Zero the perforation and film frame counters.
    ResetCounters,
    Shutdown,
}

/// Latest state published after every processed capture.
#[derive(Debug, Clone)]
pub struct ScanSnapshot {
    pub frame: Arc<Frame>,
    pub report: Arc<DetectionReport>,
    pub recording: bool,
    /// Index of the open session while recording.
    pub session: Option<u32>,
    pub settings: SensorSettings,
}

pub struct Scanner {
    source: Box<dyn FrameSource>,
    detector: Detector,
    tuning: DetectTuning,
    frame_w: u32,
    frame_h: u32,
    control: mpsc::Receiver<ControlMsg>,
    snapshot: watch::Sender<Option<ScanSnapshot>>,
    recorder: Recorder,
    record_root: PathBuf,
    session_prefix: String,
    session: Option<Session>,
    recording: bool,
    stats: StatsHandle,
    shutdown: Arc<AtomicBool>,
}

impl Scanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Box<dyn FrameSource>,
        config: &Config,
        tuning: DetectTuning,
        recorder: Recorder,
        stats: StatsHandle,
        control: mpsc::Receiver<ControlMsg>,
        snapshot: watch::Sender<Option<ScanSnapshot>>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            detector: Detector::new(config.detect.perforations_per_frame),
            tuning,
            frame_w: config.camera.width,
            frame_h: config.camera.height,
            control,
            snapshot,
            recorder,
            record_root: PathBuf::from(&config.record.root),
            session_prefix: config.record.session_prefix.clone(),
            session: None,
            recording: false,
            stats,
            shutdown,
        }
    }

    /// Runs the loop until shutdown. Blocking; call from `spawn_blocking`.
    ///
    /// A frame-source failure ends the loop and is returned, so the caller
    /// can tell a dead source from a clean shutdown.
    pub fn run(mut self) -> Result<(), SourceError> {
        info!(
            width = self.frame_w,
            height = self.frame_h,
            trigger_x = self.tuning.trigger_x,
            "scan loop running"
        );
        let result = 'scan: loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("shutdown flag set");
                break Ok(());
            }
            loop {
                match self.control.try_recv() {
                    Ok(msg) => {
                        if !self.apply(msg) {
                            break 'scan Ok(());
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        debug!("control channel closed");
                        break 'scan Ok(());
                    }
                }
            }

            let frame = match self.source.grab() {
                Ok(frame) => frame,
                Err(error) => {
                    error!(%error, "frame source failed");
                    break Err(error);
                }
            };
            self.stats.inc_grabbed();

            let report = self.detector.process(&frame, &self.tuning);
            if report.counted {
                debug!(
                    perforations = report.perforations,
                    seq = report.seq,
                    "perforation crossed the trigger"
                );
            }

            let frame = Arc::new(frame);
            if report.new_film_frame {
                info!(
                    film_frame = report.film_frames,
                    recording = self.recording,
                    "film frame complete"
                );
                if self.recording {
                    if let Some(session) = &self.session {
                        self.recorder
                            .enqueue(Arc::clone(&frame), session.frame_path(report.film_frames));
                    }
                }
            }

            self.snapshot.send_replace(Some(ScanSnapshot {
                frame,
                report: Arc::new(report),
                recording: self.recording,
                session: self.session.as_ref().map(Session::index),
                settings: self.source.settings(),
            }));
        };
        info!(
            perforations = self.detector.perforations(),
            film_frames = self.detector.film_frames(),
            "scan loop stopped"
        );
        result
    }

    /// Applies one control message; false means stop the loop.
    fn apply(&mut self, msg: ControlMsg) -> bool {
        match msg {
            ControlMsg::MoveRoi { dx, dy } => {
                self.tuning.roi = self.tuning.roi.shifted(dx, dy, self.frame_w, self.frame_h);
                debug!(x = self.tuning.roi.x, y = self.tuning.roi.y, "roi moved");
            }
            ControlMsg::MoveTrigger { dx } => {
                self.tuning.trigger_x = self
                    .tuning
                    .roi
                    .clamp_trigger(self.tuning.trigger_x as i64 + dx);
                debug!(trigger_x = self.tuning.trigger_x, "trigger moved");
            }
            ControlMsg::SetThreshold(value) => {
                self.tuning.mode = ThresholdMode::Fixed(value);
                info!(value, "threshold set");
            }
            ControlMsg::SetThresholdMode(mode) => {
                self.tuning.mode = mode;
                info!(?mode, "threshold mode set");
            }
            ControlMsg::SetExposure(exposure_us) => {
                let settings = SensorSettings {
                    exposure_us,
                    ..self.source.settings()
                };
                self.source.apply(settings);
                info!(exposure_us, "exposure set");
            }
            ControlMsg::SetGain(gain) => {
                let settings = SensorSettings {
                    gain,
                    ..self.source.settings()
                };
                self.source.apply(settings);
                info!(gain, "gain set");
            }
            ControlMsg::StartRecording => {
                if self.recording {
                    debug!("already recording");
                } else {
                    match Session::create(&self.record_root, &self.session_prefix) {
                        Ok(session) => {
                            info!(
                                session = session.index(),
                                dir = %session.dir().display(),
                                "recording started"
                            );
                            self.session = Some(session);
                            self.recording = true;
                        }
                        Err(error) => {
                            error!(%error, "could not open a session, recording stays off");
                        }
                    }
                }
            }
            ControlMsg::PauseRecording => {
                if self.recording {
                    info!("recording paused");
                }
                self.recording = false;
                self.session = None;
            }
            ControlMsg::ResetCounters => {
                self.detector.reset();
                info!("counters reset");
            }
            ControlMsg::Shutdown => {
                info!("shutdown requested");
                return false;
            }
        }
        true
    }
}
