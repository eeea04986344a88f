//! Perforation detection pipeline.
//!
//! Each capture goes through the same fixed stages: crop the ROI, binarize,
//! optionally despeckle, extract blobs, filter by area and aspect, then feed
//! the trigger band observation to the edge-triggered counter. The stages are
//! split into submodules so each can be tested on synthetic masks.

use image::imageops;
use image::GrayImage;
use serde::{Deserialize, Serialize};

pub mod blob;
pub mod counter;
pub mod threshold;

pub use blob::{find_blobs, Blob};
pub use counter::{CounterTick, PerforationCounter};
pub use threshold::ThresholdMode;

use crate::camera::Frame;

/// Region of interest in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Roi {
    /// Moves the ROI by a pixel delta, clamped so it stays inside the frame.
    pub fn shifted(&self, dx: i64, dy: i64, frame_w: u32, frame_h: u32) -> Roi {
        let max_x = frame_w.saturating_sub(self.w) as i64;
        let max_y = frame_h.saturating_sub(self.h) as i64;
        Roi {
            x: (self.x as i64 + dx).clamp(0, max_x) as u32,
            y: (self.y as i64 + dy).clamp(0, max_y) as u32,
            w: self.w,
            h: self.h,
        }
    }

    /// Clamps a trigger line x into this ROI's horizontal range.
    pub fn clamp_trigger(&self, x: i64) -> u32 {
        x.clamp(self.x as i64, self.x as i64 + self.w as i64) as u32
    }
}

/// Everything the detector needs to process one capture. The scanner owns a
/// copy and mutates it from console commands; each report carries the copy
/// that produced it so downstream consumers draw what was actually used.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectTuning {
    pub roi: Roi,
    pub trigger_x: u32,
    pub trigger_margin: u32,
    pub mode: ThresholdMode,
    pub min_area: u32,
    pub max_area: u32,
    pub despeckle_radius: u32,
    pub aspect_min: Option<f32>,
    pub aspect_max: Option<f32>,
}

impl Default for DetectTuning {
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
            mode: ThresholdMode::Fixed(110),
            min_area: 50,
            max_area: 5000,
            despeckle_radius: 0,
            aspect_min: None,
            aspect_max: None,
        }
    }
}

/// Outcome of processing one capture.
#[derive(Debug, Clone)]
pub struct DetectionReport {
    /// Capture index of the frame this report describes.
    pub seq: u64,
    /// Tuning in effect when the frame was processed.
    pub tuning: DetectTuning,
    /// Accepted blobs in frame coordinates.
    pub blobs: Vec<Blob>,
    /// True when an accepted blob centre sat inside the trigger band.
    pub in_band: bool,
    /// True on the single capture where a perforation was counted.
    pub counted: bool,
    /// True when that perforation completed a film frame.
    pub new_film_frame: bool,
    pub perforations: u64,
    pub film_frames: u64,
    /// Cutoff actually applied, when the mode has a single one. For Otsu this
    /// is the per-frame computed level.
    pub threshold_level: Option<u8>,
    /// Binarized ROI, for the debug view.
    pub binary: GrayImage,
}

/// Stateful detector: pure per-frame stages plus the perforation counter.
pub struct Detector {
    counter: PerforationCounter,
}

impl Detector {
    pub fn new(perforations_per_frame: u32) -> Self {
        Self {
            counter: PerforationCounter::new(perforations_per_frame),
        }
    }

    /// Zeroes the perforation and film frame counters.
    pub fn reset(&mut self) {
        self.counter.reset();
    }

    pub fn perforations(&self) -> u64 {
        self.counter.perforations()
    }

    pub fn film_frames(&self) -> u64 {
        self.counter.film_frames()
    }

    /// Runs the full pipeline on one capture.
    pub fn process(&mut self, frame: &Frame, tuning: &DetectTuning) -> DetectionReport {
        let roi = tuning.roi;
        let crop: GrayImage =
            imageops::crop_imm(&frame.image, roi.x, roi.y, roi.w, roi.h).to_image();
        // Otsu is resolved here so the level it picked is reportable.
        let (mode, threshold_level) = match tuning.mode {
            ThresholdMode::Fixed(value) => (tuning.mode, Some(value)),
            ThresholdMode::Otsu => {
                let level = threshold::otsu_level(&crop);
                (ThresholdMode::Fixed(level), Some(level))
            }
            other => (other, None),
        };
        let mut binary = threshold::binarize(&crop, mode);
        if tuning.despeckle_radius > 0 {
            binary = threshold::despeckle(&binary, tuning.despeckle_radius);
        }

        let mut accepted = Vec::new();
        let mut in_band = false;
        for blob in find_blobs(&binary) {
            if blob.area <= tuning.min_area || blob.area >= tuning.max_area {
                continue;
            }
            if let Some(lo) = tuning.aspect_min {
                if blob.aspect() < lo {
                    continue;
                }
            }
            if let Some(hi) = tuning.aspect_max {
                if blob.aspect() > hi {
                    continue;
                }
            }
            let blob = blob.translate(roi.x, roi.y);
            let dist = (blob.center_x() as i64 - tuning.trigger_x as i64).abs();
            if dist < tuning.trigger_margin as i64 {
                in_band = true;
            }
            accepted.push(blob);
        }

        let tick = self.counter.update(in_band);
        DetectionReport {
            seq: frame.seq,
            tuning: *tuning,
            blobs: accepted,
            in_band,
            counted: tick.is_some(),
            new_film_frame: tick.map(|t| t.new_film_frame).unwrap_or(false),
            perforations: self.counter.perforations(),
            film_frames: self.counter.film_frames(),
            threshold_level,
            binary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// 800x600 dark frame with one bright rectangle centred at (cx, 100).
    fn frame_with_hole(seq: u64, cx: u32, w: u32, h: u32) -> Frame {
        let mut image = GrayImage::from_pixel(800, 600, Luma([20]));
        let x0 = cx - w / 2;
        let y0 = 100 - h / 2;
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                image.put_pixel(x, y, Luma([230]));
            }
        }
        Frame::new(seq, image)
    }

    #[test]
    fn finds_hole_at_its_centre() {
        let mut detector = Detector::new(4);
        let tuning = DetectTuning::default();
        let report = detector.process(&frame_with_hole(0, 400, 40, 56), &tuning);
        assert_eq!(report.blobs.len(), 1);
        assert_eq!(report.blobs[0].center_x(), 400);
        assert_eq!(report.blobs[0].area, 40 * 56);
        assert!(report.in_band);
        assert!(report.counted);
        assert_eq!(report.binary.dimensions(), (300, 120));
    }

    #[test]
    fn hole_outside_roi_is_invisible() {
        let mut detector = Detector::new(4);
        let report = detector.process(&frame_with_hole(0, 100, 40, 56), &DetectTuning::default());
        assert!(report.blobs.is_empty());
        assert!(!report.in_band);
        assert_eq!(report.perforations, 0);
    }

    #[test]
    fn uniform_roi_under_otsu_yields_no_blobs() {
        let mut detector = Detector::new(4);
        let tuning = DetectTuning {
            mode: ThresholdMode::Otsu,
            ..DetectTuning::default()
        };
        // All-black leaves the mask empty; all-white turns the whole ROI
        // into one blob that the area gate rejects.
        for level in [0u8, 255] {
            let image = GrayImage::from_pixel(800, 600, Luma([level]));
            let report = detector.process(&Frame::new(u64::from(level), image), &tuning);
            assert!(report.blobs.is_empty(), "level {level}");
            assert!(!report.in_band, "level {level}");
            assert!(report.threshold_level.is_some());
        }
        assert_eq!(detector.perforations(), 0);
    }

    #[test]
    fn undersized_frame_crops_empty_and_rearms_the_latch() {
        let mut detector = Detector::new(4);
        let tuning = DetectTuning::default();
        assert!(detector.process(&frame_with_hole(0, 400, 40, 56), &tuning).counted);

        // Frame smaller than the ROI origin: the crop clamps to nothing.
        let small = Frame::new(1, GrayImage::from_pixel(100, 100, Luma([230])));
        let report = detector.process(&small, &tuning);
        assert!(report.blobs.is_empty());
        assert!(!report.in_band);

        // The empty band unlatched the counter, so the next hole counts.
        assert!(detector.process(&frame_with_hole(2, 400, 40, 56), &tuning).counted);
        assert_eq!(detector.perforations(), 2);
    }

    #[test]
    fn trigger_band_is_strict() {
        let mut detector = Detector::new(4);
        let tuning = DetectTuning::default();
        // 15 px off centre: |415 - 400| is not < 15.
        let report = detector.process(&frame_with_hole(0, 415, 40, 56), &tuning);
        assert!(!report.in_band);
        let report = detector.process(&frame_with_hole(1, 414, 40, 56), &tuning);
        assert!(report.in_band);
    }

    #[test]
    fn area_bounds_are_exclusive() {
        let mut detector = Detector::new(4);
        let tuning = DetectTuning::default();
        // 10x5 = 50 pixels: not strictly above min_area.
        let report = detector.process(&frame_with_hole(0, 400, 10, 5), &tuning);
        assert!(report.blobs.is_empty());
        // 17x3 = 51 pixels: accepted.
        let report = detector.process(&frame_with_hole(1, 400, 17, 3), &tuning);
        assert_eq!(report.blobs.len(), 1);
        // 100x50 = 5000 pixels: not strictly below max_area.
        let report = detector.process(&frame_with_hole(2, 400, 100, 50), &tuning);
        assert!(report.blobs.is_empty());
    }

    #[test]
    fn aspect_gate_rejects_streaks() {
        let mut detector = Detector::new(4);
        let tuning = DetectTuning {
            aspect_min: Some(0.4),
            aspect_max: Some(1.2),
            ..DetectTuning::default()
        };
        // 80x10: aspect 8, a scratch along the transport axis.
        let report = detector.process(&frame_with_hole(0, 400, 80, 10), &tuning);
        assert!(report.blobs.is_empty());
        let report = detector.process(&frame_with_hole(1, 400, 40, 56), &tuning);
        assert_eq!(report.blobs.len(), 1);
    }

    #[test]
    fn counts_across_a_pass() {
        let mut detector = Detector::new(2);
        let tuning = DetectTuning::default();
        let centres = [300, 350, 400, 405, 500, 300, 399, 403, 500];
        let mut film_frame_events = 0;
        for (i, &cx) in centres.iter().enumerate() {
            let report = detector.process(&frame_with_hole(i as u64, cx, 40, 56), &tuning);
            if report.new_film_frame {
                film_frame_events += 1;
            }
        }
        // Two distinct crossings of the band, perforations_per_frame = 2.
        assert_eq!(detector.perforations(), 2);
        assert_eq!(detector.film_frames(), 1);
        assert_eq!(film_frame_events, 1);
    }

    #[test]
    fn report_carries_the_applied_cutoff() {
        let mut detector = Detector::new(4);
        let frame = frame_with_hole(0, 400, 40, 56);

        let fixed = detector.process(&frame, &DetectTuning::default());
        assert_eq!(fixed.threshold_level, Some(110));

        let otsu = detector.process(
            &frame,
            &DetectTuning {
                mode: ThresholdMode::Otsu,
                ..DetectTuning::default()
            },
        );
        let level = otsu.threshold_level.unwrap();
        // Bimodal ROI at 20 and 230: the picked level falls between.
        assert!(level >= 20 && level < 230, "level {level}");

        let dual = detector.process(
            &frame,
            &DetectTuning {
                mode: ThresholdMode::Dual { low: 90, high: 160 },
                ..DetectTuning::default()
            },
        );
        assert_eq!(dual.threshold_level, None);
    }

    #[test]
    fn reset_zeroes_both_counters() {
        let mut detector = Detector::new(4);
        let tuning = DetectTuning::default();
        detector.process(&frame_with_hole(0, 400, 40, 56), &tuning);
        assert_eq!(detector.perforations(), 1);
        detector.reset();
        assert_eq!(detector.perforations(), 0);
        assert_eq!(detector.film_frames(), 0);
    }

    #[test]
    fn roi_shift_clamps_to_frame() {
        let roi = Roi {
            x: 250,
            y: 40,
            w: 300,
            h: 120,
        };
        let shifted = roi.shifted(-5, 0, 800, 600);
        assert_eq!(shifted.x, 245);
        let pinned = roi.shifted(-1000, -1000, 800, 600);
        assert_eq!((pinned.x, pinned.y), (0, 0));
        let far = roi.shifted(1000, 1000, 800, 600);
        assert_eq!((far.x, far.y), (500, 480));
    }

    #[test]
    fn trigger_clamp_stays_inside_roi() {
        let roi = Roi {
            x: 250,
            y: 40,
            w: 300,
            h: 120,
        };
        assert_eq!(roi.clamp_trigger(100), 250);
        assert_eq!(roi.clamp_trigger(400), 400);
        assert_eq!(roi.clamp_trigger(900), 550);
    }
}
