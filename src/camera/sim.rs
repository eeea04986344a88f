//! Synthetic frame sources.
//!
//! [`SimulatedGate`] renders a moving strip of backlit perforations so the
//! detector, recorder and stream can be exercised end to end without the rig.
//! [`ScriptedSource`] replays a fixed list of frames and is mainly useful in
//! tests.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use image::GrayImage;

use super::{Frame, FrameSource, SensorSettings, SourceError};

/// Geometry and photometry of the synthetic film strip.
#[derive(Debug, Clone, Copy)]
pub struct SimOptions {
    /// Centre-to-centre perforation spacing along the transport axis, px.
    pub pitch: u32,
    /// Perforation width, px.
    pub hole_width: u32,
    /// Perforation height, px.
    pub hole_height: u32,
    /// Vertical centre of the perforation track, px.
    pub band_center_y: u32,
    /// Film advance per captured frame, px.
    pub speed: u32,
    /// Film stock response at nominal exposure (1000 us, gain 1.0).
    pub base_level: u8,
    /// Backlight through a perforation at nominal exposure.
    pub hole_level: u8,
    /// Peak amplitude of the per-pixel noise.
    pub noise: u8,
    /// Noise generator seed; the same seed replays the same roll.
    pub seed: u64,
    /// Pacing rate; 0 renders as fast as the caller pulls.
    pub fps: u32,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            pitch: 160,
            hole_width: 40,
            hole_height: 56,
            band_center_y: 100,
            speed: 4,
            base_level: 36,
            hole_level: 232,
            noise: 6,
            seed: 0x4d49_4e49,
            fps: 0,
        }
    }
}

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
        }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

/// Renders a perforated strip marching left to right across the frame.
///
/// Brightness follows exposure and gain linearly around the nominal point,
/// so console tuning has a visible effect on the threshold stage.
pub struct SimulatedGate {
    width: u32,
    height: u32,
    opts: SimOptions,
    settings: SensorSettings,
    seq: u64,
    /// Total film advance so far, px.
    offset: u64,
    rng: XorShift64,
    period: Option<Duration>,
    last_grab: Option<Instant>,
}

impl SimulatedGate {
    pub fn new(width: u32, height: u32, mut opts: SimOptions) -> Self {
        // Degenerate geometry would make the hole test ill-defined.
        opts.pitch = opts.pitch.max(opts.hole_width + 1).max(2);
        let period = if opts.fps > 0 {
            Some(Duration::from_secs(1) / opts.fps)
        } else {
            None
        };
        Self {
            width,
            height,
            rng: XorShift64::new(opts.seed),
            opts,
            settings: SensorSettings {
                exposure_us: 1000,
                gain: 1.0,
            },
            seq: 0,
            offset: 0,
            period,
            last_grab: None,
        }
    }

    fn exposure_scale(&self) -> f32 {
        let scale = (self.settings.exposure_us as f32 / 1000.0) * self.settings.gain;
        scale.clamp(0.0, 8.0)
    }

    fn render(&mut self) -> GrayImage {
        let scale = self.exposure_scale();
        let pitch = self.opts.pitch as i64;
        let hole_w = self.opts.hole_width as i64;
        let band_top = self.opts.band_center_y as i64 - self.opts.hole_height as i64 / 2;
        let band_bottom = band_top + self.opts.hole_height as i64;
        let offset = self.offset as i64;
        let noise = self.opts.noise as i64;

        let mut image = GrayImage::new(self.width, self.height);
        for y in 0..self.height as i64 {
            let in_band = y >= band_top && y < band_bottom;
            for x in 0..self.width as i64 {
                let in_hole = in_band && (x - offset).rem_euclid(pitch) < hole_w;
                let level = if in_hole {
                    self.opts.hole_level
                } else {
                    self.opts.base_level
                };
                let mut value = (level as f32 * scale).round() as i64;
                if noise > 0 {
                    value += (self.rng.next() % (2 * noise as u64 + 1)) as i64 - noise;
                }
                image.put_pixel(x as u32, y as u32, image::Luma([value.clamp(0, 255) as u8]));
            }
        }
        image
    }

    fn pace(&mut self) {
        if let Some(period) = self.period {
            if let Some(last) = self.last_grab {
                let elapsed = last.elapsed();
                if elapsed < period {
                    std::thread::sleep(period - elapsed);
                }
            }
            self.last_grab = Some(Instant::now());
        }
    }
}

impl FrameSource for SimulatedGate {
    fn grab(&mut self) -> Result<Frame, SourceError> {
        self.pace();
        let image = self.render();
        let frame = Frame::new(self.seq, image);
        self.seq += 1;
        self.offset += self.opts.speed as u64;
        Ok(frame)
    }

    fn apply(&mut self, settings: SensorSettings) {
        self.settings = settings;
    }

    fn settings(&self) -> SensorSettings {
        self.settings
    }
}

/// Replays a fixed sequence of images, then reports exhaustion.
pub struct ScriptedSource {
    frames: VecDeque<GrayImage>,
    settings: SensorSettings,
    seq: u64,
}

impl ScriptedSource {
    pub fn new<I: IntoIterator<Item = GrayImage>>(frames: I) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            settings: SensorSettings {
                exposure_us: 1000,
                gain: 1.0,
            },
            seq: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for ScriptedSource {
    fn grab(&mut self) -> Result<Frame, SourceError> {
        let image = self.frames.pop_front().ok_or(SourceError::Exhausted)?;
        let frame = Frame::new(self.seq, image);
        self.seq += 1;
        Ok(frame)
    }

    fn apply(&mut self, settings: SensorSettings) {
        self.settings = settings;
    }

    fn settings(&self) -> SensorSettings {
        self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> SimulatedGate {
        SimulatedGate::new(800, 600, SimOptions::default())
    }

    #[test]
    fn same_seed_replays_the_same_roll() {
        let mut a = gate();
        let mut b = gate();
        for _ in 0..3 {
            let fa = a.grab().unwrap();
            let fb = b.grab().unwrap();
            assert_eq!(fa.image.as_raw(), fb.image.as_raw());
        }
    }

    #[test]
    fn holes_are_bright_and_stock_is_dark_at_nominal_exposure() {
        let opts = SimOptions {
            noise: 0,
            ..SimOptions::default()
        };
        let mut gate = SimulatedGate::new(800, 600, opts);
        let frame = gate.grab().unwrap();
        // offset 0: a hole spans x in 0..40 at the band centre.
        let hole = frame.image.get_pixel(10, 100).0[0];
        let stock = frame.image.get_pixel(100, 100).0[0];
        assert!(hole > 200, "hole level {hole}");
        assert!(stock < 60, "stock level {stock}");
    }

    #[test]
    fn exposure_scales_brightness() {
        let opts = SimOptions {
            noise: 0,
            ..SimOptions::default()
        };
        let mut gate = SimulatedGate::new(800, 600, opts);
        let dim = gate.grab().unwrap().image.get_pixel(100, 100).0[0];
        gate.apply(SensorSettings {
            exposure_us: 3000,
            gain: 1.0,
        });
        let bright = gate.grab().unwrap().image.get_pixel(100, 100).0[0];
        assert!(bright > dim.saturating_mul(2), "dim {dim} bright {bright}");
    }

    #[test]
    fn film_advances_between_frames() {
        let opts = SimOptions {
            noise: 0,
            speed: 20,
            ..SimOptions::default()
        };
        let mut gate = SimulatedGate::new(800, 600, opts);
        let first = gate.grab().unwrap();
        let second = gate.grab().unwrap();
        // x=45 is past the hole at offset 0 but inside it after 20 px advance.
        assert!(first.image.get_pixel(45, 100).0[0] < 60);
        assert!(second.image.get_pixel(45, 100).0[0] > 200);
    }

    #[test]
    fn sequence_numbers_are_monotonic() {
        let mut gate = gate();
        assert_eq!(gate.grab().unwrap().seq, 0);
        assert_eq!(gate.grab().unwrap().seq, 1);
        assert_eq!(gate.grab().unwrap().seq, 2);
    }

    #[test]
    fn scripted_source_ends_with_exhausted() {
        let mut source = ScriptedSource::new(vec![GrayImage::new(8, 8), GrayImage::new(8, 8)]);
        assert_eq!(source.remaining(), 2);
        assert!(source.grab().is_ok());
        assert!(source.grab().is_ok());
        assert!(matches!(source.grab(), Err(SourceError::Exhausted)));
    }
}
