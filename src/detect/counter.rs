//! Edge-triggered perforation counting.

/// Counts perforations as they cross the trigger band.
///
/// The latch arms when the band empties and fires once when it fills, so a
/// perforation sitting in the band across many captures is still one count.
/// Every `perforations_per_frame` counts the film frame counter advances.
#[derive(Debug, Clone)]
pub struct PerforationCounter {
    perforations_per_frame: u32,
    latched: bool,
    perforations: u64,
    film_frames: u64,
}

/// Emitted on the single capture where a perforation is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterTick {
    /// Total perforations including this one.
    pub perforations: u64,
    /// True when this perforation completed a film frame.
    pub new_film_frame: bool,
}

impl PerforationCounter {
    pub fn new(perforations_per_frame: u32) -> Self {
        Self {
            perforations_per_frame: perforations_per_frame.max(1),
            latched: false,
            perforations: 0,
            film_frames: 0,
        }
    }

    /// Feeds one capture's observation: whether any accepted blob centre sits
    /// inside the trigger band.
    pub fn update(&mut self, in_band: bool) -> Option<CounterTick> {
        if !in_band {
            self.latched = false;
            return None;
        }
        if self.latched {
            return None;
        }
        self.latched = true;
        self.perforations += 1;
        let new_film_frame = self.perforations % self.perforations_per_frame as u64 == 0;
        if new_film_frame {
            self.film_frames += 1;
        }
        Some(CounterTick {
            perforations: self.perforations,
            new_film_frame,
        })
    }

    /// Zeroes both counters. The latch is left as is, so a perforation
    /// already sitting in the band is not counted twice.
    pub fn reset(&mut self) {
        self.perforations = 0;
        self.film_frames = 0;
    }

    pub fn perforations(&self) -> u64 {
        self.perforations
    }

    pub fn film_frames(&self) -> u64 {
        self.film_frames
    }
}
