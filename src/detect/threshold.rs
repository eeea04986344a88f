//! ROI binarization.
//!
//! The perforations are backlit, so every mode maps "bright" to foreground.
//! Fixed mode with the stock cutoff is what the rig runs day to day; the
//! other modes exist for stock that scans dirty or unevenly lit.

use std::collections::VecDeque;

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use serde::Serialize;

/// Foreground value in a binarized mask.
pub const ON: u8 = 255;

/// Binarization algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// Pixels strictly above the cutoff are foreground.
    Fixed(u8),
    /// Global cutoff recomputed per frame from the ROI histogram.
    Otsu,
    /// Pixels above the local mean minus `bias` are foreground.
    Adaptive { block: u32, bias: i32 },
    /// Pixels at or above `high` seed regions that grow through pixels at or
    /// above `low`.
    Dual { low: u8, high: u8 },
}

/// Binarizes an ROI crop with the selected mode.
pub fn binarize(src: &GrayImage, mode: ThresholdMode) -> GrayImage {
    match mode {
        ThresholdMode::Fixed(cutoff) => fixed(src, cutoff),
        ThresholdMode::Otsu => fixed(src, otsu_level(src)),
        ThresholdMode::Adaptive { block, bias } => adaptive(src, block, bias),
        ThresholdMode::Dual { low, high } => hysteresis(src, low, high),
    }
}

/// Morphological open that knocks out specks smaller than the structuring
/// element. Radius 0 is a no-op.
pub fn despeckle(mask: &GrayImage, radius: u32) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    morphology::open(mask, Norm::LInf, radius.min(255) as u8)
}

fn fixed(src: &GrayImage, cutoff: u8) -> GrayImage {
    GrayImage::from_fn(src.width(), src.height(), |x, y| {
        if src.get_pixel(x, y).0[0] > cutoff {
            Luma([ON])
        } else {
            Luma([0])
        }
    })
}

/// Picks the cutoff that maximizes between-class variance of the histogram.
pub fn otsu_level(src: &GrayImage) -> u8 {
    let mut hist = [0u32; 256];
    for px in src.pixels() {
        hist[px.0[0] as usize] += 1;
    }
    let total = (src.width() as f64) * (src.height() as f64);
    if total == 0.0 {
        return 0;
    }

    let mut sum_all = 0.0;
    for (value, &count) in hist.iter().enumerate() {
        sum_all += value as f64 * count as f64;
    }

    let mut sum_bg = 0.0;
    let mut weight_bg = 0.0;
    let mut best_level = 0u8;
    let mut best_var = -1.0;
    for (level, &count) in hist.iter().enumerate() {
        weight_bg += count as f64;
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0.0 {
            break;
        }
        sum_bg += level as f64 * count as f64;
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (sum_all - sum_bg) / weight_fg;
        let between = weight_bg * weight_fg * (mean_bg - mean_fg) * (mean_bg - mean_fg);
        if between > best_var {
            best_var = between;
            best_level = level as u8;
        }
    }
    best_level
}

fn adaptive(src: &GrayImage, block: u32, bias: i32) -> GrayImage {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return src.clone();
    }
    let radius = (block.max(3) / 2) as i64;
    let data = src.as_raw();
    let (wu, hu) = (w as usize, h as usize);

    // integral[y][x] holds the sum over the rectangle [0, x) x [0, y).
    let iw = wu + 1;
    let mut integral = vec![0u64; iw * (hu + 1)];
    for y in 0..hu {
        let mut row = 0u64;
        for x in 0..wu {
            row += data[y * wu + x] as u64;
            integral[(y + 1) * iw + x + 1] = integral[y * iw + x + 1] + row;
        }
    }

    GrayImage::from_fn(w, h, |x, y| {
        let x0 = (x as i64 - radius).max(0) as usize;
        let y0 = (y as i64 - radius).max(0) as usize;
        let x1 = (x as i64 + radius + 1).min(w as i64) as usize;
        let y1 = (y as i64 + radius + 1).min(h as i64) as usize;
        let count = ((x1 - x0) * (y1 - y0)) as i64;
        let sum = integral[y1 * iw + x1] + integral[y0 * iw + x0]
            - integral[y0 * iw + x1]
            - integral[y1 * iw + x0];
        let mean = sum as i64 / count;
        let px = data[y as usize * wu + x as usize] as i64;
        if px > mean - bias as i64 {
            Luma([ON])
        } else {
            Luma([0])
        }
    })
}

fn hysteresis(src: &GrayImage, low: u8, high: u8) -> GrayImage {
    let (w, h) = src.dimensions();
    let mut out = GrayImage::new(w, h);
    let mut queue = VecDeque::new();
    for y in 0..h {
        for x in 0..w {
            if src.get_pixel(x, y).0[0] >= high {
                out.put_pixel(x, y, Luma([ON]));
                queue.push_back((x, y));
            }
        }
    }
    while let Some((x, y)) = queue.pop_front() {
        for (dx, dy) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                continue;
            }
            let (nx, ny) = (nx as u32, ny as u32);
            if out.get_pixel(nx, ny).0[0] == 0 && src.get_pixel(nx, ny).0[0] >= low {
                out.put_pixel(nx, ny, Luma([ON]));
                queue.push_back((nx, ny));
            }
        }
    }
    out
}
