//! Debug view composition.
//!
//! Draws the detection geometry over the latest capture: ROI box in green,
//! the trigger line with its margin ticks (green while the band is empty,
//! red while a perforation sits on it), accepted blobs in blue with a cross
//! on the centre the band test uses, and a red square while recording.
//! Optionally the binarized ROI is scaled up and placed next to the
//! annotated frame so threshold tuning can be watched live.

use image::buffer::ConvertBuffer;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_cross_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

use crate::scanner::ScanSnapshot;

const ROI_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TRIGGER_IDLE_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const TRIGGER_HIT_COLOR: Rgb<u8> = Rgb([255, 40, 40]);
const BLOB_COLOR: Rgb<u8> = Rgb([64, 64, 255]);
const CENTER_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const REC_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Display rotation applied after composition. The gate camera is mounted
/// sideways, so the stream defaults to a quarter turn back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    None,
    /// Quarter turn clockwise.
    Cw,
    /// Quarter turn counter-clockwise.
    #[default]
    Ccw,
    /// Half turn.
    #[serde(rename = "180")]
    R180,
}

/// Renders the annotated view for one snapshot.
pub fn compose(snap: &ScanSnapshot, rotation: Rotation, show_binary: bool) -> RgbImage {
    let mut canvas: RgbImage = snap.frame.image.convert();
    let tuning = &snap.report.tuning;
    let roi = tuning.roi;

    draw_hollow_rect_mut(
        &mut canvas,
        Rect::at(roi.x as i32, roi.y as i32).of_size(roi.w, roi.h),
        ROI_COLOR,
    );
    let trigger_color = if snap.report.in_band {
        TRIGGER_HIT_COLOR
    } else {
        TRIGGER_IDLE_COLOR
    };
    draw_line_segment_mut(
        &mut canvas,
        (tuning.trigger_x as f32, roi.y as f32),
        (tuning.trigger_x as f32, (roi.y + roi.h) as f32),
        trigger_color,
    );
    // Short ticks marking the band edges at the top of the ROI. Saturating
    // on both sides; a band edge past the canvas just draws nothing.
    for x in [
        tuning.trigger_x.saturating_sub(tuning.trigger_margin),
        tuning.trigger_x.saturating_add(tuning.trigger_margin),
    ] {
        draw_line_segment_mut(
            &mut canvas,
            (x as f32, roi.y as f32),
            (x as f32, (roi.y + 6) as f32),
            trigger_color,
        );
    }
    for blob in &snap.report.blobs {
        draw_hollow_rect_mut(
            &mut canvas,
            Rect::at(blob.min_x as i32, blob.min_y as i32).of_size(blob.width(), blob.height()),
            BLOB_COLOR,
        );
        draw_cross_mut(
            &mut canvas,
            CENTER_COLOR,
            blob.center_x() as i32,
            blob.center_y() as i32,
        );
    }
    if snap.recording {
        draw_filled_rect_mut(&mut canvas, Rect::at(8, 8).of_size(12, 12), REC_COLOR);
    }

    if show_binary {
        // The binary ROI is scaled up to the view size so the two panels sit
        // side by side at the same scale.
        let binary: RgbImage = snap.report.binary.convert();
        let panel = imageops::resize(
            &binary,
            canvas.width(),
            canvas.height(),
            FilterType::Nearest,
        );
        let mut wide = RgbImage::new(canvas.width() * 2, canvas.height());
        imageops::replace(&mut wide, &canvas, 0, 0);
        imageops::replace(&mut wide, &panel, canvas.width() as i64, 0);
        canvas = wide;
    }

    match rotation {
        Rotation::None => canvas,
        Rotation::Cw => imageops::rotate90(&canvas),
        Rotation::Ccw => imageops::rotate270(&canvas),
        Rotation::R180 => imageops::rotate180(&canvas),
    }
}

/// Composes and JPEG-encodes the view in one step.
pub fn encode_view(
    snap: &ScanSnapshot,
    rotation: Rotation,
    show_binary: bool,
    quality: u8,
) -> Result<Vec<u8>, image::ImageError> {
    let view = compose(snap, rotation, show_binary);
    let mut buf = Vec::with_capacity(128 * 1024);
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder.encode_image(&view)?;
    Ok(buf)
}
