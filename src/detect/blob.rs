//! Connected component extraction over a binarized mask.

use std::collections::VecDeque;

use image::GrayImage;
use serde::Serialize;

/// One 4-connected foreground region, described by its bounding box.
///
/// Coordinates are inclusive and relative to the mask the blob was found in;
/// [`Blob::translate`] moves them into frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Blob {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    /// Foreground pixel count.
    pub area: u32,
}

impl Blob {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    /// Bounding box midpoint along x, rounded down.
    pub fn center_x(&self) -> u32 {
        self.min_x + self.width() / 2
    }

    /// Bounding box midpoint along y, rounded down.
    pub fn center_y(&self) -> u32 {
        self.min_y + self.height() / 2
    }

    pub fn aspect(&self) -> f32 {
        self.width() as f32 / self.height() as f32
    }

    pub fn translate(&self, dx: u32, dy: u32) -> Blob {
        Blob {
            min_x: self.min_x + dx,
            min_y: self.min_y + dy,
            max_x: self.max_x + dx,
            max_y: self.max_y + dy,
            area: self.area,
        }
    }
}

/// Labels 4-connected foreground regions in scan order.
pub fn find_blobs(mask: &GrayImage) -> Vec<Blob> {
    let (w, h) = mask.dimensions();
    let (wu, hu) = (w as usize, h as usize);
    let data = mask.as_raw();
    let mut visited = vec![false; wu * hu];
    let mut blobs = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..wu * hu {
        if visited[start] || data[start] == 0 {
            continue;
        }
        visited[start] = true;
        queue.push_back(start);
        let (sx, sy) = ((start % wu) as u32, (start / wu) as u32);
        let mut blob = Blob {
            min_x: sx,
            min_y: sy,
            max_x: sx,
            max_y: sy,
            area: 0,
        };
        while let Some(i) = queue.pop_front() {
            let x = (i % wu) as u32;
            let y = (i / wu) as u32;
            blob.area += 1;
            blob.min_x = blob.min_x.min(x);
            blob.max_x = blob.max_x.max(x);
            blob.min_y = blob.min_y.min(y);
            blob.max_y = blob.max_y.max(y);
            for (dx, dy) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                    continue;
                }
                let j = ny as usize * wu + nx as usize;
                if !visited[j] && data[j] != 0 {
                    visited[j] = true;
                    queue.push_back(j);
                }
            }
        }
        blobs.push(blob);
    }
    blobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn mask_with(rects: &[(u32, u32, u32, u32)]) -> GrayImage {
        let mut mask = GrayImage::new(40, 30);
        for &(x, y, w, h) in rects {
            for yy in y..y + h {
                for xx in x..x + w {
                    mask.put_pixel(xx, yy, Luma([255]));
                }
            }
        }
        mask
    }

    #[test]
    fn empty_mask_has_no_blobs() {
        assert!(find_blobs(&GrayImage::new(16, 16)).is_empty());
    }

    #[test]
    fn single_rectangle_reports_box_and_area() {
        let mask = mask_with(&[(5, 4, 10, 6)]);
        let blobs = find_blobs(&mask);
        assert_eq!(blobs.len(), 1);
        let b = blobs[0];
        assert_eq!((b.min_x, b.min_y, b.max_x, b.max_y), (5, 4, 14, 9));
        assert_eq!(b.area, 60);
        assert_eq!(b.width(), 10);
        assert_eq!(b.height(), 6);
        assert_eq!(b.center_x(), 10);
        assert_eq!(b.center_y(), 7);
    }

    #[test]
    fn separate_rectangles_stay_separate() {
        let mask = mask_with(&[(2, 2, 4, 4), (20, 10, 6, 3)]);
        let mut blobs = find_blobs(&mask);
        blobs.sort_by_key(|b| b.min_x);
        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0].area, 16);
        assert_eq!(blobs[1].area, 18);
    }

    #[test]
    fn diagonal_touch_does_not_merge() {
        let mut mask = GrayImage::new(8, 8);
        mask.put_pixel(2, 2, Luma([255]));
        mask.put_pixel(3, 3, Luma([255]));
        assert_eq!(find_blobs(&mask).len(), 2);
    }

    #[test]
    fn area_counts_pixels_not_box() {
        // L shape: 5 tall, 5 wide arms of width 1.
        let mut mask = GrayImage::new(10, 10);
        for i in 0..5 {
            mask.put_pixel(2, 2 + i, Luma([255]));
            mask.put_pixel(2 + i, 6, Luma([255]));
        }
        let blobs = find_blobs(&mask);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].area, 9);
        assert_eq!(blobs[0].width(), 5);
        assert_eq!(blobs[0].height(), 5);
    }

    #[test]
    fn translate_shifts_coordinates() {
        let mask = mask_with(&[(1, 1, 2, 2)]);
        let blob = find_blobs(&mask)[0].translate(250, 40);
        assert_eq!((blob.min_x, blob.min_y), (251, 41));
        assert_eq!(blob.center_x(), 252);
        assert_eq!(blob.area, 4);
    }
}
