//! Face crop extraction for the review sink.
//!
//! The detected box is padded, clamped to the frame, then resized to a
//! canonical square so stored crops are directly comparable.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Margin added on every side of the detected box, in pixels.
pub const CROP_PADDING: i32 = 20;

/// Edge length of the stored square crop.
pub const CROP_SIZE: u32 = 150;

/// Pixel rectangle `(x, y, width, height)` inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Pad `bbox` by `padding` and clamp it to a `frame_width` x `frame_height`
/// frame. Returns `None` when nothing of the box remains inside the frame.
pub fn padded_rect(
    bbox: &BoundingBox,
    frame_width: u32,
    frame_height: u32,
    padding: i32,
) -> Option<CropRect> {
    let pad = i64::from(padding);
    let top = (i64::from(bbox.top) - pad).max(0);
    let left = (i64::from(bbox.left) - pad).max(0);
    let bottom = (i64::from(bbox.bottom) + pad).min(i64::from(frame_height));
    let right = (i64::from(bbox.right) + pad).min(i64::from(frame_width));

    if bottom <= top || right <= left {
        return None;
    }

    Some(CropRect {
        x: left as u32,
        y: top as u32,
        width: (right - left) as u32,
        height: (bottom - top) as u32,
    })
}

/// Cut the padded face region out of `frame` and resize it to
/// `CROP_SIZE` x `CROP_SIZE`. A zero-area region yields `None`.
pub fn extract_face_crop(frame: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let Some(rect) = padded_rect(bbox, frame.width(), frame.height(), CROP_PADDING) else {
        tracing::debug!(?bbox, "face crop empty after clamping; skipping");
        return None;
    };

    let region = imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image();
    Some(imageops::resize(&region, CROP_SIZE, CROP_SIZE, FilterType::Triangle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rstest::rstest;

    fn frame(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([90, 120, 200]))
    }

    #[test]
    fn test_padding_inside_frame() {
        let rect = padded_rect(&BoundingBox::new(100, 200, 180, 120), 640, 480, CROP_PADDING);
        assert_eq!(
            rect,
            Some(CropRect {
                x: 100,
                y: 80,
                width: 120,
                height: 120
            })
        );
    }

    #[test]
    fn test_padding_clamped_at_edges() {
        let rect = padded_rect(&BoundingBox::new(5, 635, 470, 10), 640, 480, CROP_PADDING).unwrap();
        assert_eq!((rect.x, rect.y), (0, 0));
        assert_eq!((rect.width, rect.height), (640, 480));
    }

    #[rstest]
    #[case::far_right(BoundingBox::new(10, 900, 50, 800))]
    #[case::far_below(BoundingBox::new(700, 60, 760, 10))]
    #[case::far_above(BoundingBox::new(-200, 60, -100, 10))]
    #[case::far_left(BoundingBox::new(10, -100, 50, -300))]
    fn test_box_outside_frame_has_no_rect(#[case] bbox: BoundingBox) {
        assert_eq!(padded_rect(&bbox, 640, 480, CROP_PADDING), None);
    }

    #[test]
    fn test_crop_is_canonical_size() {
        let crop = extract_face_crop(&frame(320, 240), &BoundingBox::new(40, 160, 140, 60)).unwrap();
        assert_eq!(crop.dimensions(), (CROP_SIZE, CROP_SIZE));
        assert_eq!(crop.get_pixel(75, 75), &Rgb([90, 120, 200]));
    }

    #[test]
    fn test_crop_outside_frame_is_skipped() {
        let crop = extract_face_crop(&frame(100, 100), &BoundingBox::new(300, 400, 350, 320));
        assert!(crop.is_none());
    }

    #[test]
    fn test_crop_of_empty_frame_is_skipped() {
        let crop = extract_face_crop(&frame(0, 0), &BoundingBox::new(0, 10, 10, 0));
        assert!(crop.is_none());
    }
}
