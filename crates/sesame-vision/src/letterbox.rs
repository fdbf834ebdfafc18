use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use sesame_common::BoundingBox;

/// Neutral gray used to pad the square input.
const PAD_COLOR: Rgb<u8> = Rgb([114, 114, 114]);

/// Transform recorded while letterboxing, needed to map detections back
/// into original-image coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub size: u32,
}

impl Letterbox {
    /// Map a (cx, cy, w, h) box from letterboxed space back to the
    /// original image, clamped to its bounds.
    pub fn unmap_box(&self, cx: f32, cy: f32, w: f32, h: f32, orig_w: u32, orig_h: u32) -> BoundingBox {
        let x = (cx - w / 2.0 - self.pad_x) / self.scale;
        let y = (cy - h / 2.0 - self.pad_y) / self.scale;
        let bw = w / self.scale;
        let bh = h / self.scale;

        let max_w = orig_w as f32;
        let max_h = orig_h as f32;
        let x = x.clamp(0.0, max_w);
        let y = y.clamp(0.0, max_h);
        BoundingBox::new(x, y, bw.min(max_w - x), bh.min(max_h - y))
    }
}

/// Resize into a fixed square preserving aspect ratio, padding the rest
/// with neutral gray.
pub fn letterbox(img: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
    let (w, h) = img.dimensions();
    let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);

    let resized = imageops::resize(img, new_w, new_h, FilterType::Triangle);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let mut canvas = RgbImage::from_pixel(size, size, PAD_COLOR);
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    (
        canvas,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            size,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_image_pads_vertically() {
        let img = RgbImage::from_pixel(200, 100, Rgb([10, 20, 30]));
        let (canvas, lb) = letterbox(&img, 100);
        assert_eq!(canvas.dimensions(), (100, 100));
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 25.0);
        // padded rows are neutral gray
        assert_eq!(*canvas.get_pixel(50, 0), PAD_COLOR);
        // content rows carry the source color
        assert_eq!(*canvas.get_pixel(50, 50), Rgb([10, 20, 30]));
    }

    #[test]
    fn unmap_round_trips_a_centered_box() {
        let img = RgbImage::from_pixel(200, 100, Rgb([0, 0, 0]));
        let (_, lb) = letterbox(&img, 100);
        // A box at image center (100, 50) sized 40x20 lands letterboxed at
        // (50, 50) sized 20x10.
        let bbox = lb.unmap_box(50.0, 50.0, 20.0, 10.0, 200, 100);
        assert!((bbox.center_x() - 100.0).abs() < 1e-3);
        assert!((bbox.center_y() - 50.0).abs() < 1e-3);
        assert!((bbox.width - 40.0).abs() < 1e-3);
        assert!((bbox.height - 20.0).abs() < 1e-3);
    }
}
