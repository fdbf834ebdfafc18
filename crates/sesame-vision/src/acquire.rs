use image::RgbImage;
use image::imageops;

use sesame_common::VisionError;

/// What visual acquisition produced for one attempt.
#[derive(Debug, Clone)]
pub enum Acquired {
    /// One widget screenshot; detection is the only strategy.
    Single(RgbImage),
    /// Aligned full / background-with-gap canvases, already cropped to a
    /// common size. Enables the pixel-diff strategy.
    Pair { full: RgbImage, background: RgbImage },
}

impl Acquired {
    /// The image the detector runs over: the gapped background for pairs.
    pub fn primary(&self) -> &RgbImage {
        match self {
            Acquired::Single(img) => img,
            Acquired::Pair { background, .. } => background,
        }
    }
}

/// Decode captured screenshot bytes (PNG or JPEG) into RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, VisionError> {
    let img = image::load_from_memory(bytes).map_err(|e| VisionError::Decode(e.to_string()))?;
    Ok(img.to_rgb8())
}

/// Crop both canvases to the minimum common width/height. The two
/// renders can disagree by a pixel on either axis; comparing them
/// requires identical dimensions.
pub fn align_pair(a: RgbImage, b: RgbImage) -> (RgbImage, RgbImage) {
    let w = a.width().min(b.width());
    let h = a.height().min(b.height());
    if a.dimensions() == (w, h) && b.dimensions() == (w, h) {
        return (a, b);
    }
    let a = imageops::crop_imm(&a, 0, 0, w, h).to_image();
    let b = imageops::crop_imm(&b, 0, 0, w, h).to_image();
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn align_pair_crops_to_min_common_dims() {
        let a = RgbImage::from_pixel(300, 150, Rgb([1, 1, 1]));
        let b = RgbImage::from_pixel(299, 151, Rgb([2, 2, 2]));
        let (a, b) = align_pair(a, b);
        assert_eq!(a.dimensions(), (299, 150));
        assert_eq!(b.dimensions(), (299, 150));
    }

    #[test]
    fn align_pair_is_a_no_op_for_matching_dims() {
        let a = RgbImage::from_pixel(100, 50, Rgb([1, 1, 1]));
        let b = RgbImage::from_pixel(100, 50, Rgb([2, 2, 2]));
        let (a2, b2) = align_pair(a.clone(), b.clone());
        assert_eq!(a2, a);
        assert_eq!(b2, b);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_image(b"definitely not a png").is_err());
    }

    #[test]
    fn decode_round_trips_png() {
        let img = RgbImage::from_pixel(8, 8, Rgb([9, 8, 7]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img.clone())
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let decoded = decode_image(&bytes).unwrap();
        assert_eq!(decoded, img);
    }
}
