use image::RgbImage;

use sesame_common::config::PixelDiffConfig;

/// Locate the gap's left edge by comparing the full image against the
/// background-with-gap image, column by column.
///
/// Scans columns inside a central horizontal band and, per column, counts
/// rows inside a central vertical band whose summed absolute RGB
/// difference clears the threshold. The busiest column wins if it
/// activates at least the configured fraction of scanned rows; otherwise
/// there is no gap to report.
pub fn locate_gap(full: &RgbImage, background: &RgbImage, cfg: &PixelDiffConfig) -> Option<u32> {
    let w = full.width().min(background.width());
    let h = full.height().min(background.height());
    if w == 0 || h == 0 {
        return None;
    }

    let x_start = (w as f32 * cfg.side_margin_ratio) as u32;
    let x_end = (w as f32 * (1.0 - cfg.side_margin_ratio)) as u32;
    let y_start = (h as f32 * cfg.vertical_margin_ratio) as u32;
    let y_end = (h as f32 * (1.0 - cfg.vertical_margin_ratio)) as u32;
    if x_start >= x_end || y_start >= y_end {
        return None;
    }

    let rows_scanned = y_end - y_start;
    let floor = ((rows_scanned as f32) * cfg.activation_floor_ratio).ceil() as u32;

    let mut best_x = 0u32;
    let mut best_count = 0u32;

    for x in x_start..x_end {
        let mut count = 0u32;
        for y in y_start..y_end {
            let a = full.get_pixel(x, y).0;
            let b = background.get_pixel(x, y).0;
            let diff = a[0].abs_diff(b[0]) as u32
                + a[1].abs_diff(b[1]) as u32
                + a[2].abs_diff(b[2]) as u32;
            if diff > cfg.diff_threshold {
                count += 1;
            }
        }
        if count > best_count {
            best_count = count;
            best_x = x;
        }
    }

    if best_count >= floor.max(1) {
        Some(best_x)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn flat(w: u32, h: u32, c: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb(c))
    }

    #[test]
    fn identical_images_report_no_gap() {
        let a = flat(300, 150, [120, 120, 120]);
        let b = flat(300, 150, [120, 120, 120]);
        assert_eq!(locate_gap(&a, &b, &PixelDiffConfig::default()), None);
    }

    #[test]
    fn high_contrast_strip_is_located_within_one_pixel() {
        let full = flat(300, 150, [200, 200, 200]);
        let mut bg = flat(300, 150, [200, 200, 200]);
        let gap_x = 120u32;
        for y in 0..150 {
            bg.put_pixel(gap_x, y, Rgb([0, 0, 0]));
        }
        let found = locate_gap(&full, &bg, &PixelDiffConfig::default()).unwrap();
        assert!(found.abs_diff(gap_x) <= 1, "found {found}, expected {gap_x}");
    }

    #[test]
    fn strip_outside_scan_band_is_ignored() {
        let full = flat(300, 150, [200, 200, 200]);
        let mut bg = flat(300, 150, [200, 200, 200]);
        // inside the 15% left margin
        for y in 0..150 {
            bg.put_pixel(10, y, Rgb([0, 0, 0]));
        }
        assert_eq!(locate_gap(&full, &bg, &PixelDiffConfig::default()), None);
    }

    #[test]
    fn faint_noise_below_floor_is_ignored() {
        let full = flat(300, 150, [200, 200, 200]);
        let mut bg = flat(300, 150, [200, 200, 200]);
        // only three changed rows, far below the 10% activation floor
        for y in 70..73 {
            bg.put_pixel(120, y, Rgb([0, 0, 0]));
        }
        assert_eq!(locate_gap(&full, &bg, &PixelDiffConfig::default()), None);
    }
}
