//! Gap resolution: turn detections or raw pixel differences into the
//! horizontal offset the piece must travel.

use image::RgbImage;
use sesame_common::config::PixelDiffConfig;
use sesame_common::{ClassLabel, DetectionBox};
use sesame_vision::locate_gap;
use tracing::debug;

/// A resolved horizontal offset in image space, plus what it was derived
/// from.
#[derive(Debug, Clone)]
pub struct GapEstimate {
    pub delta_image_px: f32,
    pub image_width: u32,
    pub image_height: u32,
    pub piece_width_px: f32,
    pub piece: Option<DetectionBox>,
    pub target: Option<DetectionBox>,
    pub strategy: &'static str,
}

/// Detection-pairing strategy.
///
/// Prefers the labeled (piece, target) pair with the highest combined
/// confidence, penalized by vertical misalignment and subject to the
/// target sitting right of the piece. Falls back to a generic spatial
/// heuristic when labels are absent or no labeled pair satisfies the
/// ordering constraint.
pub fn resolve_from_detections(
    detections: &[DetectionBox],
    image_width: u32,
    image_height: u32,
    default_piece_width: f32,
) -> Option<GapEstimate> {
    if detections.is_empty() {
        return None;
    }

    if let Some((piece, target)) = best_labeled_pair(detections, image_height) {
        let delta = target.bbox.center_x() - piece.bbox.center_x();
        debug!(delta, piece_conf = piece.confidence, target_conf = target.confidence, "labeled pairing");
        return Some(GapEstimate {
            delta_image_px: delta,
            image_width,
            image_height,
            piece_width_px: piece.bbox.width,
            piece: Some(piece.clone()),
            target: Some(target.clone()),
            strategy: "detection-pairing",
        });
    }

    if let Some((piece, target)) = spatial_fallback_pair(detections, image_width) {
        let delta = target.bbox.center_x() - piece.bbox.center_x();
        debug!(delta, "spatial fallback pairing");
        return Some(GapEstimate {
            delta_image_px: delta,
            image_width,
            image_height,
            piece_width_px: if piece.bbox.width > 0.0 {
                piece.bbox.width
            } else {
                default_piece_width
            },
            piece: Some(piece.clone()),
            target: Some(target.clone()),
            strategy: "detection-spatial",
        });
    }

    None
}

fn best_labeled_pair<'a>(
    detections: &'a [DetectionBox],
    image_height: u32,
) -> Option<(&'a DetectionBox, &'a DetectionBox)> {
    let pieces: Vec<_> = detections.iter().filter(|d| d.label == ClassLabel::Piece).collect();
    let targets: Vec<_> = detections.iter().filter(|d| d.label == ClassLabel::Target).collect();
    let h = image_height.max(1) as f32;

    let mut best: Option<(&DetectionBox, &DetectionBox, f32)> = None;
    for piece in &pieces {
        for target in &targets {
            if target.bbox.center_x() <= piece.bbox.center_x() {
                continue;
            }
            let misalignment = (piece.bbox.center_y() - target.bbox.center_y()).abs() / h;
            let score = piece.confidence + target.confidence - misalignment;
            if best.map(|(_, _, s)| score > s).unwrap_or(true) {
                best = Some((piece, target, score));
            }
        }
    }
    best.map(|(p, t, _)| (p, t))
}

/// Smallest box near the left edge, paired with the nearest box to its
/// right at a similar vertical position.
fn spatial_fallback_pair<'a>(
    detections: &'a [DetectionBox],
    image_width: u32,
) -> Option<(&'a DetectionBox, &'a DetectionBox)> {
    let left_limit = image_width as f32 * 0.35;
    let piece = detections
        .iter()
        .filter(|d| d.bbox.center_x() < left_limit)
        .min_by(|a, b| {
            a.bbox
                .area()
                .partial_cmp(&b.bbox.area())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;

    let target = detections
        .iter()
        .filter(|d| !std::ptr::eq(*d, piece))
        .filter(|d| d.bbox.center_x() > piece.bbox.center_x())
        .filter(|d| {
            (d.bbox.center_y() - piece.bbox.center_y()).abs() <= piece.bbox.height.max(16.0)
        })
        .min_by(|a, b| {
            let da = a.bbox.center_x() - piece.bbox.center_x();
            let db = b.bbox.center_x() - piece.bbox.center_x();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })?;

    Some((piece, target))
}

/// Pixel-diff strategy over an aligned canvas pair. The located column is
/// the gap's left edge; in two-canvas widgets the piece starts at the
/// image's left edge, so that column is the travel distance.
pub fn resolve_pixel_diff(
    full: &RgbImage,
    background: &RgbImage,
    cfg: &PixelDiffConfig,
    default_piece_width: f32,
) -> Option<GapEstimate> {
    let column = locate_gap(full, background, cfg)?;
    debug!(column, "pixel-diff gap located");
    Some(GapEstimate {
        delta_image_px: column as f32,
        image_width: full.width().min(background.width()),
        image_height: full.height().min(background.height()),
        piece_width_px: default_piece_width,
        piece: None,
        target: None,
        strategy: "pixel-diff",
    })
}
