use sesame_common::DetectionBox;

/// Per-class non-maximum suppression, highest confidence first.
///
/// The returned list never contains two same-class boxes whose IoU
/// exceeds `iou_threshold`.
pub fn non_max_suppression(mut detections: Vec<DetectionBox>, iou_threshold: f32) -> Vec<DetectionBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<DetectionBox> = Vec::with_capacity(detections.len());
    for det in detections {
        let duplicate = kept
            .iter()
            .any(|k| k.label == det.label && k.bbox.iou(&det.bbox) > iou_threshold);
        if !duplicate {
            kept.push(det);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use sesame_common::{BoundingBox, ClassLabel};

    fn det(label: ClassLabel, confidence: f32, x: f32) -> DetectionBox {
        let bbox = BoundingBox::new(x, 0.0, 40.0, 40.0);
        DetectionBox {
            label,
            confidence,
            bbox,
            bbox_norm: bbox.normalized(400, 200),
        }
    }

    #[test]
    fn drops_lower_confidence_duplicates() {
        let out = non_max_suppression(
            vec![
                det(ClassLabel::Piece, 0.6, 0.0),
                det(ClassLabel::Piece, 0.9, 2.0),
                det(ClassLabel::Piece, 0.5, 1.0),
            ],
            0.45,
        );
        assert_eq!(out.len(), 1);
        assert!((out[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn different_classes_survive_overlap() {
        let out = non_max_suppression(
            vec![
                det(ClassLabel::Piece, 0.9, 0.0),
                det(ClassLabel::Target, 0.8, 0.0),
            ],
            0.45,
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn output_respects_iou_invariant() {
        let input: Vec<_> = (0..20)
            .map(|i| det(ClassLabel::Target, 0.5 + (i as f32) * 0.02, (i as f32) * 6.0))
            .collect();
        let out = non_max_suppression(input, 0.45);
        for (i, a) in out.iter().enumerate() {
            for b in out.iter().skip(i + 1) {
                if a.label == b.label {
                    assert!(a.bbox.iou(&b.bbox) <= 0.45);
                }
            }
        }
    }
}
