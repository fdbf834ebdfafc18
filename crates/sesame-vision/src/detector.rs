use std::path::Path;

use image::RgbImage;
use tract_onnx::prelude::*;

use sesame_common::{BoundingBox, ClassLabel, DetectionBox, VisionError};

use crate::letterbox::letterbox;
use crate::nms::non_max_suppression;

/// Box parameters per anchor.
const BOX_ATTRS: usize = 4;

/// Object detector over the pretrained slide-challenge model.
///
/// Model contract: fixed-size square RGB input, channel-first, values in
/// [0,1]; output is a dense anchor tensor of 4 box parameters plus one
/// logit per class. Replacement artifacts must preserve this contract.
pub struct Detector {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    min_confidence: f32,
    nms_iou: f32,
}

impl Detector {
    /// Load and optimize the model artifact. A missing artifact or a
    /// runtime that cannot bring the plan up is `InferenceUnavailable`,
    /// which the orchestrator treats as not worth retrying.
    pub fn load(
        path: &Path,
        input_size: u32,
        min_confidence: f32,
        nms_iou: f32,
    ) -> Result<Self, VisionError> {
        if !path.exists() {
            return Err(VisionError::InferenceUnavailable(format!(
                "model artifact not found: {}",
                path.display()
            )));
        }

        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| VisionError::InferenceUnavailable(format!("load failed: {e}")))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .map_err(|e| VisionError::InferenceUnavailable(format!("input fact: {e}")))?
            .into_optimized()
            .map_err(|e| VisionError::InferenceUnavailable(format!("optimize failed: {e}")))?
            .into_runnable()
            .map_err(|e| VisionError::InferenceUnavailable(format!("not runnable: {e}")))?;

        tracing::info!(model = %path.display(), input_size, "detection model loaded");

        Ok(Detector {
            model,
            input_size,
            min_confidence,
            nms_iou,
        })
    }

    /// One forward pass over `image`, returning retained detections in
    /// original-image coordinates after confidence filtering and
    /// per-class NMS.
    pub fn detect(&self, image: &RgbImage) -> Result<Vec<DetectionBox>, VisionError> {
        let (orig_w, orig_h) = image.dimensions();
        let (canvas, lb) = letterbox(image, self.input_size);

        let size = self.input_size as usize;
        let input: Tensor =
            tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
                canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
            })
            .into();

        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| VisionError::Inference(e.to_string()))?;

        let view = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| VisionError::OutputShape(e.to_string()))?;
        let shape = view.shape();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(VisionError::OutputShape(format!("unexpected shape {shape:?}")));
        }

        let num_attrs = BOX_ATTRS + ClassLabel::ALL.len();
        // Accept both [1, attrs, anchors] and [1, anchors, attrs] layouts.
        let (attrs_first, anchors) = if shape[1] == num_attrs {
            (true, shape[2])
        } else if shape[2] == num_attrs {
            (false, shape[1])
        } else {
            return Err(VisionError::OutputShape(format!(
                "expected {num_attrs} attributes per anchor, got shape {shape:?}"
            )));
        };
        let at = |attr: usize, anchor: usize| -> f32 {
            if attrs_first {
                view[[0, attr, anchor]]
            } else {
                view[[0, anchor, attr]]
            }
        };

        let mut detections = Vec::new();
        for i in 0..anchors {
            let mut best_class = 0usize;
            let mut best_logit = f32::NEG_INFINITY;
            for c in 0..ClassLabel::ALL.len() {
                let logit = at(BOX_ATTRS + c, i);
                if logit > best_logit {
                    best_logit = logit;
                    best_class = c;
                }
            }
            let confidence = sigmoid(best_logit);
            if confidence < self.min_confidence {
                continue;
            }
            let label = match ClassLabel::from_index(best_class) {
                Some(l) => l,
                None => continue,
            };

            let bbox = lb.unmap_box(at(0, i), at(1, i), at(2, i), at(3, i), orig_w, orig_h);
            if bbox.width <= 0.0 || bbox.height <= 0.0 {
                continue;
            }
            detections.push(DetectionBox {
                label,
                confidence,
                bbox,
                bbox_norm: bbox.normalized(orig_w, orig_h),
            });
        }

        let kept = non_max_suppression(detections, self.nms_iou);
        tracing::debug!(retained = kept.len(), anchors, "detection pass complete");
        Ok(kept)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_artifact_is_distinguishable() {
        let err = Detector::load(Path::new("/nonexistent/model.onnx"), 320, 0.4, 0.45)
            .err()
            .expect("must not load");
        assert!(matches!(err, VisionError::InferenceUnavailable(_)));
    }

    #[test]
    fn garbage_artifact_is_unavailable_not_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        std::fs::write(&path, b"not an onnx graph").unwrap();
        let err = Detector::load(&path, 320, 0.4, 0.45).err().expect("must not load");
        assert!(matches!(err, VisionError::InferenceUnavailable(_)));
    }

    #[test]
    fn sigmoid_is_centered() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }
}
