use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Classes the detection model was trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassLabel {
    /// The draggable puzzle piece.
    Piece,
    /// The notch the piece must land in.
    Target,
    /// The widget container.
    Container,
    /// The slider rail.
    Track,
}

impl ClassLabel {
    pub const ALL: [ClassLabel; 4] = [
        ClassLabel::Piece,
        ClassLabel::Target,
        ClassLabel::Container,
        ClassLabel::Track,
    ];

    pub fn from_index(idx: usize) -> Option<ClassLabel> {
        Self::ALL.get(idx).copied()
    }
}

/// Axis-aligned box in original-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center_x(&self) -> f32 {
        self.x + self.width / 2.0
    }

    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-union with another box. Zero when disjoint.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }

    /// Same box with all coordinates divided by the image dimensions.
    pub fn normalized(&self, image_w: u32, image_h: u32) -> BoundingBox {
        let w = image_w.max(1) as f32;
        let h = image_h.max(1) as f32;
        BoundingBox {
            x: self.x / w,
            y: self.y / h,
            width: self.width / w,
            height: self.height / h,
        }
    }
}

/// One retained detection. Immutable once produced by the detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionBox {
    pub label: ClassLabel,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub bbox_norm: BoundingBox,
}

/// Why a movement plan was rejected before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanRejection {
    NonFiniteDelta,
    NonPositiveDelta,
    NoPairing,
    DegenerateTravelRange,
}

impl fmt::Display for PlanRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanRejection::NonFiniteDelta => "delta is not finite",
            PlanRejection::NonPositiveDelta => "delta is zero or negative",
            PlanRejection::NoPairing => "no piece/target pairing",
            PlanRejection::DegenerateTravelRange => "travel range is degenerate",
        };
        f.write_str(s)
    }
}

/// A fully resolved drag plan for one attempt. Built once, consumed by the
/// drag executor, then discarded with the attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliderMovementPlan {
    pub image_width: u32,
    pub image_height: u32,
    pub piece: Option<DetectionBox>,
    pub target: Option<DetectionBox>,
    pub delta_image_px: f32,
    pub delta_ratio: f32,
    pub delta_dom_px: f32,
    pub slider_width_px: f32,
    pub valid: bool,
    pub rejection: Option<PlanRejection>,
}

impl SliderMovementPlan {
    pub fn rejected(reason: PlanRejection) -> Self {
        SliderMovementPlan {
            image_width: 0,
            image_height: 0,
            piece: None,
            target: None,
            delta_image_px: 0.0,
            delta_ratio: 0.0,
            delta_dom_px: 0.0,
            slider_width_px: 0.0,
            valid: false,
            rejection: Some(reason),
        }
    }
}

/// One point of a drag's motion path, relative to the drag origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub x: f64,
    pub y: f64,
    /// Offset from pointer-down, in milliseconds.
    pub elapsed_ms: u64,
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Verified,
    NoSignal,
    AcquisitionFailed,
    PlanRejected,
    DragFailed,
    SurfaceLost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptResult {
    pub index: u32,
    pub outcome: AttemptOutcome,
    /// Screenshot dumps for this attempt, present only in debug mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<PathBuf>,
}

/// The tri-state result callers consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveOutcome {
    Solved,
    Failed,
    NoCaptcha,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveReport {
    pub outcome: SolveOutcome,
    pub attempts: Vec<AttemptResult>,
}

impl SolveReport {
    pub fn no_captcha() -> Self {
        SolveReport {
            outcome: SolveOutcome::NoCaptcha,
            attempts: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = BoundingBox::new(10.0, 10.0, 40.0, 40.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        // intersection 50, union 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn normalized_divides_by_image_dims() {
        let b = BoundingBox::new(30.0, 15.0, 60.0, 30.0);
        let n = b.normalized(300, 150);
        assert!((n.x - 0.1).abs() < 1e-6);
        assert!((n.y - 0.1).abs() < 1e-6);
        assert!((n.width - 0.2).abs() < 1e-6);
        assert!((n.height - 0.2).abs() < 1e-6);
    }
}
