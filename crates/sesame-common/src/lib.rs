pub mod config;
pub mod error;
pub mod types;

pub use config::{ConfigError, ConfigLoader, DiscoveryTier, SolverConfig, TierKind, VerifySignal};
pub use error::{SolveError, SurfaceError, VisionError};
pub use types::{
    AttemptOutcome, AttemptResult, BoundingBox, ClassLabel, DetectionBox, PlanRejection,
    SliderMovementPlan, SolveOutcome, SolveReport, TrajectoryPoint,
};
