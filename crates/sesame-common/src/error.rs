use thiserror::Error;

use crate::types::PlanRejection;

/// Errors raised by a challenge surface (page or nested frame).
#[derive(Debug, Error)]
pub enum SurfaceError {
    /// The frame was torn down while we were talking to it. Scans skip
    /// detached surfaces instead of failing the attempt.
    #[error("surface detached")]
    Detached,

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error("screenshot failed: {0}")]
    Screenshot(String),

    #[error("pointer input failed: {0}")]
    Input(String),

    #[error("session error: {0}")]
    Session(String),
}

impl SurfaceError {
    pub fn is_detached(&self) -> bool {
        matches!(self, SurfaceError::Detached)
    }
}

/// Errors from the vision layer (preprocessing, inference, gap scan).
#[derive(Debug, Error)]
pub enum VisionError {
    /// The model artifact or the inference runtime could not be brought
    /// up. Retrying the attempt cannot fix this, so it is fatal for the
    /// detection path of the whole solve.
    #[error("inference unavailable: {0}")]
    InferenceUnavailable(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("image decode failed: {0}")]
    Decode(String),

    #[error("unexpected model output: {0}")]
    OutputShape(String),
}

/// Per-attempt failure taxonomy of the solver.
///
/// Everything except `InferenceUnavailable` routes through the
/// Refreshing -> Searching retry path; callers of `solve()` only ever see
/// the tri-state report, never these as a returned `Err`.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("no challenge context found")]
    ContextNotFound,

    #[error("visual acquisition failed: {0}")]
    Acquisition(String),

    #[error("movement plan rejected: {0}")]
    InvalidPlan(PlanRejection),

    #[error("inference unavailable: {0}")]
    InferenceUnavailable(String),

    #[error("drag execution failed: {0}")]
    Drag(String),

    #[error("no success signal within the verification window")]
    VerificationTimeout,

    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

impl SolveError {
    /// Fatal errors short-circuit the retry loop; nothing a refresh can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SolveError::InferenceUnavailable(_))
    }
}

impl From<VisionError> for SolveError {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::InferenceUnavailable(msg) => SolveError::InferenceUnavailable(msg),
            other => SolveError::Acquisition(other.to_string()),
        }
    }
}
