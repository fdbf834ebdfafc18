//! Verify/retry orchestration: the state machine composing locator,
//! acquisition, gap resolution, planning, dragging and verification.
//!
//! The transition function is pure and unit-testable without a browser;
//! the async driver below feeds it events produced by the components.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sesame_common::{
    AttemptOutcome, AttemptResult, DetectionBox, PlanRejection, SliderMovementPlan, SolveError,
    SolveOutcome, SolveReport, SolverConfig, VisionError,
};
use sesame_vision::{Acquired, Detector};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::acquisition;
use crate::dragger::DragExecutor;
use crate::gap::{self, GapEstimate};
use crate::locator::FrameLocator;
use crate::planner::MovementPlanner;
use crate::surface::{CaptchaContext, ChallengeSession, query_any};
use crate::verify::Verifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveState {
    Searching,
    Acquiring,
    Planning,
    Dragging,
    Verifying,
    Refreshing,
    Solved,
    Failed,
    NoCaptcha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveEvent {
    ContextResolved,
    ContextTimeout,
    Acquired,
    AcquisitionMissing,
    PlanReady,
    PlanRejected,
    DragCompleted,
    SignalHit,
    WindowElapsed,
    RefreshCycled { attempts_exhausted: bool },
    /// The inference runtime cannot be brought up; retrying cannot help.
    FatalInference,
    /// Any other per-attempt error; routed through the refresh path.
    AttemptError,
}

/// Pure transition function of the solve state machine.
pub fn next_state(state: SolveState, event: SolveEvent) -> SolveState {
    use SolveEvent::*;
    use SolveState::*;

    match (state, event) {
        (_, FatalInference) => Failed,
        (Searching, ContextResolved) => Acquiring,
        (Searching, ContextTimeout) => NoCaptcha,
        (Acquiring, Acquired) => Planning,
        (Acquiring, AcquisitionMissing) => Refreshing,
        (Planning, PlanReady) => Dragging,
        (Planning, PlanRejected) => Refreshing,
        (Dragging, DragCompleted) => Verifying,
        (Verifying, SignalHit) => Solved,
        (Verifying, WindowElapsed) => Refreshing,
        (Refreshing, RefreshCycled { attempts_exhausted: false }) => Searching,
        (Refreshing, RefreshCycled { attempts_exhausted: true }) => Failed,
        (_, AttemptError) => Refreshing,
        // impossible combinations hold the current state
        (s, _) => s,
    }
}

/// One solver per browser session; no cross-session state is shared.
pub struct Solver<S: ChallengeSession> {
    session: S,
    config: SolverConfig,
    planner: MovementPlanner,
    detector: OnceCell<Arc<Detector>>,
}

impl<S: ChallengeSession> Solver<S> {
    pub fn new(session: S, config: SolverConfig) -> Self {
        let planner = MovementPlanner::new(config.forward_bias_px);
        Self {
            session,
            config,
            planner,
            detector: OnceCell::new(),
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Run one bounded solve against the session. Captcha-domain
    /// failures never surface as `Err`; callers get the tri-state report.
    pub async fn solve(&self) -> SolveReport {
        let attempts = Mutex::new(Vec::new());
        let outcome = self.run(&attempts).await;
        SolveReport {
            outcome,
            attempts: take_attempts(attempts),
        }
    }

    /// `solve()` under an outer deadline. Expiry drops all pending waits
    /// with the future (tokio timers leave nothing orphaned) and reports
    /// a failed solve; attempts completed before expiry stay in the
    /// report.
    pub async fn solve_with_deadline(&self, deadline: Duration) -> SolveReport {
        let attempts = Mutex::new(Vec::new());
        let outcome = match tokio::time::timeout(deadline, self.run(&attempts)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(?deadline, "solve deadline expired");
                SolveOutcome::Failed
            }
        };
        SolveReport {
            outcome,
            attempts: take_attempts(attempts),
        }
    }

    /// The state-machine driver. Finished attempts are recorded through
    /// the shared history so a cancelled run still reports them.
    async fn run(&self, attempts: &Mutex<Vec<AttemptResult>>) -> SolveOutcome {
        let mut attempt_index: u32 = 0;
        let mut state = SolveState::Searching;

        let mut ctx: Option<CaptchaContext> = None;
        let mut acquired: Option<Acquired> = None;
        let mut plan: Option<(SliderMovementPlan, (f64, f64))> = None;
        let mut outcome_tag = AttemptOutcome::NoSignal;
        let mut artifacts: Vec<PathBuf> = Vec::new();

        loop {
            let event = match state {
                SolveState::Searching => {
                    let locator = FrameLocator::new(&self.session, &self.config);
                    match locator
                        .resolve(Duration::from_millis(self.config.locate_timeout_ms))
                        .await
                    {
                        Some(resolved) => {
                            ctx = Some(resolved);
                            SolveEvent::ContextResolved
                        }
                        None => SolveEvent::ContextTimeout,
                    }
                }

                SolveState::Acquiring => {
                    let Some(ctx) = ctx.as_ref() else {
                        outcome_tag = AttemptOutcome::SurfaceLost;
                        state = SolveState::Refreshing;
                        continue;
                    };
                    match acquisition::capture(ctx, &self.config).await {
                        Ok(Some(images)) => {
                            artifacts = self.dump_debug(attempt_index, &images);
                            acquired = Some(images);
                            SolveEvent::Acquired
                        }
                        Ok(None) => {
                            outcome_tag = AttemptOutcome::AcquisitionFailed;
                            SolveEvent::AcquisitionMissing
                        }
                        Err(e) => {
                            warn!(error = %e, "acquisition error");
                            outcome_tag = AttemptOutcome::SurfaceLost;
                            SolveEvent::AttemptError
                        }
                    }
                }

                SolveState::Planning => {
                    let (Some(ctx_ref), Some(images)) = (ctx.as_ref(), acquired.as_ref()) else {
                        outcome_tag = AttemptOutcome::SurfaceLost;
                        state = SolveState::Refreshing;
                        continue;
                    };
                    match self.plan_attempt(ctx_ref, images).await {
                        Ok(Some(ready)) => {
                            plan = Some(ready);
                            SolveEvent::PlanReady
                        }
                        Ok(None) => {
                            outcome_tag = AttemptOutcome::PlanRejected;
                            SolveEvent::PlanRejected
                        }
                        Err(e) if e.is_fatal() => {
                            warn!(error = %e, "inference unavailable, aborting solve");
                            SolveEvent::FatalInference
                        }
                        Err(e) => {
                            warn!(error = %e, "planning error");
                            outcome_tag = AttemptOutcome::PlanRejected;
                            SolveEvent::AttemptError
                        }
                    }
                }

                SolveState::Dragging => {
                    let Some((movement, start)) = plan.as_ref().map(|(m, s)| (m, *s)) else {
                        outcome_tag = AttemptOutcome::PlanRejected;
                        state = SolveState::Refreshing;
                        continue;
                    };
                    let steps = self.planner.build_trajectory(movement.delta_dom_px as f64);
                    let path = self.planner.build_timed_path(&steps);
                    let executor = DragExecutor::new(&self.session);
                    match executor.execute(start, &path).await {
                        Ok(()) => SolveEvent::DragCompleted,
                        Err(e) => {
                            warn!(error = %e, "drag execution failed");
                            outcome_tag = AttemptOutcome::DragFailed;
                            SolveEvent::AttemptError
                        }
                    }
                }

                SolveState::Verifying => {
                    let Some(ctx_ref) = ctx.as_ref() else {
                        outcome_tag = AttemptOutcome::SurfaceLost;
                        state = SolveState::Refreshing;
                        continue;
                    };
                    let verifier = Verifier::new(&self.session, &self.config);
                    if verifier.wait_for_success(ctx_ref).await {
                        outcome_tag = AttemptOutcome::Verified;
                        SolveEvent::SignalHit
                    } else {
                        outcome_tag = AttemptOutcome::NoSignal;
                        SolveEvent::WindowElapsed
                    }
                }

                SolveState::Refreshing => {
                    record_attempt(attempts, AttemptResult {
                        index: attempt_index,
                        outcome: outcome_tag,
                        artifacts: std::mem::take(&mut artifacts),
                    });
                    self.refresh_widget(ctx.as_ref()).await;
                    ctx = None;
                    acquired = None;
                    plan = None;
                    attempt_index += 1;
                    let attempts_exhausted = attempt_index >= self.config.max_attempts;
                    if attempts_exhausted {
                        info!(attempts = attempt_index, "attempt budget exhausted");
                    }
                    SolveEvent::RefreshCycled { attempts_exhausted }
                }

                SolveState::Solved => {
                    record_attempt(attempts, AttemptResult {
                        index: attempt_index,
                        outcome: AttemptOutcome::Verified,
                        artifacts: std::mem::take(&mut artifacts),
                    });
                    info!(attempt = attempt_index, "challenge solved");
                    return SolveOutcome::Solved;
                }

                SolveState::Failed => {
                    return SolveOutcome::Failed;
                }

                SolveState::NoCaptcha => {
                    debug!("no challenge present");
                    return SolveOutcome::NoCaptcha;
                }
            };

            state = next_state(state, event);
        }
    }

    /// Gap estimation strategy selection: detection pairing when a model
    /// is configured, pixel-diff as the fallback for canvas pairs.
    /// Inference being unavailable is fatal only when no pixel-diff
    /// fallback exists for this acquisition.
    async fn plan_attempt(
        &self,
        ctx: &CaptchaContext,
        images: &Acquired,
    ) -> Result<Option<(SliderMovementPlan, (f64, f64))>, SolveError> {
        let estimate = match self.estimate_gap(images).await? {
            Some(est) => est,
            None => {
                debug!(rejection = %PlanRejection::NoPairing, "no gap estimate");
                return Ok(None);
            }
        };

        let Some((_, handle)) =
            query_any(ctx.surface.as_ref(), &self.config.slider_handle_selectors).await?
        else {
            debug!("no slider handle, cannot plan drag");
            return Ok(None);
        };

        let slider_width = match query_any(ctx.surface.as_ref(), &self.config.slider_track_selectors)
            .await?
        {
            Some((_, track)) => track.bbox.width,
            None => {
                // fall back to the widget container's width
                match query_any(ctx.surface.as_ref(), &self.config.container_selectors).await? {
                    Some((_, container)) => container.bbox.width,
                    None => 0.0,
                }
            }
        };

        let movement = self.planner.build_plan(
            estimate.delta_image_px,
            estimate.image_width,
            estimate.image_height,
            estimate.piece_width_px,
            slider_width as f32,
            estimate.piece.clone(),
            estimate.target.clone(),
        );

        if let Some(rejection) = movement.rejection {
            debug!(strategy = estimate.strategy, "plan rejected");
            return Err(SolveError::InvalidPlan(rejection));
        }

        Ok(Some((movement, handle.bbox.center())))
    }

    async fn estimate_gap(&self, images: &Acquired) -> Result<Option<GapEstimate>, SolveError> {
        let has_pair = matches!(images, Acquired::Pair { .. });
        let mut detections: Option<Vec<DetectionBox>> = None;

        if let Some(model_path) = self.config.model_path.clone() {
            match self.detector(&model_path).await {
                Ok(detector) => match detector.detect(images.primary()) {
                    Ok(dets) => detections = Some(dets),
                    Err(VisionError::InferenceUnavailable(msg)) if !has_pair => {
                        return Err(SolveError::InferenceUnavailable(msg));
                    }
                    Err(e) => warn!(error = %e, "detection pass failed, trying pixel-diff"),
                },
                Err(VisionError::InferenceUnavailable(msg)) if !has_pair => {
                    return Err(SolveError::InferenceUnavailable(msg));
                }
                Err(e) => warn!(error = %e, "detector init failed, trying pixel-diff"),
            }
        }

        Ok(resolve_estimate(detections.as_deref(), images, &self.config))
    }

    /// Lazily bring up the detector once per solver instance.
    async fn detector(&self, model_path: &Path) -> Result<&Arc<Detector>, VisionError> {
        self.detector
            .get_or_try_init(|| async {
                Detector::load(
                    model_path,
                    self.config.model_input_size,
                    self.config.min_confidence,
                    self.config.nms_iou,
                )
                .map(Arc::new)
            })
            .await
    }

    /// Best-effort click of the widget's own refresh control, then a
    /// settle delay. A missing control is non-fatal.
    async fn refresh_widget(&self, ctx: Option<&CaptchaContext>) {
        if let Some(ctx) = ctx {
            for selector in &self.config.refresh_selectors {
                match ctx.surface.click(selector).await {
                    Ok(true) => {
                        debug!(selector = %selector, "clicked widget refresh");
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        debug!(error = %e, "refresh click failed, continuing");
                        break;
                    }
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(self.config.refresh_settle_ms)).await;
    }

    /// Dump captured images for diagnosis. Only ever writes in debug
    /// mode; normal runs keep all images in memory.
    fn dump_debug(&self, attempt: u32, images: &Acquired) -> Vec<PathBuf> {
        if !self.config.debug {
            return Vec::new();
        }
        if let Err(e) = std::fs::create_dir_all(&self.config.debug_dir) {
            warn!(error = %e, "cannot create debug dir");
            return Vec::new();
        }

        let mut paths = Vec::new();
        let mut save = |name: String, img: &image::RgbImage| {
            let path = self.config.debug_dir.join(name);
            match img.save(&path) {
                Ok(()) => paths.push(path),
                Err(e) => warn!(error = %e, "debug dump failed"),
            }
        };
        match images {
            Acquired::Single(img) => save(format!("attempt-{attempt}-widget.png"), img),
            Acquired::Pair { full, background } => {
                save(format!("attempt-{attempt}-full.png"), full);
                save(format!("attempt-{attempt}-background.png"), background);
            }
        }
        paths
    }
}

/// Strategy selection over one acquisition: detection pairing when any
/// detections were retained, pixel-diff over canvas pairs otherwise.
/// Every anchor falling below the confidence floor leaves an empty
/// detection list, which falls through to pixel-diff like any other
/// failed pairing.
fn resolve_estimate(
    detections: Option<&[DetectionBox]>,
    images: &Acquired,
    config: &SolverConfig,
) -> Option<GapEstimate> {
    if let Some(dets) = detections {
        let primary = images.primary();
        if let Some(est) = gap::resolve_from_detections(
            dets,
            primary.width(),
            primary.height(),
            config.default_piece_width_px,
        ) {
            return Some(est);
        }
        debug!(retained = dets.len(), "no usable detection pair, trying pixel-diff");
    }

    if let Acquired::Pair { full, background } = images {
        return gap::resolve_pixel_diff(
            full,
            background,
            &config.pixel_diff,
            config.default_piece_width_px,
        );
    }

    None
}

// The history lock is only ever held for a push, never across an await.
fn record_attempt(attempts: &Mutex<Vec<AttemptResult>>, result: AttemptResult) {
    attempts
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .push(result);
}

fn take_attempts(attempts: Mutex<Vec<AttemptResult>>) -> Vec<AttemptResult> {
    attempts
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn searching_timeout_is_no_captcha_not_failed() {
        assert_eq!(
            next_state(SolveState::Searching, SolveEvent::ContextTimeout),
            SolveState::NoCaptcha
        );
    }

    #[test]
    fn happy_path_traverses_all_states() {
        let mut state = SolveState::Searching;
        for event in [
            SolveEvent::ContextResolved,
            SolveEvent::Acquired,
            SolveEvent::PlanReady,
            SolveEvent::DragCompleted,
            SolveEvent::SignalHit,
        ] {
            state = next_state(state, event);
        }
        assert_eq!(state, SolveState::Solved);
    }

    #[test]
    fn all_non_fatal_failures_route_to_refreshing() {
        assert_eq!(
            next_state(SolveState::Acquiring, SolveEvent::AcquisitionMissing),
            SolveState::Refreshing
        );
        assert_eq!(
            next_state(SolveState::Planning, SolveEvent::PlanRejected),
            SolveState::Refreshing
        );
        assert_eq!(
            next_state(SolveState::Verifying, SolveEvent::WindowElapsed),
            SolveState::Refreshing
        );
        assert_eq!(
            next_state(SolveState::Dragging, SolveEvent::AttemptError),
            SolveState::Refreshing
        );
    }

    #[test]
    fn refresh_loops_until_attempts_exhaust() {
        assert_eq!(
            next_state(
                SolveState::Refreshing,
                SolveEvent::RefreshCycled {
                    attempts_exhausted: false
                }
            ),
            SolveState::Searching
        );
        assert_eq!(
            next_state(
                SolveState::Refreshing,
                SolveEvent::RefreshCycled {
                    attempts_exhausted: true
                }
            ),
            SolveState::Failed
        );
    }

    fn strip_pair(gap_x: u32) -> Acquired {
        let full = RgbImage::from_pixel(300, 150, Rgb([200, 200, 200]));
        let mut background = full.clone();
        for y in 0..150 {
            background.put_pixel(gap_x, y, Rgb([0, 0, 0]));
        }
        Acquired::Pair { full, background }
    }

    #[test]
    fn empty_detections_fall_back_to_pixel_diff() {
        let images = strip_pair(120);
        let est = resolve_estimate(Some(&[]), &images, &SolverConfig::default()).unwrap();
        assert_eq!(est.strategy, "pixel-diff");
        assert!((est.delta_image_px - 120.0).abs() <= 1.0);
    }

    #[test]
    fn empty_detections_without_pair_yield_no_estimate() {
        let images = Acquired::Single(RgbImage::from_pixel(300, 150, Rgb([200, 200, 200])));
        assert!(resolve_estimate(Some(&[]), &images, &SolverConfig::default()).is_none());
    }

    #[test]
    fn fatal_inference_short_circuits_from_anywhere() {
        for state in [
            SolveState::Acquiring,
            SolveState::Planning,
            SolveState::Verifying,
        ] {
            assert_eq!(next_state(state, SolveEvent::FatalInference), SolveState::Failed);
        }
    }
}
