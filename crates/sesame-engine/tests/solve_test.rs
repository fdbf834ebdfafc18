use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use sesame_common::{AttemptOutcome, SolveOutcome, SolverConfig, SurfaceError};
use sesame_engine::{ChallengeSession, ChallengeSurface, ElementInfo, Solver, ViewportBox};

const GAP_X: u32 = 120;

fn png_bytes(img: &RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img.clone())
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn full_canvas() -> Vec<u8> {
    png_bytes(&RgbImage::from_pixel(300, 150, Rgb([200, 200, 200])))
}

fn gap_canvas() -> Vec<u8> {
    let mut img = RgbImage::from_pixel(300, 150, Rgb([200, 200, 200]));
    for y in 0..150 {
        img.put_pixel(GAP_X, y, Rgb([0, 0, 0]));
    }
    png_bytes(&img)
}

#[derive(Debug, Default)]
struct WidgetState {
    solved: bool,
    /// Whether a pointer-up ever marks the widget solved.
    solvable: bool,
    pointer_events: Vec<(&'static str, f64, f64)>,
    refresh_clicks: u32,
}

#[derive(Clone)]
struct MockSurface {
    state: Arc<Mutex<WidgetState>>,
    has_widget: bool,
    /// Whether the two-canvas pair is exposed; otherwise only a single
    /// container screenshot is available.
    pair_available: bool,
}

fn info(x: f64, y: f64, width: f64, height: f64) -> ElementInfo {
    ElementInfo {
        visible: true,
        bbox: ViewportBox {
            x,
            y,
            width,
            height,
        },
    }
}

#[async_trait]
impl ChallengeSurface for MockSurface {
    async fn query(&self, selector: &str) -> Result<Option<ElementInfo>, SurfaceError> {
        if !self.has_widget {
            return Ok(None);
        }
        let state = self.state.lock().unwrap();
        let found = match selector {
            ".geetest_widget" => Some(info(100.0, 100.0, 320.0, 220.0)),
            ".geetest_slider_button" => Some(info(100.0, 320.0, 40.0, 40.0)),
            ".geetest_slider_track" => Some(info(100.0, 320.0, 280.0, 40.0)),
            ".geetest_success_radar_tip" if state.solved => Some(info(100.0, 90.0, 120.0, 20.0)),
            _ => None,
        };
        Ok(found)
    }

    async fn text_contains(&self, phrase: &str) -> Result<bool, SurfaceError> {
        let state = self.state.lock().unwrap();
        Ok(state.solved && phrase.eq_ignore_ascii_case("verification success"))
    }

    async fn screenshot_element(&self, selector: &str) -> Result<Option<Vec<u8>>, SurfaceError> {
        if !self.has_widget {
            return Ok(None);
        }
        let bytes = match selector {
            ".geetest_canvas_fullbg canvas" if self.pair_available => Some(full_canvas()),
            ".geetest_canvas_bg canvas" if self.pair_available => Some(gap_canvas()),
            ".geetest_widget" => Some(full_canvas()),
            _ => None,
        };
        Ok(bytes)
    }

    async fn click(&self, selector: &str) -> Result<bool, SurfaceError> {
        if selector.contains("refresh") || selector.contains("reload") {
            self.state.lock().unwrap().refresh_clicks += 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn describe(&self) -> String {
        "mock-page".into()
    }
}

struct MockSession {
    surface: MockSurface,
}

impl MockSession {
    fn new(has_widget: bool, solvable: bool) -> Self {
        let state = Arc::new(Mutex::new(WidgetState {
            solvable,
            ..WidgetState::default()
        }));
        MockSession {
            surface: MockSurface {
                state,
                has_widget,
                pair_available: true,
            },
        }
    }

    fn without_canvas_pair(mut self) -> Self {
        self.surface.pair_available = false;
        self
    }

    fn state(&self) -> Arc<Mutex<WidgetState>> {
        self.surface.state.clone()
    }
}

#[async_trait]
impl ChallengeSession for MockSession {
    async fn surfaces(&self) -> Result<Vec<Arc<dyn ChallengeSurface>>, SurfaceError> {
        Ok(vec![Arc::new(self.surface.clone())])
    }

    async fn has_cookie(&self, _name: &str) -> Result<bool, SurfaceError> {
        Ok(false)
    }

    async fn pointer_down(&self, x: f64, y: f64) -> Result<(), SurfaceError> {
        self.surface
            .state
            .lock()
            .unwrap()
            .pointer_events
            .push(("down", x, y));
        Ok(())
    }

    async fn pointer_move(&self, x: f64, y: f64) -> Result<(), SurfaceError> {
        self.surface
            .state
            .lock()
            .unwrap()
            .pointer_events
            .push(("move", x, y));
        Ok(())
    }

    async fn pointer_up(&self, x: f64, y: f64) -> Result<(), SurfaceError> {
        let mut state = self.surface.state.lock().unwrap();
        state.pointer_events.push(("up", x, y));
        if state.solvable {
            state.solved = true;
        }
        Ok(())
    }
}

fn test_config() -> SolverConfig {
    SolverConfig {
        locate_timeout_ms: 500,
        poll_interval_ms: 50,
        ..SolverConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn locator_timeout_yields_no_captcha_never_failed() {
    let solver = Solver::new(MockSession::new(false, false), test_config());
    let report = solver.solve().await;
    assert_eq!(report.outcome, SolveOutcome::NoCaptcha);
    assert!(report.attempts.is_empty());
}

#[tokio::test(start_paused = true)]
async fn pixel_diff_path_solves_in_one_attempt() {
    let session = MockSession::new(true, true);
    let state = session.state();
    let solver = Solver::new(session, test_config());

    let report = solver.solve().await;
    assert_eq!(report.outcome, SolveOutcome::Solved);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].outcome, AttemptOutcome::Verified);

    let state = state.lock().unwrap();
    let events = &state.pointer_events;
    assert_eq!(events.first().map(|e| e.0), Some("down"));
    assert_eq!(events.last().map(|e| e.0), Some("up"));
    assert!(events.iter().filter(|e| e.0 == "move").count() >= 18);

    // handle center (120, 340); gap at 120px of a 300px image with the
    // default 60px piece width: ratio 0.5 of the 280px track, plus the
    // default 2px forward bias.
    let (_, down_x, down_y) = events[0];
    assert!((down_x - 120.0).abs() < 1e-6);
    assert!((down_y - 340.0).abs() < 1e-6);
    let expected = 120.0 + (120.0 / 240.0) * 280.0 + 2.0;
    let (_, up_x, _) = *events.last().unwrap();
    assert!(
        (up_x - expected).abs() < 1.0,
        "drag released at {up_x}, expected about {expected}"
    );
}

#[tokio::test(start_paused = true)]
async fn unverifiable_widget_exhausts_exactly_max_attempts() {
    let config = test_config();
    let max = config.max_attempts;
    let session = MockSession::new(true, false);
    let state = session.state();
    let solver = Solver::new(session, config);

    let report = solver.solve().await;
    assert_eq!(report.outcome, SolveOutcome::Failed);
    assert_eq!(report.attempts.len(), max as usize);
    for (i, attempt) in report.attempts.iter().enumerate() {
        assert_eq!(attempt.index, i as u32);
        assert_eq!(attempt.outcome, AttemptOutcome::NoSignal);
    }
    // each refresh cycle tried the widget's own refresh control
    assert_eq!(state.lock().unwrap().refresh_clicks, max);
}

#[tokio::test(start_paused = true)]
async fn missing_model_without_fallback_is_fatal() {
    // single-image challenge, so pixel-diff cannot cover for the model
    let mut config = test_config();
    config.model_path = Some(std::path::PathBuf::from("/nonexistent/model.onnx"));
    let session = MockSession::new(true, false).without_canvas_pair();
    let solver = Solver::new(session, config);

    let report = solver.solve().await;
    assert_eq!(report.outcome, SolveOutcome::Failed);
    // short-circuits without burning the retry budget
    assert!(report.attempts.is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_model_with_canvas_pair_falls_back_to_pixel_diff() {
    let mut config = test_config();
    config.model_path = Some(std::path::PathBuf::from("/nonexistent/model.onnx"));
    let session = MockSession::new(true, true);
    let solver = Solver::new(session, config);

    let report = solver.solve().await;
    assert_eq!(report.outcome, SolveOutcome::Solved);
}

#[tokio::test(start_paused = true)]
async fn debug_mode_dumps_attempt_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.debug = true;
    config.debug_dir = dir.path().to_path_buf();
    let solver = Solver::new(MockSession::new(true, true), config);

    let report = solver.solve().await;
    assert_eq!(report.outcome, SolveOutcome::Solved);
    let artifacts = &report.attempts[0].artifacts;
    assert_eq!(artifacts.len(), 2); // full + background canvases
    for path in artifacts {
        assert!(path.exists(), "missing artifact {}", path.display());
    }
}

#[tokio::test(start_paused = true)]
async fn deadline_expiry_reports_failed() {
    let solver = Solver::new(MockSession::new(true, false), test_config());
    let report = solver
        .solve_with_deadline(std::time::Duration::from_millis(10))
        .await;
    assert_eq!(report.outcome, SolveOutcome::Failed);
}

#[tokio::test(start_paused = true)]
async fn deadline_expiry_keeps_completed_attempt_history() {
    // One full attempt takes ~4s (drag + 2.5s verify window + 1.2s
    // refresh settle); a 6s deadline cuts the run mid-second-attempt.
    let solver = Solver::new(MockSession::new(true, false), test_config());
    let report = solver
        .solve_with_deadline(std::time::Duration::from_secs(6))
        .await;
    assert_eq!(report.outcome, SolveOutcome::Failed);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].outcome, AttemptOutcome::NoSignal);
}
