pub mod acquisition;
pub mod dragger;
pub mod gap;
pub mod locator;
pub mod orchestrator;
pub mod planner;
pub mod surface;
pub mod verify;

pub use orchestrator::{Solver, SolveEvent, SolveState, next_state};
pub use surface::{CaptchaContext, ChallengeSession, ChallengeSurface, ElementInfo, ViewportBox};
