//! Capability seams between the solver and a live browser session.
//!
//! The widget may live in the top-level page or in any nested frame; both
//! implement the same small `ChallengeSurface` capability interface
//! instead of relying on incidental structural overlap between page and
//! frame handles.

use async_trait::async_trait;
use std::sync::Arc;

pub use sesame_common::SurfaceError;

/// Element geometry in viewport coordinates (the coordinate space pointer
/// events are dispatched in, regardless of which frame owns the element).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ViewportBox {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementInfo {
    pub visible: bool,
    pub bbox: ViewportBox,
}

/// One place the challenge widget might live: the top-level page or a
/// nested frame.
#[async_trait]
pub trait ChallengeSurface: Send + Sync {
    /// First match for `selector`, or `None` when absent.
    async fn query(&self, selector: &str) -> Result<Option<ElementInfo>, SurfaceError>;

    /// Whether the surface's visible text contains `phrase`
    /// (case-insensitive).
    async fn text_contains(&self, phrase: &str) -> Result<bool, SurfaceError>;

    /// PNG screenshot of the first match, `None` when absent.
    async fn screenshot_element(&self, selector: &str) -> Result<Option<Vec<u8>>, SurfaceError>;

    /// Click the center of the first match; `false` when absent.
    async fn click(&self, selector: &str) -> Result<bool, SurfaceError>;

    /// Identity for logs (URL or frame path).
    fn describe(&self) -> String;
}

/// The externally-owned, already-authenticated browser session the solver
/// drives. Pointer primitives live here because input is dispatched at
/// session level even when the widget sits inside a frame.
#[async_trait]
pub trait ChallengeSession: Send + Sync {
    /// Current surfaces, top-level page first, then child frames. The
    /// hierarchy changes underneath us; callers re-enumerate every poll
    /// and skip surfaces that report `Detached`.
    async fn surfaces(&self) -> Result<Vec<Arc<dyn ChallengeSurface>>, SurfaceError>;

    /// Whether a cookie with this name exists on the session.
    async fn has_cookie(&self, name: &str) -> Result<bool, SurfaceError>;

    async fn pointer_down(&self, x: f64, y: f64) -> Result<(), SurfaceError>;
    async fn pointer_move(&self, x: f64, y: f64) -> Result<(), SurfaceError>;
    async fn pointer_up(&self, x: f64, y: f64) -> Result<(), SurfaceError>;
}

/// The resolved home of the active challenge widget. Ephemeral: built by
/// the frame locator, used for one attempt, never kept across a refresh.
#[derive(Clone)]
pub struct CaptchaContext {
    pub surface: Arc<dyn ChallengeSurface>,
    /// Which discovery tier matched.
    pub tier: String,
    /// The selector that matched within that tier.
    pub matched_selector: String,
}

impl std::fmt::Debug for CaptchaContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptchaContext")
            .field("surface", &self.surface.describe())
            .field("tier", &self.tier)
            .field("matched_selector", &self.matched_selector)
            .finish()
    }
}

/// First selector in `selectors` that `surface` reports as visible.
pub async fn query_any(
    surface: &dyn ChallengeSurface,
    selectors: &[String],
) -> Result<Option<(String, ElementInfo)>, SurfaceError> {
    for selector in selectors {
        if let Some(info) = surface.query(selector).await? {
            if info.visible {
                return Ok(Some((selector.clone(), info)));
            }
        }
    }
    Ok(None)
}
