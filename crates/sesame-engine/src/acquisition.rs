//! Visual acquisition: raster captures of the resolved widget.

use sesame_common::{SolverConfig, SurfaceError};
use sesame_vision::{Acquired, align_pair, decode_image};
use tracing::{debug, warn};

use crate::surface::CaptchaContext;

/// Capture the widget's raster image(s).
///
/// Prefers the two-canvas pair (full + background-with-gap), cropped to
/// their minimum common size; falls back to a single container
/// screenshot. `None` means the minimum required surfaces were not
/// visible and the attempt should be refreshed.
pub async fn capture(
    ctx: &CaptchaContext,
    config: &SolverConfig,
) -> Result<Option<Acquired>, SurfaceError> {
    if let Some(pair) = capture_pair(ctx, config).await? {
        return Ok(Some(pair));
    }

    for selector in &config.container_selectors {
        if let Some(bytes) = ctx.surface.screenshot_element(selector).await? {
            match decode_image(&bytes) {
                Ok(img) => {
                    debug!(selector = %selector, w = img.width(), h = img.height(), "captured single widget image");
                    return Ok(Some(Acquired::Single(img)));
                }
                Err(e) => {
                    warn!(selector = %selector, error = %e, "widget screenshot did not decode");
                }
            }
        }
    }

    Ok(None)
}

async fn capture_pair(
    ctx: &CaptchaContext,
    config: &SolverConfig,
) -> Result<Option<Acquired>, SurfaceError> {
    let full = first_capture(ctx, &config.canvas_full_selectors).await?;
    let background = first_capture(ctx, &config.canvas_gap_selectors).await?;

    match (full, background) {
        (Some(full), Some(background)) => {
            let (full, background) = align_pair(full, background);
            debug!(w = full.width(), h = full.height(), "captured aligned canvas pair");
            Ok(Some(Acquired::Pair { full, background }))
        }
        _ => Ok(None),
    }
}

async fn first_capture(
    ctx: &CaptchaContext,
    selectors: &[String],
) -> Result<Option<image::RgbImage>, SurfaceError> {
    for selector in selectors {
        if let Some(bytes) = ctx.surface.screenshot_element(selector).await? {
            match decode_image(&bytes) {
                Ok(img) => return Ok(Some(img)),
                Err(e) => warn!(selector = %selector, error = %e, "canvas capture did not decode"),
            }
        }
    }
    Ok(None)
}
