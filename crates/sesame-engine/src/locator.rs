//! Frame locator: discover which surface currently hosts the widget.

use std::time::Duration;

use sesame_common::{SolverConfig, TierKind};
use tracing::{debug, trace};

use crate::surface::{CaptchaContext, ChallengeSession, query_any};

pub struct FrameLocator<'a> {
    session: &'a dyn ChallengeSession,
    config: &'a SolverConfig,
}

impl<'a> FrameLocator<'a> {
    pub fn new(session: &'a dyn ChallengeSession, config: &'a SolverConfig) -> Self {
        Self { session, config }
    }

    /// Poll the prioritized discovery tiers until one yields a visible
    /// match or the timeout elapses. `None` is a normal outcome meaning
    /// no challenge is present, not an error.
    pub async fn resolve(&self, timeout: Duration) -> Option<CaptchaContext> {
        let deadline = tokio::time::Instant::now() + timeout;
        let interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if let Some(ctx) = self.scan_once().await {
                debug!(tier = %ctx.tier, surface = %ctx.surface.describe(), "challenge context resolved");
                return Some(ctx);
            }
            if tokio::time::Instant::now() + interval > deadline {
                debug!("no challenge context within timeout");
                return None;
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// One pass over all tiers, highest priority first. A frame that goes
    /// away mid-scan is skipped, never treated as an error.
    async fn scan_once(&self) -> Option<CaptchaContext> {
        let surfaces = match self.session.surfaces().await {
            Ok(s) => s,
            Err(e) => {
                trace!(error = %e, "surface enumeration failed, will re-poll");
                return None;
            }
        };
        if surfaces.is_empty() {
            return None;
        }

        for tier in &self.config.tiers {
            match tier.kind {
                TierKind::ChallengeFrame => {
                    // The embedding marker lives on the top-level page; the
                    // context is the child frame, confirmed loaded by a
                    // container or canvas marker answering inside it.
                    let page = &surfaces[0];
                    let marker = match query_any(page.as_ref(), &tier.selectors).await {
                        Ok(m) => m,
                        Err(e) if e.is_detached() => continue,
                        Err(_) => continue,
                    };
                    if marker.is_none() {
                        continue;
                    }
                    for child in surfaces.iter().skip(1) {
                        let loaded = query_any(child.as_ref(), &self.config.container_selectors)
                            .await
                            .ok()
                            .flatten()
                            .or(query_any(child.as_ref(), &self.config.canvas_gap_selectors)
                                .await
                                .ok()
                                .flatten());
                        if let Some((selector, _)) = loaded {
                            return Some(CaptchaContext {
                                surface: child.clone(),
                                tier: tier.name.clone(),
                                matched_selector: selector,
                            });
                        }
                    }
                }
                TierKind::ContainerMarker | TierKind::Canvas | TierKind::SliderControl => {
                    for surface in &surfaces {
                        match query_any(surface.as_ref(), &tier.selectors).await {
                            Ok(Some((selector, _))) => {
                                return Some(CaptchaContext {
                                    surface: surface.clone(),
                                    tier: tier.name.clone(),
                                    matched_selector: selector,
                                });
                            }
                            Ok(None) => {}
                            Err(e) if e.is_detached() => continue,
                            Err(e) => {
                                trace!(error = %e, surface = %surface.describe(), "tier scan error, skipping surface");
                            }
                        }
                    }
                }
            }
        }
        None
    }
}
