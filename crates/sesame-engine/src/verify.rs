//! Success verification: race independent heuristics within one window.

use std::time::Duration;

use sesame_common::{SolverConfig, VerifySignal};
use tracing::{debug, trace};

use crate::surface::{CaptchaContext, ChallengeSession};

pub struct Verifier<'a> {
    session: &'a dyn ChallengeSession,
    config: &'a SolverConfig,
}

impl<'a> Verifier<'a> {
    pub fn new(session: &'a dyn ChallengeSession, config: &'a SolverConfig) -> Self {
        Self { session, config }
    }

    /// Poll the configured signals until one hits or the window elapses.
    /// Any single hit means solved; the signal order is heuristic
    /// priority, nothing more.
    pub async fn wait_for_success(&self, ctx: &CaptchaContext) -> bool {
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.verify_window_ms);
        let interval = Duration::from_millis(self.config.verify_poll_ms);

        loop {
            for signal in &self.config.verify_signals {
                if self.check(ctx, signal).await {
                    debug!(?signal, "success signal hit");
                    return true;
                }
            }
            if tokio::time::Instant::now() + interval > deadline {
                debug!("verification window elapsed with no signal");
                return false;
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn check(&self, ctx: &CaptchaContext, signal: &VerifySignal) -> bool {
        match signal {
            VerifySignal::Marker { selector } | VerifySignal::ContinueControl { selector } => {
                match ctx.surface.query(selector).await {
                    Ok(Some(info)) => info.visible,
                    Ok(None) => false,
                    Err(e) => {
                        trace!(error = %e, "marker check failed");
                        false
                    }
                }
            }
            VerifySignal::Phrase { text } => {
                ctx.surface.text_contains(text).await.unwrap_or(false)
            }
            VerifySignal::FrameGone => match ctx.surface.query(&ctx.matched_selector).await {
                // the widget frame going away after a drag is a success
                Err(e) if e.is_detached() => true,
                Ok(None) => true,
                Ok(Some(info)) => !info.visible,
                Err(_) => false,
            },
            VerifySignal::Cookie { name } => {
                self.session.has_cookie(name).await.unwrap_or(false)
            }
        }
    }
}
