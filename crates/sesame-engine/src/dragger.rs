//! Drag execution: the only component that touches real input timing.

use std::time::Duration;

use rand::Rng;
use sesame_common::{SurfaceError, TrajectoryPoint};
use tracing::debug;

use crate::surface::ChallengeSession;

/// Settle pause before releasing the pointer, milliseconds.
const SETTLE_MS: (u64, u64) = (80, 140);

pub struct DragExecutor<'a> {
    session: &'a dyn ChallengeSession,
}

impl<'a> DragExecutor<'a> {
    pub fn new(session: &'a dyn ChallengeSession) -> Self {
        Self { session }
    }

    /// Press at `start`, replay the timed path relative to it, settle,
    /// release.
    pub async fn execute(
        &self,
        start: (f64, f64),
        path: &[TrajectoryPoint],
    ) -> Result<(), SurfaceError> {
        let (sx, sy) = start;
        // rand handles are not Send; draw before the first await
        let settle = {
            let mut rng = rand::thread_rng();
            rng.gen_range(SETTLE_MS.0..=SETTLE_MS.1)
        };

        self.session.pointer_down(sx, sy).await?;

        let mut last = (sx, sy);
        let mut previous_ms = 0u64;
        for point in path {
            tokio::time::sleep(Duration::from_millis(point.elapsed_ms - previous_ms)).await;
            previous_ms = point.elapsed_ms;
            last = (sx + point.x, sy + point.y);
            self.session.pointer_move(last.0, last.1).await?;
        }

        tokio::time::sleep(Duration::from_millis(settle)).await;
        self.session.pointer_up(last.0, last.1).await?;

        debug!(distance = path.last().map(|p| p.x).unwrap_or(0.0), steps = path.len(), "drag complete");
        Ok(())
    }
}
