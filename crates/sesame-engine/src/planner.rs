//! Movement planning: image-space offset -> validated drag plan -> timed
//! trajectory.

use rand::Rng;
use sesame_common::{DetectionBox, PlanRejection, SliderMovementPlan, TrajectoryPoint};
use tracing::debug;

/// Minimum forward step, in DOM distance units; smaller steps stall the
/// widget's drag tracking.
const MIN_STEP: f64 = 0.4;

/// Minimum number of trajectory steps.
const MIN_STEPS: usize = 18;

/// Per-step pointer-move delay bounds, milliseconds.
const STEP_DELAY_MS: (u64, u64) = (12, 28);

/// Vertical jitter bound applied per pointer move.
const VERTICAL_JITTER: f64 = 0.6;

pub struct MovementPlanner {
    /// Empirical correction for drags stopping short of the true target.
    /// Tuned per widget version; configurable, not authoritative.
    forward_bias_px: f64,
}

impl MovementPlanner {
    pub fn new(forward_bias_px: f64) -> Self {
        Self { forward_bias_px }
    }

    /// Validate and scale an image-space delta into DOM pixels.
    ///
    /// The piece cannot travel past its own width, so the usable travel
    /// range is `image_width - piece_width`; the DOM delta is that ratio
    /// applied to the slider's width plus the forward bias. Invalid plans
    /// carry a rejection reason and must never reach the drag executor.
    pub fn build_plan(
        &self,
        delta_image_px: f32,
        image_width: u32,
        image_height: u32,
        piece_width: f32,
        slider_width_px: f32,
        piece: Option<DetectionBox>,
        target: Option<DetectionBox>,
    ) -> SliderMovementPlan {
        if !delta_image_px.is_finite() {
            return SliderMovementPlan::rejected(PlanRejection::NonFiniteDelta);
        }
        if delta_image_px <= 0.0 {
            return SliderMovementPlan::rejected(PlanRejection::NonPositiveDelta);
        }

        let travel_range = image_width as f32 - piece_width;
        if travel_range <= 0.0 || slider_width_px <= 0.0 {
            return SliderMovementPlan::rejected(PlanRejection::DegenerateTravelRange);
        }

        let delta_ratio = (delta_image_px / travel_range).min(1.0);
        let delta_dom_px = (delta_ratio as f64 * slider_width_px as f64 + self.forward_bias_px)
            .min(slider_width_px as f64) as f32;

        debug!(delta_image_px, delta_ratio, delta_dom_px, slider_width_px, "movement plan built");

        SliderMovementPlan {
            image_width,
            image_height,
            piece,
            target,
            delta_image_px,
            delta_ratio,
            delta_dom_px,
            slider_width_px,
            valid: true,
            rejection: None,
        }
    }

    /// Split a total drag distance into human-plausible step sizes.
    ///
    /// The first ~60% of steps carry mild forward acceleration (positive
    /// jitter), the remainder decelerate; every step is floored at
    /// `MIN_STEP` and the final step is clipped so the cumulative sum
    /// equals `total_distance` exactly.
    pub fn build_trajectory(&self, total_distance: f64) -> Vec<f64> {
        if !total_distance.is_finite() || total_distance <= 0.0 {
            return Vec::new();
        }

        let mut rng = rand::thread_rng();
        let mut n = MIN_STEPS.max((total_distance / 8.0).round() as usize).min(60);
        // short drags cannot afford MIN_STEPS floored steps
        n = n.min((total_distance / MIN_STEP).floor() as usize).max(1);

        let accel_end = n * 3 / 5;
        let base = total_distance / n as f64;
        let mut steps = Vec::with_capacity(n);
        let mut covered = 0.0f64;

        for i in 0..n.saturating_sub(1) {
            let jitter = rng.gen_range(0.0..(base * 0.35).max(1e-9));
            let desired = if i < accel_end { base + jitter } else { base - jitter };
            // leave every remaining step room to stay above the floor
            let remaining = (n - i - 1) as f64;
            let max_allowed = total_distance - covered - MIN_STEP * remaining;
            let step = desired.clamp(MIN_STEP, max_allowed.max(MIN_STEP));
            covered += step;
            steps.push(step);
        }
        steps.push(total_distance - covered);
        steps
    }

    /// Attach timing and vertical jitter, producing the motion path the
    /// drag executor replays relative to the drag origin.
    pub fn build_timed_path(&self, step_sizes: &[f64]) -> Vec<TrajectoryPoint> {
        let mut rng = rand::thread_rng();
        let mut path = Vec::with_capacity(step_sizes.len());
        let mut x = 0.0f64;
        let mut elapsed_ms = 0u64;

        for step in step_sizes {
            x += step;
            elapsed_ms += rng.gen_range(STEP_DELAY_MS.0..=STEP_DELAY_MS.1);
            path.push(TrajectoryPoint {
                x,
                y: rng.gen_range(-VERTICAL_JITTER..=VERTICAL_JITTER),
                elapsed_ms,
            });
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> MovementPlanner {
        MovementPlanner::new(2.0)
    }

    #[test]
    fn valid_plans_respect_dom_bounds() {
        let p = planner();
        for delta in [5.0f32, 60.0, 120.0, 250.0] {
            let plan = p.build_plan(delta, 300, 150, 40.0, 280.0, None, None);
            assert!(plan.valid);
            assert!(plan.delta_ratio > 0.0 && plan.delta_ratio <= 1.0);
            assert!(plan.delta_dom_px > 0.0 && plan.delta_dom_px <= plan.slider_width_px);
        }
    }

    #[test]
    fn reference_scenario_matches_expected_ratio() {
        // 300px-wide image, 40px piece, gap center at x=120, 280px track.
        let plan = planner().build_plan(120.0, 300, 150, 40.0, 280.0, None, None);
        assert!(plan.valid);
        assert!((plan.delta_ratio - 120.0 / 260.0).abs() < 1e-4);
        // 0.4615 * 280 = 129.2, plus the 2px bias
        assert!((plan.delta_dom_px - 129.2).abs() <= 3.0);
    }

    #[test]
    fn non_positive_and_non_finite_deltas_are_rejected() {
        let p = planner();
        let zero = p.build_plan(0.0, 300, 150, 40.0, 280.0, None, None);
        assert!(!zero.valid);
        assert_eq!(zero.rejection, Some(PlanRejection::NonPositiveDelta));

        let neg = p.build_plan(-12.0, 300, 150, 40.0, 280.0, None, None);
        assert_eq!(neg.rejection, Some(PlanRejection::NonPositiveDelta));

        let nan = p.build_plan(f32::NAN, 300, 150, 40.0, 280.0, None, None);
        assert_eq!(nan.rejection, Some(PlanRejection::NonFiniteDelta));
    }

    #[test]
    fn degenerate_travel_range_is_rejected() {
        let plan = planner().build_plan(10.0, 40, 150, 40.0, 280.0, None, None);
        assert_eq!(plan.rejection, Some(PlanRejection::DegenerateTravelRange));
    }

    #[test]
    fn trajectory_sums_exactly_to_total() {
        let p = planner();
        for total in [20.0f64, 57.3, 129.0, 240.8] {
            let steps = p.build_trajectory(total);
            let sum: f64 = steps.iter().sum();
            assert!((sum - total).abs() < 1e-9, "drift for total {total}: {sum}");
        }
    }

    #[test]
    fn trajectory_has_enough_steps_and_no_stalls() {
        let steps = planner().build_trajectory(180.0);
        assert!(steps.len() >= MIN_STEPS);
        for (i, step) in steps.iter().enumerate() {
            assert!(*step >= MIN_STEP - 1e-9, "step {i} stalls: {step}");
        }
    }

    #[test]
    fn short_drags_still_sum_exactly() {
        let steps = planner().build_trajectory(3.0);
        assert!(!steps.is_empty());
        let sum: f64 = steps.iter().sum();
        assert!((sum - 3.0).abs() < 1e-9);
    }

    #[test]
    fn timed_path_is_monotonic() {
        let p = planner();
        let steps = p.build_trajectory(130.0);
        let path = p.build_timed_path(&steps);
        assert_eq!(path.len(), steps.len());
        let mut prev_x = 0.0;
        let mut prev_t = 0;
        for point in &path {
            assert!(point.x > prev_x);
            assert!(point.elapsed_ms > prev_t);
            assert!(point.y.abs() <= VERTICAL_JITTER);
            prev_x = point.x;
            prev_t = point.elapsed_ms;
        }
        let last = path.last().unwrap();
        assert!((last.x - 130.0).abs() < 1e-9);
    }
}
