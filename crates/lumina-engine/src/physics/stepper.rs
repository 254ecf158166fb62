//! Semi-fixed timestep accumulator.
//!
//! Variable frame deltas are banked into an accumulator and paid out as whole
//! fixed steps, at most `max_steps` per frame. When the cap is hit the
//! residual is clamped to one step, so a long stall costs a bounded amount of
//! simulation instead of a spiral of catch-up frames.
//!
//! ```
//! use lumina_engine::physics::FixedStepper;
//!
//! let mut stepper = FixedStepper::new(1.0 / 60.0, 5, 0.25);
//! assert_eq!(stepper.advance(1.0 / 60.0), 1);
//! assert_eq!(stepper.advance(10.0), 5);
//! assert!(stepper.accumulator() <= 1.0 / 60.0);
//! ```

use crate::config::PhysicsConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct FixedStepper {
    fixed_step: f64,
    max_steps: u32,
    max_frame_delta: f64,
    accumulator: f64,
}

impl FixedStepper {
    /// # Panics
    ///
    /// Panics if `fixed_step` is not positive and finite or `max_steps` is 0.
    pub fn new(fixed_step: f64, max_steps: u32, max_frame_delta: f64) -> Self {
        assert!(
            fixed_step.is_finite() && fixed_step > 0.0,
            "fixed_step must be positive and finite, got {fixed_step}"
        );
        assert!(max_steps > 0, "max_steps must be at least 1");
        Self {
            fixed_step,
            max_steps,
            max_frame_delta: max_frame_delta.max(0.0),
            accumulator: 0.0,
        }
    }

    pub fn from_config(config: &PhysicsConfig) -> Self {
        Self::new(config.fixed_step, config.max_steps, config.max_frame_delta)
    }

    /// Bank `frame_delta` and return how many fixed steps to integrate now.
    ///
    /// Negative and non-finite deltas count as zero. On return the residual
    /// is below one step, or at most one step if the cap was hit.
    pub fn advance(&mut self, frame_delta: f64) -> u32 {
        let dt = if frame_delta.is_finite() {
            frame_delta.clamp(0.0, self.max_frame_delta)
        } else {
            0.0
        };
        self.accumulator += dt;

        let whole = (self.accumulator / self.fixed_step).floor();
        let steps = if whole >= self.max_steps as f64 {
            self.max_steps
        } else {
            whole as u32
        };

        if steps > 0 {
            self.accumulator = (self.accumulator - steps as f64 * self.fixed_step).max(0.0);
        }
        if steps == self.max_steps {
            self.accumulator = self.accumulator.min(self.fixed_step);
            tracing::debug!(
                steps,
                residual = self.accumulator,
                "physics step cap reached, dropping simulation time"
            );
        }
        steps
    }

    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    pub fn fixed_step(&self) -> f64 {
        self.fixed_step
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Fraction of a step left in the accumulator, for render interpolation.
    pub fn alpha(&self) -> f64 {
        self.accumulator / self.fixed_step
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}

impl Default for FixedStepper {
    fn default() -> Self {
        Self::from_config(&PhysicsConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
