//! Sample drift patterns for closed-loop testing
//!
//! Each profile gives the sample displacement in field pixels as a function
//! of simulated time since the session started.

use std::time::Duration;

/// Trait for sample drift functions
pub trait DriftProfile: Send + Sync {
    /// Sample displacement `(x, y)` in field pixels at time `t`
    fn drift_at(&self, t: Duration) -> (f64, f64);

    /// Get profile description
    fn description(&self) -> &str;
}

/// Constant offset (no motion)
pub struct StaticDrift {
    offset: (f64, f64),
}

impl StaticDrift {
    pub fn new(offset: (f64, f64)) -> Self {
        Self { offset }
    }
}

impl Default for StaticDrift {
    fn default() -> Self {
        Self::new((0.0, 0.0))
    }
}

impl DriftProfile for StaticDrift {
    fn drift_at(&self, _t: Duration) -> (f64, f64) {
        self.offset
    }

    fn description(&self) -> &str {
        "Static (no drift)"
    }
}

/// Constant-velocity drift, typical of thermal relaxation
pub struct LinearDrift {
    /// Velocity in pixels per second
    velocity: (f64, f64),
}

impl LinearDrift {
    pub fn new(velocity: (f64, f64)) -> Self {
        Self { velocity }
    }
}

impl DriftProfile for LinearDrift {
    fn drift_at(&self, t: Duration) -> (f64, f64) {
        let t_sec = t.as_secs_f64();
        (self.velocity.0 * t_sec, self.velocity.1 * t_sec)
    }

    fn description(&self) -> &str {
        "Linear drift"
    }
}

/// Sudden jump at a fixed time, e.g. a stage slip
pub struct StepDrift {
    at: Duration,
    step: (f64, f64),
}

impl StepDrift {
    pub fn new(at: Duration, step: (f64, f64)) -> Self {
        Self { at, step }
    }
}

impl DriftProfile for StepDrift {
    fn drift_at(&self, t: Duration) -> (f64, f64) {
        if t >= self.at {
            self.step
        } else {
            (0.0, 0.0)
        }
    }

    fn description(&self) -> &str {
        "Step drift"
    }
}

/// Build a profile by name (`static`, `linear`, `step`).
///
/// `magnitude` is the velocity in px/s for `linear` and the jump in px for
/// `step`; `step` jumps at `step_at`.
pub fn profile_by_name(
    name: &str,
    magnitude: (f64, f64),
    step_at: Duration,
) -> Option<Box<dyn DriftProfile>> {
    match name {
        "static" => Some(Box::new(StaticDrift::default())),
        "linear" => Some(Box::new(LinearDrift::new(magnitude))),
        "step" => Some(Box::new(StepDrift::new(step_at, magnitude))),
        _ => None,
    }
}
