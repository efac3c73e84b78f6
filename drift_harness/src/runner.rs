//! Closed-loop runner for the anchored estimator
//!
//! Drives an [`AnchoredEstimator`] against a [`SimulatedSem`] for a number of
//! checkpoints (scan, estimate, then let the main acquisition run) and
//! compares each estimate against the true sample drift.

use anchor_drift::{
    Advisory, AnchorConfig, AnchorRegion, AnchoredEstimator, DriftResult, DriftVector,
};
use std::time::Duration;

use crate::drift_profiles::{DriftProfile, StaticDrift};
use crate::simulated_sem::SimulatedSem;

/// Session parameters
pub struct SessionConfig {
    /// Full scan field `(width, height)` in pixels
    pub field_shape: (usize, usize),
    /// Anchor region, dwell time and estimator tunables
    pub anchor: AnchorConfig,
    /// Sample drift over simulated time
    pub profile: Box<dyn DriftProfile>,
    /// Number of scan/estimate checkpoints
    pub checkpoints: usize,
    /// Simulated main-acquisition time between checkpoints
    pub interval: Duration,
    /// Specimen and noise seed
    pub seed: u64,
    /// Gaussian read noise in counts, 0 disables
    pub read_noise: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            field_shape: (200, 200),
            anchor: AnchorConfig::new(
                AnchorRegion::new(0.4, 0.4, 0.6, 0.6),
                Duration::from_micros(1),
            ),
            profile: Box::new(StaticDrift::default()),
            checkpoints: 10,
            interval: Duration::from_secs(1),
            seed: 42,
            read_noise: 0.0,
        }
    }
}

/// One checkpoint of a session
#[derive(Debug, Clone)]
pub struct CheckpointResult {
    /// Checkpoint index
    pub index: usize,
    /// Simulated time the anchor scan started
    pub time: Duration,
    /// Sample displacement since the first anchor scan
    pub true_drift: DriftVector,
    /// Sample displacement implied by the estimator output
    pub estimated_drift: DriftVector,
    /// `estimated_drift - true_drift`
    pub residual: DriftVector,
    /// Emitter translation the anchor was scanned at
    pub translation: (f64, f64),
}

/// Results from a session
#[derive(Debug, Clone)]
pub struct SessionResults {
    /// Checkpoints whose scan succeeded
    pub checkpoints: Vec<CheckpointResult>,
    /// Advisories raised by the estimator
    pub advisories: Vec<Advisory>,
    /// Scan failures, the session continues past them
    pub errors: Vec<String>,
    /// Simulated time at the end of the session
    pub elapsed: Duration,
}

impl SessionResults {
    /// Largest per-axis residual over all checkpoints
    pub fn max_residual(&self) -> f64 {
        self.checkpoints
            .iter()
            .map(|c| c.residual.max_abs_diff(&DriftVector::ZERO))
            .fold(0.0, f64::max)
    }

    /// RMS of the residual vector length
    pub fn rms_residual(&self) -> f64 {
        if self.checkpoints.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .checkpoints
            .iter()
            .map(|c| c.residual.norm().powi(2))
            .sum();
        (sum / self.checkpoints.len() as f64).sqrt()
    }
}

/// Run a closed-loop session on a fresh simulated instrument
pub fn run_session(config: SessionConfig) -> DriftResult<SessionResults> {
    let mut sem = SimulatedSem::new(config.field_shape, config.seed).with_drift(config.profile);
    if config.read_noise > 0.0 {
        sem = sem.with_read_noise(config.read_noise);
    }
    run_session_on(&sem, config.anchor, config.checkpoints, config.interval)
}

/// Run a closed-loop session on an existing simulated instrument
pub fn run_session_on(
    sem: &SimulatedSem,
    anchor: AnchorConfig,
    checkpoints: usize,
    interval: Duration,
) -> DriftResult<SessionResults> {
    let mut estimator = AnchoredEstimator::new(sem.clone(), sem.clone(), anchor)?;
    log::info!(
        "Running {checkpoints} checkpoints with {} and anchor acquisition time {:?}",
        sem.drift_description(),
        estimator.estimate_acquisition_time()
    );

    let mut results = SessionResults {
        checkpoints: Vec::with_capacity(checkpoints),
        advisories: Vec::new(),
        errors: Vec::new(),
        elapsed: Duration::ZERO,
    };
    let mut reference: Option<(f64, f64)> = None;

    for index in 0..checkpoints {
        let time = sem.time();
        match estimator.scan() {
            Ok(()) => {
                let sample = sem.drift_at(time);
                let origin = *reference.get_or_insert(sample);
                let true_drift = DriftVector::new(sample.0 - origin.0, sample.1 - origin.1);

                // The estimator reports frame motion relative to the sample
                let estimated_drift = -estimator.estimate();
                let checkpoint = CheckpointResult {
                    index,
                    time,
                    true_drift,
                    estimated_drift,
                    residual: estimated_drift - true_drift,
                    translation: estimator.current_translation().unwrap_or((0.0, 0.0)),
                };
                log::debug!(
                    "Checkpoint {index}: true {:?}, estimated {:?}",
                    true_drift.as_tuple(),
                    estimated_drift.as_tuple()
                );
                results.checkpoints.push(checkpoint);
            }
            Err(e) => {
                log::warn!("Checkpoint {index} scan failed: {e}");
                results.errors.push(format!("Checkpoint {index}: {e}"));
            }
        }
        sem.advance(interval);
    }

    results.advisories = estimator.advisories().to_vec();
    results.elapsed = sem.time();
    Ok(results)
}
