//! Common utilities for anchor_drift tests

#![allow(dead_code)]

use anchor_drift::mock::{MockDetector, MockEmitter, MockScanner};
use anchor_drift::test_patterns::{textured_pattern, to_counts};
use anchor_drift::{AnchorRegion, AnchoredEstimator};
use ndarray::Array2;
use std::time::Duration;

/// Seed shared by all anchor textures in these tests
pub const TEXTURE_SEED: u64 = 42;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Anchor frame in detector counts sampled at `offset`
pub fn anchor_frame(width: usize, height: usize, offset: (f64, f64)) -> Array2<u16> {
    to_counts(&textured_pattern(width, height, offset, TEXTURE_SEED), 2000.0)
}

pub type MockEstimator = AnchoredEstimator<MockEmitter, MockDetector>;

/// Estimator over `scanner` with a 1 us dwell time
pub fn mock_estimator(scanner: &MockScanner, region: impl Into<AnchorRegion>) -> MockEstimator {
    AnchoredEstimator::with_region(
        scanner.emitter(),
        scanner.detector(),
        region,
        Duration::from_micros(1),
    )
    .expect("valid anchor region")
}
