//! Closed-loop drift correction against the simulated scanner

use anchor_drift::{Advisory, AnchorConfig, AnchorRegion, AnchoredEstimator, EstimatorState};
use approx::assert_relative_eq;
use drift_harness::{
    run_session, run_session_on, LinearDrift, SessionConfig, SimulatedSem, StepDrift,
};
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_linear_drift_is_tracked() {
    init_logging();

    let results = run_session(SessionConfig {
        profile: Box::new(LinearDrift::new((3.0, -2.0))),
        checkpoints: 8,
        ..Default::default()
    })
    .unwrap();

    assert_eq!(results.checkpoints.len(), 8);
    assert!(results.errors.is_empty(), "{:?}", results.errors);
    assert!(
        results.max_residual() < 0.3,
        "max residual {}",
        results.max_residual()
    );

    // About 3 px per interval accumulated over 7 intervals
    let last = results.checkpoints.last().unwrap();
    assert_relative_eq!(last.true_drift.x, 21.0, epsilon = 0.1);
    assert_relative_eq!(last.estimated_drift.x, 21.0, epsilon = 0.4);
    assert_relative_eq!(last.estimated_drift.y, -14.0, epsilon = 0.4);

    // The anchor is scanned where the sample went
    let (tx, ty) = last.translation;
    let previous = &results.checkpoints[6];
    assert_relative_eq!(tx, previous.estimated_drift.x, epsilon = 1e-9);
    assert_relative_eq!(ty, previous.estimated_drift.y, epsilon = 1e-9);

    assert!(!results
        .advisories
        .iter()
        .any(|a| matches!(a, Advisory::UnstableEstimate { .. })));
}

#[test]
fn test_noisy_linear_drift_is_tracked() {
    init_logging();

    let results = run_session(SessionConfig {
        profile: Box::new(LinearDrift::new((-1.5, 1.0))),
        checkpoints: 6,
        read_noise: 40.0,
        seed: 7,
        ..Default::default()
    })
    .unwrap();

    assert!(results.errors.is_empty());
    assert!(
        results.max_residual() < 0.5,
        "max residual {}",
        results.max_residual()
    );
}

#[test]
fn test_step_drift_recovered() {
    init_logging();

    let results = run_session(SessionConfig {
        profile: Box::new(StepDrift::new(Duration::from_millis(2500), (5.0, 4.0))),
        checkpoints: 6,
        ..Default::default()
    })
    .unwrap();

    for checkpoint in &results.checkpoints {
        assert!(
            checkpoint.residual.max_abs_diff(&anchor_drift::DriftVector::ZERO) < 0.3,
            "checkpoint {checkpoint:?}"
        );
    }
    let last = results.checkpoints.last().unwrap();
    assert_relative_eq!(last.estimated_drift.x, 5.0, epsilon = 0.3);
    assert_relative_eq!(last.estimated_drift.y, 4.0, epsilon = 0.3);
}

#[test]
fn test_sentinels_and_duplicates_do_not_disturb_loop() {
    init_logging();

    let sem = SimulatedSem::new((200, 200), 11)
        .with_drift(Box::new(LinearDrift::new((1.0, 1.0))))
        .with_sentinel_frames()
        .with_duplicate_frames();
    let anchor = AnchorConfig::new(
        AnchorRegion::new(0.4, 0.4, 0.6, 0.6),
        Duration::from_micros(1),
    );

    let results = run_session_on(&sem, anchor, 5, Duration::from_secs(1)).unwrap();
    assert_eq!(results.checkpoints.len(), 5);
    assert_eq!(sem.frames_rendered(), 5);
    assert!(results.max_residual() < 0.3);
    assert_eq!(sem.subscriber_count(), 0);
}

#[test]
fn test_silent_instrument_times_out() {
    init_logging();

    let sem = SimulatedSem::new((200, 200), 1).silent();
    let mut estimator = AnchoredEstimator::with_region(
        sem.clone(),
        sem.clone(),
        (0.4, 0.4, 0.6, 0.6),
        Duration::from_micros(1),
    )
    .unwrap();

    let err = estimator.scan().unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(estimator.state(), EstimatorState::Armed);
    assert_eq!(sem.subscriber_count(), 0);
}
