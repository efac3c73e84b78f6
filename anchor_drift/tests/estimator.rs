//! End-to-end behaviour of the anchored estimator against the mock scanner

mod common;

use anchor_drift::mock::{EmitterWrite, MockScanner};
use anchor_drift::{
    Advisory, AnchorConfig, AnchorRegion, AnchoredEstimator, DriftError, DriftVector,
    EstimatorState,
};
use approx::assert_relative_eq;
use common::{anchor_frame, init_logging, mock_estimator};
use std::time::{Duration, Instant};

#[test]
fn test_silent_detector_times_out() {
    init_logging();

    let scanner = MockScanner::new_silent((200, 200));
    let mut estimator = mock_estimator(&scanner, (0.4, 0.4, 0.6, 0.6));

    let started = Instant::now();
    let err = estimator.scan().unwrap_err();
    let elapsed = started.elapsed();

    // 40 x 40 px x 1 us x 4 + 1 s
    match err {
        DriftError::Timeout { waited } => {
            assert!(waited >= Duration::from_secs(1), "waited {waited:?}");
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(elapsed < Duration::from_secs(3), "elapsed {elapsed:?}");

    assert_eq!(scanner.subscribe_count(), 1);
    assert_eq!(scanner.subscriber_count(), 0);
    assert_eq!(estimator.frame_count(), 0);
    assert_eq!(estimator.state(), EstimatorState::Armed);
}

#[test]
fn test_timeout_follows_hardware_dwell() {
    init_logging();

    let scanner = MockScanner::new_silent((100, 100));
    let mut estimator = AnchoredEstimator::with_region(
        scanner.emitter(),
        scanner.detector(),
        (0.0, 0.0, 1.0, 1.0),
        Duration::from_micros(20),
    )
    .unwrap();

    // 100 x 100 px x 20 us x 4 + 1 s = 1.8 s
    let started = Instant::now();
    assert!(estimator.scan().unwrap_err().is_timeout());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1800), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "elapsed {elapsed:?}");
}

#[test]
fn test_undefined_region_never_touches_hardware() {
    init_logging();

    let scanner = MockScanner::new_repeating((200, 200), anchor_frame(40, 40, (0.0, 0.0)));
    let mut estimator = mock_estimator(&scanner, AnchorRegion::UNDEFINED);

    for _ in 0..3 {
        estimator.scan().unwrap();
        assert_eq!(estimator.estimate(), DriftVector::ZERO);
    }
    assert_eq!(estimator.state(), EstimatorState::Idle);
    assert!(estimator.current_translation().is_none());
    assert!(scanner.writes().is_empty());
    assert_eq!(scanner.subscribe_count(), 0);
}

#[test]
fn test_large_offset_region_constructs() {
    init_logging();

    let scanner = MockScanner::new_silent((1000, 1000));
    let estimator = mock_estimator(&scanner, (0.0, 0.0, 0.87, 0.95));
    let geometry = estimator.geometry().unwrap();

    assert_eq!(geometry.resolution(), (870, 950));
    let (min_x, min_y) = geometry.min_bound();
    let (max_x, max_y) = geometry.max_bound();
    assert!(min_x < max_x && min_y < max_y);
    assert_relative_eq!(max_x, -min_x);
    assert!(max_x < 500.0 && max_y < 500.0);
}

#[test]
fn test_small_regions_are_configuration_errors() {
    init_logging();

    let scanner = MockScanner::new_silent((100, 100));
    for region in [
        (0.5, 0.5, 0.5, 0.9),
        (0.1, 0.1, 0.9, 0.11),
        (0.2, 0.2, 0.214, 0.214),
    ] {
        let err = AnchoredEstimator::with_region(
            scanner.emitter(),
            scanner.detector(),
            region,
            Duration::from_micros(1),
        )
        .err()
        .unwrap();
        assert!(err.is_configuration_error(), "{region:?}: {err}");
    }

    let err = AnchoredEstimator::with_region(
        scanner.emitter(),
        scanner.detector(),
        (0.6, 0.1, 0.4, 0.9),
        Duration::from_micros(1),
    )
    .err()
    .unwrap();
    assert!(matches!(err, DriftError::InvalidRegion { .. }));
}

#[test]
fn test_invalid_tunables_rejected() {
    let scanner = MockScanner::new_silent((100, 100));
    let config = AnchorConfig::new(
        AnchorRegion::new(0.25, 0.25, 0.75, 0.75),
        Duration::from_micros(1),
    )
    .with_precision(0);
    let err = AnchoredEstimator::new(scanner.emitter(), scanner.detector(), config)
        .err()
        .unwrap();
    assert!(err.is_configuration_error());
}

#[test]
fn test_sentinel_and_duplicate_frames_ignored() {
    init_logging();

    let frames = vec![
        anchor_frame(40, 40, (0.0, 0.0)),
        anchor_frame(40, 40, (1.0, 1.0)),
    ];
    let scanner = MockScanner::new((200, 200), frames)
        .with_sentinel_frames(2)
        .with_duplicate_delivery();
    let mut estimator = mock_estimator(&scanner, (0.4, 0.4, 0.6, 0.6));

    estimator.scan().unwrap();
    estimator.scan().unwrap();

    assert_eq!(estimator.frame_count(), 2);
    for frame in estimator.frames() {
        assert_eq!(frame.data.dim(), (40, 40));
    }
    // Second scan kept its own frame, not a late duplicate of the first
    assert_ne!(estimator.frames()[0].data, estimator.frames()[1].data);
    assert_eq!(scanner.subscriber_count(), 0);
}

#[test]
fn test_estimate_is_idempotent() {
    init_logging();

    let frames = vec![
        anchor_frame(48, 48, (0.0, 0.0)),
        anchor_frame(48, 48, (-1.5, 2.5)),
    ];
    let scanner = MockScanner::new((240, 240), frames);
    let mut estimator = mock_estimator(&scanner, (0.4, 0.4, 0.6, 0.6));

    assert_eq!(estimator.estimate(), DriftVector::ZERO);
    estimator.scan().unwrap();
    assert_eq!(estimator.estimate(), DriftVector::ZERO);
    estimator.scan().unwrap();

    let first = estimator.estimate();
    let second = estimator.estimate();
    assert_eq!(first, second);
    assert_relative_eq!(first.x, -1.5, epsilon = 0.2);
    assert_relative_eq!(first.y, 2.5, epsilon = 0.2);
}

#[test]
fn test_drift_accumulates_through_pointing() {
    init_logging();

    // Content stays 3 px right of the first frame while pointing follows
    // the estimate, so the sample keeps moving 3 px per scan.
    let mut frames = vec![anchor_frame(50, 50, (0.0, 0.0))];
    frames.extend((0..3).map(|_| anchor_frame(50, 50, (3.0, 0.0))));
    let scanner = MockScanner::new((100, 100), frames);
    let mut estimator = mock_estimator(&scanner, (0.25, 0.25, 0.75, 0.75));

    let mut estimates = Vec::new();
    for _ in 0..4 {
        estimator.scan().unwrap();
        estimates.push(estimator.estimate());
    }

    for (n, expected) in [0.0, 3.0, 6.0, 9.0].into_iter().enumerate() {
        assert_relative_eq!(estimates[n].x, expected, epsilon = 0.3);
        assert_relative_eq!(estimates[n].y, 0.0, epsilon = 0.3);
    }
    assert!(estimator
        .advisories()
        .iter()
        .all(|a| !matches!(a, Advisory::UnstableEstimate { .. })));
}

#[test]
fn test_excessive_drift_pins_target_to_bound() {
    init_logging();

    // Field 100 x 100, anchor 50 x 50 centred: bounds +-24.5, safety 49.5.
    // Oversized frames let the registration see a 52 px shift.
    let frames = vec![
        anchor_frame(160, 64, (0.0, 0.0)),
        anchor_frame(160, 64, (52.0, 0.0)),
        anchor_frame(160, 64, (52.0, 0.0)),
    ];
    let scanner = MockScanner::new((100, 100), frames);
    let mut estimator = mock_estimator(&scanner, (0.25, 0.25, 0.75, 0.75));

    estimator.scan().unwrap();
    estimator.scan().unwrap();
    let drift = estimator.estimate();
    assert_relative_eq!(drift.x, 52.0, epsilon = 0.3);

    estimator.scan().unwrap();
    let (min_x, _) = estimator.geometry().unwrap().min_bound();
    let (tx, _) = estimator.current_translation().unwrap();
    assert_eq!(tx, min_x);
    assert_relative_eq!(min_x, -24.5, epsilon = 1e-9);
    assert_eq!(
        scanner.writes().last(),
        Some(&EmitterWrite::DwellTime(Duration::from_micros(1)))
    );

    match estimator.advisories() {
        [Advisory::ExcessiveDrift {
            frame,
            requested,
            applied,
        }] => {
            assert_eq!(*frame, 2);
            assert_relative_eq!(requested.0, -drift.x, epsilon = 1e-9);
            assert_eq!(applied.0, min_x);
        }
        other => panic!("unexpected advisories {other:?}"),
    }
}

#[test]
fn test_clamp_inside_safety_limit_is_recorded() {
    init_logging();

    // 30 px drift is past the +-24.5 bound but inside the 49.5 safety limit
    let frames = vec![
        anchor_frame(160, 64, (0.0, 0.0)),
        anchor_frame(160, 64, (30.0, 0.0)),
        anchor_frame(160, 64, (30.0, 0.0)),
    ];
    let scanner = MockScanner::new((100, 100), frames);
    let mut estimator = mock_estimator(&scanner, (0.25, 0.25, 0.75, 0.75));

    estimator.scan().unwrap();
    estimator.scan().unwrap();
    let drift = estimator.estimate();
    assert_relative_eq!(drift.x, 30.0, epsilon = 0.3);

    estimator.scan().unwrap();
    let (tx, _) = estimator.current_translation().unwrap();
    assert_relative_eq!(tx, -24.5, epsilon = 1e-9);

    match estimator.advisories() {
        [Advisory::TranslationClamped {
            frame,
            requested,
            applied,
        }] => {
            assert_eq!(*frame, 2);
            assert_relative_eq!(requested.0, -drift.x, epsilon = 1e-9);
            assert_relative_eq!(applied.0, -24.5, epsilon = 1e-9);
        }
        other => panic!("unexpected advisories {other:?}"),
    }
}
