use serde::{Deserialize, Serialize};

use crate::registration::{Degeneracy, DriftVector};

/// Anchored estimator states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstimatorState {
    /// No anchor region configured; scans are no-ops
    Idle,
    /// Valid anchor region, ready to scan
    Armed,
    /// One anchor acquisition in flight
    Scanning,
}

/// Non-fatal conditions raised while running the loop.
///
/// Each is logged as a warning when raised and kept in the estimator's
/// advisory list for the caller to inspect.
#[derive(Debug, Clone, PartialEq)]
pub enum Advisory {
    /// Drift-corrected translation went past the field safety limit and was
    /// clamped; the anchor image may no longer show the anchor
    ExcessiveDrift {
        /// Frame index the scan was for
        frame: usize,
        /// Translation before clamping
        requested: (f64, f64),
        /// Translation actually applied
        applied: (f64, f64),
    },
    /// Drift-corrected translation went past the clamp bounds but stayed
    /// inside the safety limit; the anchor is scanned at the bound
    TranslationClamped {
        frame: usize,
        requested: (f64, f64),
        applied: (f64, f64),
    },
    /// Cumulative drift and drift chained through the previous frame differ
    /// by more than the configured threshold
    UnstableEstimate {
        frame: usize,
        cumulative: DriftVector,
        chained: DriftVector,
    },
    /// Registration of two anchor frames found no usable correlation peak
    DegenerateCorrelation {
        /// Indices of the two frames registered
        frames: (usize, usize),
        reason: Degeneracy,
    },
}
