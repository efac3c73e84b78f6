//! Drift harness for testing and simulation
//!
//! Provides a simulated drifting scanner and a closed-loop session runner
//! for exercising the anchor_drift estimator without hardware.

pub mod drift_profiles;
pub mod runner;
pub mod simulated_sem;

pub use drift_profiles::{profile_by_name, DriftProfile, LinearDrift, StaticDrift, StepDrift};
pub use runner::{run_session, run_session_on, CheckpointResult, SessionConfig, SessionResults};
pub use simulated_sem::SimulatedSem;
