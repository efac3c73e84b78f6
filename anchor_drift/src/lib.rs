//! ANCHOR_DRIFT - anchor-referenced drift estimation for scanning instruments
//!
//! Periodically re-scans a small fiducial region (the anchor) of a long
//! acquisition, registers it against the first anchor scan and feeds the
//! measured drift back into the scan pointing.
//! States: Idle (no anchor) | Armed -> Scanning -> Armed
//!
//! The caller owns the acquisition loop and decides when to call
//! [`AnchoredEstimator::scan`] and [`AnchoredEstimator::estimate`]. The
//! returned drift `D` is in field pixels; pointing at `base - D` keeps a
//! drifting sample point fixed in the scan.

use crossbeam_channel::RecvTimeoutError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod config;
pub mod controller;
pub mod error;
pub mod geometry;
pub mod hardware;
pub mod mock;
pub mod registration;
pub mod state;
pub mod test_patterns;

use crate::controller::AnchorScanController;
use crate::hardware::{pixel_count, FrameCallback, ScannerError};

// Re-export commonly used types for external use
pub use crate::config::{AnchorConfig, AnchorRegion};
pub use crate::error::{DriftError, DriftResult};
pub use crate::geometry::ScanGeometry;
pub use crate::hardware::{Detector, Emitter, Frame};
pub use crate::registration::{compute_drift, register, DriftVector, Registration};
pub use crate::state::{Advisory, EstimatorState};

/// One captured anchor scan
#[derive(Debug, Clone)]
pub struct AnchorFrame {
    /// Detector image, rows = y
    pub data: Frame,
    /// Emitter translation the frame was acquired at
    pub translation: (f64, f64),
}

/// Anchor-based drift estimator driving an emitter/detector pair.
///
/// # Operation
/// 1. Construct with a region; an undefined region leaves it Idle
/// 2. Call `scan()` to acquire one anchor frame at the drift-corrected target
/// 3. Call `estimate()` to update the cumulative drift from the frame history
pub struct AnchoredEstimator<E: Emitter, D: Detector> {
    emitter: E,
    detector: D,
    config: AnchorConfig,
    /// None while Idle
    controller: Option<AnchorScanController>,
    state: EstimatorState,
    frames: Vec<AnchorFrame>,
    drift: DriftVector,
    /// Cumulative drift per frame, None until that frame is estimated
    cumulative: Vec<Option<DriftVector>>,
    advisories: Vec<Advisory>,
}

impl<E: Emitter, D: Detector> AnchoredEstimator<E, D> {
    /// Create an estimator for `config`.
    ///
    /// Reads the field shape from the emitter once. An undefined region
    /// gives an Idle estimator; an invalid or too small one is an error.
    pub fn new(emitter: E, detector: D, config: AnchorConfig) -> DriftResult<Self> {
        config.validate()?;

        let (controller, state) = if config.region.is_undefined() {
            log::info!("Anchor region undefined, drift correction disabled");
            (None, EstimatorState::Idle)
        } else {
            let geometry = ScanGeometry::new(&config.region, emitter.shape())?;
            log::info!(
                "Anchor region {:?} px at base translation {:?}, bounds {:?}..{:?}",
                geometry.resolution(),
                geometry.base_translation(),
                geometry.min_bound(),
                geometry.max_bound()
            );
            let controller = AnchorScanController::new(geometry, config.dwell_time());
            (Some(controller), EstimatorState::Armed)
        };

        Ok(Self {
            emitter,
            detector,
            config,
            controller,
            state,
            frames: Vec::new(),
            drift: DriftVector::ZERO,
            cumulative: Vec::new(),
            advisories: Vec::new(),
        })
    }

    /// Create an estimator with default tunables
    pub fn with_region(
        emitter: E,
        detector: D,
        region: impl Into<AnchorRegion>,
        dwell_time: Duration,
    ) -> DriftResult<Self> {
        Self::new(emitter, detector, AnchorConfig::new(region.into(), dwell_time))
    }

    /// Acquire one anchor frame at the drift-corrected target.
    ///
    /// No-op while Idle. Blocks until the detector delivers a frame or the
    /// timeout elapses; the frame subscription never outlives the call.
    pub fn scan(&mut self) -> DriftResult<()> {
        let Some(controller) = self.controller.as_mut() else {
            return Ok(());
        };

        let retarget = controller.retarget(&mut self.emitter, self.drift)?;
        if retarget.excessive_drift {
            self.advise(Advisory::ExcessiveDrift {
                frame: self.frames.len(),
                requested: retarget.requested,
                applied: retarget.translation,
            });
        } else if retarget.clamped {
            self.advise(Advisory::TranslationClamped {
                frame: self.frames.len(),
                requested: retarget.requested,
                applied: retarget.translation,
            });
        }

        let resolution = self.emitter.resolution();
        let dwell_time = self.emitter.dwell_time();
        let timeout = self
            .config
            .frame_timeout(pixel_count(resolution), dwell_time);
        log::debug!(
            "Scanning anchor region with resolution {:?}, scale {:?}, dwell time {:?}, timeout {:?}",
            resolution,
            self.emitter.scale(),
            dwell_time,
            timeout
        );

        self.state = EstimatorState::Scanning;
        let result = self.acquire_frame(timeout);
        self.state = EstimatorState::Armed;

        let data = result?;
        self.frames.push(AnchorFrame {
            data,
            translation: retarget.translation,
        });
        self.cumulative.push(None);
        Ok(())
    }

    fn acquire_frame(&self, timeout: Duration) -> DriftResult<Frame> {
        let (tx, rx) = crossbeam_channel::bounded::<Frame>(1);
        let delivered = Arc::new(AtomicBool::new(false));

        let callback: FrameCallback = {
            let delivered = delivered.clone();
            Arc::new(move |frame: Frame| {
                // 1x1 frames are scan-start markers, not data
                if frame.dim() == (1, 1) {
                    log::trace!("Ignoring 1x1 frame");
                    return;
                }
                if delivered
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    log::debug!("Anchor region data received");
                    let _ = tx.try_send(frame);
                }
            })
        };

        let id = self.detector.subscribe(callback)?;
        let started = Instant::now();
        let received = rx.recv_timeout(timeout);
        if !self.detector.unsubscribe(id) {
            log::warn!("Detector did not recognise subscription {id} on release");
        }

        match received {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => {
                let waited = started.elapsed();
                log::warn!("Acquisition of anchor region frame timed out after {waited:?}");
                Err(DriftError::Timeout { waited })
            }
            Err(RecvTimeoutError::Disconnected) => Err(ScannerError::Subscription(
                "detector dropped the frame callback without delivering".to_string(),
            )
            .into()),
        }
    }

    /// Update and return the cumulative drift since the first frame.
    ///
    /// Returns the last known value without any registration when fewer
    /// than two frames exist or no frame arrived since the last call.
    ///
    /// From the third frame on, the newest frame is also registered against
    /// its predecessor and the cumulative drift is checked against the one
    /// chained through the predecessor's cumulative drift. The check does
    /// not depend on whether `estimate()` ran after every scan.
    pub fn estimate(&mut self) -> DriftVector {
        let count = self.frames.len();
        if count < 2 {
            return self.drift;
        }
        let newest = count - 1;
        if self.cumulative[newest].is_some() {
            return self.drift;
        }

        let orig_drift = self.cumulative_drift(newest);
        let previous = newest - 1;
        if previous > 0 {
            let prev_drift = self.frame_drift(previous, newest);
            log::debug!(
                "Current drift {:?} px, frame to frame {:?} px",
                orig_drift.as_tuple(),
                prev_drift.as_tuple()
            );

            let chained = self.cumulative_drift(previous) + prev_drift;
            if orig_drift.max_abs_diff(&chained) > self.config.disagreement_threshold_px {
                self.advise(Advisory::UnstableEstimate {
                    frame: newest,
                    cumulative: orig_drift,
                    chained,
                });
            }
        } else {
            log::debug!("Current drift {:?} px", orig_drift.as_tuple());
        }

        self.drift = orig_drift;
        orig_drift
    }

    /// Drift of frame `index` against the first frame, registered on demand
    /// and cached.
    fn cumulative_drift(&mut self, index: usize) -> DriftVector {
        if index == 0 {
            return DriftVector::ZERO;
        }
        if let Some(drift) = self.cumulative[index] {
            return drift;
        }
        let drift = self.frame_drift(0, index);
        self.cumulative[index] = Some(drift);
        drift
    }

    /// Sample drift between frames `from` and `to`, compensated for the
    /// pointing change between them.
    fn frame_drift(&mut self, from: usize, to: usize) -> DriftVector {
        let (a, b) = (&self.frames[from], &self.frames[to]);
        let registration = registration::register(
            &a.data.view(),
            &b.data.view(),
            self.config.precision,
        );
        let pointing = DriftVector::new(
            b.translation.0 - a.translation.0,
            b.translation.1 - a.translation.1,
        );
        if let Some(reason) = registration.degeneracy {
            self.advise(Advisory::DegenerateCorrelation {
                frames: (from, to),
                reason,
            });
        }
        registration.shift - pointing
    }

    fn advise(&mut self, advisory: Advisory) {
        match &advisory {
            // Logged by the controller when the target is computed
            Advisory::ExcessiveDrift { .. } | Advisory::TranslationClamped { .. } => {}
            Advisory::UnstableEstimate {
                cumulative,
                chained,
                ..
            } => log::warn!(
                "Drift cannot be measured precisely, hesitating between {:?} and {:?} px",
                cumulative.as_tuple(),
                chained.as_tuple()
            ),
            Advisory::DegenerateCorrelation { frames, reason } => log::warn!(
                "Anchor frames {} and {} have no usable correlation ({reason:?})",
                frames.0,
                frames.1
            ),
        }
        self.advisories.push(advisory);
    }

    /// Expected duration of one `scan()`: pixels x configured dwell time
    /// plus a fixed overhead. Zero while Idle.
    pub fn estimate_acquisition_time(&self) -> Duration {
        match &self.controller {
            Some(controller) => {
                let pixels = controller.geometry().pixel_count() as f64;
                Duration::from_secs_f64(
                    pixels * self.config.dwell_time_s + self.config.scan_overhead_s,
                )
            }
            None => Duration::ZERO,
        }
    }

    /// Cumulative drift from the last `estimate()`
    pub fn drift(&self) -> DriftVector {
        self.drift
    }

    pub fn state(&self) -> EstimatorState {
        self.state
    }

    pub fn frames(&self) -> &[AnchorFrame] {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Translation of the last anchor scan, None while Idle
    pub fn current_translation(&self) -> Option<(f64, f64)> {
        self.controller.as_ref().map(|c| c.current_translation())
    }

    pub fn geometry(&self) -> Option<&ScanGeometry> {
        self.controller.as_ref().map(|c| c.geometry())
    }

    pub fn config(&self) -> &AnchorConfig {
        &self.config
    }

    /// Advisories raised so far, oldest first
    pub fn advisories(&self) -> &[Advisory] {
        &self.advisories
    }

    pub fn emitter(&self) -> &E {
        &self.emitter
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Release the hardware handles
    pub fn into_parts(self) -> (E, D) {
        (self.emitter, self.detector)
    }
}
