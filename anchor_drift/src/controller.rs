//! Anchor scan controller
//!
//! Turns the current drift estimate into emitter settings for the next anchor
//! scan and writes them to the hardware.
//!
//! # Operation
//! 1. Build with `AnchorScanController::new()` from a [`ScanGeometry`]
//! 2. Call `target_translation()` to get the clamped, drift-corrected target
//! 3. Call `retarget()` to compute, apply and record it in one step

use std::time::Duration;

use crate::geometry::ScanGeometry;
use crate::hardware::{Emitter, ScannerResult};
use crate::registration::DriftVector;

/// Scale at which the anchor is scanned: one scan pixel per field pixel
pub const UNIT_SCALE: (f64, f64) = (1.0, 1.0);

/// Complete emitter configuration for one anchor scan
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareTarget {
    pub scale: (f64, f64),
    pub resolution: (usize, usize),
    pub translation: (f64, f64),
    pub dwell_time: Duration,
}

impl HardwareTarget {
    /// Write the target to the emitter.
    ///
    /// Settings are written scale, resolution, translation, dwell time, in
    /// that order: resolution is interpreted at the current scale and the
    /// allowed translation range depends on the resolution. Stops at the
    /// first write the hardware rejects.
    pub fn apply<E: Emitter + ?Sized>(&self, emitter: &mut E) -> ScannerResult<()> {
        emitter.set_scale(self.scale)?;
        emitter.set_resolution(self.resolution)?;
        emitter.set_translation(self.translation)?;
        emitter.set_dwell_time(self.dwell_time)?;
        Ok(())
    }
}

/// Outcome of re-targeting for a drift estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Retarget {
    /// `base_translation - drift` before clamping
    pub requested: (f64, f64),
    /// Translation after clamping into the safety bounds
    pub translation: (f64, f64),
    /// True if either axis was clamped
    pub clamped: bool,
    /// True if the requested translation exceeded the raw safety limit
    pub excessive_drift: bool,
}

/// Owns the anchor scan configuration and the live pointing target.
#[derive(Debug, Clone)]
pub struct AnchorScanController {
    geometry: ScanGeometry,
    dwell_time: Duration,
    current_translation: (f64, f64),
}

impl AnchorScanController {
    pub fn new(geometry: ScanGeometry, dwell_time: Duration) -> Self {
        let current_translation = geometry.clamp_translation(geometry.base_translation());
        Self {
            geometry,
            dwell_time,
            current_translation,
        }
    }

    pub fn geometry(&self) -> &ScanGeometry {
        &self.geometry
    }

    pub fn dwell_time(&self) -> Duration {
        self.dwell_time
    }

    /// Translation last applied (or the clamped base before any scan)
    pub fn current_translation(&self) -> (f64, f64) {
        self.current_translation
    }

    /// Drift-corrected translation for the next scan.
    ///
    /// Subtracting the drift keeps the physical scan point on the sample
    /// fixed while the apparent origin moves.
    pub fn target_translation(&self, current_drift: DriftVector) -> Retarget {
        let (bx, by) = self.geometry.base_translation();
        let requested = (bx - current_drift.x, by - current_drift.y);
        let translation = self.geometry.clamp_translation(requested);
        let clamped = translation != requested;
        let excessive_drift = self.geometry.exceeds_safety_limit(requested);

        if excessive_drift {
            log::warn!(
                "Anchor image may be incorrect due to excessive drift: requested translation \
                 ({:.2}, {:.2}) clamped to ({:.2}, {:.2})",
                requested.0,
                requested.1,
                translation.0,
                translation.1
            );
        } else if clamped {
            log::warn!(
                "Anchor translation ({:.2}, {:.2}) clamped to ({:.2}, {:.2})",
                requested.0,
                requested.1,
                translation.0,
                translation.1
            );
        }

        Retarget {
            requested,
            translation,
            clamped,
            excessive_drift,
        }
    }

    /// Emitter settings for scanning the anchor at `translation`
    pub fn hardware_target(&self, translation: (f64, f64)) -> HardwareTarget {
        HardwareTarget {
            scale: UNIT_SCALE,
            resolution: self.geometry.resolution(),
            translation,
            dwell_time: self.dwell_time,
        }
    }

    /// Compute the target for `current_drift`, apply it and record it as
    /// the current translation.
    pub fn retarget<E: Emitter + ?Sized>(
        &mut self,
        emitter: &mut E,
        current_drift: DriftVector,
    ) -> ScannerResult<Retarget> {
        let retarget = self.target_translation(current_drift);
        self.hardware_target(retarget.translation).apply(emitter)?;
        self.current_translation = retarget.translation;
        log::debug!("E-beam spot to anchor region: {:?}", emitter.translation());
        Ok(retarget)
    }
}
