//! Anchor scan geometry
//!
//! Converts a fractional anchor region into emitter units: the translation of
//! the anchor center from the field center, the scan resolution, and the
//! clamp bounds that keep the anchor frame inside the usable field.

use crate::config::AnchorRegion;
use crate::error::{DriftError, DriftResult};

/// Fraction of the field half-extent the beam may be pointed at
pub const SAFETY_FACTOR: f64 = 0.99;

/// Minimum anchor resolution on each axis for registration to work
pub const MIN_ANCHOR_RESOLUTION: usize = 2;

/// Closed interval on one axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisBounds {
    pub min: f64,
    pub max: f64,
}

impl AxisBounds {
    /// Interval symmetric around zero
    pub fn symmetric(half_width: f64) -> Self {
        Self {
            min: -half_width,
            max: half_width,
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn is_degenerate(&self) -> bool {
        self.min == self.max
    }
}

/// Scan resolution for a region over a field: `max(1, round(field * size))`
/// per axis, with ties rounded to even.
pub fn anchor_resolution(region: &AnchorRegion, field_shape: (usize, usize)) -> (usize, usize) {
    let (w, h) = region.size();
    let pixels = |field: usize, frac: f64| -> usize {
        let n = (field as f64 * frac).round_ties_even();
        if n < 1.0 {
            1
        } else {
            n as usize
        }
    };
    (pixels(field_shape.0, w), pixels(field_shape.1, h))
}

/// Emitter geometry for scanning the anchor region, computed once.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanGeometry {
    field_shape: (usize, usize),
    base_translation: (f64, f64),
    resolution: (usize, usize),
    safety_limit: (f64, f64),
    bounds: (AxisBounds, AxisBounds),
}

impl ScanGeometry {
    /// Derive the anchor geometry.
    ///
    /// # Errors
    /// * `InvalidRegion` if the region is undefined or malformed
    /// * `AnchorTooSmall` if the region covers fewer than 2 pixels on an axis
    pub fn new(region: &AnchorRegion, field_shape: (usize, usize)) -> DriftResult<Self> {
        region.validate()?;
        if region.is_undefined() {
            return Err(DriftError::InvalidRegion {
                x0: region.x0,
                y0: region.y0,
                x1: region.x1,
                y1: region.y1,
            });
        }

        let resolution = anchor_resolution(region, field_shape);
        if resolution.0 < MIN_ANCHOR_RESOLUTION || resolution.1 < MIN_ANCHOR_RESOLUTION {
            return Err(DriftError::AnchorTooSmall {
                width: resolution.0,
                height: resolution.1,
            });
        }

        let (cx, cy) = region.center();
        let (fw, fh) = (field_shape.0 as f64, field_shape.1 as f64);
        // Translation is measured from the field center at (0.5, 0.5)
        let base_translation = (fw * (cx - 0.5), fh * (cy - 0.5));

        let safety_limit = (SAFETY_FACTOR * fw / 2.0, SAFETY_FACTOR * fh / 2.0);
        let half_anchor = resolution.0.max(resolution.1) as f64 / 2.0;
        let axis_bounds = |limit: f64, axis: &str| -> AxisBounds {
            let half_width = limit - half_anchor;
            if half_width < 0.0 {
                log::warn!(
                    "Anchor region {:?} too wide for {axis} axis clamping, pinning to field center",
                    region
                );
                AxisBounds::symmetric(0.0)
            } else {
                AxisBounds::symmetric(half_width)
            }
        };
        let bounds = (
            axis_bounds(safety_limit.0, "x"),
            axis_bounds(safety_limit.1, "y"),
        );

        log::debug!(
            "Anchor geometry: translation {:?}, resolution {:?}, bounds x [{:.2}, {:.2}] y [{:.2}, {:.2}]",
            base_translation,
            resolution,
            bounds.0.min,
            bounds.0.max,
            bounds.1.min,
            bounds.1.max
        );

        Ok(Self {
            field_shape,
            base_translation,
            resolution,
            safety_limit,
            bounds,
        })
    }

    /// Full-field shape `(width, height)` the geometry was derived for
    pub fn field_shape(&self) -> (usize, usize) {
        self.field_shape
    }

    /// Translation of the anchor center from the field center
    pub fn base_translation(&self) -> (f64, f64) {
        self.base_translation
    }

    /// Anchor scan resolution `(width, height)`
    pub fn resolution(&self) -> (usize, usize) {
        self.resolution
    }

    pub fn pixel_count(&self) -> usize {
        self.resolution.0 * self.resolution.1
    }

    /// Raw safety limit per axis: 99% of the field half-extent
    pub fn safety_limit(&self) -> (f64, f64) {
        self.safety_limit
    }

    /// Clamp interval for the translation on X and Y
    pub fn bounds(&self) -> (AxisBounds, AxisBounds) {
        self.bounds
    }

    /// Lower clamp bound per axis
    pub fn min_bound(&self) -> (f64, f64) {
        (self.bounds.0.min, self.bounds.1.min)
    }

    /// Upper clamp bound per axis
    pub fn max_bound(&self) -> (f64, f64) {
        (self.bounds.0.max, self.bounds.1.max)
    }

    /// Clamp a translation into the bounds
    pub fn clamp_translation(&self, translation: (f64, f64)) -> (f64, f64) {
        (
            self.bounds.0.clamp(translation.0),
            self.bounds.1.clamp(translation.1),
        )
    }

    /// True if the translation exceeds the raw safety limit on either axis
    pub fn exceeds_safety_limit(&self, translation: (f64, f64)) -> bool {
        translation.0.abs() > self.safety_limit.0 || translation.1.abs() > self.safety_limit.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_large_region_over_square_field() {
        let region = AnchorRegion::new(0.0, 0.0, 0.87, 0.95);
        let geometry = ScanGeometry::new(&region, (1000, 1000)).unwrap();

        assert_eq!(geometry.resolution(), (870, 950));
        let (tx, ty) = geometry.base_translation();
        assert_relative_eq!(tx, -65.0, epsilon = 1e-9);
        assert_relative_eq!(ty, -25.0, epsilon = 1e-9);

        // 0.99 * 500 - 950 / 2
        let (bx, by) = geometry.bounds();
        assert_relative_eq!(bx.max, 20.0, epsilon = 1e-9);
        assert_relative_eq!(by.max, 20.0, epsilon = 1e-9);
        assert!(bx.min < bx.max);
        assert!(by.min < by.max);
    }

    #[test]
    fn test_bounds_symmetric_and_tighter_than_field() {
        let regions = [
            AnchorRegion::new(0.1, 0.1, 0.2, 0.2),
            AnchorRegion::new(0.45, 0.3, 0.55, 0.32),
            AnchorRegion::new(0.0, 0.0, 0.5, 0.01),
        ];
        for region in regions {
            for shape in [(512, 512), (1024, 768), (300, 2000)] {
                let geometry = ScanGeometry::new(&region, shape).unwrap();
                let (bx, by) = geometry.bounds();
                assert_relative_eq!(bx.min, -bx.max);
                assert_relative_eq!(by.min, -by.max);
                assert!(bx.max < shape.0 as f64 / 2.0);
                assert!(by.max < shape.1 as f64 / 2.0);
                assert!(bx.max < geometry.safety_limit().0);
                assert!(by.max < geometry.safety_limit().1);
            }
        }
    }

    #[test]
    fn test_too_small_region_rejected() {
        // 0.001 * 1000 = 1 px wide
        let region = AnchorRegion::new(0.5, 0.5, 0.501, 0.6);
        let err = ScanGeometry::new(&region, (1000, 1000)).unwrap_err();
        assert!(matches!(err, DriftError::AnchorTooSmall { width: 1, .. }));
        assert!(err.is_configuration_error());

        // Zero-width region rounds up to a single pixel
        let region = AnchorRegion::new(0.5, 0.5, 0.5, 0.6);
        let err = ScanGeometry::new(&region, (1000, 1000)).unwrap_err();
        assert!(matches!(err, DriftError::AnchorTooSmall { width: 1, .. }));
    }

    #[test]
    fn test_undefined_region_rejected() {
        let err = ScanGeometry::new(&AnchorRegion::UNDEFINED, (1000, 1000)).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_full_field_anchor_pins_to_center() {
        let region = AnchorRegion::new(0.0, 0.0, 1.0, 1.0);
        let geometry = ScanGeometry::new(&region, (100, 100)).unwrap();
        let (bx, by) = geometry.bounds();
        assert!(bx.is_degenerate());
        assert!(by.is_degenerate());
        assert_eq!(geometry.clamp_translation((10.0, -10.0)), (0.0, 0.0));
    }

    #[test]
    fn test_resolution_rounds_ties_to_even() {
        // 8 * 0.3125 = 2.5 -> 2, 8 * 0.4375 = 3.5 -> 4
        let region = AnchorRegion::new(0.0, 0.0, 0.3125, 0.4375);
        let res = anchor_resolution(&region, (8, 8));
        assert_eq!(res.0, 2);
        assert_eq!(res.1, 4);
    }

    #[test]
    fn test_clamp_and_safety_limit() {
        let region = AnchorRegion::new(0.45, 0.45, 0.55, 0.55);
        let geometry = ScanGeometry::new(&region, (1000, 1000)).unwrap();
        // 495 - 50
        assert_eq!(geometry.clamp_translation((600.0, -600.0)), (445.0, -445.0));
        assert_eq!(geometry.clamp_translation((12.5, -3.0)), (12.5, -3.0));
        assert!(geometry.exceeds_safety_limit((500.0, 0.0)));
        assert!(!geometry.exceeds_safety_limit((450.0, 0.0)));
    }
}
