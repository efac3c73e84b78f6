use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{DriftError, DriftResult};

/// Anchor region of interest as fractions of the full scan field.
///
/// `(x0, y0)` is the top-left corner and `(x1, y1)` the bottom-right corner,
/// all in [0, 1]. The all-zero region is reserved to mean "no anchor".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorRegion {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl AnchorRegion {
    /// Sentinel for a region the user has not defined yet
    pub const UNDEFINED: AnchorRegion = AnchorRegion {
        x0: 0.0,
        y0: 0.0,
        x1: 0.0,
        y1: 0.0,
    };

    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn is_undefined(&self) -> bool {
        *self == Self::UNDEFINED
    }

    /// Center of the region in field fractions
    pub fn center(&self) -> (f64, f64) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    /// Extent of the region in field fractions
    pub fn size(&self) -> (f64, f64) {
        (self.x1 - self.x0, self.y1 - self.y0)
    }

    /// Check coordinates are finite, inside [0, 1] and not inverted.
    pub fn validate(&self) -> DriftResult<()> {
        let coords = [self.x0, self.y0, self.x1, self.y1];
        let in_unit = coords
            .iter()
            .all(|c| c.is_finite() && (0.0..=1.0).contains(c));
        if !in_unit || self.x1 < self.x0 || self.y1 < self.y0 {
            return Err(DriftError::InvalidRegion {
                x0: self.x0,
                y0: self.y0,
                x1: self.x1,
                y1: self.y1,
            });
        }
        Ok(())
    }
}

impl From<(f64, f64, f64, f64)> for AnchorRegion {
    fn from((x0, y0, x1, y1): (f64, f64, f64, f64)) -> Self {
        Self::new(x0, y0, x1, y1)
    }
}

/// Configuration for the anchored drift estimator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    /// Anchor region in field fractions
    pub region: AnchorRegion,
    /// Per-pixel dwell time for anchor scans in seconds
    pub dwell_time_s: f64,
    /// Sub-pixel refinement factor for registration (10 = 1/10 px)
    pub precision: u32,
    /// Max allowed difference between cumulative and chained drift (px)
    pub disagreement_threshold_px: f64,
    /// Multiplier applied to the expected frame duration when waiting
    pub timeout_factor: f64,
    /// Fixed margin added to the frame wait in seconds
    pub timeout_margin_s: f64,
    /// Fixed per-scan overhead used for time budgeting, in seconds
    pub scan_overhead_s: f64,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            region: AnchorRegion::UNDEFINED,
            dwell_time_s: 1e-6,
            precision: 10,
            disagreement_threshold_px: 5.0,
            timeout_factor: 4.0,
            timeout_margin_s: 1.0,
            scan_overhead_s: 0.01,
        }
    }
}

impl AnchorConfig {
    /// Config for a region and dwell time, other settings at their defaults
    pub fn new(region: AnchorRegion, dwell_time: Duration) -> Self {
        Self {
            region,
            dwell_time_s: dwell_time.as_secs_f64(),
            ..Default::default()
        }
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_disagreement_threshold(mut self, threshold_px: f64) -> Self {
        self.disagreement_threshold_px = threshold_px;
        self
    }

    pub fn dwell_time(&self) -> Duration {
        Duration::from_secs_f64(self.dwell_time_s)
    }

    /// Check all values are usable. The region itself is checked separately
    /// since the undefined sentinel is legal.
    pub fn validate(&self) -> DriftResult<()> {
        if !self.dwell_time_s.is_finite() || self.dwell_time_s <= 0.0 {
            return Err(DriftError::InvalidConfig(format!(
                "dwell time must be positive, got {} s",
                self.dwell_time_s
            )));
        }
        if self.precision == 0 {
            return Err(DriftError::InvalidConfig(
                "precision must be at least 1".to_string(),
            ));
        }
        if !self.disagreement_threshold_px.is_finite() || self.disagreement_threshold_px < 0.0 {
            return Err(DriftError::InvalidConfig(format!(
                "disagreement threshold must be non-negative, got {}",
                self.disagreement_threshold_px
            )));
        }
        if !self.timeout_factor.is_finite() || self.timeout_factor < 1.0 {
            return Err(DriftError::InvalidConfig(format!(
                "timeout factor must be >= 1, got {}",
                self.timeout_factor
            )));
        }
        for (name, value) in [
            ("timeout margin", self.timeout_margin_s),
            ("scan overhead", self.scan_overhead_s),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(DriftError::InvalidConfig(format!(
                    "{name} must be non-negative, got {value} s"
                )));
            }
        }
        Ok(())
    }

    /// Wait budget for one frame of `pixels` pixels at `dwell_time`
    pub fn frame_timeout(&self, pixels: usize, dwell_time: Duration) -> Duration {
        let expected = dwell_time.as_secs_f64() * pixels as f64;
        Duration::from_secs_f64(expected * self.timeout_factor + self.timeout_margin_s)
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> DriftResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON file. Missing fields take their default values.
    pub fn load_from_file(path: &Path) -> DriftResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_undefined_region() {
        assert!(AnchorRegion::UNDEFINED.is_undefined());
        assert!(AnchorRegion::from((0.0, 0.0, 0.0, 0.0)).is_undefined());
        assert!(!AnchorRegion::new(0.1, 0.1, 0.2, 0.2).is_undefined());
        assert!(AnchorRegion::UNDEFINED.validate().is_ok());
    }

    #[test]
    fn test_region_center_and_size() {
        let region = AnchorRegion::new(0.2, 0.4, 0.6, 0.5);
        let (cx, cy) = region.center();
        let (w, h) = region.size();
        assert_relative_eq!(cx, 0.4, epsilon = 1e-12);
        assert_relative_eq!(cy, 0.45, epsilon = 1e-12);
        assert_relative_eq!(w, 0.4, epsilon = 1e-12);
        assert_relative_eq!(h, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_region_validation() {
        assert!(AnchorRegion::new(0.0, 0.0, 1.0, 1.0).validate().is_ok());
        assert!(AnchorRegion::new(-0.1, 0.0, 0.5, 0.5).validate().is_err());
        assert!(AnchorRegion::new(0.0, 0.0, 1.2, 0.5).validate().is_err());
        assert!(AnchorRegion::new(0.6, 0.0, 0.5, 0.5).validate().is_err());
        assert!(AnchorRegion::new(0.0, f64::NAN, 0.5, 0.5).validate().is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(AnchorConfig::default().validate().is_ok());

        let mut config = AnchorConfig::default();
        config.dwell_time_s = 0.0;
        assert!(config.validate().unwrap_err().is_configuration_error());

        let config = AnchorConfig::default().with_precision(0);
        assert!(config.validate().is_err());

        let mut config = AnchorConfig::default();
        config.timeout_factor = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_frame_timeout() {
        let config = AnchorConfig::default();
        let timeout = config.frame_timeout(10_000, Duration::from_micros(10));
        // 10000 px * 10 us * 4 + 1 s
        assert_relative_eq!(timeout.as_secs_f64(), 1.4, epsilon = 1e-9);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("anchor.json");

        let config = AnchorConfig::new(
            AnchorRegion::new(0.1, 0.2, 0.3, 0.4),
            Duration::from_micros(5),
        )
        .with_precision(20);
        config.save_to_file(&path).unwrap();

        let loaded = AnchorConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.region, config.region);
        assert_eq!(loaded.precision, 20);
        assert_relative_eq!(loaded.dwell_time_s, 5e-6, epsilon = 1e-15);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "region": { "x0": 0.1, "y0": 0.1, "x1": 0.2, "y1": 0.2 } }"#;
        let config: AnchorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.precision, 10);
        assert_relative_eq!(config.timeout_factor, 4.0);
    }
}
