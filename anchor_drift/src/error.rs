use std::time::Duration;
use thiserror::Error;

use crate::hardware::ScannerError;

/// Errors produced by the anchored drift estimator.
#[derive(Error, Debug)]
pub enum DriftError {
    /// Anchor region resolves to fewer than 2 pixels on an axis.
    #[error("anchor region too small for drift detection: {width}x{height} px (need at least 2x2)")]
    AnchorTooSmall {
        /// Derived anchor width in pixels.
        width: usize,
        /// Derived anchor height in pixels.
        height: usize,
    },

    /// Anchor region coordinates are outside [0, 1] or inverted.
    #[error("invalid anchor region ({x0}, {y0}, {x1}, {y1})")]
    InvalidRegion { x0: f64, y0: f64, x1: f64, y1: f64 },

    /// Configuration validation failure.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No anchor frame arrived within the budgeted wait.
    #[error("acquisition of anchor region frame timed out after {waited:?}")]
    Timeout {
        /// How long the scan waited before giving up.
        waited: Duration,
    },

    /// The scanning hardware rejected a command.
    #[error("scanner error: {0}")]
    Scanner(#[from] ScannerError),

    /// Reading or writing a configuration file failed.
    #[error("config file error: {0}")]
    ConfigFile(#[from] std::io::Error),

    /// A configuration file could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl DriftError {
    /// True for errors raised while constructing the estimator.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            DriftError::AnchorTooSmall { .. }
                | DriftError::InvalidRegion { .. }
                | DriftError::InvalidConfig(_)
        )
    }

    /// True if the scan gave up waiting for a frame.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DriftError::Timeout { .. })
    }
}

/// Result type for drift estimator operations
pub type DriftResult<T> = Result<T, DriftError>;
