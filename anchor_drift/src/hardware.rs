//! Scanning hardware capability interface
//!
//! The drift corrector only needs a narrow slice of the instrument: an
//! emitter whose scan area can be re-targeted, and a detector that delivers
//! frames to subscribers. Real drivers, the mock in [`crate::mock`] and the
//! harness simulator all implement these traits.

use ndarray::Array2;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error type for scanner/detector operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScannerError {
    /// Hardware communication error
    #[error("hardware error: {0}")]
    Hardware(String),
    /// Requested value is outside what the hardware accepts
    #[error("value out of range for {setting}: {message}")]
    OutOfRange {
        setting: &'static str,
        message: String,
    },
    /// Subscribing to the detector stream failed
    #[error("subscription error: {0}")]
    Subscription(String),
}

/// Result type for scanner operations
pub type ScannerResult<T> = Result<T, ScannerError>;

/// A detector frame: 2-D intensities, rows are Y and columns are X.
pub type Frame = Arc<Array2<u16>>;

/// Subscription handle returned by [`Detector::subscribe`]
pub type SubscriptionId = u64;

/// Frame callback. Invoked from the detector's producer thread.
pub type FrameCallback = Arc<dyn Fn(Frame) + Send + Sync>;

/// Scanning source (e.g. an e-beam scanner).
///
/// Pairs are `(x, y)`. Translation is the offset of the scan area center from
/// the field center, in field pixels at unit scale.
pub trait Emitter: Send {
    /// Full-field shape in pixels `(width, height)`
    fn shape(&self) -> (usize, usize);

    /// Current scale
    fn scale(&self) -> (f64, f64);

    /// Set scale (field pixels per scan pixel)
    fn set_scale(&mut self, scale: (f64, f64)) -> ScannerResult<()>;

    /// Current scan resolution `(width, height)`
    fn resolution(&self) -> (usize, usize);

    /// Set scan resolution. Interpreted at the current scale.
    fn set_resolution(&mut self, resolution: (usize, usize)) -> ScannerResult<()>;

    /// Current translation
    fn translation(&self) -> (f64, f64);

    /// Set translation
    fn set_translation(&mut self, translation: (f64, f64)) -> ScannerResult<()>;

    /// Current per-pixel dwell time
    fn dwell_time(&self) -> Duration;

    /// Set per-pixel dwell time. Hardware may round to a supported value.
    fn set_dwell_time(&mut self, dwell_time: Duration) -> ScannerResult<()>;
}

/// Frame-producing detector with a subscribe/unsubscribe data stream.
pub trait Detector: Send + Sync {
    /// Start delivering frames to `callback`.
    fn subscribe(&self, callback: FrameCallback) -> ScannerResult<SubscriptionId>;

    /// Stop delivering frames to the given subscription.
    ///
    /// Returns false if the subscription was unknown.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

impl<T: Emitter + ?Sized> Emitter for &mut T {
    fn shape(&self) -> (usize, usize) {
        (**self).shape()
    }

    fn scale(&self) -> (f64, f64) {
        (**self).scale()
    }

    fn set_scale(&mut self, scale: (f64, f64)) -> ScannerResult<()> {
        (**self).set_scale(scale)
    }

    fn resolution(&self) -> (usize, usize) {
        (**self).resolution()
    }

    fn set_resolution(&mut self, resolution: (usize, usize)) -> ScannerResult<()> {
        (**self).set_resolution(resolution)
    }

    fn translation(&self) -> (f64, f64) {
        (**self).translation()
    }

    fn set_translation(&mut self, translation: (f64, f64)) -> ScannerResult<()> {
        (**self).set_translation(translation)
    }

    fn dwell_time(&self) -> Duration {
        (**self).dwell_time()
    }

    fn set_dwell_time(&mut self, dwell_time: Duration) -> ScannerResult<()> {
        (**self).set_dwell_time(dwell_time)
    }
}

impl<T: Emitter + ?Sized> Emitter for Box<T> {
    fn shape(&self) -> (usize, usize) {
        (**self).shape()
    }

    fn scale(&self) -> (f64, f64) {
        (**self).scale()
    }

    fn set_scale(&mut self, scale: (f64, f64)) -> ScannerResult<()> {
        (**self).set_scale(scale)
    }

    fn resolution(&self) -> (usize, usize) {
        (**self).resolution()
    }

    fn set_resolution(&mut self, resolution: (usize, usize)) -> ScannerResult<()> {
        (**self).set_resolution(resolution)
    }

    fn translation(&self) -> (f64, f64) {
        (**self).translation()
    }

    fn set_translation(&mut self, translation: (f64, f64)) -> ScannerResult<()> {
        (**self).set_translation(translation)
    }

    fn dwell_time(&self) -> Duration {
        (**self).dwell_time()
    }

    fn set_dwell_time(&mut self, dwell_time: Duration) -> ScannerResult<()> {
        (**self).set_dwell_time(dwell_time)
    }
}

impl<T: Detector + ?Sized> Detector for &T {
    fn subscribe(&self, callback: FrameCallback) -> ScannerResult<SubscriptionId> {
        (**self).subscribe(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        (**self).unsubscribe(id)
    }
}

impl<T: Detector + ?Sized> Detector for Arc<T> {
    fn subscribe(&self, callback: FrameCallback) -> ScannerResult<SubscriptionId> {
        (**self).subscribe(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        (**self).unsubscribe(id)
    }
}

impl<T: Detector + ?Sized> Detector for Box<T> {
    fn subscribe(&self, callback: FrameCallback) -> ScannerResult<SubscriptionId> {
        (**self).subscribe(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        (**self).unsubscribe(id)
    }
}

/// Number of pixels in a `(width, height)` resolution
pub fn pixel_count(resolution: (usize, usize)) -> usize {
    resolution.0 * resolution.1
}
