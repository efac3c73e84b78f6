//! Pairwise image registration for drift measurement
//!
//! Estimates the translation between two same-shape intensity images from the
//! peak of their FFT cross-correlation, refined to a requested sub-pixel
//! precision. Degenerate inputs never fail: they yield a zero shift flagged as
//! degenerate so the feedback loop keeps running.

mod fft;
mod upsample;

use ndarray::{s, Array2, ArrayView2};
use num_traits::AsPrimitive;
use rustfft::{num_complex::Complex64, FftDirection, FftPlanner};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Neg, Range, Sub};

/// Translation in pixels. `x` runs along columns, `y` along rows.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DriftVector {
    pub x: f64,
    pub y: f64,
}

impl DriftVector {
    pub const ZERO: DriftVector = DriftVector { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn as_tuple(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// Euclidean length
    pub fn norm(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Largest per-axis absolute difference to `other`
    pub fn max_abs_diff(&self, other: &DriftVector) -> f64 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }
}

impl From<(f64, f64)> for DriftVector {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

impl Add for DriftVector {
    type Output = DriftVector;

    fn add(self, rhs: DriftVector) -> DriftVector {
        DriftVector::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for DriftVector {
    type Output = DriftVector;

    fn sub(self, rhs: DriftVector) -> DriftVector {
        DriftVector::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Neg for DriftVector {
    type Output = DriftVector;

    fn neg(self) -> DriftVector {
        DriftVector::new(-self.x, -self.y)
    }
}

/// Why a registration could not find a meaningful peak
#[derive(Debug, Clone, PartialEq)]
pub enum Degeneracy {
    /// Images have different shapes
    ShapeMismatch {
        a: (usize, usize),
        b: (usize, usize),
    },
    /// An image has no pixels
    Empty,
    /// An image has constant intensity
    Flat,
    /// Correlation surface has no positive finite maximum
    NoPeak,
}

/// Result of registering two images
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    /// Translation aligning the second image onto the first
    pub shift: DriftVector,
    /// Normalized correlation at the peak (1.0 for identical images)
    pub peak: f64,
    /// Set when the result is a zero-shift fallback
    pub degeneracy: Option<Degeneracy>,
}

impl Registration {
    fn degenerate(reason: Degeneracy) -> Self {
        log::warn!("Drift registration degenerate ({reason:?}), assuming zero drift");
        Self {
            shift: DriftVector::ZERO,
            peak: 0.0,
            degeneracy: Some(reason),
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.degeneracy.is_some()
    }
}

/// Register `image_b` against `image_a`.
///
/// The returned shift `(dx, dy)` satisfies `b(x, y) ≈ a(x + dx, y + dy)`:
/// translating `image_b` by it aligns it onto `image_a`. `precision` is the
/// number of sub-pixel steps per pixel; 1 gives integer shifts.
pub fn register<T>(image_a: &ArrayView2<T>, image_b: &ArrayView2<T>, precision: u32) -> Registration
where
    T: Copy + AsPrimitive<f64>,
{
    if image_a.dim() != image_b.dim() {
        return Registration::degenerate(Degeneracy::ShapeMismatch {
            a: image_a.dim(),
            b: image_b.dim(),
        });
    }
    let (rows, cols) = image_a.dim();
    if rows == 0 || cols == 0 {
        return Registration::degenerate(Degeneracy::Empty);
    }

    let mut freq_a = fft::to_zero_mean_complex(image_a);
    let mut freq_b = fft::to_zero_mean_complex(image_b);

    let energy_a: f64 = freq_a.iter().map(|c| c.norm_sqr()).sum();
    let energy_b: f64 = freq_b.iter().map(|c| c.norm_sqr()).sum();
    if energy_a <= f64::EPSILON || energy_b <= f64::EPSILON {
        return Registration::degenerate(Degeneracy::Flat);
    }

    let mut planner = FftPlanner::new();
    let Some((_, coarse, peak_value)) =
        correlation_peak(&mut freq_a, &mut freq_b, &mut planner)
    else {
        return Registration::degenerate(Degeneracy::NoPeak);
    };

    let (dy, dx) = if precision > 1 {
        refine_on_overlap(image_a, image_b, coarse, precision, &mut planner)
    } else {
        coarse
    };

    // Inverse transforms are unnormalized: divide by the pixel count
    let size = (rows * cols) as f64;
    let peak = peak_value / size / (energy_a * energy_b).sqrt();

    log::trace!(
        "Registration: coarse {:?}, refined ({:.3}, {:.3}), peak {:.3}",
        coarse,
        dx,
        dy,
        peak
    );

    Registration {
        shift: DriftVector::new(dx, dy),
        peak,
        degeneracy: None,
    }
}

/// Smallest overlap side worth refining on
const MIN_OVERLAP: usize = 4;

/// Cross-correlate two spectra in place and locate the integer peak.
///
/// Returns the cross-power spectrum, the signed `(row_lag, col_lag)` of the
/// maximum and its unnormalized value, or `None` when there is no positive
/// finite maximum.
fn correlation_peak(
    freq_a: &mut Array2<Complex64>,
    freq_b: &mut Array2<Complex64>,
    planner: &mut FftPlanner<f64>,
) -> Option<(Array2<Complex64>, (f64, f64), f64)> {
    let (rows, cols) = freq_a.dim();
    fft::fft2(freq_a, planner, FftDirection::Forward);
    fft::fft2(freq_b, planner, FftDirection::Forward);

    let cross_power = &*freq_a * &freq_b.mapv(|c| c.conj());

    let mut correlation = cross_power.clone();
    fft::fft2(&mut correlation, planner, FftDirection::Inverse);

    let mut peak_index = (0, 0);
    let mut peak_value = f64::NEG_INFINITY;
    for ((r, c), value) in correlation.indexed_iter() {
        if value.re > peak_value {
            peak_value = value.re;
            peak_index = (r, c);
        }
    }
    if !peak_value.is_finite() || peak_value <= 0.0 {
        return None;
    }

    let lag = (
        fft::signed_lag(peak_index.0, rows),
        fft::signed_lag(peak_index.1, cols),
    );
    Some((cross_power, lag, peak_value))
}

/// Index ranges of `a` and `b` that overlap when `b(x) = a(x + shift)`
fn overlap(len: usize, shift: isize) -> Option<(Range<usize>, Range<usize>)> {
    let magnitude = shift.unsigned_abs();
    if magnitude + MIN_OVERLAP > len {
        return None;
    }
    let width = len - magnitude;
    if shift >= 0 {
        Some((magnitude..len, 0..width))
    } else {
        Some((0..width, magnitude..len))
    }
}

/// Sub-pixel refinement of an integer `(row, col)` shift.
///
/// The frames are cropped to their common area at the integer shift, so the
/// remaining misalignment is below a pixel, and tapered so the crop borders
/// do not correlate. The fractional peak of that residual correlation is
/// added to the integer shift. A residual that rounds to a different integer
/// shift re-crops once more.
fn refine_on_overlap<T>(
    image_a: &ArrayView2<T>,
    image_b: &ArrayView2<T>,
    coarse: (f64, f64),
    precision: u32,
    planner: &mut FftPlanner<f64>,
) -> (f64, f64)
where
    T: Copy + AsPrimitive<f64>,
{
    let (rows, cols) = image_a.dim();
    let mut base = (coarse.0 as isize, coarse.1 as isize);
    let mut refined = coarse;

    for _ in 0..2 {
        let (Some((a_rows, b_rows)), Some((a_cols, b_cols))) =
            (overlap(rows, base.0), overlap(cols, base.1))
        else {
            log::debug!("Overlap at shift {base:?} too small to refine, keeping integer peak");
            return refined;
        };

        let crop_a = image_a.slice(s![a_rows, a_cols]);
        let crop_b = image_b.slice(s![b_rows, b_cols]);
        let mut freq_a = fft::to_windowed_complex(&crop_a);
        let mut freq_b = fft::to_windowed_complex(&crop_b);
        let Some((cross_power, residual, _)) =
            correlation_peak(&mut freq_a, &mut freq_b, planner)
        else {
            return refined;
        };

        let (fine, _) = upsample::refine_peak(&cross_power, residual, precision);
        refined = (base.0 as f64 + fine.0, base.1 as f64 + fine.1);

        let rounded = (refined.0.round() as isize, refined.1.round() as isize);
        if rounded == base {
            break;
        }
        base = rounded;
    }
    refined
}

/// Translation aligning `image_b` onto `image_a`, to `1 / precision` pixel.
///
/// Degenerate inputs (flat images, mismatched shapes) give zero drift with a
/// logged warning rather than an error.
pub fn compute_drift<T>(image_a: &ArrayView2<T>, image_b: &ArrayView2<T>, precision: u32) -> DriftVector
where
    T: Copy + AsPrimitive<f64>,
{
    register(image_a, image_b, precision).shift
}
