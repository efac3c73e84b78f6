//! Sub-pixel peak refinement by matrix-multiply DFT
//!
//! Instead of zero-padding the whole cross-power spectrum, the band-limited
//! correlation surface is evaluated directly on a small grid of fractional
//! lags around the integer peak (Guizar-Sicairos, Thurman & Fienup, 2008).
//! Cost is O(R·M·N) for an R×R window over an M×N spectrum.

use ndarray::Array2;
use rustfft::num_complex::Complex64;
use std::f64::consts::PI;

use super::fft::signed_frequency;

/// Width of the refinement window in pixels around the coarse peak
const WINDOW_PX: f64 = 1.5;

/// DFT kernel `exp(i 2π f(k) · lag / n)` for every bin `k` and sample lag.
///
/// Returned shape is `(n, lags.len())`.
fn dft_kernel(n: usize, lags: &[f64]) -> Array2<Complex64> {
    Array2::from_shape_fn((n, lags.len()), |(k, j)| {
        let phase = 2.0 * PI * signed_frequency(k, n) * lags[j] / n as f64;
        Complex64::from_polar(1.0, phase)
    })
}

/// Refine a coarse correlation peak to `1 / precision` pixel.
///
/// # Arguments
/// * `cross_power` - Cross-power spectrum `A · conj(B)`, shape (rows, cols)
/// * `coarse` - Integer peak as signed `(row_lag, col_lag)`
/// * `precision` - Samples per pixel in the refinement window
///
/// # Returns
/// Refined `(row_lag, col_lag)` and the correlation value found there
pub(crate) fn refine_peak(
    cross_power: &Array2<Complex64>,
    coarse: (f64, f64),
    precision: u32,
) -> ((f64, f64), f64) {
    let (rows, cols) = cross_power.dim();
    let precision = precision.max(1) as f64;
    let region = (WINDOW_PX * precision).ceil() as usize;
    let center = (region / 2) as f64;

    let offsets: Vec<f64> = (0..region)
        .map(|i| (i as f64 - center) / precision)
        .collect();
    let row_lags: Vec<f64> = offsets.iter().map(|o| coarse.0 + o).collect();
    let col_lags: Vec<f64> = offsets.iter().map(|o| coarse.1 + o).collect();

    let row_kernel = dft_kernel(rows, &row_lags);
    let col_kernel = dft_kernel(cols, &col_lags);

    // partial[k, v] = sum_l P[k, l] * col_kernel[l, v]
    let zero = Complex64::new(0.0, 0.0);
    let mut partial = Array2::from_elem((rows, region), zero);
    for k in 0..rows {
        for l in 0..cols {
            let p = cross_power[[k, l]];
            if p == zero {
                continue;
            }
            for v in 0..region {
                partial[[k, v]] += p * col_kernel[[l, v]];
            }
        }
    }

    // surface[u, v] = sum_k row_kernel[k, u] * partial[k, v]
    let mut best = (0usize, 0usize);
    let mut best_value = f64::NEG_INFINITY;
    for u in 0..region {
        for v in 0..region {
            let value: f64 = (0..rows)
                .map(|k| (row_kernel[[k, u]] * partial[[k, v]]).re)
                .sum();
            if value > best_value {
                best_value = value;
                best = (u, v);
            }
        }
    }

    ((row_lags[best.0], col_lags[best.1]), best_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Spectrum of a single impulse at fractional lag, i.e. P[k] = exp(-i2πfk·s/n)
    fn shifted_impulse_spectrum(rows: usize, cols: usize, shift: (f64, f64)) -> Array2<Complex64> {
        Array2::from_shape_fn((rows, cols), |(k, l)| {
            let phase = -2.0
                * PI
                * (signed_frequency(k, rows) * shift.0 / rows as f64
                    + signed_frequency(l, cols) * shift.1 / cols as f64);
            Complex64::from_polar(1.0, phase)
        })
    }

    #[test]
    fn test_refines_fractional_impulse() {
        let spectrum = shifted_impulse_spectrum(32, 32, (2.3, -1.6));
        let ((dy, dx), peak) = refine_peak(&spectrum, (2.0, -2.0), 10);
        assert_relative_eq!(dy, 2.3, epsilon = 1e-9);
        assert_relative_eq!(dx, -1.6, epsilon = 1e-9);
        assert!(peak > 0.0);
    }

    #[test]
    fn test_integer_peak_stays_put() {
        let spectrum = shifted_impulse_spectrum(16, 24, (0.0, 3.0));
        let ((dy, dx), _) = refine_peak(&spectrum, (0.0, 3.0), 4);
        assert_relative_eq!(dy, 0.0, epsilon = 1e-12);
        assert_relative_eq!(dx, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_precision_one_returns_coarse() {
        let spectrum = shifted_impulse_spectrum(8, 8, (1.0, 1.0));
        let ((dy, dx), _) = refine_peak(&spectrum, (1.0, 1.0), 1);
        assert_eq!((dy, dx), (1.0, 1.0));
    }
}
