//! 2-D FFT helpers over ndarray built from 1-D rustfft plans

use ndarray::{Array2, ArrayView2, Axis};
use num_traits::AsPrimitive;
use rustfft::{num_complex::Complex64, FftDirection, FftPlanner};
use std::f64::consts::PI;

/// Copy a real image into a complex buffer with its mean removed.
pub(crate) fn to_zero_mean_complex<T>(image: &ArrayView2<T>) -> Array2<Complex64>
where
    T: Copy + AsPrimitive<f64>,
{
    let n = image.len().max(1) as f64;
    let mean = image.iter().map(|&v| v.as_()).sum::<f64>() / n;
    image.mapv(|v| Complex64::new(v.as_() - mean, 0.0))
}

/// Periodic Hann taper sampled at pixel centres
pub(crate) fn hann_window(n: usize) -> Vec<f64> {
    let len = n as f64;
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * (i as f64 + 0.5) / len).cos())
        .collect()
}

/// Zero-mean copy tapered to zero at the borders by a separable Hann window.
///
/// Removes the wrap-around discontinuity a circular correlation would
/// otherwise see at the frame edges.
pub(crate) fn to_windowed_complex<T>(image: &ArrayView2<T>) -> Array2<Complex64>
where
    T: Copy + AsPrimitive<f64>,
{
    let (rows, cols) = image.dim();
    let row_window = hann_window(rows);
    let col_window = hann_window(cols);
    let mut data = to_zero_mean_complex(image);
    for ((r, c), value) in data.indexed_iter_mut() {
        *value *= row_window[r] * col_window[c];
    }
    data
}

/// In-place unnormalized 2-D FFT: every row, then every column.
pub(crate) fn fft2(
    data: &mut Array2<Complex64>,
    planner: &mut FftPlanner<f64>,
    direction: FftDirection,
) {
    let (rows, cols) = data.dim();
    if rows == 0 || cols == 0 {
        return;
    }

    let row_fft = planner.plan_fft(cols, direction);
    let mut buffer = vec![Complex64::new(0.0, 0.0); cols];
    for mut row in data.axis_iter_mut(Axis(0)) {
        buffer
            .iter_mut()
            .zip(row.iter())
            .for_each(|(dst, src)| *dst = *src);
        row_fft.process(&mut buffer);
        row.iter_mut()
            .zip(buffer.iter())
            .for_each(|(dst, src)| *dst = *src);
    }

    let col_fft = planner.plan_fft(rows, direction);
    let mut buffer = vec![Complex64::new(0.0, 0.0); rows];
    for mut col in data.axis_iter_mut(Axis(1)) {
        buffer
            .iter_mut()
            .zip(col.iter())
            .for_each(|(dst, src)| *dst = *src);
        col_fft.process(&mut buffer);
        col.iter_mut()
            .zip(buffer.iter())
            .for_each(|(dst, src)| *dst = *src);
    }
}

/// Signed frequency index for bin `k` of an `n`-point transform
pub(crate) fn signed_frequency(k: usize, n: usize) -> f64 {
    if k < n.div_ceil(2) {
        k as f64
    } else {
        k as f64 - n as f64
    }
}

/// Map an integer lag from FFT index space to a signed shift
pub(crate) fn signed_lag(index: usize, n: usize) -> f64 {
    if index > n / 2 {
        index as f64 - n as f64
    } else {
        index as f64
    }
}
