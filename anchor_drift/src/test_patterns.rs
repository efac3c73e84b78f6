//! Deterministic textured specimens for registration tests and simulation
//!
//! A [`Specimen`] is an unbounded field of Gaussian blobs generated lazily per
//! grid cell from a seed, so it can be sampled at arbitrary (fractional)
//! coordinates. Sampling the same specimen at an offset gives an exactly
//! shifted image without any interpolation.

use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[derive(Debug, Clone, Copy)]
struct Blob {
    x: f64,
    y: f64,
    sigma: f64,
    amplitude: f64,
}

/// Procedural blob texture defined over the whole plane
#[derive(Debug, Clone)]
pub struct Specimen {
    seed: u64,
    /// Grid cell size in pixels; blobs never reach beyond one neighbouring cell
    cell_size: f64,
    /// Maximum number of blobs per cell
    max_blobs_per_cell: usize,
    /// Blob sigma range in pixels
    sigma_range: (f64, f64),
    /// Constant background level
    background: f64,
}

impl Specimen {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            cell_size: 12.0,
            max_blobs_per_cell: 2,
            sigma_range: (1.5, 3.0),
            background: 0.1,
        }
    }

    pub fn with_background(mut self, background: f64) -> Self {
        self.background = background;
        self
    }

    fn cell_rng(&self, cx: i64, cy: i64) -> ChaCha8Rng {
        // splitmix-style mixing of seed and cell coordinates
        let mut h = self.seed ^ 0x9E37_79B9_7F4A_7C15;
        h ^= (cx as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        h = h.rotate_left(31);
        h ^= (cy as u64).wrapping_mul(0x94D0_49BB_1331_11EB);
        h = (h ^ (h >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        h = (h ^ (h >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        ChaCha8Rng::seed_from_u64(h ^ (h >> 31))
    }

    fn cell_blobs(&self, cx: i64, cy: i64) -> Vec<Blob> {
        let mut rng = self.cell_rng(cx, cy);
        let count = rng.gen_range(0..=self.max_blobs_per_cell);
        (0..count)
            .map(|_| Blob {
                x: (cx as f64 + rng.gen::<f64>()) * self.cell_size,
                y: (cy as f64 + rng.gen::<f64>()) * self.cell_size,
                sigma: rng.gen_range(self.sigma_range.0..self.sigma_range.1),
                amplitude: rng.gen_range(0.5..1.0),
            })
            .collect()
    }

    /// Intensity at a specimen coordinate
    pub fn intensity(&self, x: f64, y: f64) -> f64 {
        let cx = (x / self.cell_size).floor() as i64;
        let cy = (y / self.cell_size).floor() as i64;
        let mut value = self.background;
        for ny in cy - 1..=cy + 1 {
            for nx in cx - 1..=cx + 1 {
                value += self.blob_sum(nx, ny, x, y);
            }
        }
        value
    }

    fn blob_sum(&self, cx: i64, cy: i64, x: f64, y: f64) -> f64 {
        let cutoff = self.cell_size * self.cell_size;
        self.cell_blobs(cx, cy)
            .iter()
            .map(|b| {
                let d2 = (x - b.x).powi(2) + (y - b.y).powi(2);
                if d2 > cutoff {
                    0.0
                } else {
                    b.amplitude * (-d2 / (2.0 * b.sigma * b.sigma)).exp()
                }
            })
            .sum()
    }

    /// Render a `width` x `height` image whose pixel `(row, col)` samples the
    /// specimen at `(origin.0 + col, origin.1 + row)`.
    pub fn render(&self, width: usize, height: usize, origin: (f64, f64)) -> Array2<f64> {
        // Blob lists are generated once per touched cell
        let min_cx = ((origin.0 / self.cell_size).floor() as i64) - 1;
        let min_cy = ((origin.1 / self.cell_size).floor() as i64) - 1;
        let max_cx = (((origin.0 + width as f64) / self.cell_size).floor() as i64) + 1;
        let max_cy = (((origin.1 + height as f64) / self.cell_size).floor() as i64) + 1;

        let mut blobs = Vec::new();
        for cy in min_cy..=max_cy {
            for cx in min_cx..=max_cx {
                blobs.extend(self.cell_blobs(cx, cy));
            }
        }

        let cutoff = self.cell_size * self.cell_size;
        Array2::from_shape_fn((height, width), |(row, col)| {
            let x = origin.0 + col as f64;
            let y = origin.1 + row as f64;
            self.background
                + blobs
                    .iter()
                    .map(|b| {
                        let d2 = (x - b.x).powi(2) + (y - b.y).powi(2);
                        if d2 > cutoff {
                            0.0
                        } else {
                            b.amplitude * (-d2 / (2.0 * b.sigma * b.sigma)).exp()
                        }
                    })
                    .sum::<f64>()
        })
    }
}

/// Textured test image sampled at `offset`: pixel `(row, col)` is the
/// specimen at `(col + offset.0, row + offset.1)`.
///
/// Two patterns with the same seed and offsets `0` and `s` satisfy
/// `b(x, y) = a(x + s.0, y + s.1)`.
pub fn textured_pattern(width: usize, height: usize, offset: (f64, f64), seed: u64) -> Array2<f64> {
    Specimen::new(seed).render(width, height, offset)
}

/// Scale a floating-point image into u16 detector counts, saturating.
pub fn to_counts(image: &Array2<f64>, gain: f64) -> Array2<u16> {
    image.mapv(|v| (v * gain).round().clamp(0.0, u16::MAX as f64) as u16)
}
