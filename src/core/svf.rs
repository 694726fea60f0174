//! Sky View Factor approximation
//!
//! This is a cheap relief-openness proxy, not a hemispherical horizon-scan
//! SVF: each pixel is compared against the highest elevation in a square
//! neighbourhood,
//!
//! ```text
//! svf = 1 - (local_max - elevation) / (elevation + offset)
//! ```
//!
//! Flat ground gives exactly 1.0; pixels sitting below nearby high ground get
//! lower values. The offset keeps the ratio bounded near zero elevation.
//! Values are only comparable within one terrain model.

use crate::types::{Raster, RasterGrid};
use ndarray::{Array2, Axis, Zip};
use std::collections::VecDeque;

/// SVF parameters
#[derive(Debug, Clone)]
pub struct SvfParams {
    /// Neighbourhood radius in pixels; the window side is `2 * radius + 1`.
    ///
    /// The default of 25 gives a 51 x 51 window. A 25-pixel-wide window
    /// (a `size = 25` maximum filter) corresponds to `radius: 12`.
    pub radius: usize,
    /// Normalization offset added to the elevation in the denominator
    pub offset: f32,
}

impl Default for SvfParams {
    fn default() -> Self {
        Self {
            radius: 25,
            offset: 30.0,
        }
    }
}

/// Sky View Factor processor
pub struct SkyViewFactor {
    params: SvfParams,
}

impl Default for SkyViewFactor {
    fn default() -> Self {
        Self::new()
    }
}

impl SkyViewFactor {
    pub fn new() -> Self {
        Self {
            params: SvfParams::default(),
        }
    }

    pub fn with_params(params: SvfParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SvfParams {
        &self.params
    }

    /// SVF over a bare grid; non-finite cells are treated as no-data
    pub fn compute(&self, dem: &RasterGrid) -> RasterGrid {
        self.compute_masked(dem, |v| !v.is_finite())
    }

    /// SVF over a georeferenced raster, honouring its no-data value.
    ///
    /// The result shares the input grid and georeferencing; no-data cells come
    /// out as NaN and the output declares NaN as its no-data value.
    pub fn compute_raster(&self, dem: &Raster) -> Raster {
        log::info!(
            "Calculating Sky View Factor (radius {} px, offset {})",
            self.params.radius,
            self.params.offset
        );
        let svf = self.compute_masked(&dem.data, |v| dem.is_no_data(v));
        let mut out = dem.with_data(svf);
        out.no_data = Some(f64::NAN);
        out
    }

    fn compute_masked(&self, dem: &RasterGrid, is_no_data: impl Fn(f32) -> bool) -> RasterGrid {
        let masked = dem.mapv(|v| if is_no_data(v) { f32::NEG_INFINITY } else { v });
        let local_max = sliding_max(&masked, self.params.radius);
        let offset = self.params.offset;

        let mut svf = Array2::<f32>::zeros(dem.dim());
        Zip::from(&mut svf)
            .and(&masked)
            .and(&local_max)
            .for_each(|out, &elevation, &max| {
                let denominator = elevation + offset;
                *out = if !elevation.is_finite() || denominator.abs() < f32::EPSILON {
                    f32::NAN
                } else {
                    1.0 - (max - elevation) / denominator
                };
            });
        svf
    }
}

/// Maximum over the `(2r+1) x (2r+1)` window centred on each cell, with the
/// window clipped at the grid edges.
///
/// Separable: a row pass followed by a column pass, each a monotonic-deque
/// sliding maximum, so the cost does not depend on the radius.
pub fn sliding_max(grid: &RasterGrid, radius: usize) -> RasterGrid {
    let mut rows_done = grid.clone();
    for mut row in rows_done.axis_iter_mut(Axis(0)) {
        let line: Vec<f32> = row.iter().cloned().collect();
        let maxed = sliding_max_1d(&line, radius);
        row.iter_mut().zip(maxed).for_each(|(dst, v)| *dst = v);
    }

    let mut out = rows_done.clone();
    for (mut col, src) in out
        .axis_iter_mut(Axis(1))
        .zip(rows_done.axis_iter(Axis(1)))
    {
        let line: Vec<f32> = src.iter().cloned().collect();
        let maxed = sliding_max_1d(&line, radius);
        col.iter_mut().zip(maxed).for_each(|(dst, v)| *dst = v);
    }
    out
}

fn sliding_max_1d(input: &[f32], radius: usize) -> Vec<f32> {
    let n = input.len();
    let mut out = Vec::with_capacity(n);
    // Indices with strictly decreasing values, front is the window maximum.
    let mut window: VecDeque<usize> = VecDeque::new();
    let mut next = 0usize;

    for i in 0..n {
        let hi = (i + radius).min(n - 1);
        while next <= hi {
            let v = input[next];
            while let Some(&back) = window.back() {
                if input[back] <= v {
                    window.pop_back();
                } else {
                    break;
                }
            }
            window.push_back(next);
            next += 1;
        }

        let lo = i.saturating_sub(radius);
        while let Some(&front) = window.front() {
            if front < lo {
                window.pop_front();
            } else {
                break;
            }
        }

        out.push(window.front().map(|&idx| input[idx]).unwrap_or(f32::NEG_INFINITY));
    }
    out
}
