//! Whittaker-Eilers (P-spline) smoothing on a 2D grid.
//!
//! The smoother minimizes `‖y - z‖² + λ(‖D_r z‖² + ‖D_c z‖²)` with `D` a difference
//! operator of the given order. With reflective boundaries the penalty is diagonal in
//! the DCT-II basis, so one smoothing pass is a forward DCT, a per-coefficient
//! shrinkage and an inverse DCT (Eilers 2006, "Fast and compact smoothing on large
//! multidimensional grids").

use super::BackgroundEstimator;
use crate::math_tools::Dct2d;
use ndarray::{Array1, Array2, Zip};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

const LOG_OFFSET: f32 = 1e-10;
/// Residuals above this many noise sigmas count as peaks.
const CLIP_SIGMAS: f32 = 2.5;

/// Background as a smooth surface through the magnitude spectrum.
///
/// In robust mode the fit runs on the log magnitude and positive outliers (Bragg peaks)
/// are iteratively replaced by the current fit, so the surface follows the noise floor.
/// Without robust mode the magnitude is smoothed once in linear space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PSplineBackground {
    pub lambda: f32,
    pub order: u32,
    pub robust: bool,
    pub max_iterations: usize,
    pub tolerance: f32,
}

impl Default for PSplineBackground {
    fn default() -> Self {
        PSplineBackground {
            lambda: 100.0,
            order: 2,
            robust: true,
            max_iterations: 10,
            tolerance: 1e-3,
        }
    }
}

impl BackgroundEstimator for PSplineBackground {
    fn name(&self) -> &'static str {
        "P-spline"
    }

    fn estimate(&self, magnitude: &Array2<f32>) -> Array2<f32> {
        if self.robust {
            let log_magnitude = magnitude.mapv(|m| (m + LOG_OFFSET).ln());
            whittaker_smooth_robust(
                &log_magnitude,
                self.lambda,
                self.order,
                self.max_iterations,
                self.tolerance,
            )
            .mapv(f32::exp)
        } else {
            whittaker_smooth(magnitude, self.lambda, self.order)
        }
    }

    // log(0) would poison the fit, the information limit is applied to the filter instead.
    fn mask_before_estimation(&self) -> bool {
        false
    }
}

/// Eigenvalues `(2 - 2cos(iπ/n))^order` of the difference penalty along one axis.
fn penalty_eigenvalues(n: usize, order: u32) -> Array1<f32> {
    Array1::from_shape_fn(n, |i| {
        (2.0 * (1.0 - (i as f32 * PI / n as f32).cos())).powi(order as i32)
    })
}

/// One Whittaker smoothing pass.
pub fn whittaker_smooth(data: &Array2<f32>, lambda: f32, order: u32) -> Array2<f32> {
    let (rows, cols) = data.dim();
    let dct = Dct2d::new((rows, cols));
    let w_rows = penalty_eigenvalues(rows, order);
    let w_cols = penalty_eigenvalues(cols, order);

    let mut coefficients = dct.forward(&data.view());
    Zip::indexed(&mut coefficients).for_each(|(i, j), c| {
        *c /= 1.0 + lambda * (w_rows[i] + w_cols[j]);
    });
    dct.inverse(&coefficients.view())
}

/// Iterative smoothing with sigma clipping of positive outliers.
///
/// The noise sigma is estimated from the negative residuals only, `sqrt(mean(r²))`, and
/// falls back to 1 when the fit lies nowhere above the data. Stops after
/// `max_iterations` passes or once the relative change of the fit drops below
/// `tolerance`.
pub fn whittaker_smooth_robust(
    data: &Array2<f32>,
    lambda: f32,
    order: u32,
    max_iterations: usize,
    tolerance: f32,
) -> Array2<f32> {
    let mut fit = data.clone();
    let mut working = data.clone();

    for iteration in 0..max_iterations {
        let next = whittaker_smooth(&working, lambda, order);
        let residual = data - &next;

        let (sum_sq, count) = residual
            .iter()
            .filter(|&&r| r < 0.0)
            .fold((0.0_f64, 0_usize), |(s, n), &r| (s + (r * r) as f64, n + 1));
        let sigma = if count > 0 {
            (sum_sq / count as f64).sqrt() as f32
        } else {
            1.0
        };

        working = data.clone();
        Zip::from(&mut working)
            .and(&residual)
            .and(&next)
            .for_each(|w, &r, &z| {
                if r > CLIP_SIGMAS * sigma {
                    *w = z;
                }
            });

        let change = l2_norm(&(&next - &fit)) / (l2_norm(&fit) + LOG_OFFSET);
        fit = next;
        if change < tolerance {
            log::debug!("P-spline fit converged after {} passes", iteration + 1);
            break;
        }
    }
    fit
}

fn l2_norm(a: &Array2<f32>) -> f32 {
    a.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>().sqrt() as f32
}
