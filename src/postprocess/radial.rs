use super::BackgroundEstimator;
use crate::math_tools::radius_grid;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Ratio between the full width at half maximum and the standard deviation of a Gaussian.
const FWHM_TO_SIGMA: f32 = 2.355;

/// Rotationally averaged magnitude, smoothed along the radius.
///
/// Samples are binned by `floor(r)` for radii below half the shorter side, averaged per
/// bin and the profile is convolved with a small Gaussian. Bins at or beyond the
/// binning radius get a zero background.
///
/// # Fields
/// - `kernel_size`: Side length of the Gaussian smoothing kernel.
/// - `fwhm`: Full width at half maximum of that kernel, in radial bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadialAverage {
    pub kernel_size: usize,
    pub fwhm: f32,
}

impl Default for RadialAverage {
    fn default() -> Self {
        RadialAverage {
            kernel_size: 3,
            fwhm: 8.0,
        }
    }
}

impl RadialAverage {
    /// 1D smoothing kernel: column sums of a normalized `kernel_size²` Gaussian.
    pub fn smoothing_kernel(&self) -> Vec<f32> {
        let size = self.kernel_size.max(1);
        let centre = (size / 2) as f32;
        let sigma = self.fwhm / FWHM_TO_SIGMA;
        let param = 1.0 / (2.0 * sigma * sigma);

        let kernel = Array2::from_shape_fn((size, size), |(i, j)| {
            let d2 = (i as f32 - centre).powi(2) + (j as f32 - centre).powi(2);
            (-d2 * param).exp()
        });
        let total = kernel.sum();
        kernel.sum_axis(ndarray::Axis(0)).mapv(|v| v / total).to_vec()
    }

    /// Mean magnitude per integer radius `0..min(rows, cols)/2`, before smoothing.
    pub fn radial_profile(&self, magnitude: &Array2<f32>) -> Vec<f32> {
        let (rows, cols) = magnitude.dim();
        let bins = rows.min(cols) / 2;
        let mut sums = vec![0.0_f64; bins];
        let mut counts = vec![0_usize; bins];

        for (r, &m) in radius_grid((rows, cols)).iter().zip(magnitude.iter()) {
            let bin = *r as usize;
            if bin < bins {
                sums[bin] += m as f64;
                counts[bin] += 1;
            }
        }

        sums.iter()
            .zip(&counts)
            .map(|(&s, &n)| if n > 0 { (s / n as f64) as f32 } else { 0.0 })
            .collect()
    }
}

/// Same-length convolution, the output aligned with the input like `np.convolve(.., "same")`.
fn convolve_same(values: &[f32], kernel: &[f32]) -> Vec<f32> {
    let offset = (kernel.len().saturating_sub(1) / 2) as isize;
    (0..values.len())
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(k, w)| {
                    let idx = i as isize + offset - k as isize;
                    (idx >= 0 && (idx as usize) < values.len()).then(|| w * values[idx as usize])
                })
                .sum()
        })
        .collect()
}

impl BackgroundEstimator for RadialAverage {
    fn name(&self) -> &'static str {
        "radial average"
    }

    fn estimate(&self, magnitude: &Array2<f32>) -> Array2<f32> {
        let profile = convolve_same(&self.radial_profile(magnitude), &self.smoothing_kernel());
        radius_grid(magnitude.dim()).mapv(|r| profile.get(r as usize).copied().unwrap_or(0.0))
    }
}
