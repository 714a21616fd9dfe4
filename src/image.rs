//! In-memory sample grids handed over by the image-loading collaborator.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// A 2D HAADF sample grid together with its physical calibration.
///
/// # Fields
/// - `data`: Detector intensities, row-major `(rows, cols)`.
/// - `pixel_size`: Sampling distance in nm. Used by the probe model to build the
///   frequency grid and by the Tikhonov-Miller regularizer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub data: Array2<f32>,
    pub pixel_size: f32,
}

impl Image {
    pub fn new(data: Array2<f32>, pixel_size: f32) -> Self {
        Image { data, pixel_size }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }

    /// Returns the value below which `percent` percent of the samples fall.
    ///
    /// Linear interpolation between the two closest ranks, like numpy's default
    /// percentile. `percent` is clamped to `[0, 100]`. Returns `None` for an empty grid.
    pub fn percentile(&self, percent: f32) -> Option<f32> {
        let mut values: Vec<f32> = self.data.iter().copied().filter(|v| !v.is_nan()).collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));

        let rank = percent.clamp(0.0, 100.0) / 100.0 * (values.len() - 1) as f32;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        let fraction = rank - lower as f32;
        Some(values[lower] + (values[upper] - values[lower]) * fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn percentile_interpolates_between_ranks() {
        let image = Image::new(
            Array2::from_shape_vec((2, 3), vec![5.0, 1.0, 3.0, 2.0, 4.0, 0.0]).unwrap(),
            0.1,
        );
        assert_abs_diff_eq!(image.percentile(0.0).unwrap(), 0.0);
        assert_abs_diff_eq!(image.percentile(100.0).unwrap(), 5.0);
        assert_abs_diff_eq!(image.percentile(50.0).unwrap(), 2.5);
        assert_abs_diff_eq!(image.percentile(10.0).unwrap(), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn percentile_of_empty_grid_is_none() {
        let image = Image::new(Array2::zeros((0, 4)), 1.0);
        assert_eq!(image.percentile(1.0), None);
    }
}
