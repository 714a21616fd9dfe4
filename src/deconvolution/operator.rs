//! Forward/adjoint blur operator shared by every solver.

use crate::error::{ensure_not_empty, DeconvError};
use crate::math_tools::{circular_flip, crop, fftshift, pad_reflect, pad_zeros, Fft2d};
use ndarray::{Array2, ArrayView2, Zip};
use num_complex::Complex32;

/// Convolution with a normalized probe (`A`) and with its circular flip (`Aᵗ`).
///
/// Construction takes care of boundary handling: the image is reflect-padded and the
/// probe zero-padded by `shape / 8` per axis, so the circular convolution does not wrap
/// opposite image edges into each other. [`ConvolutionOperator::crop`] cuts a working
/// grid back to the caller's extent.
pub struct ConvolutionOperator {
    image: Array2<f32>,
    pad: (usize, usize),
    fft: Fft2d,
    probe_fft: Array2<Complex32>,
    probe_flip_fft: Array2<Complex32>,
}

impl ConvolutionOperator {
    /// # Errors
    /// [`DeconvError::EmptyImage`] or [`DeconvError::ShapeMismatch`] when image and
    /// probe cannot be convolved on one grid.
    pub fn new(
        image: ArrayView2<f32>,
        probe: ArrayView2<f32>,
        boundary_handling: bool,
    ) -> Result<Self, DeconvError> {
        ensure_not_empty(image.dim())?;
        if image.dim() != probe.dim() {
            return Err(DeconvError::ShapeMismatch {
                image: image.dim(),
                probe: probe.dim(),
            });
        }

        let (rows, cols) = image.dim();
        let pad = if boundary_handling {
            (rows / 8, cols / 8)
        } else {
            (0, 0)
        };
        let (image, probe) = if boundary_handling {
            (pad_reflect(&image, pad), pad_zeros(&probe, pad))
        } else {
            (image.to_owned(), probe.to_owned())
        };

        let mut probe = probe.mapv(f32::abs);
        let probe_sum = probe.sum();
        if probe_sum != 0.0 {
            probe.mapv_inplace(|v| v / probe_sum);
        } else {
            log::warn!("probe sums to zero, convolution will blank the image");
        }
        let probe_flip = circular_flip(&probe.view());

        let fft = Fft2d::new(image.dim());
        let probe_fft = fft.forward(&probe.view());
        let probe_flip_fft = fft.forward(&probe_flip.view());

        log::debug!(
            "convolution operator on {:?} grid (padding {:?})",
            image.dim(),
            pad
        );

        Ok(ConvolutionOperator {
            image,
            pad,
            fft,
            probe_fft,
            probe_flip_fft,
        })
    }

    /// The working image: the input, reflect-padded when boundary handling is on.
    pub fn image(&self) -> &Array2<f32> {
        &self.image
    }

    /// Padding applied on each side, `(rows, cols)`.
    pub fn padding(&self) -> (usize, usize) {
        self.pad
    }

    /// `A·x`: blur with the probe.
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        self.apply(x, &self.probe_fft)
    }

    /// `Aᵗ·x`: blur with the circularly flipped probe.
    pub fn adjoint(&self, x: &Array2<f32>) -> Array2<f32> {
        self.apply(x, &self.probe_flip_fft)
    }

    /// Largest eigenvalue of `AᵗA`, i.e. `max |P̂|²`; falls back to 1 for a blank probe.
    pub fn lipschitz(&self) -> f32 {
        let l = self
            .probe_fft
            .iter()
            .map(|c| c.norm_sqr())
            .fold(0.0_f32, f32::max);
        if l == 0.0 {
            log::warn!("probe spectrum is zero, using unit Lipschitz constant");
            1.0
        } else {
            l
        }
    }

    /// Cuts a working-grid array back to the un-padded extent.
    pub fn crop(&self, x: &Array2<f32>) -> Array2<f32> {
        crop(&x.view(), self.pad)
    }

    fn apply(&self, x: &Array2<f32>, kernel_fft: &Array2<Complex32>) -> Array2<f32> {
        let mut spectrum = self.fft.forward(&x.view());
        Zip::from(&mut spectrum)
            .and(kernel_fft)
            .for_each(|s, &k| *s *= k);
        self.fft.inverse_inplace(&mut spectrum);
        fftshift(&spectrum.view()).mapv(|c| c.re)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp(shape: (usize, usize)) -> Array2<f32> {
        Array2::from_shape_fn(shape, |(i, j)| 1.0 + (i * 3 + j * 7 % 5) as f32 * 0.1)
    }

    fn centred_delta(shape: (usize, usize)) -> Array2<f32> {
        let mut probe = Array2::zeros(shape);
        probe[[shape.0 / 2, shape.1 / 2]] = 1.0;
        probe
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let image = Array2::<f32>::ones((8, 8));
        let probe = Array2::<f32>::ones((8, 6));
        let err = ConvolutionOperator::new(image.view(), probe.view(), false)
            .err()
            .unwrap();
        assert!(err.is_configuration());
        assert_eq!(
            err,
            DeconvError::ShapeMismatch {
                image: (8, 8),
                probe: (8, 6)
            }
        );
    }

    #[test]
    fn rejects_empty_image() {
        let image = Array2::<f32>::zeros((0, 8));
        let err = ConvolutionOperator::new(image.view(), image.view(), true)
            .err()
            .unwrap();
        assert_eq!(err, DeconvError::EmptyImage((0, 8)));
    }

    #[test]
    fn centred_delta_forward_then_adjoint_is_identity() {
        let shape = (16, 12);
        let image = ramp(shape);
        let op = ConvolutionOperator::new(image.view(), centred_delta(shape).view(), false)
            .unwrap();

        let blurred = op.forward(&image);
        let back = op.adjoint(&blurred);
        for (a, b) in image.iter().zip(back.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
        }
        assert_abs_diff_eq!(op.lipschitz(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn probe_is_normalized_before_use() {
        let shape = (8, 8);
        let mut probe = centred_delta(shape);
        probe[[4, 4]] = 5.0;
        probe[[4, 5]] = 5.0;
        let image = Array2::from_elem(shape, 2.0_f32);
        let op = ConvolutionOperator::new(image.view(), probe.view(), false).unwrap();
        // Unit-sum probe preserves a flat image.
        let blurred = op.forward(&image);
        assert!(blurred.iter().all(|v| (v - 2.0).abs() < 1e-4));
        assert_abs_diff_eq!(op.lipschitz(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn adjoint_matches_inner_product() {
        let shape = (10, 10);
        let mut probe = centred_delta(shape);
        probe[[5, 6]] = 0.5;
        probe[[4, 5]] = 0.25;
        let x = ramp(shape);
        let y = Array2::from_shape_fn(shape, |(i, j)| ((i + 2 * j) % 7) as f32);
        let op = ConvolutionOperator::new(x.view(), probe.view(), false).unwrap();

        let lhs = (&op.forward(&x) * &y).sum();
        let rhs = (&x * &op.adjoint(&y)).sum();
        assert_abs_diff_eq!(lhs, rhs, epsilon = 1e-2);
    }

    #[test]
    fn boundary_handling_pads_by_an_eighth() {
        let shape = (100, 100);
        let image = ramp(shape);
        let op = ConvolutionOperator::new(image.view(), centred_delta(shape).view(), true)
            .unwrap();
        assert_eq!(op.padding(), (12, 12));
        assert_eq!(op.image().dim(), (124, 124));
        assert_eq!(op.crop(op.image()), image);
    }
}
