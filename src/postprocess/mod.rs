//! Background suppression of restored images in Fourier space.
//!
//! The magnitude spectrum of a restored HAADF image is a few sharp reflections on top of
//! a smooth noise floor. A [`BackgroundEstimator`] models that floor and
//! [`background_filter`] turns it into a Wiener-style attenuation filter:
//!
//! 1. FFT of the image, zero frequency moved to `(rows/2, cols/2)`.
//! 2. Frequencies beyond the information limit (a fraction of the Nyquist radius
//!    `min(rows, cols)/2`) are discarded, before or after the estimation depending on the
//!    estimator.
//! 3. `W = max(P - B², 0) / P` on the power spectrum, or `W = max(|F| - B, 0) / |F|` for
//!    the [`FilterResponse::Magnitude`] variant.
//! 4. Inverse FFT of the filtered spectrum; the result is its magnitude.

mod pspline;
mod radial;

pub use pspline::{whittaker_smooth, whittaker_smooth_robust, PSplineBackground};
pub use radial::RadialAverage;

use crate::error::{ensure_not_empty, DeconvError};
use crate::math_tools::{fftshift, ifftshift, radius_grid, Fft2d};
use ndarray::{s, Array2, ArrayView2, Zip};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

/// Fraction of the Nyquist radius kept when no information limit is given.
pub const DEFAULT_INFORMATION_LIMIT: f32 = 0.5;

/// Half-width of the block around zero frequency whose background power is ignored, so
/// the lowest frequencies pass unattenuated.
const CENTRE_HALF_WIDTH: usize = 2;

/// Models the noise floor of a centred magnitude spectrum.
pub trait BackgroundEstimator {
    fn name(&self) -> &'static str;

    /// Background magnitude at every sample of `magnitude`.
    fn estimate(&self, magnitude: &Array2<f32>) -> Array2<f32>;

    /// Whether the estimator sees the spectrum already cut at the information limit.
    /// Otherwise the full spectrum is estimated and the filter is cut afterwards.
    fn mask_before_estimation(&self) -> bool {
        true
    }
}

/// How the background enters the attenuation filter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterResponse {
    /// `max(P - B², 0) / P` with the lowest frequencies preserved.
    #[default]
    Power,
    /// `max(|F| - B, 0) / |F|`.
    Magnitude,
}

/// Attenuation in `[0, 1]` for a centred magnitude spectrum and its background.
pub fn attenuation(
    magnitude: &Array2<f32>,
    background: &Array2<f32>,
    response: FilterResponse,
) -> Array2<f32> {
    let mut filter = Array2::<f32>::zeros(magnitude.dim());
    match response {
        FilterResponse::Power => {
            let mut background_power = background.mapv(|b| b * b);
            let (rows, cols) = magnitude.dim();
            let (cy, cx) = (rows / 2, cols / 2);
            background_power
                .slice_mut(s![
                    cy.saturating_sub(CENTRE_HALF_WIDTH)..(cy + CENTRE_HALF_WIDTH).min(rows),
                    cx.saturating_sub(CENTRE_HALF_WIDTH)..(cx + CENTRE_HALF_WIDTH).min(cols)
                ])
                .fill(0.0);

            Zip::from(&mut filter)
                .and(magnitude)
                .and(&background_power)
                .for_each(|w, &m, &b2| {
                    let power = m * m;
                    if power > 0.0 {
                        *w = (power - b2).max(0.0) / power;
                    }
                });
        }
        FilterResponse::Magnitude => {
            Zip::from(&mut filter)
                .and(magnitude)
                .and(background)
                .for_each(|w, &m, &b| {
                    if m > 0.0 {
                        *w = (m - b).max(0.0) / m;
                    }
                });
        }
    }
    filter
}

/// Suppresses the spectral background of `image`.
///
/// `information_limit` is the kept fraction of the Nyquist radius (default 0.5, clamped
/// to `[0, 1]`). `pixel_size` is only recorded in the log; all radii are in frequency
/// samples.
///
/// # Errors
/// [`DeconvError::EmptyImage`] for a grid without samples.
pub fn background_filter(
    image: ArrayView2<f32>,
    pixel_size: f32,
    information_limit: Option<f32>,
    estimator: &dyn BackgroundEstimator,
    response: FilterResponse,
) -> Result<Array2<f32>, DeconvError> {
    ensure_not_empty(image.dim())?;
    let (rows, cols) = image.dim();
    let limit = information_limit
        .unwrap_or(DEFAULT_INFORMATION_LIMIT)
        .clamp(0.0, 1.0);
    let cutoff = limit * rows.min(cols) as f32 / 2.0;
    log::debug!(
        "{} background filter on {rows}x{cols} (pixel size {pixel_size}, limit {limit}, {response:?})",
        estimator.name()
    );

    let fft = Fft2d::new((rows, cols));
    let mut spectrum = fftshift(&fft.forward(&image).view());
    let inside = radius_grid((rows, cols)).mapv(|r| r <= cutoff);

    if estimator.mask_before_estimation() {
        Zip::from(&mut spectrum)
            .and(&inside)
            .for_each(|c, &keep| {
                if !keep {
                    *c = Complex32::new(0.0, 0.0);
                }
            });
    }

    let magnitude = spectrum.mapv(|c| c.norm());
    let background = estimator.estimate(&magnitude);
    let mut filter = attenuation(&magnitude, &background, response);
    if !estimator.mask_before_estimation() {
        filter.zip_mut_with(&inside, |w, &keep| {
            if !keep {
                *w = 0.0;
            }
        });
    }

    Zip::from(&mut spectrum)
        .and(&filter)
        .for_each(|c, &w| *c *= w);
    let mut filtered = ifftshift(&spectrum.view());
    fft.inverse_inplace(&mut filtered);
    Ok(filtered.mapv(|c| c.norm()))
}

/// Radial-average background with the power response.
pub fn radial_background_filter(
    image: ArrayView2<f32>,
    pixel_size: f32,
    information_limit: Option<f32>,
) -> Result<Array2<f32>, DeconvError> {
    background_filter(
        image,
        pixel_size,
        information_limit,
        &RadialAverage::default(),
        FilterResponse::Power,
    )
}

/// Radial-average background subtracted from the magnitude.
pub fn radial_difference_filter(
    image: ArrayView2<f32>,
    pixel_size: f32,
    information_limit: Option<f32>,
) -> Result<Array2<f32>, DeconvError> {
    background_filter(
        image,
        pixel_size,
        information_limit,
        &RadialAverage::default(),
        FilterResponse::Magnitude,
    )
}

/// Robust P-spline background with the power response.
pub fn pspline_background_filter(
    image: ArrayView2<f32>,
    pixel_size: f32,
    lambda: f32,
    order: u32,
    information_limit: Option<f32>,
) -> Result<Array2<f32>, DeconvError> {
    let estimator = PSplineBackground {
        lambda,
        order,
        ..Default::default()
    };
    background_filter(
        image,
        pixel_size,
        information_limit,
        &estimator,
        FilterResponse::Power,
    )
}

/// Postprocessing step selected in a restoration configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PostprocessConfig {
    Radial {
        #[serde(default)]
        average: RadialAverage,
        information_limit: Option<f32>,
    },
    RadialDifference {
        #[serde(default)]
        average: RadialAverage,
        information_limit: Option<f32>,
    },
    PSpline {
        #[serde(default)]
        background: PSplineBackground,
        information_limit: Option<f32>,
    },
}

impl PostprocessConfig {
    pub fn apply(
        &self,
        image: ArrayView2<f32>,
        pixel_size: f32,
    ) -> Result<Array2<f32>, DeconvError> {
        match self {
            PostprocessConfig::Radial {
                average,
                information_limit,
            } => background_filter(
                image,
                pixel_size,
                *information_limit,
                average,
                FilterResponse::Power,
            ),
            PostprocessConfig::RadialDifference {
                average,
                information_limit,
            } => background_filter(
                image,
                pixel_size,
                *information_limit,
                average,
                FilterResponse::Magnitude,
            ),
            PostprocessConfig::PSpline {
                background,
                information_limit,
            } => background_filter(
                image,
                pixel_size,
                *information_limit,
                background,
                FilterResponse::Power,
            ),
        }
    }
}
