//! Regularization terms for the Richardson-Lucy and FISTA solvers.
//!
//! The variant is picked once per solver run from a [`Regularization`] tag; the solvers
//! then only talk to the [`Regularizer`] trait.

use ndarray::{Array2, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Stabilizes the gradient magnitude in the TV curvature.
const TV_EPSILON: f32 = 1e-8;
/// Lower bound of multiplicative divisors, keeps the update positive and finite.
pub const DIVISOR_FLOOR: f32 = 1e-6;

/// Coefficients `c_m` of the 9-point first-derivative stencil
/// `Σ c_m (u[i+m] - u[i-m])`, `m = 1..=4`.
const DERIVATIVE_STENCIL: [f32; 4] = [4.0 / 5.0, -1.0 / 5.0, 8.0 / 210.0, -1.0 / 280.0];

/// Which regularization a solver applies.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regularization {
    #[default]
    None,
    /// Total variation (curvature of the normalized gradient field).
    TotalVariation,
    /// Tikhonov-Miller (derivative energy scaled by optical constants).
    TikhonovMiller,
}

impl Display for Regularization {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Regularization::None => write!(f, "None"),
            Regularization::TotalVariation => write!(f, "TV"),
            Regularization::TikhonovMiller => write!(f, "TM"),
        }
    }
}

impl FromStr for Regularization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Regularization::None),
            "tv" | "total variation" => Ok(Regularization::TotalVariation),
            "tm" | "tikhonov-miller" => Ok(Regularization::TikhonovMiller),
            other => Err(format!("unknown regularization `{other}`")),
        }
    }
}

impl Regularization {
    /// Builds the strategy object for one solver run.
    ///
    /// `pixel_size` and `wavelength` (same length unit) are only used by Tikhonov-Miller.
    pub fn regularizer(
        self,
        lambda: f32,
        pixel_size: f32,
        wavelength: f32,
    ) -> Box<dyn Regularizer> {
        match self {
            Regularization::None => Box::new(NoRegularization),
            Regularization::TotalVariation => Box::new(TotalVariation { lambda }),
            Regularization::TikhonovMiller => Box::new(TikhonovMiller {
                lambda,
                pixel_size,
                wavelength,
            }),
        }
    }
}

/// Correction terms a regularizer contributes to a Richardson-Lucy update.
pub trait Regularizer: Send + Sync {
    /// Term added to the additive update, `None` when the variant has no additive form.
    fn additive_term(&self, estimate: &Array2<f32>) -> Option<Array2<f32>>;

    /// Divisor of the multiplicative update, already clamped to [`DIVISOR_FLOOR`].
    fn multiplicative_divisor(&self, estimate: &Array2<f32>) -> Option<Array2<f32>>;
}

pub struct NoRegularization;

impl Regularizer for NoRegularization {
    fn additive_term(&self, _estimate: &Array2<f32>) -> Option<Array2<f32>> {
        None
    }

    fn multiplicative_divisor(&self, _estimate: &Array2<f32>) -> Option<Array2<f32>> {
        None
    }
}

pub struct TotalVariation {
    pub lambda: f32,
}

impl Regularizer for TotalVariation {
    fn additive_term(&self, estimate: &Array2<f32>) -> Option<Array2<f32>> {
        Some(total_variation_curvature(estimate) * self.lambda)
    }

    fn multiplicative_divisor(&self, estimate: &Array2<f32>) -> Option<Array2<f32>> {
        let lambda = self.lambda;
        Some(
            total_variation_curvature(estimate)
                .mapv(|c| (1.0 - lambda * c).max(DIVISOR_FLOOR)),
        )
    }
}

pub struct TikhonovMiller {
    pub lambda: f32,
    pub pixel_size: f32,
    pub wavelength: f32,
}

impl Regularizer for TikhonovMiller {
    // The additive Richardson-Lucy engine has no Tikhonov-Miller form; the term is
    // skipped rather than approximated.
    fn additive_term(&self, _estimate: &Array2<f32>) -> Option<Array2<f32>> {
        None
    }

    fn multiplicative_divisor(&self, estimate: &Array2<f32>) -> Option<Array2<f32>> {
        Some(
            tikhonov_miller_term(estimate, self.lambda, self.pixel_size, self.wavelength)
                .mapv(|t| t.max(DIVISOR_FLOOR)),
        )
    }
}

/// Index `i + offset` wrapped into `0..len`.
fn wrap(i: usize, offset: isize, len: usize) -> usize {
    (i as isize + offset).rem_euclid(len as isize) as usize
}

/// Curvature `div(∇u / |∇u|)` of the TV functional.
///
/// Forward differences with periodic boundary for the gradient, backward differences
/// for the divergence.
pub fn total_variation_curvature(u: &Array2<f32>) -> Array2<f32> {
    let (rows, cols) = u.dim();
    let mut nx = Array2::<f32>::zeros((rows, cols));
    let mut ny = Array2::<f32>::zeros((rows, cols));

    Zip::indexed(&mut nx)
        .and(&mut ny)
        .for_each(|(i, j), nx, ny| {
            let centre = u[[i, j]];
            let dx = u[[i, wrap(j, 1, cols)]] - centre;
            let dy = u[[wrap(i, 1, rows), j]] - centre;
            let norm = (dx * dx + dy * dy + TV_EPSILON).sqrt();
            *nx = dx / norm;
            *ny = dy / norm;
        });

    Array2::from_shape_fn((rows, cols), |(i, j)| {
        (nx[[i, j]] - nx[[i, wrap(j, -1, cols)]]) + (ny[[i, j]] - ny[[wrap(i, -1, rows), j]])
    })
}

/// First-derivative sum along one axis with the 9-point stencil and periodic boundary.
fn derivative_along(u: &Array2<f32>, axis: Axis) -> Array2<f32> {
    let (rows, cols) = u.dim();
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        DERIVATIVE_STENCIL
            .iter()
            .enumerate()
            .map(|(m, c)| {
                let m = m as isize + 1;
                let (ahead, behind) = if axis == Axis(1) {
                    (u[[i, wrap(j, m, cols)]], u[[i, wrap(j, -m, cols)]])
                } else {
                    (u[[wrap(i, m, rows), j]], u[[wrap(i, -m, rows), j]])
                };
                c * (ahead - behind)
            })
            .sum()
    })
}

/// Tikhonov-Miller term `1 - 2λ·D(u)` used as divisor of the multiplicative update.
///
/// `D(u)` is the sum of the first derivatives along both axes, each divided by
/// `pixel_size²`, scaled by `wavelength / 4π`. `pixel_size` and `wavelength` must
/// share a length unit.
pub fn tikhonov_miller_term(
    u: &Array2<f32>,
    lambda: f32,
    pixel_size: f32,
    wavelength: f32,
) -> Array2<f32> {
    let spacing = pixel_size * pixel_size + 1e-16;
    let scale = wavelength / (4.0 * PI);

    let mut sum = derivative_along(u, Axis(1));
    sum += &derivative_along(u, Axis(0));
    sum.mapv(|d| 1.0 - 2.0 * lambda * (d / spacing) * scale + 1e-16)
}
