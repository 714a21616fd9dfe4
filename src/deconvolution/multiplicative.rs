use super::{run_iterations, ConvolutionOperator, Deconvolver, Regularization, INTENSITY_FLOOR};
use crate::error::DeconvError;
use crate::progress::SolverContext;
use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

/// Multiplicative (EM) Richardson-Lucy.
///
/// `o ← o · Aᵗ(b / (A·o + background)) / divisor`, where the divisor comes from the
/// TV or Tikhonov-Miller regularizer. Optional extras:
///
/// * `acceleration`: Biggs-Andrews extrapolation from the third iteration on, with
///   `α = (i - 1) / (i + 2)`. Negative extrapolated pixels are clipped to zero; that is
///   the only place the estimate is kept non-negative.
/// * `damping_threshold`: White's damped update. Where the data agree with the model
///   within `threshold / sqrt(model)` the ratio is forced to 1.
/// * `background_level`: constant added to the model prediction.
///
/// `pixel_size` and `wavelength` share one length unit and only matter for Tikhonov-Miller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiplicativeRichardsonLucy {
    pub iterations: usize,
    pub lambda: f32,
    pub regularization: Regularization,
    pub pixel_size: f32,
    pub wavelength: f32,
    pub acceleration: bool,
    pub boundary_handling: bool,
    pub damping_threshold: Option<f32>,
    pub background_level: f32,
}

impl Default for MultiplicativeRichardsonLucy {
    fn default() -> Self {
        MultiplicativeRichardsonLucy {
            iterations: 15,
            lambda: 0.0,
            regularization: Regularization::None,
            pixel_size: 1.0,
            wavelength: 1.0,
            acceleration: false,
            boundary_handling: false,
            damping_threshold: None,
            background_level: 0.0,
        }
    }
}

struct Estimate {
    object: Array2<f32>,
    /// Object one step back, only tracked with acceleration.
    previous: Option<Array2<f32>>,
}

impl MultiplicativeRichardsonLucy {
    fn predict(&self, i: usize, state: &Estimate) -> Array2<f32> {
        match &state.previous {
            Some(previous) if i > 1 => {
                let alpha = (i as f32 - 1.0) / (i as f32 + 2.0);
                let mut prediction = state.object.clone();
                Zip::from(&mut prediction)
                    .and(previous)
                    .for_each(|p, &prev| *p = (*p + alpha * (*p - prev)).max(0.0));
                prediction
            }
            _ => state.object.clone(),
        }
    }

    fn ratio(&self, image: &Array2<f32>, model: &Array2<f32>) -> Array2<f32> {
        let background = self.background_level;
        let damping = self.damping_threshold;
        let mut ratio = Array2::<f32>::zeros(image.dim());
        Zip::from(&mut ratio)
            .and(image)
            .and(model)
            .for_each(|r, &b, &m| {
                let m = (m + background).max(INTENSITY_FLOOR);
                *r = b / m;
                if let Some(threshold) = damping {
                    if (*r - 1.0).abs() < threshold / m.sqrt() {
                        *r = 1.0;
                    }
                }
            });
        ratio
    }
}

impl Deconvolver for MultiplicativeRichardsonLucy {
    fn name(&self) -> &'static str {
        "multiplicative Richardson-Lucy"
    }

    fn deconvolve(
        &self,
        image: ArrayView2<f32>,
        probe: ArrayView2<f32>,
        ctx: &SolverContext,
    ) -> Result<Array2<f32>, DeconvError> {
        let op = ConvolutionOperator::new(image, probe, self.boundary_handling)?;
        let regularizer = self
            .regularization
            .regularizer(self.lambda, self.pixel_size, self.wavelength);
        log::info!(
            "{} for {} iterations ({}, λ = {}, acceleration {}, damping {:?}, background {})",
            self.name(),
            self.iterations,
            self.regularization,
            self.lambda,
            self.acceleration,
            self.damping_threshold,
            self.background_level
        );

        let init = Estimate {
            object: op.image().clone(),
            previous: self.acceleration.then(|| op.image().clone()),
        };

        let result = run_iterations(self.name(), init, self.iterations, ctx, |i, state| {
            let estimate = self.predict(i, &state);
            let ratio = self.ratio(op.image(), &op.forward(&estimate));
            let gradient = op.adjoint(&ratio);
            let divisor = regularizer.multiplicative_divisor(&estimate);

            let mut object = estimate * &gradient;
            if let Some(divisor) = divisor {
                object /= &divisor;
            }

            Estimate {
                previous: state.previous.map(|_| state.object),
                object,
            }
        })?;

        Ok(op.crop(&result.object))
    }
}
