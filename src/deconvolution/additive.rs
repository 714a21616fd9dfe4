use super::{run_iterations, ConvolutionOperator, Deconvolver, Regularization, INTENSITY_FLOOR};
use crate::error::DeconvError;
use crate::progress::SolverContext;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Additive Richardson-Lucy: `o ← o + α·(Aᵗ(b / A·o) - 1 + λ·curvature(o))`.
///
/// Only total variation contributes an additive term; Tikhonov-Miller is accepted and
/// ignored. The estimate is not kept non-negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdditiveRichardsonLucy {
    pub iterations: usize,
    pub lambda: f32,
    pub regularization: Regularization,
    /// Step size of the update.
    pub alpha: f32,
    pub boundary_handling: bool,
}

impl Default for AdditiveRichardsonLucy {
    fn default() -> Self {
        AdditiveRichardsonLucy {
            iterations: 15,
            lambda: 0.0,
            regularization: Regularization::None,
            alpha: 1.0,
            boundary_handling: false,
        }
    }
}

impl Deconvolver for AdditiveRichardsonLucy {
    fn name(&self) -> &'static str {
        "additive Richardson-Lucy"
    }

    fn deconvolve(
        &self,
        image: ArrayView2<f32>,
        probe: ArrayView2<f32>,
        ctx: &SolverContext,
    ) -> Result<Array2<f32>, DeconvError> {
        let op = ConvolutionOperator::new(image, probe, self.boundary_handling)?;
        // Tikhonov-Miller has no additive form, so the optical constants are irrelevant.
        let regularizer = self.regularization.regularizer(self.lambda, 1.0, 1.0);
        log::info!(
            "{} for {} iterations ({}, λ = {}, α = {})",
            self.name(),
            self.iterations,
            self.regularization,
            self.lambda,
            self.alpha
        );

        let alpha = self.alpha;
        let init = op.image().clone();
        let object = run_iterations(self.name(), init, self.iterations, ctx, |_, object| {
            let blurred = op.forward(&object).mapv(|v| v.max(INTENSITY_FLOOR));
            let ratio = op.image() / &blurred;
            let mut update = op.adjoint(&ratio) - 1.0;
            if let Some(term) = regularizer.additive_term(&object) {
                update += &term;
            }
            update *= alpha;
            object + update
        })?;

        Ok(op.crop(&object))
    }
}
