use super::regularization::total_variation_curvature;
use super::{run_iterations, ConvolutionOperator, Deconvolver};
use crate::error::DeconvError;
use crate::progress::SolverContext;
use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

/// FISTA for `‖A·x - b‖² + λ·TV(x)`.
///
/// The TV proximal step is approximated by one explicit curvature step of size
/// `λ / L`, where `L` is the Lipschitz constant of the data term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fista {
    pub iterations: usize,
    pub lambda: f32,
    pub boundary_handling: bool,
}

impl Default for Fista {
    fn default() -> Self {
        Fista {
            iterations: 15,
            lambda: 0.001,
            boundary_handling: false,
        }
    }
}

struct Momentum {
    x: Array2<f32>,
    y: Array2<f32>,
    t: f32,
}

impl Deconvolver for Fista {
    fn name(&self) -> &'static str {
        "FISTA"
    }

    fn deconvolve(
        &self,
        image: ArrayView2<f32>,
        probe: ArrayView2<f32>,
        ctx: &SolverContext,
    ) -> Result<Array2<f32>, DeconvError> {
        let op = ConvolutionOperator::new(image, probe, self.boundary_handling)?;
        let step = 1.0 / op.lipschitz();
        let tv_step = self.lambda * step;
        log::info!(
            "{} for {} iterations (λ = {}, step {step})",
            self.name(),
            self.iterations,
            self.lambda
        );

        let init = Momentum {
            x: op.image().clone(),
            y: op.image().clone(),
            t: 1.0,
        };

        let result = run_iterations(self.name(), init, self.iterations, ctx, |_, state| {
            let residual = op.forward(&state.y) - op.image();
            let mut next = &state.y - &(op.adjoint(&residual) * step);
            let curvature = total_variation_curvature(&next);
            next.zip_mut_with(&curvature, |v, &c| *v += tv_step * c);

            let t_next = (1.0 + (1.0 + 4.0 * state.t * state.t).sqrt()) / 2.0;
            let beta = (state.t - 1.0) / t_next;
            let mut y = next.clone();
            Zip::from(&mut y)
                .and(&state.x)
                .for_each(|y, &x| *y += beta * (*y - x));

            Momentum {
                x: next,
                y,
                t: t_next,
            }
        })?;

        Ok(op.crop(&result.x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deconvolution::fista;
    use crate::deconvolution::test_scenes::*;

    fn residual_norm(op: &ConvolutionOperator, x: &Array2<f32>) -> f32 {
        (op.forward(x) - op.image()).mapv(|r| r * r).sum().sqrt()
    }

    #[test]
    fn iterations_shrink_the_data_residual() {
        let shape = (32, 32);
        let truth = dots(shape, 8);
        let probe = gaussian_probe(shape, 1.5);
        let blurred = ConvolutionOperator::new(truth.view(), probe.view(), false)
            .unwrap()
            .forward(&truth);
        let op = ConvolutionOperator::new(blurred.view(), probe.view(), false).unwrap();

        let restored = fista(blurred.view(), probe.view(), 20, 0.001, false).unwrap();
        assert!(residual_norm(&op, &restored) < residual_norm(&op, &blurred));
        assert!(mse(&restored, &truth) < mse(&blurred, &truth));
    }

    #[test]
    fn zero_iterations_return_the_input() {
        let shape = (10, 14);
        let image = dots(shape, 3);
        let probe = gaussian_probe(shape, 1.0);
        let restored = fista(image.view(), probe.view(), 0, 0.001, true).unwrap();
        assert_eq!(restored, image);
    }
}
