//! Iterative probe deconvolution.
//!
//! # Solvers
//!
//! * **Additive Richardson-Lucy** ([`AdditiveRichardsonLucy`]): gradient-style update
//!   `o += α·(Aᵗ(b / A·o) - 1)`, optionally with a TV term.
//!
//! * **Multiplicative Richardson-Lucy** ([`MultiplicativeRichardsonLucy`]): the classic
//!   EM update with Biggs-Andrews acceleration, White's damping, a constant background
//!   and TV or Tikhonov-Miller regularization.
//!
//! * **FISTA** ([`Fista`]): least-squares data term with an approximate TV proximal step
//!   and Nesterov momentum.
//!
//! All solvers run a fixed number of iterations on top of one [`ConvolutionOperator`]
//! and return an array of the caller's image shape.

pub mod additive;
pub mod fista;
pub mod multiplicative;
pub mod operator;
pub mod regularization;

pub use additive::AdditiveRichardsonLucy;
pub use fista::Fista;
pub use multiplicative::MultiplicativeRichardsonLucy;
pub use operator::ConvolutionOperator;
pub use regularization::{Regularization, Regularizer};

use crate::error::DeconvError;
use crate::progress::SolverContext;
use cancellable_loops::iterate_cancellable;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Floor for predicted intensities before they are used as denominators.
pub(crate) const INTENSITY_FLOOR: f32 = 1e-9;

/// A deconvolution algorithm with its parameters.
pub trait Deconvolver {
    /// Human-readable name used in progress reports.
    fn name(&self) -> &'static str;

    /// Restores `image` blurred by `probe`. Both grids must have the same shape.
    ///
    /// # Errors
    /// Configuration errors from [`ConvolutionOperator::new`], or
    /// [`DeconvError::Cancelled`] when the context's abort flag was raised.
    fn deconvolve(
        &self,
        image: ArrayView2<f32>,
        probe: ArrayView2<f32>,
        ctx: &SolverContext,
    ) -> Result<Array2<f32>, DeconvError>;
}

/// Solver selection for configuration-driven runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeconvolutionMethod {
    Additive(AdditiveRichardsonLucy),
    Multiplicative(MultiplicativeRichardsonLucy),
    Fista(Fista),
}

impl Default for DeconvolutionMethod {
    fn default() -> Self {
        DeconvolutionMethod::Multiplicative(MultiplicativeRichardsonLucy::default())
    }
}

impl DeconvolutionMethod {
    pub fn deconvolver(&self) -> &dyn Deconvolver {
        match self {
            DeconvolutionMethod::Additive(d) => d,
            DeconvolutionMethod::Multiplicative(d) => d,
            DeconvolutionMethod::Fista(d) => d,
        }
    }
}

/// Drives `step` for `iterations` steps, reporting progress and honouring the abort flag.
pub(crate) fn run_iterations<S, F>(
    solver: &'static str,
    init: S,
    iterations: usize,
    ctx: &SolverContext,
    mut step: F,
) -> Result<S, DeconvError>
where
    F: FnMut(usize, S) -> S,
{
    let run = iterate_cancellable(init, iterations, ctx.abort_flag, |i, state| {
        let next = step(i, state);
        ctx.reporter.iteration(solver, i + 1, iterations);
        next
    });
    ctx.reporter.finished(solver);

    if run.aborted {
        log::info!("{solver} aborted after {} iterations", run.completed);
        return Err(DeconvError::Cancelled {
            solver,
            completed: run.completed,
            total: iterations,
        });
    }
    Ok(run.state)
}

/// Additive Richardson-Lucy with default context (progress logged at debug level).
///
/// See [`AdditiveRichardsonLucy`] for the parameters.
pub fn richardson_lucy_additive(
    image: ArrayView2<f32>,
    probe: ArrayView2<f32>,
    iterations: usize,
    lambda: f32,
    regularization: Regularization,
    alpha: f32,
    boundary_handling: bool,
) -> Result<Array2<f32>, DeconvError> {
    AdditiveRichardsonLucy {
        iterations,
        lambda,
        regularization,
        alpha,
        boundary_handling,
    }
    .deconvolve(image, probe, &SolverContext::default())
}

/// Multiplicative Richardson-Lucy with default context.
///
/// See [`MultiplicativeRichardsonLucy`] for the parameters.
#[allow(clippy::too_many_arguments)]
pub fn richardson_lucy_multiplicative(
    image: ArrayView2<f32>,
    probe: ArrayView2<f32>,
    iterations: usize,
    lambda: f32,
    regularization: Regularization,
    pixel_size: f32,
    wavelength: f32,
    acceleration: bool,
    boundary_handling: bool,
    damping_threshold: Option<f32>,
    background_level: f32,
) -> Result<Array2<f32>, DeconvError> {
    MultiplicativeRichardsonLucy {
        iterations,
        lambda,
        regularization,
        pixel_size,
        wavelength,
        acceleration,
        boundary_handling,
        damping_threshold,
        background_level,
    }
    .deconvolve(image, probe, &SolverContext::default())
}

/// FISTA with TV regularization and default context.
pub fn fista(
    image: ArrayView2<f32>,
    probe: ArrayView2<f32>,
    iterations: usize,
    lambda: f32,
    boundary_handling: bool,
) -> Result<Array2<f32>, DeconvError> {
    Fista {
        iterations,
        lambda,
        boundary_handling,
    }
    .deconvolve(image, probe, &SolverContext::default())
}

/// Small blurred test scenes shared by the solver tests.
#[cfg(test)]
pub(crate) mod test_scenes {
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Unit-sum Gaussian centred on the grid.
    pub fn gaussian_probe(shape: (usize, usize), sigma: f32) -> Array2<f32> {
        let (cy, cx) = (shape.0 / 2, shape.1 / 2);
        let mut probe = Array2::from_shape_fn(shape, |(i, j)| {
            let dy = i as f32 - cy as f32;
            let dx = j as f32 - cx as f32;
            (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
        });
        let sum = probe.sum();
        probe.mapv_inplace(|v| v / sum);
        probe
    }

    /// Bright dots on a uniform floor, like atomic columns in a HAADF image.
    pub fn dots(shape: (usize, usize), spacing: usize) -> Array2<f32> {
        Array2::from_shape_fn(shape, |(i, j)| {
            if i % spacing == spacing / 2 && j % spacing == spacing / 2 {
                10.0
            } else {
                1.0
            }
        })
    }

    pub fn with_noise(data: &Array2<f32>, amplitude: f32, seed: u64) -> Array2<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        data.mapv(|v| (v + amplitude * (rng.random::<f32>() - 0.5)).max(0.0))
    }

    pub fn mse(a: &Array2<f32>, b: &Array2<f32>) -> f32 {
        (a - b).mapv(|d| d * d).mean().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::test_scenes::*;
    use super::*;
    use crate::progress::{LogReporter, Reporter};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::RwLock;

    fn all_methods() -> Vec<DeconvolutionMethod> {
        vec![
            DeconvolutionMethod::Additive(AdditiveRichardsonLucy {
                iterations: 3,
                regularization: Regularization::TotalVariation,
                lambda: 0.002,
                ..Default::default()
            }),
            DeconvolutionMethod::Multiplicative(MultiplicativeRichardsonLucy {
                iterations: 4,
                acceleration: true,
                regularization: Regularization::TikhonovMiller,
                lambda: 0.002,
                damping_threshold: Some(1.0),
                ..Default::default()
            }),
            DeconvolutionMethod::Fista(Fista {
                iterations: 3,
                ..Default::default()
            }),
        ]
    }

    #[test]
    fn every_solver_preserves_shape() {
        for shape in [(100, 100), (37, 53), (9, 15), (64, 40)] {
            let image = dots(shape, 6);
            let probe = gaussian_probe(shape, 1.2);
            for boundary_handling in [false, true] {
                for mut method in all_methods() {
                    match &mut method {
                        DeconvolutionMethod::Additive(d) => d.boundary_handling = boundary_handling,
                        DeconvolutionMethod::Multiplicative(d) => {
                            d.boundary_handling = boundary_handling
                        }
                        DeconvolutionMethod::Fista(d) => d.boundary_handling = boundary_handling,
                    }
                    let ctx = SolverContext::default();
                    let restored = method
                        .deconvolver()
                        .deconvolve(image.view(), probe.view(), &ctx)
                        .unwrap();
                    assert_eq!(
                        restored.dim(),
                        shape,
                        "{} changed the shape (boundary handling {boundary_handling})",
                        method.deconvolver().name()
                    );
                    assert!(restored.iter().all(|v| v.is_finite()));
                }
            }
        }
    }

    #[test]
    fn every_solver_rejects_shape_mismatch() {
        let image = dots((16, 16), 4);
        let probe = gaussian_probe((16, 12), 1.0);
        for method in all_methods() {
            let err = method
                .deconvolver()
                .deconvolve(image.view(), probe.view(), &SolverContext::default())
                .unwrap_err();
            assert!(err.is_configuration());
        }
    }

    #[test]
    fn abort_flag_cancels_without_result() {
        let image = dots((32, 32), 8);
        let probe = gaussian_probe((32, 32), 1.0);
        let flag = AtomicBool::new(true);
        let ctx = SolverContext::new(&LogReporter).with_abort_flag(&flag);
        let err = MultiplicativeRichardsonLucy::default()
            .deconvolve(image.view(), probe.view(), &ctx)
            .unwrap_err();
        assert!(matches!(err, DeconvError::Cancelled { completed: 0, .. }));
        assert!(flag.load(Ordering::Relaxed));
    }

    #[test]
    fn progress_lock_sees_completion() {
        struct Counting(RwLock<Vec<usize>>);
        impl Reporter for Counting {
            fn iteration(&self, _solver: &str, completed: usize, _total: usize) {
                self.0.write().unwrap().push(completed);
            }
        }

        let image = dots((16, 16), 4);
        let probe = gaussian_probe((16, 16), 1.0);
        let counting = Counting(RwLock::new(Vec::new()));
        Fista {
            iterations: 3,
            ..Default::default()
        }
        .deconvolve(image.view(), probe.view(), &SolverContext::new(&counting))
        .unwrap();
        assert_eq!(*counting.0.read().unwrap(), vec![1, 2, 3]);

        let lock: RwLock<Option<f32>> = RwLock::new(None);
        AdditiveRichardsonLucy::default()
            .deconvolve(image.view(), probe.view(), &SolverContext::new(&lock))
            .unwrap();
        assert_eq!(*lock.read().unwrap(), None);
    }

    #[test]
    fn method_config_roundtrips_through_json() {
        let method = DeconvolutionMethod::Multiplicative(MultiplicativeRichardsonLucy {
            damping_threshold: Some(1.0),
            regularization: Regularization::TotalVariation,
            ..Default::default()
        });
        let json = serde_json::to_string(&method).unwrap();
        let back: DeconvolutionMethod = serde_json::from_str(&json).unwrap();
        assert_eq!(back, method);

        let partial: DeconvolutionMethod =
            serde_json::from_str(r#"{"Fista":{"iterations":7}}"#).unwrap();
        assert_eq!(
            partial,
            DeconvolutionMethod::Fista(Fista {
                iterations: 7,
                ..Default::default()
            })
        );
    }
}
