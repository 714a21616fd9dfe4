//! Error type shared by the probe model, the solvers and the postprocessing filters.
//!
//! Numerical degeneracies (near-zero divisors, empty denominators) are never reported
//! here, they are clamped where they occur. Only inputs that cannot be processed at all
//! produce an error, and they do so before any iteration runs.

/// Errors returned by the restoration core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeconvError {
    /// Image and probe do not live on the same grid.
    #[error("image shape {image:?} does not match probe shape {probe:?}")]
    ShapeMismatch {
        image: (usize, usize),
        probe: (usize, usize),
    },

    /// The image has no samples along at least one axis.
    #[error("image is empty (shape {0:?})")]
    EmptyImage((usize, usize)),

    /// The abort flag was raised between two iterations.
    #[error("{solver} cancelled after {completed} of {total} iterations")]
    Cancelled {
        solver: &'static str,
        completed: usize,
        total: usize,
    },
}

impl DeconvError {
    /// `true` for errors caused by an unusable image/probe configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DeconvError::ShapeMismatch { .. } | DeconvError::EmptyImage(_)
        )
    }
}

/// Checks that a grid has at least one sample along both axes.
pub(crate) fn ensure_not_empty(shape: (usize, usize)) -> Result<(), DeconvError> {
    if shape.0 == 0 || shape.1 == 0 {
        return Err(DeconvError::EmptyImage(shape));
    }
    Ok(())
}
