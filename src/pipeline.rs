//! End-to-end restoration of one HAADF image.

use crate::config::RestorationConfig;
use crate::deconvolution::DeconvolutionMethod;
use crate::error::{ensure_not_empty, DeconvError};
use crate::image::Image;
use crate::progress::SolverContext;
use crate::psf::{ctf, probe};

/// Models the probe from the microscope parameters, deconvolves and optionally filters.
///
/// Steps: CTF on the image's frequency grid, probe intensity, deconvolution with the
/// configured method, magnitude of the result, background filter. For the
/// multiplicative solver the optical constants used by Tikhonov-Miller are taken from
/// the image and microscope, and the background level from the configured percentile
/// of the image (when set).
///
/// # Errors
/// [`DeconvError::EmptyImage`] for an image without samples, or whatever the solver
/// returns (including [`DeconvError::Cancelled`]).
pub fn restore(
    image: &Image,
    config: &RestorationConfig,
    ctx: &SolverContext,
) -> Result<Image, DeconvError> {
    ensure_not_empty(image.dim())?;
    log::info!(
        "restoring {:?} image at {} nm/pixel, {} kV",
        image.dim(),
        image.pixel_size,
        config.microscope.voltage
    );

    let transfer = ctf(image.dim(), image.pixel_size as f64, &config.microscope);
    let probe = probe(&transfer);

    let mut method = config.method.clone();
    if let DeconvolutionMethod::Multiplicative(solver) = &mut method {
        solver.pixel_size = image.pixel_size;
        solver.wavelength = config.microscope.wavelength() as f32;
        if let Some(percent) = config.background_percentile {
            solver.background_level = image.percentile(percent).unwrap_or(0.0);
            log::info!(
                "background level {} ({percent}th percentile)",
                solver.background_level
            );
        }
    }

    let restored = method
        .deconvolver()
        .deconvolve(image.view(), probe.view(), ctx)?
        .mapv(f32::abs);

    let data = match &config.postprocess {
        Some(postprocess) => postprocess.apply(restored.view(), image.pixel_size)?,
        None => restored,
    };
    Ok(Image::new(data, image.pixel_size))
}
