//! # stem-deconvolution
//!
//! Restoration of HAADF-STEM images blurred by the finite electron probe.
//!
//! The probe is modelled from the microscope optics ([`psf`]), the image is deconvolved
//! with one of three iterative solvers ([`deconvolution`]) and the result can be cleaned
//! up with a Fourier-space background filter ([`postprocess`]). [`restore`] chains the
//! three for configuration-driven runs.
//!
//! ```no_run
//! use ndarray::Array2;
//! use stem_deconvolution::{restore, Image, RestorationConfig, SolverContext};
//!
//! let image = Image::new(Array2::from_elem((256, 256), 1.0), 0.02);
//! let restored = restore(&image, &RestorationConfig::default(), &SolverContext::default())?;
//! assert_eq!(restored.dim(), image.dim());
//! # Ok::<(), stem_deconvolution::DeconvError>(())
//! ```
//!
//! Progress is reported through [`progress::Reporter`]; the library only emits `log`
//! records and never installs a logger.

pub mod config;
pub mod deconvolution;
pub mod error;
pub mod image;
pub mod math_tools;
pub mod pipeline;
pub mod postprocess;
pub mod progress;
pub mod psf;

pub use config::RestorationConfig;
pub use deconvolution::{
    fista, richardson_lucy_additive, richardson_lucy_multiplicative, Deconvolver,
    DeconvolutionMethod, Regularization,
};
pub use error::DeconvError;
pub use image::Image;
pub use pipeline::restore;
pub use postprocess::{
    pspline_background_filter, radial_background_filter, radial_difference_filter,
    PostprocessConfig,
};
pub use progress::{LogReporter, Reporter, SolverContext};
pub use psf::{ctf, probe, wavelength, MicroscopeParameters};
