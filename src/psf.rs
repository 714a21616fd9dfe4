//! Probe model: relativistic electron wavelength, contrast transfer function (CTF) of
//! the probe-forming lens and the probe intensity kernel used by the solvers.
//!
//! The CTF is evaluated in Ångström internally; all public parameters use the units
//! a microscope operator reads off the instrument (kV, mm, nm, rad).

use crate::math_tools::{fftshift, Fft2d};
use ndarray::Array2;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Electron rest energy in keV.
const ELECTRON_REST_ENERGY_KEV: f64 = 510.99906;
/// Planck constant times speed of light in keV·Å.
const HC_KEV_ANGSTROM: f64 = 12.3984244;
/// Apertures at or below this value (rad) mean "no aperture".
const MIN_APERTURE_RAD: f64 = 1.0e-4;

const NM_TO_ANGSTROM: f64 = 10.0;
const MM_TO_ANGSTROM: f64 = 1.0e7;

/// Relativistic electron wavelength in nm for an accelerating voltage in kV.
///
/// # Example
/// ```
/// let lambda = stem_deconvolution::wavelength(300.0);
/// assert!((lambda - 1.9687e-3).abs() < 1e-6);
/// ```
pub fn wavelength(voltage_kv: f64) -> f64 {
    let angstrom = HC_KEV_ANGSTROM
        / (voltage_kv * (2.0 * ELECTRON_REST_ENERGY_KEV + voltage_kv)).sqrt();
    angstrom / NM_TO_ANGSTROM
}

/// Amplitude (nm) and azimuth (rad) of a non-round aberration.
#[derive(Serialize, Deserialize, Default, PartialEq, Debug, Clone, Copy)]
pub struct Aberration {
    pub amplitude: f64,
    pub angle: f64,
}

impl Aberration {
    pub fn new(amplitude: f64, angle: f64) -> Self {
        Aberration { amplitude, angle }
    }
}

/// Optical configuration of the probe-forming system.
///
/// # Fields
/// - `voltage`: Accelerating voltage in kV.
/// - `cs3`, `cs5`: Third- and fifth-order spherical aberration in mm.
/// - `defocus`: Defocus in nm (negative is underfocus).
/// - `aperture`: Objective (probe-forming) aperture semi-angle in rad.
/// - `two_fold_astigmatism` (A2), `coma` (B2), `three_fold_astigmatism` (A3): nm / rad.
/// - `focal_spread`: Chromatic focal spread in nm.
/// - `convergence_angle`: Source-size convergence semi-angle in rad.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct MicroscopeParameters {
    pub voltage: f64,
    pub cs3: f64,
    pub cs5: f64,
    pub defocus: f64,
    pub aperture: f64,
    pub two_fold_astigmatism: Aberration,
    pub coma: Aberration,
    pub three_fold_astigmatism: Aberration,
    pub focal_spread: f64,
    pub convergence_angle: f64,
}

impl Default for MicroscopeParameters {
    fn default() -> Self {
        MicroscopeParameters {
            voltage: 300.0,
            cs3: 0.5,
            cs5: 0.0,
            defocus: -44.0,
            aperture: 16.0e-3,
            two_fold_astigmatism: Aberration::default(),
            coma: Aberration::default(),
            three_fold_astigmatism: Aberration::default(),
            focal_spread: 0.0,
            convergence_angle: 0.0,
        }
    }
}

impl MicroscopeParameters {
    /// Electron wavelength in nm for the configured voltage.
    pub fn wavelength(&self) -> f64 {
        wavelength(self.voltage)
    }

    /// Squared spatial-frequency cutoff (1/Å²) imposed by the aperture.
    fn cutoff_squared(&self, wavelength_a: f64) -> f64 {
        if self.aperture > MIN_APERTURE_RAD {
            (self.aperture / wavelength_a).powi(2)
        } else {
            f64::INFINITY
        }
    }
}

/// Sample frequencies in numpy `fftfreq` order: `0, 1, …, (n-1)/2, -(n/2), …, -1`,
/// divided by `n·spacing`.
fn fft_frequencies(n: usize, spacing: f64) -> Vec<f64> {
    (0..n)
        .map(|k| {
            let signed = if k <= (n - 1) / 2 {
                k as f64
            } else {
                k as f64 - n as f64
            };
            signed / (n as f64 * spacing)
        })
        .collect()
}

/// Computes the complex contrast transfer function on the FFT grid of an image.
///
/// The zero frequency sits at index `(0, 0)`. Outside the aperture cutoff the CTF is
/// exactly zero.
///
/// # Arguments
/// - `shape`: `(rows, cols)` of the image.
/// - `pixel_size`: Sampling distance in nm.
/// - `params`: Optical configuration.
///
/// # Returns
/// `envelope · exp(-iχ)` masked by the aperture.
pub fn ctf(
    shape: (usize, usize),
    pixel_size: f64,
    params: &MicroscopeParameters,
) -> Array2<Complex32> {
    let (rows, cols) = shape;
    if rows == 0 || cols == 0 {
        return Array2::zeros(shape);
    }

    let wal = params.wavelength() * NM_TO_ANGSTROM;
    let wal2 = wal * wal;
    let wal3 = wal2 * wal;
    let pixel_a = pixel_size * NM_TO_ANGSTROM;

    let ky = fft_frequencies(rows, pixel_a);
    let kx = fft_frequencies(cols, pixel_a);
    let kmax2 = params.cutoff_squared(wal);

    let cs3 = params.cs3 * MM_TO_ANGSTROM;
    let cs5 = params.cs5 * MM_TO_ANGSTROM;
    let defocus = params.defocus * NM_TO_ANGSTROM;
    let a2 = params.two_fold_astigmatism;
    let b2 = params.coma;
    let a3 = params.three_fold_astigmatism;

    // spatial coherence
    let es1 = PI * params.convergence_angle * cs3 * wal2;
    let es3 = PI * params.convergence_angle * defocus;
    // temporal coherence
    let focal_spread = params.focal_spread * NM_TO_ANGSTROM;
    let ec = -0.5 * PI * PI * wal2 * focal_spread * focal_spread;

    Array2::from_shape_fn(shape, |(i, j)| {
        let k2 = kx[j] * kx[j] + ky[i] * ky[i];
        if k2 >= kmax2 {
            return Complex32::new(0.0, 0.0);
        }
        let k = k2.sqrt();
        let phi = ky[i].atan2(kx[j]);

        let chi = 0.5 * defocus * k2 * wal2
            + 0.25 * cs3 * k2 * k2 * wal2 * wal2
            + 0.16667 * cs5 * k2 * k2 * k2 * wal3 * wal3
            + 0.5 * a2.amplitude * NM_TO_ANGSTROM * k2 * wal2 * (2.0 * (phi - a2.angle)).cos()
            + 0.3333 * b2.amplitude * NM_TO_ANGSTROM * k2 * k * wal3 * (phi - b2.angle).cos()
            + 0.3333 * a3.amplitude * NM_TO_ANGSTROM * k2 * k * wal3 * (3.0 * (phi - a3.angle)).cos();
        let chi = chi * 2.0 * PI / wal;

        let spatial = (-k2 * (es1 * k2 + es3).powi(2)).exp();
        let chromatic = (ec * k2 * k2).exp();
        let envelope = spatial * chromatic;

        Complex32::new(
            (envelope * chi.cos()) as f32,
            (-envelope * chi.sin()) as f32,
        )
    })
}

/// Derives the probe intensity kernel from a CTF.
///
/// Inverse transform, move the probe to the grid centre and take the squared magnitude.
/// The kernel is not normalized here; the convolution operator does that.
pub fn probe(ctf: &Array2<Complex32>) -> Array2<f32> {
    let (rows, cols) = ctf.dim();
    if rows == 0 || cols == 0 {
        return Array2::zeros((rows, cols));
    }
    let wave = Fft2d::new((rows, cols)).inverse(ctf);
    fftshift(&wave.view()).mapv(|c| c.norm_sqr())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn aberration_free() -> MicroscopeParameters {
        MicroscopeParameters {
            voltage: 200.0,
            cs3: 0.0,
            cs5: 0.0,
            defocus: 0.0,
            aperture: 20.0e-3,
            ..MicroscopeParameters::default()
        }
    }

    #[test]
    fn wavelength_matches_tabulated_values() {
        assert_relative_eq!(wavelength(300.0), 1.9687e-3, max_relative = 1e-4);
        assert_relative_eq!(wavelength(200.0), 2.5079e-3, max_relative = 1e-4);
        assert_relative_eq!(wavelength(100.0), 3.7014e-3, max_relative = 1e-4);
    }

    #[test]
    fn wavelength_decreases_with_voltage() {
        let mut previous = wavelength(1.0);
        for kv in (2..400).step_by(7) {
            let current = wavelength(kv as f64);
            assert!(current < previous, "not decreasing at {kv} kV");
            previous = current;
        }
    }

    #[test]
    fn fft_frequencies_follow_numpy_layout() {
        assert_eq!(fft_frequencies(4, 1.0), vec![0.0, 0.25, -0.5, -0.25]);
        assert_eq!(fft_frequencies(5, 0.5), vec![0.0, 0.4, 0.8, -0.8, -0.4]);
    }

    #[test]
    fn ctf_is_zero_beyond_aperture() {
        let params = MicroscopeParameters::default();
        let shape = (64, 48);
        let pixel_size = 0.02;
        let ctf = ctf(shape, pixel_size, &params);

        let wal = params.wavelength() * NM_TO_ANGSTROM;
        let kmax = params.aperture / wal;
        let ky = fft_frequencies(shape.0, pixel_size * NM_TO_ANGSTROM);
        let kx = fft_frequencies(shape.1, pixel_size * NM_TO_ANGSTROM);

        let mut inside = 0;
        for ((i, j), value) in ctf.indexed_iter() {
            let k = (kx[j] * kx[j] + ky[i] * ky[i]).sqrt();
            if k >= kmax {
                assert_eq!(value.norm(), 0.0, "non-zero CTF at ({i}, {j})");
            } else {
                inside += 1;
            }
        }
        assert!(inside > 0 && inside < shape.0 * shape.1);
    }

    #[test]
    fn aberration_free_ctf_is_ideal_low_pass() {
        let ctf = ctf((32, 32), 0.05, &aberration_free());
        let mut passed = 0;
        for value in ctf.iter() {
            if value.norm() > 0.0 {
                assert_abs_diff_eq!(value.re, 1.0, epsilon = 1e-6);
                assert_abs_diff_eq!(value.im, 0.0, epsilon = 1e-6);
                passed += 1;
            }
        }
        assert!(passed > 1);
        assert_eq!(ctf[[0, 0]], Complex32::new(1.0, 0.0));
    }

    #[test]
    fn tiny_aperture_means_no_cutoff() {
        let params = MicroscopeParameters {
            aperture: 0.0,
            ..aberration_free()
        };
        let ctf = ctf((16, 16), 0.05, &params);
        assert!(ctf.iter().all(|c| (c.norm() - 1.0).abs() < 1e-6));
    }

    #[test]
    fn envelopes_damp_high_frequencies() {
        let params = MicroscopeParameters {
            aperture: 0.0,
            focal_spread: 5.0,
            convergence_angle: 1.0e-3,
            defocus: 20.0,
            ..aberration_free()
        };
        let ctf = ctf((32, 32), 0.02, &params);
        assert_relative_eq!(ctf[[0, 0]].norm(), 1.0, max_relative = 1e-6);
        assert!(ctf[[0, 10]].norm() < ctf[[0, 2]].norm());
        assert!(ctf.iter().all(|c| c.norm() <= 1.0 + 1e-6));
    }

    #[test]
    fn probe_is_non_negative_and_centred() {
        let params = MicroscopeParameters {
            two_fold_astigmatism: Aberration::new(2.0, 0.3),
            coma: Aberration::new(50.0, 1.0),
            three_fold_astigmatism: Aberration::new(30.0, -0.4),
            ..MicroscopeParameters::default()
        };
        let probe = probe(&ctf((64, 64), 0.02, &params));
        assert!(probe.iter().all(|&v| v >= 0.0));
        assert!(probe.sum() > 0.0);

        let aberration_free_probe = super::probe(&ctf((64, 64), 0.02, &aberration_free()));
        let (peak, _) = aberration_free_probe
            .indexed_iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        assert_eq!(peak, (32, 32));
    }
}
