use crate::deconvolution::DeconvolutionMethod;
use crate::postprocess::PostprocessConfig;
use crate::psf::MicroscopeParameters;
use serde::{Deserialize, Serialize};

/// Everything [`crate::restore`] needs besides the image itself.
///
/// All fields have defaults, so a partial document (or `{}`) deserializes.
///
/// # Fields
/// - `microscope`: Optics used to model the probe.
/// - `method`: Solver and its parameters.
/// - `background_percentile`: When set, the multiplicative solver's background level is
///   taken from this percentile of the image intensities.
/// - `postprocess`: Optional background filter applied to the magnitude of the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestorationConfig {
    pub microscope: MicroscopeParameters,
    pub method: DeconvolutionMethod,
    pub background_percentile: Option<f32>,
    pub postprocess: Option<PostprocessConfig>,
}

impl Default for RestorationConfig {
    fn default() -> Self {
        RestorationConfig {
            microscope: MicroscopeParameters::default(),
            method: DeconvolutionMethod::default(),
            background_percentile: Some(1.0),
            postprocess: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deconvolution::{Fista, MultiplicativeRichardsonLucy, Regularization};
    use crate::postprocess::PSplineBackground;

    #[test]
    fn empty_document_gives_defaults() {
        let config: RestorationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RestorationConfig::default());
        assert_eq!(config.microscope.voltage, 300.0);
        assert_eq!(config.background_percentile, Some(1.0));
        assert!(matches!(
            config.method,
            DeconvolutionMethod::Multiplicative(MultiplicativeRichardsonLucy { iterations: 15, .. })
        ));
    }

    #[test]
    fn partial_document_overrides_selected_fields() {
        let json = r#"{
            "microscope": { "voltage": 200.0, "defocus": -20.0 },
            "method": { "Fista": { "iterations": 30, "lambda": 0.005 } },
            "background_percentile": null,
            "postprocess": { "PSpline": { "background": { "lambda": 1000.0 } } }
        }"#;
        let config: RestorationConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.microscope.voltage, 200.0);
        assert_eq!(config.microscope.defocus, -20.0);
        assert_eq!(config.microscope.cs3, 0.5);
        assert_eq!(
            config.method,
            DeconvolutionMethod::Fista(Fista {
                iterations: 30,
                lambda: 0.005,
                boundary_handling: false
            })
        );
        assert_eq!(config.background_percentile, None);
        assert_eq!(
            config.postprocess,
            Some(PostprocessConfig::PSpline {
                background: PSplineBackground {
                    lambda: 1000.0,
                    ..Default::default()
                },
                information_limit: None
            })
        );
    }

    #[test]
    fn roundtrips_through_json() {
        let config = RestorationConfig {
            method: DeconvolutionMethod::Multiplicative(MultiplicativeRichardsonLucy {
                regularization: Regularization::TotalVariation,
                lambda: 0.002,
                acceleration: true,
                boundary_handling: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: RestorationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
