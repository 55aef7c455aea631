use super::config::{
    CalibrateOptions, CollapseOptions, CoronagraphOptions, FrameSelectOptions, IpOptions,
    PipelineConfig, PolarimetryOptions, ProductOptions, RegisterMethod, RegisterOptions,
    SatspotOptions,
};

/// Canned starting-point configurations for `new`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateKind {
    /// Calibration and collapse only.
    Minimal,
    /// Every stage enabled, polarimetry included.
    All,
    /// The standard polarimetric reduction.
    Pdi,
}

/// Build a template configuration.
///
/// Supplying a coronagraph inner working angle auto-populates the
/// coronagraph and satellite-spot blocks and pins the registration method
/// to the centroid, which tolerates the occulted PSF.
pub fn template(
    kind: TemplateKind,
    name: &str,
    target: Option<&str>,
    iwa: Option<f64>,
) -> PipelineConfig {
    let mut config = PipelineConfig::new(name);
    config.target = target.map(str::to_string);

    config.calibrate = Some(CalibrateOptions {
        output_directory: Some("calibrated".into()),
        ..CalibrateOptions::default()
    });
    config.collapse = Some(CollapseOptions {
        output_directory: Some("collapsed".into()),
        ..CollapseOptions::default()
    });
    config.products = Some(ProductOptions {
        output_directory: Some("products".into()),
        ..ProductOptions::default()
    });

    if matches!(kind, TemplateKind::All | TemplateKind::Pdi) {
        config.frame_select = Some(FrameSelectOptions {
            output_directory: Some("selected".into()),
            ..FrameSelectOptions::new(0.3)
        });
        config.register = Some(RegisterOptions {
            output_directory: Some("aligned".into()),
            ..RegisterOptions::default()
        });
        config.polarimetry = Some(PolarimetryOptions {
            output_directory: Some("pdi".into()),
            ip: Some(IpOptions::default()),
            ..PolarimetryOptions::default()
        });
    }

    if let Some(iwa) = iwa {
        config.coronagraph = Some(CoronagraphOptions { iwa });
        // PDI spots sit closer in than the photometric default
        config.satspots = Some(SatspotOptions {
            radius: 11.2,
            ..SatspotOptions::default()
        });
        if let Some(register) = &mut config.register {
            register.method = RegisterMethod::Com;
        }
    }

    config
}
