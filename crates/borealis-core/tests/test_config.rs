use borealis_core::error::BorealisError;
use borealis_core::pipeline::config::{
    CalibrateOptions, CollapseMethod, CollapseOptions, FrameCenters, FrameSelectOptions, IpOptions,
    PipelineConfig, PolarimetryOptions, ProductOptions, RegisterMethod, RegisterOptions,
    SelectionMetric,
};
use borealis_core::pipeline::templates::{template, TemplateKind};

#[test]
fn test_minimal_document_defaults() {
    let config = PipelineConfig::from_toml("name = \"test\"").unwrap();
    assert_eq!(config.name, "test");
    assert_eq!(config.version, borealis_core::VERSION);
    assert!(config.target.is_none());
    assert!(config.calibrate.is_none());
    assert!(config.frame_select.is_none());
    assert!(config.register.is_none());
    assert!(config.collapse.is_none());
    assert!(config.polarimetry.is_none());
    assert!(config.products.is_none());
}

#[test]
fn test_stage_block_presence_is_enablement() {
    let text = "name = \"test\"\n\n[collapse]\n";
    let config = PipelineConfig::from_toml(text).unwrap();
    assert!(config.collapse.is_some());
    assert!(config.calibrate.is_none());
    assert_eq!(config.collapse.unwrap().method, CollapseMethod::Median);
}

#[test]
fn test_round_trip_semantic_equality() {
    let mut config = PipelineConfig::new("20260108_ABAur");
    config.target = Some("AB Aur".to_string());
    config.frame_centers = Some(FrameCenters {
        cam1: Some([127.5, 127.5]),
        cam2: None,
    });
    config.calibrate = Some(CalibrateOptions {
        output_directory: Some("calibrated".into()),
        ..CalibrateOptions::default()
    });
    config.frame_select = Some(FrameSelectOptions {
        metric: SelectionMetric::L2norm,
        ..FrameSelectOptions::new(0.7)
    });
    config.register = Some(RegisterOptions {
        method: RegisterMethod::Dft,
        dft_factor: 10,
        ..RegisterOptions::default()
    });
    config.collapse = Some(CollapseOptions::default());
    config.polarimetry = Some(PolarimetryOptions {
        n_per_hwp: 2,
        ip: Some(IpOptions::default()),
        ..PolarimetryOptions::default()
    });
    config.products = Some(ProductOptions::default());

    let text = config.to_toml().unwrap();
    let reparsed = PipelineConfig::from_toml(&text).unwrap();
    assert_eq!(config, reparsed);
}

#[test]
fn test_default_fields_omitted_on_wire() {
    let mut config = PipelineConfig::new("test");
    config.register = Some(RegisterOptions::default());
    config.collapse = Some(CollapseOptions::default());
    let text = config.to_toml().unwrap();
    // defaults are suppressed, the enablement blocks remain
    assert!(text.contains("[register]"), "got: {text}");
    assert!(text.contains("[collapse]"), "got: {text}");
    assert!(!text.contains("window_size"), "got: {text}");
    assert!(!text.contains("method"), "got: {text}");
    assert!(!text.contains("force"), "got: {text}");
}

#[test]
fn test_unknown_key_rejected() {
    let text = "name = \"test\"\nbogus = 1\n";
    assert!(matches!(
        PipelineConfig::from_toml(text),
        Err(BorealisError::ConfigParse(_))
    ));
}

#[test]
fn test_unknown_stage_key_rejected() {
    let text = "name = \"test\"\n\n[collapse]\nbogus = 1\n";
    assert!(matches!(
        PipelineConfig::from_toml(text),
        Err(BorealisError::ConfigParse(_))
    ));
}

#[test]
fn test_unknown_method_rejected_at_parse() {
    let text = "name = \"test\"\n\n[register]\nmethod = \"sparkle\"\n";
    assert!(matches!(
        PipelineConfig::from_toml(text),
        Err(BorealisError::ConfigParse(_))
    ));
}

#[test]
fn test_cutoff_out_of_range_names_field() {
    let text = "name = \"test\"\n\n[frame_select]\ncutoff = 1.5\n";
    match PipelineConfig::from_toml(text) {
        Err(BorealisError::ConfigValidation { field, .. }) => {
            assert_eq!(field, "frame_select.cutoff");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn test_aper_rad_out_of_range_names_field() {
    let text = "name = \"test\"\n\n[polarimetry]\n\n[polarimetry.ip]\naper_rad = -1.0\n";
    match PipelineConfig::from_toml(text) {
        Err(BorealisError::ConfigValidation { field, .. }) => {
            assert_eq!(field, "polarimetry.ip.aper_rad");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn test_n_per_hwp_zero_rejected() {
    let text = "name = \"test\"\n\n[polarimetry]\nn_per_hwp = 0\n";
    assert!(matches!(
        PipelineConfig::from_toml(text),
        Err(BorealisError::ConfigValidation { .. })
    ));
}

#[test]
fn test_programmatic_validation_not_deferred() {
    let mut config = PipelineConfig::new("test");
    config.frame_select = Some(FrameSelectOptions::new(-0.1));
    assert!(matches!(
        config.validate(),
        Err(BorealisError::ConfigValidation { .. })
    ));
}

#[test]
fn test_method_names_parse_to_closed_enums() {
    for (name, expected) in [
        ("com", RegisterMethod::Com),
        ("peak", RegisterMethod::Peak),
        ("dft", RegisterMethod::Dft),
        ("gaussian", RegisterMethod::Gaussian),
        ("moffat", RegisterMethod::Moffat),
        ("airydisk", RegisterMethod::Airydisk),
    ] {
        let text = format!("name = \"test\"\n\n[register]\nmethod = \"{name}\"\n");
        let config = PipelineConfig::from_toml(&text).unwrap();
        assert_eq!(config.register.unwrap().method, expected);
    }
}

#[test]
fn test_template_minimal() {
    let config = template(TemplateKind::Minimal, "test", None, None);
    assert!(config.calibrate.is_some());
    assert!(config.collapse.is_some());
    assert!(config.products.is_some());
    assert!(config.frame_select.is_none());
    assert!(config.polarimetry.is_none());
    config.validate().unwrap();
}

#[test]
fn test_template_pdi() {
    let config = template(TemplateKind::Pdi, "test", Some("AB Aur"), None);
    assert_eq!(config.target.as_deref(), Some("AB Aur"));
    assert!(config.polarimetry.is_some());
    assert!(config.register.is_some());
    assert!(config.coronagraph.is_none());
}

#[test]
fn test_template_iwa_populates_coronagraph() {
    let config = template(TemplateKind::All, "test", None, Some(113.0));
    let coronagraph = config.coronagraph.as_ref().unwrap();
    assert_eq!(coronagraph.iwa, 113.0);
    let satspots = config.satspots.as_ref().unwrap();
    assert_eq!(satspots.radius, 11.2);
    assert_eq!(config.register.as_ref().unwrap().method, RegisterMethod::Com);
    // templates must round trip like any other configuration
    let text = config.to_toml().unwrap();
    assert_eq!(PipelineConfig::from_toml(&text).unwrap(), config);
}

#[test]
fn test_display_names_match_wire_names() {
    assert_eq!(RegisterMethod::Airydisk.to_string(), "airydisk");
    assert_eq!(SelectionMetric::Normvar.to_string(), "normvar");
    assert_eq!(CollapseMethod::Varmean.to_string(), "varmean");
}
