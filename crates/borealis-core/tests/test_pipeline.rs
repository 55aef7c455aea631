mod common;

use std::path::{Path, PathBuf};

use approx::assert_abs_diff_eq;
use ndarray::Array3;

use borealis_core::error::BorealisError;
use borealis_core::io::fits::read_fits;
use borealis_core::pipeline::config::{
    CollapseOptions, PipelineConfig, PolarimetryOptions, ProductOptions,
};
use borealis_core::pipeline::{Pipeline, PipelineStage};

fn write_raw(dir: &Path, name: &str, value: f32, mjd: f64) -> PathBuf {
    let path = dir.join(name);
    let data = Array3::from_elem((3, 16, 16), value);
    common::write_cube(&path, &data, &common::base_header(1, "AB Aur", mjd));
    path
}

fn collapse_only_config(dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::new("testrun");
    config.collapse = Some(CollapseOptions {
        output_directory: Some(dir.join("collapsed")),
        ..CollapseOptions::default()
    });
    config
}

fn fits_files_with(dir: &Path, needle: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else if path.to_string_lossy().contains(needle) {
                found.push(path);
            }
        }
    }
    found
}

#[test]
fn test_absent_stage_blocks_never_execute() {
    let tmp = tempfile::tempdir().unwrap();
    let inputs = vec![
        write_raw(tmp.path(), "a.fits", 1.0, 60000.0),
        write_raw(tmp.path(), "b.fits", 2.0, 60000.1),
    ];

    let pipeline = Pipeline::new(collapse_only_config(tmp.path())).unwrap();
    let summary = pipeline.run(&inputs, Some(2)).unwrap();

    assert!(summary.failures.is_empty());
    assert_eq!(fits_files_with(tmp.path(), "_collapsed").len(), 2);
    assert!(fits_files_with(tmp.path(), "_calib").is_empty());
    assert!(fits_files_with(tmp.path(), "_selected").is_empty());
    assert!(fits_files_with(tmp.path(), "_aligned").is_empty());
    assert!(!summary
        .stages
        .iter()
        .any(|s| s.stage == PipelineStage::Calibrate));
}

#[test]
fn test_single_bad_file_does_not_abort_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let good_a = write_raw(tmp.path(), "a.fits", 1.0, 60000.0);
    let bad = tmp.path().join("bad.fits");
    common::write_truncated(&bad);
    let good_b = write_raw(tmp.path(), "b.fits", 2.0, 60000.1);

    let pipeline = Pipeline::new(collapse_only_config(tmp.path())).unwrap();
    let summary = pipeline
        .run(&[good_a, bad.clone(), good_b], Some(2))
        .unwrap();

    assert_eq!(fits_files_with(tmp.path(), "_collapsed").len(), 2);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].file, bad);
}

#[test]
fn test_newer_config_version_refuses_to_run() {
    let mut config = collapse_only_config(Path::new("."));
    config.version = "99.0.0".to_string();
    match Pipeline::new(config) {
        Err(BorealisError::VersionMismatch { config, .. }) => {
            assert_eq!(config, "99.0.0");
        }
        other => panic!("expected version mismatch, got {other:?}"),
    }
}

#[test]
fn test_matching_config_version_runs() {
    let mut config = collapse_only_config(Path::new("."));
    config.version = borealis_core::VERSION.to_string();
    assert!(Pipeline::new(config).is_ok());
}

#[test]
fn test_invalid_config_aborts_before_any_stage() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = collapse_only_config(tmp.path());
    config.frame_select = Some(borealis_core::pipeline::config::FrameSelectOptions::new(2.0));
    assert!(matches!(
        Pipeline::new(config),
        Err(BorealisError::ConfigValidation { .. })
    ));
    assert!(fits_files_with(tmp.path(), "_collapsed").is_empty());
}

#[test]
fn test_stage_skips_current_outputs_unless_forced() {
    let tmp = tempfile::tempdir().unwrap();
    let inputs = vec![write_raw(tmp.path(), "a.fits", 1.0, 60000.0)];

    let pipeline = Pipeline::new(collapse_only_config(tmp.path())).unwrap();
    pipeline.run(&inputs, Some(1)).unwrap();
    let outpath = tmp.path().join("collapsed").join("a_collapsed.fits");
    assert!(outpath.is_file());

    // plant a sentinel: a second run must leave the current output alone
    std::fs::write(&outpath, b"sentinel").unwrap();
    pipeline.run(&inputs, Some(1)).unwrap();
    assert_eq!(std::fs::read(&outpath).unwrap(), b"sentinel");

    // force recomputes even though the output is newer than the input
    let mut forced = collapse_only_config(tmp.path());
    forced.collapse.as_mut().unwrap().force = true;
    let pipeline = Pipeline::new(forced).unwrap();
    pipeline.run(&inputs, Some(1)).unwrap();
    assert!(read_fits(&outpath).is_ok(), "sentinel must be replaced");
}

fn write_beam_pair(dir: &Path, index: usize, hwp_angle: f64, i0: f32, d: f32) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for (beam, value) in [("left", (i0 + d) / 2.0), ("right", (i0 - d) / 2.0)] {
        let path = dir.join(format!("pol_{index:02}_{beam}.fits"));
        let data = Array3::from_elem((2, 16, 16), value);
        let mut header = common::base_header(1, "AB Aur", 60000.0 + index as f64 * 0.001);
        header.set("U_HWPANG", hwp_angle, Some("[deg] HWP angle"));
        header.set("BEAM", beam, Some("wollaston beam"));
        common::write_cube(&path, &data, &header);
        paths.push(path);
    }
    paths
}

#[test]
fn test_polarimetric_run_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let mut inputs = Vec::new();
    // two full HWP cycles plus one dangling position
    let signals = [(0.0, 0.2f32), (45.0, -0.2), (22.5, -0.1), (67.5, 0.1)];
    let mut index = 0;
    for _ in 0..2 {
        for (angle, d) in signals {
            inputs.extend(write_beam_pair(tmp.path(), index, angle, 1.0, d));
            index += 1;
        }
    }
    inputs.extend(write_beam_pair(tmp.path(), index, 0.0, 1.0, 0.2));

    let mut config = PipelineConfig::new("abaur");
    config.collapse = Some(CollapseOptions {
        output_directory: Some(tmp.path().join("collapsed")),
        ..CollapseOptions::default()
    });
    config.polarimetry = Some(PolarimetryOptions {
        output_directory: Some(tmp.path().join("pdi")),
        ..PolarimetryOptions::default()
    });
    config.products = Some(ProductOptions {
        output_directory: Some(tmp.path().join("products")),
        ..ProductOptions::default()
    });

    let pipeline = Pipeline::new(config).unwrap();
    let summary = pipeline.run(&inputs, Some(4)).unwrap();

    assert!(summary.failures.is_empty(), "{:?}", summary.failures);
    assert_eq!(summary.incomplete_sets.len(), 1);

    let stokes_0 = tmp.path().join("pdi").join("abaur_stokes_000.fits");
    let stokes_1 = tmp.path().join("pdi").join("abaur_stokes_001.fits");
    assert!(stokes_0.is_file());
    assert!(stokes_1.is_file());

    let stokes = read_fits(&stokes_0).unwrap();
    assert_eq!(stokes.data.dim(), (7, 16, 16));
    assert_abs_diff_eq!(stokes.data[[0, 8, 8]], 1.0, epsilon = 1e-4);
    assert_abs_diff_eq!(stokes.data[[1, 8, 8]], 0.2, epsilon = 1e-4);
    assert_abs_diff_eq!(stokes.data[[2, 8, 8]], -0.1, epsilon = 1e-4);
    assert_eq!(
        stokes.header.string("STOKES"),
        Some("I,Q,U,QPHI,UPHI,LP_I,AOLP")
    );

    let products = tmp.path().join("products");
    assert!(products.join("abaur_headers.csv").is_file());
    assert!(products.join("abaur_stokes_coll.fits").is_file());
    let coll = read_fits(&products.join("abaur_stokes_coll.fits")).unwrap();
    assert_eq!(coll.data.dim(), (7, 16, 16));
    // ADI cubes split by camera and beam
    assert!(products.join("abaur_adi_cube_cam1_left.fits").is_file());
    assert!(products.join("abaur_adi_cube_cam1_right.fits").is_file());
    assert!(products.join("abaur_adi_angles_cam1_left.csv").is_file());

    let table = std::fs::read_to_string(products.join("abaur_headers.csv")).unwrap();
    assert!(table.lines().count() > inputs.len());
    assert!(table.starts_with("path,"));
}
