mod common;

use approx::assert_abs_diff_eq;
use ndarray::{Array3, Axis};

use borealis_core::calibrate::{calibrate_file, fix_bad_pixels, make_master_dark};
use borealis_core::cube::{Beam, Camera};
use borealis_core::io::fits::read_fits;
use borealis_core::pipeline::config::{CalibrateOptions, CamFileInput, CollapseMethod};

#[test]
fn test_calibrate_plain_file() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("raw.fits");
    let data = Array3::from_elem((2, 16, 16), 12.0f32);
    common::write_cube(&input, &data, &common::base_header(1, "test", 60000.0));

    let options = CalibrateOptions::default();
    let outputs = calibrate_file(&input, Camera::Cam1, &options, None).unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].0, tmp.path().join("raw_calib.fits"));
    assert!(outputs[0].1.is_none());

    let calibrated = read_fits(&outputs[0].0).unwrap();
    assert_eq!(calibrated.data.dim(), (2, 16, 16));
    // the reference rows are zeroed, then the frame is flipped vertically
    assert_abs_diff_eq!(calibrated.data[[0, 15, 8]], 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(calibrated.data[[0, 2, 8]], 12.0, epsilon = 1e-6);
}

#[test]
fn test_calibrate_subtracts_camera_master_dark() {
    let tmp = tempfile::tempdir().unwrap();
    let dark_path = tmp.path().join("master_dark.fits");
    let dark = Array3::from_elem((1, 16, 16), 5.0f32);
    common::write_cube(&dark_path, &dark, &common::base_header(1, "dark", 60000.0));

    let input = tmp.path().join("raw.fits");
    let data = Array3::from_elem((2, 16, 16), 12.0f32);
    common::write_cube(&input, &data, &common::base_header(1, "test", 60000.1));

    let options = CalibrateOptions {
        master_darks: CamFileInput {
            cam1: Some(dark_path),
            cam2: None,
        },
        ..CalibrateOptions::default()
    };
    let outputs = calibrate_file(&input, Camera::Cam1, &options, None).unwrap();
    let calibrated = read_fits(&outputs[0].0).unwrap();
    assert_abs_diff_eq!(calibrated.data[[0, 8, 8]], 7.0, epsilon = 1e-5);
    assert!(calibrated.header.contains("MDARK"));
}

#[test]
fn test_calibrate_splits_wollaston_beams() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("raw.fits");
    let data = Array3::from_elem((2, 16, 16), 3.0f32);
    let mut header = common::base_header(1, "test", 60000.0);
    header.set("X_IRCWOL", "IN", Some("wollaston position"));
    common::write_cube(&input, &data, &header);

    let outputs = calibrate_file(&input, Camera::Cam1, &CalibrateOptions::default(), None).unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].1, Some(Beam::Left));
    assert_eq!(outputs[1].1, Some(Beam::Right));

    let left = read_fits(&outputs[0].0).unwrap();
    assert_eq!(left.header.string("BEAM"), Some("left"));
    assert!(left.data[[0, 8, 12]].is_nan(), "right half must be blanked");
    assert_abs_diff_eq!(left.data[[0, 8, 3]], 3.0, epsilon = 1e-6);

    let right = read_fits(&outputs[1].0).unwrap();
    assert_eq!(right.header.string("BEAM"), Some("right"));
    assert!(right.data[[0, 8, 3]].is_nan(), "left half must be blanked");
}

#[test]
fn test_fix_bad_pixels_replaces_spike() {
    let mut frame = ndarray::Array2::from_elem((16, 16), 1.0f32);
    frame[[8, 8]] = 1000.0;
    let (mask, clean) = fix_bad_pixels(&frame.view());
    assert!(mask[[8, 8]]);
    assert_abs_diff_eq!(clean[[8, 8]], 1.0, epsilon = 1e-6);
    assert!(!mask[[2, 2]]);
}

#[test]
fn test_make_master_dark_groups_by_settings() {
    let tmp = tempfile::tempdir().unwrap();
    let mut darks = Vec::new();
    for (i, value) in [4.0f32, 6.0].iter().enumerate() {
        let path = tmp.path().join(format!("dark_{i}.fits"));
        let data = Array3::from_elem((3, 8, 8), *value);
        let mut header = common::base_header(1, "dark", 60000.0 + i as f64);
        header.set("DATA-TYP", "DARK", None);
        common::write_cube(&path, &data, &header);
        darks.push(path);
    }

    let outdir = tmp.path().join("masters");
    let masters = make_master_dark(&darks, CollapseMethod::Median, &outdir, false).unwrap();
    assert_eq!(masters.len(), 1, "same settings collapse into one master");
    assert_eq!(
        masters[0].file_name().unwrap().to_string_lossy(),
        "master_dark_em10_00100ms.fits"
    );
    let master = read_fits(&masters[0]).unwrap();
    assert_eq!(master.data.len_of(Axis(0)), 1);
    // median of the two collapsed darks
    assert_abs_diff_eq!(master.data[[0, 4, 4]], 5.0, epsilon = 1e-5);
}
