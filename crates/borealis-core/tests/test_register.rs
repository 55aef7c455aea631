mod common;

use approx::assert_abs_diff_eq;
use ndarray::Axis;

use borealis_core::indexing::WindowContext;
use borealis_core::io::fits::read_fits;
use borealis_core::pipeline::config::{RegisterMethod, RegisterOptions};
use borealis_core::register::{
    centroid, cross_correlation_offset, derotate_frame, gaussian_smooth, measure_centers,
    peak_position, register_file, shift_frame,
};

#[test]
fn test_centroid_of_offset_gaussian() {
    let frame = common::gaussian_frame(32, 32, 12.0, 19.0, 2.0, 1.0);
    let (cy, cx) = centroid(&frame.view());
    assert!((cy - 12.0).abs() < 0.3, "cy = {cy}");
    assert!((cx - 19.0).abs() < 0.3, "cx = {cx}");
}

#[test]
fn test_peak_position() {
    let frame = common::gaussian_frame(32, 32, 10.0, 21.0, 1.5, 1.0);
    let (cy, cx) = peak_position(&frame.view());
    assert_abs_diff_eq!(cy, 10.0, epsilon = 1e-9);
    assert_abs_diff_eq!(cx, 21.0, epsilon = 1e-9);
}

#[test]
fn test_shift_frame_integer() {
    let frame = common::gaussian_frame(32, 32, 15.5, 15.5, 2.0, 1.0);
    let shifted = shift_frame(&frame.view(), 3.0, -2.0);
    // interior values move exactly under an integer shift
    assert_abs_diff_eq!(shifted[[18, 14]], frame[[15, 16]], epsilon = 1e-6);
}

#[test]
fn test_shift_frame_pads_nan() {
    let frame = common::gaussian_frame(8, 8, 4.0, 4.0, 1.0, 1.0);
    let shifted = shift_frame(&frame.view(), 2.0, 0.0);
    assert!(shifted[[0, 4]].is_nan());
}

#[test]
fn test_cross_correlation_integer_shift() {
    let reference = common::gaussian_frame(32, 32, 15.0, 15.0, 2.5, 1.0);
    let target = shift_frame(&reference.view(), 3.0, -2.0).mapv(|v| if v.is_nan() { 0.0 } else { v });
    let (dy, dx) = cross_correlation_offset(&reference, &target, 1).unwrap();
    assert!((dy - 3.0).abs() < 0.5, "dy = {dy}");
    assert!((dx + 2.0).abs() < 0.5, "dx = {dx}");
}

#[test]
fn test_cross_correlation_subpixel_upsampled() {
    let reference = common::gaussian_frame(32, 32, 15.0, 15.0, 2.5, 1.0);
    let target = common::gaussian_frame(32, 32, 16.5, 14.75, 2.5, 1.0);
    let (dy, dx) = cross_correlation_offset(&reference, &target, 20).unwrap();
    assert!((dy - 1.5).abs() < 0.3, "dy = {dy}");
    assert!((dx + 0.25).abs() < 0.3, "dx = {dx}");
}

#[test]
fn test_gaussian_smooth_preserves_flux_location() {
    let frame = common::gaussian_frame(32, 32, 12.0, 20.0, 1.5, 1.0);
    let smooth = gaussian_smooth(&frame.view(), 1.5);
    let (cy, cx) = centroid(&smooth.view());
    assert!((cy - 12.0).abs() < 0.3);
    assert!((cx - 20.0).abs() < 0.3);
    assert!(smooth[[12, 20]] < frame[[12, 20]]);
}

#[test]
fn test_measure_centers_model_fits() {
    let data = common::gaussian_cube(32, 32, &[(14.0, 17.0), (16.0, 15.0)], 2.0);
    for method in [
        RegisterMethod::Com,
        RegisterMethod::Gaussian,
        RegisterMethod::Moffat,
        RegisterMethod::Airydisk,
    ] {
        let options = RegisterOptions {
            method,
            smooth: false,
            ..RegisterOptions::default()
        };
        let centers = measure_centers(&data, &options, &WindowContext::default()).unwrap();
        assert!(
            (centers[0].0 - 14.0).abs() < 1.0 && (centers[0].1 - 17.0).abs() < 1.0,
            "{method}: frame 0 center {:?}",
            centers[0]
        );
        assert!(
            (centers[1].0 - 16.0).abs() < 1.0 && (centers[1].1 - 15.0).abs() < 1.0,
            "{method}: frame 1 center {:?}",
            centers[1]
        );
    }
}

#[test]
fn test_derotate_moves_spot_around_center() {
    let frame = common::gaussian_frame(33, 33, 16.0, 24.0, 1.5, 1.0);
    // spot 8 px along +x; derotating by -90 deg sends it toward +y
    let rotated = derotate_frame(&frame.view(), -90.0, None);
    let cleaned = rotated.mapv(|v| if v.is_nan() { 0.0 } else { v });
    let (cy, cx) = peak_position(&cleaned.view());
    assert!((cy - 24.0).abs() <= 1.0, "cy = {cy}");
    assert!((cx - 16.0).abs() <= 1.0, "cx = {cx}");
}

#[test]
fn test_register_file_centers_frames() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("cube.fits");
    let data = common::gaussian_cube(32, 32, &[(13.0, 18.0), (17.0, 14.0)], 2.0);
    common::write_cube(&input, &data, &common::base_header(1, "test", 60000.0));

    let options = RegisterOptions {
        smooth: false,
        ..RegisterOptions::default()
    };
    let outpath = register_file(&input, &options, &WindowContext::default()).unwrap();
    assert_eq!(outpath, tmp.path().join("cube_aligned.fits"));
    assert!(tmp.path().join("cube_offsets.csv").is_file());

    let aligned = read_fits(&outpath).unwrap();
    for i in 0..aligned.data.len_of(Axis(0)) {
        let frame = aligned
            .data
            .index_axis(Axis(0), i)
            .mapv(|v| if v.is_nan() { 0.0 } else { v });
        let (cy, cx) = centroid(&frame.view());
        assert!(
            (cy - 15.5).abs() < 0.5 && (cx - 15.5).abs() < 0.5,
            "frame {i} centered at ({cy}, {cx})"
        );
    }
}
