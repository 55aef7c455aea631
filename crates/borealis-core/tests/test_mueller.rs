use approx::assert_abs_diff_eq;
use ndarray::{array, Array2};

use borealis_core::mueller::{hwp, linear_polarizer, mirror, qwp, rotator, waveplate, wollaston};

fn assert_matrix_eq(actual: &Array2<f64>, expected: &Array2<f64>) {
    for (a, e) in actual.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(a, e, epsilon = 1e-9);
    }
}

#[test]
fn test_hwp_at_zero() {
    let expected = array![
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, -1.0, 0.0],
        [0.0, 0.0, 0.0, -1.0],
    ];
    assert_matrix_eq(&hwp(0.0), &expected);
}

#[test]
fn test_hwp_at_45_degrees() {
    let expected = array![
        [1.0, 0.0, 0.0, 0.0],
        [0.0, -1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, -1.0],
    ];
    assert_matrix_eq(&hwp(45f64.to_radians()), &expected);
}

#[test]
fn test_qwp_at_zero() {
    let expected = array![
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
        [0.0, 0.0, -1.0, 0.0],
    ];
    assert_matrix_eq(&qwp(0.0), &expected);
}

#[test]
fn test_waveplate_with_half_wave_retardance_is_hwp() {
    assert_matrix_eq(&waveplate(0.3, std::f64::consts::PI), &hwp(0.3));
}

#[test]
fn test_rotator_at_45_degrees() {
    let expected = array![
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, -1.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];
    assert_matrix_eq(&rotator(45f64.to_radians()), &expected);
}

#[test]
fn test_linear_polarizer_at_zero() {
    let expected = array![
        [0.5, 0.5, 0.0, 0.0],
        [0.5, 0.5, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0],
    ];
    assert_matrix_eq(&linear_polarizer(0.0), &expected);
}

#[test]
fn test_wollaston_ordinary_is_horizontal_polarizer() {
    assert_matrix_eq(&wollaston(true, 1.0), &linear_polarizer(0.0));
}

#[test]
fn test_wollaston_imperfect_extraordinary() {
    let expected = array![
        [0.5, -0.4, 0.0, 0.0],
        [-0.4, 0.5, 0.0, 0.0],
        [0.0, 0.0, 0.3, 0.0],
        [0.0, 0.0, 0.0, 0.3],
    ];
    assert_matrix_eq(&wollaston(false, 0.8), &expected);
}

#[test]
fn test_mirror_flips_u_and_v() {
    let stokes = array![1.0, 0.2, 0.3, 0.1];
    let out = mirror().dot(&stokes);
    assert_abs_diff_eq!(out[0], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(out[1], 0.2, epsilon = 1e-12);
    assert_abs_diff_eq!(out[2], -0.3, epsilon = 1e-12);
    assert_abs_diff_eq!(out[3], -0.1, epsilon = 1e-12);
}
