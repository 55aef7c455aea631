//! Ideal Mueller matrices for the polarizing optics in the beam path.
//!
//! Angles are in radians. Matrices act on Stokes vectors (I, Q, U, V).

use ndarray::{array, Array2};

/// Half-wave plate with its fast axis at `theta`.
pub fn hwp(theta: f64) -> Array2<f64> {
    let cos2t = (2.0 * theta).cos();
    let sin2t = (2.0 * theta).sin();
    array![
        [1.0, 0.0, 0.0, 0.0],
        [0.0, cos2t * cos2t - sin2t * sin2t, 2.0 * cos2t * sin2t, 0.0],
        [0.0, 2.0 * cos2t * sin2t, sin2t * sin2t - cos2t * cos2t, 0.0],
        [0.0, 0.0, 0.0, -1.0],
    ]
}

/// Quarter-wave plate with its fast axis at `theta`.
pub fn qwp(theta: f64) -> Array2<f64> {
    let cos2t = (2.0 * theta).cos();
    let sin2t = (2.0 * theta).sin();
    array![
        [1.0, 0.0, 0.0, 0.0],
        [0.0, cos2t * cos2t, cos2t * sin2t, -sin2t],
        [0.0, cos2t * sin2t, sin2t * sin2t, cos2t],
        [0.0, sin2t, -cos2t, 0.0],
    ]
}

/// Waveplate with arbitrary retardance `delta`.
pub fn waveplate(theta: f64, delta: f64) -> Array2<f64> {
    let cos2t = (2.0 * theta).cos();
    let sin2t = (2.0 * theta).sin();
    let cosd = delta.cos();
    let sind = delta.sin();
    let a = (1.0 - cosd) * sin2t * cos2t;
    array![
        [1.0, 0.0, 0.0, 0.0],
        [0.0, cos2t * cos2t + cosd * sin2t * sin2t, a, -sind * sin2t],
        [0.0, a, sin2t * sin2t + cosd * cos2t * cos2t, sind * cos2t],
        [0.0, sind * sin2t, -sind * cos2t, cosd],
    ]
}

/// Rotation clockwise about the optical axis.
pub fn rotator(theta: f64) -> Array2<f64> {
    let cos2t = (2.0 * theta).cos();
    let sin2t = (2.0 * theta).sin();
    array![
        [1.0, 0.0, 0.0, 0.0],
        [0.0, cos2t, sin2t, 0.0],
        [0.0, -sin2t, cos2t, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// Ideal linear polarizer oriented at `theta`.
pub fn linear_polarizer(theta: f64) -> Array2<f64> {
    let cos2t = (2.0 * theta).cos();
    let sin2t = (2.0 * theta).sin();
    array![
        [1.0, cos2t, sin2t, 0.0],
        [cos2t, cos2t * cos2t, cos2t * sin2t, 0.0],
        [sin2t, cos2t * sin2t, sin2t * sin2t, 0.0],
        [0.0, 0.0, 0.0, 0.0],
    ] * 0.5
}

/// Ideal mirror.
pub fn mirror() -> Array2<f64> {
    hwp(0.0)
}

/// One output beam of a Wollaston prism or polarizing beamsplitter with
/// diattenuation `eta`.
pub fn wollaston(ordinary: bool, eta: f64) -> Array2<f64> {
    let eta = if ordinary { eta } else { -eta };
    let radicand = ((1.0 - eta) * (1.0 + eta)).sqrt();
    array![
        [1.0, eta, 0.0, 0.0],
        [eta, 1.0, 0.0, 0.0],
        [0.0, 0.0, radicand, 0.0],
        [0.0, 0.0, 0.0, radicand],
    ] * 0.5
}
