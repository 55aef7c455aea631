use std::ops::Range;

use ndarray::Array2;
use num_traits::Float;

use crate::consts::{filter_angular_size, PIXEL_SCALE, SATSPOT_ANGLE, SATSPOT_COUNT};
use crate::error::{BorealisError, Result};

/// Geometric center (cy, cx) of a frame with the given (height, width).
pub fn frame_center(shape: (usize, usize)) -> (f64, f64) {
    let (ny, nx) = shape;
    ((ny as f64 - 1.0) / 2.0, (nx as f64 - 1.0) / 2.0)
}

/// Radius of every pixel from `center`.
pub fn frame_radii(shape: (usize, usize), center: (f64, f64)) -> Array2<f64> {
    let (ny, nx) = shape;
    Array2::from_shape_fn((ny, nx), |(y, x)| {
        (y as f64 - center.0).hypot(x as f64 - center.1)
    })
}

/// Angle of every pixel around `center`, CCW from the +x axis in radians.
pub fn frame_angles(shape: (usize, usize), center: (f64, f64)) -> Array2<f64> {
    let (ny, nx) = shape;
    Array2::from_shape_fn((ny, nx), |(y, x)| {
        (y as f64 - center.0).atan2(x as f64 - center.1)
    })
}

/// Angle of every pixel around `center` in degrees East of North, the
/// convention used for the radial Stokes parameters.
pub fn frame_angles_astro(shape: (usize, usize), center: (f64, f64)) -> Array2<f64> {
    let (ny, nx) = shape;
    Array2::from_shape_fn((ny, nx), |(y, x)| {
        (center.1 - x as f64).atan2(y as f64 - center.0)
    })
}

/// Wrap an angle in degrees to [-180, 180).
pub fn wrap_angle<T: Float>(angle: T) -> T {
    let half = T::from(180.0).unwrap();
    let full = T::from(360.0).unwrap();
    let mut wrapped = angle % full;
    if wrapped < -half {
        wrapped = wrapped + full;
    } else if wrapped >= half {
        wrapped = wrapped - full;
    }
    wrapped
}

/// Convert a separation in lambda/D to pixels for the given filter.
pub fn lamd_to_pixel(ld: f64, filter: &str) -> Result<f64> {
    let dist = filter_angular_size(filter)
        .ok_or_else(|| BorealisError::UnknownFilter(filter.to_string()))?;
    Ok(ld * dist / PIXEL_SCALE)
}

/// Index ranges for a square window of side `window` at `center`, clipped
/// to the frame boundaries.
pub fn cutout_slice(
    shape: (usize, usize),
    window: f64,
    center: (f64, f64),
) -> (Range<usize>, Range<usize>) {
    let (ny, nx) = shape;
    let half = window / 2.0;
    let clip = |c: f64, n: usize| -> Range<usize> {
        let lower = (c - half).round().max(0.0) as usize;
        let upper = (c + half).round().min(n as f64 - 1.0) as usize;
        lower..upper + 1
    };
    (clip(center.0, ny), clip(center.1, nx))
}

/// Centers (cy, cx) of the satellite spots: `n` points `radius` pixels from
/// `center` along branches offset `theta` degrees CCW from the y-axis.
pub fn window_centers(center: (f64, f64), radius: f64, theta: f64, n: usize) -> Vec<(f64, f64)> {
    (0..n)
        .map(|i| {
            let angle = std::f64::consts::FRAC_PI_2
                + i as f64 * std::f64::consts::TAU / n as f64
                + theta.to_radians();
            (
                radius * angle.sin() + center.0,
                radius * angle.cos() + center.1,
            )
        })
        .collect()
}

/// Where frame-selection and registration measure their metrics: around a
/// known star position (or the geometric center) and, for coronagraphic
/// data, on the satellite spots instead of the occulted PSF.
#[derive(Clone, Copy, Debug, Default)]
pub struct WindowContext {
    /// Star position (cy, cx) in pixels; geometric center when absent.
    pub center: Option<(f64, f64)>,
    /// Satellite-spot separation in pixels; central PSF when absent.
    pub satspot_radius: Option<f64>,
}

impl WindowContext {
    pub fn center_for(&self, shape: (usize, usize)) -> (f64, f64) {
        self.center.unwrap_or_else(|| frame_center(shape))
    }

    /// The measurement windows for a frame of the given shape.
    pub fn measure_slices(
        &self,
        shape: (usize, usize),
        window: f64,
    ) -> Vec<(Range<usize>, Range<usize>)> {
        let center = self.center_for(shape);
        match self.satspot_radius {
            Some(radius) => window_slices(shape, window, center, radius),
            None => vec![cutout_slice(shape, window, center)],
        }
    }
}

/// Window slices around each satellite spot.
pub fn window_slices(
    shape: (usize, usize),
    window: f64,
    center: (f64, f64),
    radius: f64,
) -> Vec<(Range<usize>, Range<usize>)> {
    window_centers(center, radius, SATSPOT_ANGLE, SATSPOT_COUNT)
        .into_iter()
        .map(|c| cutout_slice(shape, window, c))
        .collect()
}
