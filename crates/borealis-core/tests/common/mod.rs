#![allow(dead_code)]

use std::path::Path;

use ndarray::{Array2, Array3, Axis};

use borealis_core::io::fits::{write_fits, Header};

/// Synthetic frame with a Gaussian spot at (cy, cx).
pub fn gaussian_frame(h: usize, w: usize, cy: f64, cx: f64, sigma: f64, amp: f32) -> Array2<f32> {
    Array2::from_shape_fn((h, w), |(y, x)| {
        let dy = y as f64 - cy;
        let dx = x as f64 - cx;
        amp * (-(dy * dy + dx * dx) / (2.0 * sigma * sigma)).exp() as f32
    })
}

/// Cube of Gaussian-spot frames, one per requested center.
pub fn gaussian_cube(h: usize, w: usize, centers: &[(f64, f64)], sigma: f64) -> Array3<f32> {
    let mut data = Array3::<f32>::zeros((centers.len(), h, w));
    for (i, &(cy, cx)) in centers.iter().enumerate() {
        data.index_axis_mut(Axis(0), i)
            .assign(&gaussian_frame(h, w, cy, cx, sigma, 1.0));
    }
    data
}

/// Header with the identity keywords every raw file carries.
pub fn base_header(camera: i64, object: &str, mjd: f64) -> Header {
    let mut header = Header::new();
    header.set("OBJECT", object, None);
    header.set("DATA-TYP", "OBJECT", None);
    header.set("U_CAMERA", camera, Some("camera index"));
    header.set("EXPTIME", 0.1, Some("[s] exposure time"));
    header.set("DETGAIN", 10.0, None);
    header.set("MJD", mjd, None);
    header.set("U_FLCSTT", 1i64, None);
    header.set("X_IRCFLT", "h", None);
    header
}

/// Write a cube file with the given header.
pub fn write_cube(path: &Path, data: &Array3<f32>, header: &Header) {
    write_fits(path, data, header).expect("failed to write test cube");
}

/// Write a valid-looking FITS file whose data section is truncated.
pub fn write_truncated(path: &Path) {
    let data = Array3::<f32>::zeros((1, 8, 8));
    write_fits(path, &data, &Header::new()).expect("failed to write test cube");
    let bytes = std::fs::read(path).expect("read back");
    std::fs::write(path, &bytes[..bytes.len() / 2]).expect("truncate");
}
