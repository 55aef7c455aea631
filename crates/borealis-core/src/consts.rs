/// Detector pixel scale in mas / px.
pub const PIXEL_SCALE: f64 = 15.3;

/// Pupil rotation offset of the instrument in degrees.
pub const PUPIL_OFFSET: f64 = 2.7;

/// Default satellite-spot position angle in degrees, CCW from the x-axis.
pub const SATSPOT_ANGLE: f64 = 45.0 - PUPIL_OFFSET;

/// Number of satellite spots injected around the PSF.
pub const SATSPOT_COUNT: usize = 4;

/// Half-wave-plate modulation sequence for one polarimetric cycle, in degrees.
pub const HWP_SEQUENCE: [f64; 4] = [0.0, 45.0, 22.5, 67.5];

/// Latitude of the observatory in degrees, used when the parallactic angle
/// must be rederived from telescope pointing.
pub const OBSERVATORY_LATITUDE: f64 = 19.823806;

/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Planes in a Stokes cube: I, Q, U, Qphi, Uphi, LP_I, AOLP.
pub const STOKES_PLANE_COUNT: usize = 7;

/// Names of the Stokes cube planes, recorded in the STOKES header card.
pub const STOKES_PLANES: [&str; STOKES_PLANE_COUNT] =
    ["I", "Q", "U", "QPHI", "UPHI", "LP_I", "AOLP"];

/// Angular size of lambda/D on sky in mas for the given filter.
pub fn filter_angular_size(name: &str) -> Option<f64> {
    let lambda: f64 = match name.trim().to_ascii_lowercase().as_str() {
        "open" | "y" => 1.03e-6,
        "j" => 1.24e-6,
        "h" => 1.63e-6,
        _ => return None,
    };
    Some((lambda / 7.79).to_degrees() * 3.6e6)
}

// limit the default worker count since many stages are
// throttled by file I/O rather than compute
pub fn default_num_proc() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(8)
}
