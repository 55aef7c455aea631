use crate::consts::OBSERVATORY_LATITUDE;
use crate::indexing::wrap_angle;
use crate::io::fits::Header;

/// Derotation angle for the observation.
///
/// Prefers the image-rotator telemetry when present; otherwise rederives
/// the parallactic angle from the telescope pointing.
pub fn parallactic_angle(header: &Header) -> Option<f64> {
    if let (Some(pad), Some(pap)) = (header.float("D_IMRPAD"), header.float("D_IMRPAP")) {
        return Some(pad + 180.0 - pap);
    }
    let alt = header.float("ALTITUDE")?;
    let az = header.float("AZIMUTH")?;
    Some(parallactic_angle_altaz(alt, az, OBSERVATORY_LATITUDE))
}

/// Parallactic angle from altitude/azimuth, in degrees East of North.
pub fn parallactic_angle_altaz(alt: f64, az: f64, lat: f64) -> f64 {
    // Astronomical Algorithms, Jean Meeus; azimuth rotated to South
    let az = az.to_radians() - std::f64::consts::PI;
    let alt = alt.to_radians();
    let lat = lat.to_radians();
    let dec = (alt.sin() * lat.sin() - alt.cos() * lat.cos() * az.cos()).asin();
    let ha = az.sin().atan2(az.cos() * lat.sin() + alt.tan() * lat.cos());
    let pa = ha
        .sin()
        .atan2(lat.tan() * dec.cos() - dec.sin() * ha.cos());
    pa.to_degrees()
}

/// Parallactic angle from hour-angle (in hours) and declination, degrees.
pub fn parallactic_angle_hadec(ha: f64, dec: f64, lat: f64) -> f64 {
    let ha = ha * std::f64::consts::PI / 12.0;
    let dec = dec.to_radians();
    let lat = lat.to_radians();
    let pa = ha
        .sin()
        .atan2(lat.tan() * dec.cos() - dec.sin() * ha.cos());
    pa.to_degrees()
}

/// Replace timestamps recorded at file creation with the midpoint of the
/// exposure, when the start/end keywords are available.
pub fn fix_header(header: &mut Header) {
    if let (Some(start), Some(end)) = (header.float("MJD-STR"), header.float("MJD-END")) {
        header.set("MJD", (start + end) / 2.0, Some("[day] mid-exposure time"));
    }
}

/// Stamp the derotation angles used downstream by registration,
/// polarimetry, and the ADI products.
pub fn apply_derotation_angles(header: &mut Header, pupil_offset: f64) {
    if let Some(parang) = parallactic_angle(header) {
        header.set("PARANG", parang, Some("[deg] derotation angle for North up"));
        header.set(
            "PA",
            wrap_angle(parang - pupil_offset),
            Some("[deg] parallactic angle of target"),
        );
    }
}
