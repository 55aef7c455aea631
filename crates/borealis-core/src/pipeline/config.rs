use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::consts::SATSPOT_ANGLE;
use crate::cube::Camera;
use crate::error::{BorealisError, Result};

/// Root pipeline configuration.
///
/// A stage runs iff its option block is present; an absent block means
/// "skip entirely", not "use defaults". The configuration is immutable
/// once a run starts and is never written back by stages.
///
/// Serialization round-trips through TOML with default-valued optional
/// fields omitted, so a reparsed document is semantically equal to the
/// original even when it is not byte-identical.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Filename-friendly key used for outputs, e.g. "20260108_ABAur".
    pub name: String,
    /// Pipeline version this configuration was written for.
    #[serde(default = "default_version")]
    pub version: String,
    /// Target object name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_centers: Option<FrameCenters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate: Option<CoordinateOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coronagraph: Option<CoronagraphOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satspots: Option<SatspotOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibrate: Option<CalibrateOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_select: Option<FrameSelectOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register: Option<RegisterOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapse: Option<CollapseOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polarimetry: Option<PolarimetryOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products: Option<ProductOptions>,
}

fn default_version() -> String {
    crate::VERSION.to_string()
}

impl PipelineConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            target: None,
            frame_centers: None,
            coordinate: None,
            coronagraph: None,
            satspots: None,
            calibrate: None,
            frame_select: None,
            register: None,
            collapse: None,
            polarimetry: None,
            products: None,
        }
    }

    /// Parse and validate a TOML document. Unknown keys and malformed
    /// text fail parsing; out-of-range values fail validation, naming the
    /// offending field. Nothing is deferred to run time.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(BorealisError::invalid_field("name", "must not be empty"));
        }
        if let Some(coronagraph) = &self.coronagraph {
            coronagraph.validate()?;
        }
        if let Some(satspots) = &self.satspots {
            satspots.validate()?;
        }
        if let Some(frame_select) = &self.frame_select {
            frame_select.validate()?;
        }
        if let Some(register) = &self.register {
            register.validate()?;
        }
        if let Some(polarimetry) = &self.polarimetry {
            polarimetry.validate()?;
        }
        Ok(())
    }
}

/// Estimated star position (x, y) in raw-frame pixels, per camera.
/// Absent cameras fall back to the geometric frame center.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameCenters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cam1: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cam2: Option<[f64; 2]>,
}

impl FrameCenters {
    pub fn get(&self, camera: Camera) -> Option<[f64; 2]> {
        match camera {
            Camera::Cam1 => self.cam1,
            Camera::Cam2 => self.cam2,
        }
    }
}

/// Astronomical coordinate of the target, used to recompute the pointing
/// at observation time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinateOptions {
    pub object: String,
    /// Right ascension in sexagesimal hour angles.
    pub ra: String,
    /// Declination in sexagesimal degrees.
    pub dec: String,
    /// Parallax in mas.
    pub parallax: f64,
    /// Proper motion of the RA axis in mas/yr.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub pm_ra: f64,
    /// Proper motion of the DEC axis in mas/yr.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub pm_dec: f64,
    #[serde(default = "default_coord_frame", skip_serializing_if = "is_default_coord_frame")]
    pub frame: String,
    #[serde(default = "default_obstime", skip_serializing_if = "is_default_obstime")]
    pub obstime: String,
}

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

fn default_coord_frame() -> String {
    "icrs".to_string()
}

fn is_default_coord_frame(v: &str) -> bool {
    v == "icrs"
}

fn default_obstime() -> String {
    "J2016".to_string()
}

fn is_default_obstime(v: &str) -> bool {
    v == "J2016"
}

/// Coronagraph geometry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoronagraphOptions {
    /// Inner working angle in mas.
    pub iwa: f64,
}

impl CoronagraphOptions {
    pub fn validate(&self) -> Result<()> {
        if self.iwa <= 0.0 {
            return Err(BorealisError::invalid_field(
                "coronagraph.iwa",
                format!("must be positive, got {}", self.iwa),
            ));
        }
        Ok(())
    }
}

/// Satellite-spot geometry; enables spot-based frame selection and
/// registration when present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SatspotOptions {
    /// Spot separation in lambda/D.
    #[serde(default = "default_satspot_radius")]
    pub radius: f64,
    /// Spot position angle in degrees.
    #[serde(default = "default_satspot_angle")]
    pub angle: f64,
    /// Modulation amplitude in nm.
    #[serde(default = "default_satspot_amp")]
    pub amp: f64,
}

fn default_satspot_radius() -> f64 {
    15.9
}

fn default_satspot_angle() -> f64 {
    SATSPOT_ANGLE
}

fn default_satspot_amp() -> f64 {
    50.0
}

impl Default for SatspotOptions {
    fn default() -> Self {
        Self {
            radius: default_satspot_radius(),
            angle: default_satspot_angle(),
            amp: default_satspot_amp(),
        }
    }
}

impl SatspotOptions {
    pub fn validate(&self) -> Result<()> {
        if self.radius <= 0.0 {
            return Err(BorealisError::invalid_field(
                "satspots.radius",
                format!("must be positive, got {}", self.radius),
            ));
        }
        Ok(())
    }
}

/// Per-camera calibration file inputs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CamFileInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cam1: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cam2: Option<PathBuf>,
}

impl CamFileInput {
    pub fn get(&self, camera: Camera) -> Option<&Path> {
        match camera {
            Camera::Cam1 => self.cam1.as_deref(),
            Camera::Cam2 => self.cam2.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cam1.is_none() && self.cam2.is_none()
    }
}

/// Geometric distortion correction inputs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistortionOptions {
    /// CSV with rotation/scale corrections for each camera.
    pub transform_filename: PathBuf,
}

/// Basic image calibration: dark subtraction, flat normalization, bad
/// pixel correction, vertical flip, and beam splitting in PDI mode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrateOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub force: bool,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub fix_bad_pixels: bool,
    #[serde(default, skip_serializing_if = "CamFileInput::is_empty")]
    pub master_darks: CamFileInput,
    #[serde(default, skip_serializing_if = "CamFileInput::is_empty")]
    pub master_flats: CamFileInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distortion: Option<DistortionOptions>,
}

impl Default for CalibrateOptions {
    fn default() -> Self {
        Self {
            output_directory: None,
            force: false,
            fix_bad_pixels: true,
            master_darks: CamFileInput::default(),
            master_flats: CamFileInput::default(),
            distortion: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn is_true(v: &bool) -> bool {
    *v
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Frame selection metric, measured on the central PSF or on the
/// satellite spots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMetric {
    /// Maximum value.
    Peak,
    /// Mean squared value, roughly the RMS.
    L2norm,
    /// Variance normalized by the mean.
    #[default]
    Normvar,
}

impl std::fmt::Display for SelectionMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Peak => write!(f, "peak"),
            Self::L2norm => write!(f, "l2norm"),
            Self::Normvar => write!(f, "normvar"),
        }
    }
}

/// Frame selection options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameSelectOptions {
    /// Cutoff quantile: 0 keeps every frame, 1 would discard all.
    pub cutoff: f64,
    #[serde(default, skip_serializing_if = "is_default_metric")]
    pub metric: SelectionMetric,
    #[serde(default = "default_window_size", skip_serializing_if = "is_default_window_size")]
    pub window_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub force: bool,
}

fn is_default_metric(m: &SelectionMetric) -> bool {
    *m == SelectionMetric::default()
}

fn default_window_size() -> usize {
    30
}

fn is_default_window_size(v: &usize) -> bool {
    *v == default_window_size()
}

impl FrameSelectOptions {
    pub fn new(cutoff: f64) -> Self {
        Self {
            cutoff,
            metric: SelectionMetric::default(),
            window_size: default_window_size(),
            output_directory: None,
            force: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.cutoff) {
            return Err(BorealisError::invalid_field(
                "frame_select.cutoff",
                format!("quantile must lie in [0, 1], got {}", self.cutoff),
            ));
        }
        if self.window_size == 0 {
            return Err(BorealisError::invalid_field(
                "frame_select.window_size",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Image registration method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterMethod {
    /// Intensity-weighted centroid.
    #[default]
    Com,
    /// Pixel at the highest value.
    Peak,
    /// Cross-correlation with DFT upsampling for subpixel accuracy.
    Dft,
    /// Model fit using a Gaussian PSF.
    Gaussian,
    /// Model fit using a Moffat PSF.
    Moffat,
    /// Model fit using an Airy disk PSF.
    Airydisk,
}

impl std::fmt::Display for RegisterMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Com => write!(f, "com"),
            Self::Peak => write!(f, "peak"),
            Self::Dft => write!(f, "dft"),
            Self::Gaussian => write!(f, "gaussian"),
            Self::Moffat => write!(f, "moffat"),
            Self::Airydisk => write!(f, "airydisk"),
        }
    }
}

/// Image registration options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterOptions {
    #[serde(default, skip_serializing_if = "is_default_register_method")]
    pub method: RegisterMethod,
    #[serde(default = "default_window_size", skip_serializing_if = "is_default_window_size")]
    pub window_size: usize,
    /// Gaussian-smooth frames before measuring offsets.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub smooth: bool,
    /// DFT upsampling factor (inverse of the centroid precision).
    #[serde(default = "default_dft_factor", skip_serializing_if = "is_default_dft_factor")]
    pub dft_factor: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub force: bool,
}

fn is_default_register_method(m: &RegisterMethod) -> bool {
    *m == RegisterMethod::default()
}

fn default_dft_factor() -> usize {
    1
}

fn is_default_dft_factor(v: &usize) -> bool {
    *v == default_dft_factor()
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self {
            method: RegisterMethod::default(),
            window_size: default_window_size(),
            smooth: true,
            dft_factor: default_dft_factor(),
            output_directory: None,
            force: false,
        }
    }
}

impl RegisterOptions {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(BorealisError::invalid_field(
                "register.window_size",
                "must be positive",
            ));
        }
        if self.dft_factor == 0 {
            return Err(BorealisError::invalid_field(
                "register.dft_factor",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Cube collapse statistic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollapseMethod {
    /// Pixel-by-pixel median.
    #[default]
    Median,
    /// Pixel-by-pixel mean.
    Mean,
    /// Mean weighted by inverse frame variance.
    Varmean,
    /// Pixel-by-pixel biweight location.
    Biweight,
}

impl std::fmt::Display for CollapseMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Median => write!(f, "median"),
            Self::Mean => write!(f, "mean"),
            Self::Varmean => write!(f, "varmean"),
            Self::Biweight => write!(f, "biweight"),
        }
    }
}

/// Cube collapse options.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollapseOptions {
    #[serde(default, skip_serializing_if = "is_default_collapse_method")]
    pub method: CollapseMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub force: bool,
}

fn is_default_collapse_method(m: &CollapseMethod) -> bool {
    *m == CollapseMethod::default()
}

/// Instrumental polarization correction method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpMethod {
    /// Ad-hoc correction from PSF photometry of the central star.
    #[default]
    Photometry,
    /// Ad-hoc correction from satellite-spot photometry.
    Satspots,
    /// Mueller-matrix model correction.
    Mueller,
}

impl std::fmt::Display for IpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Photometry => write!(f, "photometry"),
            Self::Satspots => write!(f, "satspots"),
            Self::Mueller => write!(f, "mueller"),
        }
    }
}

/// Instrumental polarization (IP) correction options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IpOptions {
    #[serde(default, skip_serializing_if = "is_default_ip_method")]
    pub method: IpMethod,
    /// Aperture radius in pixels for the photometric methods.
    #[serde(default = "default_aper_rad", skip_serializing_if = "is_default_aper_rad")]
    pub aper_rad: f64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub force: bool,
}

fn is_default_ip_method(m: &IpMethod) -> bool {
    *m == IpMethod::default()
}

fn default_aper_rad() -> f64 {
    6.0
}

fn is_default_aper_rad(v: &f64) -> bool {
    *v == default_aper_rad()
}

impl Default for IpOptions {
    fn default() -> Self {
        Self {
            method: IpMethod::default(),
            aper_rad: default_aper_rad(),
            force: false,
        }
    }
}

impl IpOptions {
    pub fn validate(&self) -> Result<()> {
        if self.aper_rad <= 0.0 {
            return Err(BorealisError::invalid_field(
                "polarimetry.ip.aper_rad",
                format!("must be positive, got {}", self.aper_rad),
            ));
        }
        Ok(())
    }
}

/// Polarimetric differential imaging options. Processed after all
/// per-file stages, since it needs complete HWP sets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolarimetryOptions {
    /// Cubes expected per HWP position.
    #[serde(default = "default_n_per_hwp", skip_serializing_if = "is_default_n_per_hwp")]
    pub n_per_hwp: usize,
    /// Rotate Stokes vectors by the parallactic angle (for data not taken
    /// in pupil-tracking mode).
    #[serde(default, skip_serializing_if = "is_false")]
    pub derotate_pa: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub force: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpOptions>,
}

fn default_n_per_hwp() -> usize {
    1
}

fn is_default_n_per_hwp(v: &usize) -> bool {
    *v == default_n_per_hwp()
}

impl Default for PolarimetryOptions {
    fn default() -> Self {
        Self {
            n_per_hwp: default_n_per_hwp(),
            derotate_pa: false,
            output_directory: None,
            force: false,
            ip: None,
        }
    }
}

impl PolarimetryOptions {
    pub fn validate(&self) -> Result<()> {
        if self.n_per_hwp == 0 {
            return Err(BorealisError::invalid_field(
                "polarimetry.n_per_hwp",
                "must be at least 1",
            ));
        }
        if let Some(ip) = &self.ip {
            ip.validate()?;
        }
        Ok(())
    }
}

/// Final products assembled from the stage outputs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProductOptions {
    /// Save a CSV with the header of every input file.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub header_table: bool,
    /// Save per-camera ADI cubes with derotation angle lists.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub adi_cubes: bool,
    /// Save the collapsed Stokes cube from the PDI outputs.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub pdi_cubes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub force: bool,
}

impl Default for ProductOptions {
    fn default() -> Self {
        Self {
            header_table: true,
            adi_cubes: true,
            pdi_cubes: true,
            output_directory: None,
            force: false,
        }
    }
}
