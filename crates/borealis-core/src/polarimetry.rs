use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::{s, Array2, Array3, Axis};

use crate::consts::{HWP_SEQUENCE, PUPIL_OFFSET, STOKES_PLANES, STOKES_PLANE_COUNT};
use crate::collapse::combine_headers;
use crate::cube::{Beam, Cube};
use crate::error::{BorealisError, Result};
use crate::indexing::{frame_angles_astro, WindowContext};
use crate::io::fits::{self, missing_keyword, Header};
use crate::mueller;
use crate::paths::needs_recompute;
use crate::pipeline::config::{IpMethod, IpOptions, PolarimetryOptions};

/// One collapsed beam frame entering the polarimetric grouping.
#[derive(Clone, Debug)]
pub struct PolFrame {
    pub path: PathBuf,
    pub target: String,
    pub mjd: f64,
    pub hwp_angle: f64,
    pub beam: Option<Beam>,
}

impl PolFrame {
    pub fn from_file(path: &Path) -> Result<Self> {
        let header = fits::read_header(path)?;
        Self::from_header(path, &header)
    }

    pub fn from_header(path: &Path, header: &Header) -> Result<Self> {
        let hwp_angle = header
            .float("U_HWPANG")
            .ok_or_else(|| missing_keyword(path, "U_HWPANG"))?;
        Ok(Self {
            path: path.to_path_buf(),
            target: header.string("OBJECT").unwrap_or_default().to_string(),
            mjd: header.float("MJD").unwrap_or(0.0),
            hwp_angle,
            beam: header.string("BEAM").and_then(Beam::from_str),
        })
    }
}

/// Simultaneous left/right beam pair at one HWP position.
#[derive(Clone, Debug)]
pub struct PolPair {
    pub left: PolFrame,
    pub right: PolFrame,
}

impl PolPair {
    pub fn hwp_angle(&self) -> f64 {
        self.left.hwp_angle
    }

    pub fn mjd(&self) -> f64 {
        self.left.mjd
    }

    pub fn paths(&self) -> [&Path; 2] {
        [&self.left.path, &self.right.path]
    }
}

/// One (target, HWP cycle) group of beam pairs.
#[derive(Clone, Debug)]
pub struct HwpSet {
    pub target: String,
    pub cycle: usize,
    pub pairs: Vec<PolPair>,
}

impl HwpSet {
    /// A set is complete when every HWP position in the modulation
    /// sequence has exactly `n_per_hwp` pairs.
    pub fn is_complete(&self, n_per_hwp: usize) -> bool {
        HWP_SEQUENCE.iter().all(|&angle| {
            self.pairs
                .iter()
                .filter(|p| hwp_position(p.hwp_angle()) == hwp_position(angle))
                .count()
                == n_per_hwp
        })
    }
}

/// Index of the nearest HWP position in the modulation sequence.
fn hwp_position(angle: f64) -> usize {
    HWP_SEQUENCE
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (angle - **a).abs().total_cmp(&(angle - **b).abs()))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Pair left and right beam frames captured simultaneously (same target
/// and observation time). Unpaired frames are returned separately.
pub fn pair_beams(frames: Vec<PolFrame>) -> (Vec<PolPair>, Vec<PolFrame>) {
    let mut lefts: Vec<PolFrame> = Vec::new();
    let mut rights: Vec<PolFrame> = Vec::new();
    let mut unpaired: Vec<PolFrame> = Vec::new();
    for frame in frames {
        match frame.beam {
            Some(Beam::Left) => lefts.push(frame),
            Some(Beam::Right) => rights.push(frame),
            None => unpaired.push(frame),
        }
    }

    let mut pairs = Vec::new();
    for left in lefts {
        let m = rights.iter().position(|r| {
            r.target == left.target && (r.mjd - left.mjd).abs() < 1e-8
        });
        match m {
            Some(idx) => pairs.push(PolPair {
                left,
                right: rights.swap_remove(idx),
            }),
            None => unpaired.push(left),
        }
    }
    unpaired.extend(rights);
    pairs.sort_by(|a, b| a.mjd().total_cmp(&b.mjd()));
    (pairs, unpaired)
}

/// Group beam pairs into HWP cycles per target, in time order.
///
/// Returns the complete sets and the incomplete ones; incomplete sets are
/// reported and excluded from combination, never processed.
pub fn group_hwp_sets(pairs: Vec<PolPair>, n_per_hwp: usize) -> (Vec<HwpSet>, Vec<HwpSet>) {
    let mut by_target: BTreeMap<String, Vec<PolPair>> = BTreeMap::new();
    for pair in pairs {
        by_target
            .entry(pair.left.target.clone())
            .or_default()
            .push(pair);
    }

    let mut complete = Vec::new();
    let mut incomplete = Vec::new();
    for (target, mut pairs) in by_target {
        pairs.sort_by(|a, b| a.mjd().total_cmp(&b.mjd()));
        let mut cycle = 0usize;
        let mut counts = [0usize; HWP_SEQUENCE.len()];
        let mut current: Vec<PolPair> = Vec::new();

        let mut flush = |current: &mut Vec<PolPair>,
                         counts: &mut [usize; HWP_SEQUENCE.len()],
                         cycle: &mut usize,
                         done: bool| {
            if current.is_empty() {
                return;
            }
            let set = HwpSet {
                target: target.clone(),
                cycle: *cycle,
                pairs: std::mem::take(current),
            };
            *cycle += 1;
            *counts = [0; HWP_SEQUENCE.len()];
            if done {
                complete.push(set);
            } else {
                incomplete.push(set);
            }
        };

        for pair in pairs {
            let position = hwp_position(pair.hwp_angle());
            if counts[position] == n_per_hwp {
                // the sequence restarted before this set filled up
                flush(&mut current, &mut counts, &mut cycle, false);
            }
            counts[position] += 1;
            current.push(pair);
            if counts.iter().all(|&c| c == n_per_hwp) {
                flush(&mut current, &mut counts, &mut cycle, true);
            }
        }
        flush(&mut current, &mut counts, &mut cycle, false);
    }
    (complete, incomplete)
}

/// Double-difference Stokes construction over one complete HWP set.
///
/// The single difference of the two beams isolates the linear polarization
/// along the HWP basis; differencing the 0/45 and 22.5/67.5 positions
/// removes instrumental signal common to both, yielding Q and U.
pub fn stokes_from_set(frames: &[(f64, Array2<f32>, Array2<f32>)]) -> Result<Array3<f32>> {
    let Some((_, first, _)) = frames.first() else {
        return Err(BorealisError::EmptySequence);
    };
    let (h, w) = first.dim();

    let mut diffs: [Option<Array2<f32>>; HWP_SEQUENCE.len()] = Default::default();
    let mut counts = [0usize; HWP_SEQUENCE.len()];
    let mut intensity = Array2::<f32>::zeros((h, w));
    for (angle, left, right) in frames {
        if left.dim() != (h, w) || right.dim() != (h, w) {
            return Err(BorealisError::DimensionMismatch(
                "beam frames differ in shape".to_string(),
            ));
        }
        let position = hwp_position(*angle);
        let diff = left - right;
        match &mut diffs[position] {
            Some(acc) => *acc += &diff,
            None => diffs[position] = Some(diff),
        }
        counts[position] += 1;
        intensity += &(left + right);
    }
    let mut mean_diffs = Vec::with_capacity(HWP_SEQUENCE.len());
    for (i, diff) in diffs.into_iter().enumerate() {
        let diff = diff.ok_or_else(|| {
            BorealisError::Pipeline(format!(
                "no frames at HWP position {}",
                HWP_SEQUENCE[i]
            ))
        })?;
        mean_diffs.push(diff / counts[i] as f32);
    }
    // each pair's beam sum is one measurement of the total intensity
    intensity /= frames.len() as f32;

    let q = (&mean_diffs[0] - &mean_diffs[1]) / 2.0;
    let u = (&mean_diffs[2] - &mean_diffs[3]) / 2.0;

    Ok(assemble_stokes_cube(intensity, q, u))
}

/// Stack I, Q, U and the derived planes into the output cube.
fn assemble_stokes_cube(i: Array2<f32>, q: Array2<f32>, u: Array2<f32>) -> Array3<f32> {
    let (h, w) = i.dim();
    let center = crate::indexing::frame_center((h, w));
    let phi = frame_angles_astro((h, w), center);

    let mut cube = Array3::<f32>::zeros((STOKES_PLANE_COUNT, h, w));
    for ((y, x), &angle) in phi.indexed_iter() {
        let cos2p = (2.0 * angle).cos() as f32;
        let sin2p = (2.0 * angle).sin() as f32;
        let qv = q[[y, x]];
        let uv = u[[y, x]];
        cube[[0, y, x]] = i[[y, x]];
        cube[[1, y, x]] = qv;
        cube[[2, y, x]] = uv;
        cube[[3, y, x]] = -qv * cos2p - uv * sin2p;
        cube[[4, y, x]] = qv * sin2p - uv * cos2p;
        cube[[5, y, x]] = (qv * qv + uv * uv).sqrt();
        cube[[6, y, x]] = 0.5 * uv.atan2(qv).to_degrees();
    }
    cube
}

/// Rotate the Q/U planes of a Stokes cube by `theta` (radians) using the
/// Mueller rotator, rebuilding the derived planes afterwards.
pub fn rotate_stokes(cube: &Array3<f32>, theta: f64) -> Array3<f32> {
    let rot = mueller::rotator(theta);
    let (c, s) = (rot[[1, 1]] as f32, rot[[1, 2]] as f32);
    let (_, h, w) = cube.dim();
    let i = cube.index_axis(Axis(0), 0).to_owned();
    let mut q = Array2::<f32>::zeros((h, w));
    let mut u = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let qv = cube[[1, y, x]];
            let uv = cube[[2, y, x]];
            q[[y, x]] = c * qv + s * uv;
            u[[y, x]] = -s * qv + c * uv;
        }
    }
    assemble_stokes_cube(i, q, u)
}

/// Mean flux inside the aperture windows for a plane of the cube.
fn aperture_flux(
    plane: &Array2<f32>,
    ctx: &WindowContext,
    aper_rad: f64,
) -> f64 {
    let shape = plane.dim();
    let slices = ctx.measure_slices(shape, 2.0 * aper_rad);
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for (ys, xs) in slices {
        for value in plane.slice(s![ys, xs]).iter() {
            if value.is_finite() {
                sum += *value as f64;
                count += 1;
            }
        }
    }
    if count > 0 {
        sum / count as f64
    } else {
        0.0
    }
}

/// Remove the instrumental polarization estimated from the stellar (or
/// satellite-spot) photometry, or from the Mueller model of the pupil
/// rotation. Stars are assumed unpolarized, so any Q/I or U/I measured on
/// the PSF is instrumental and is subtracted.
pub fn apply_ip_correction(
    cube: &Array3<f32>,
    options: &IpOptions,
    ctx: &WindowContext,
) -> Array3<f32> {
    match options.method {
        IpMethod::Mueller => rotate_stokes(cube, -PUPIL_OFFSET.to_radians()),
        IpMethod::Photometry | IpMethod::Satspots => {
            let psf_ctx = match options.method {
                IpMethod::Photometry => WindowContext {
                    center: ctx.center,
                    satspot_radius: None,
                },
                _ => *ctx,
            };
            let i_flux = aperture_flux(&cube.index_axis(Axis(0), 0).to_owned(), &psf_ctx, options.aper_rad);
            let (_, h, w) = cube.dim();
            let i = cube.index_axis(Axis(0), 0).to_owned();
            let mut q = cube.index_axis(Axis(0), 1).to_owned();
            let mut u = cube.index_axis(Axis(0), 2).to_owned();
            if i_flux != 0.0 {
                let cq = aperture_flux(&q, &psf_ctx, options.aper_rad) / i_flux;
                let cu = aperture_flux(&u, &psf_ctx, options.aper_rad) / i_flux;
                for y in 0..h {
                    for x in 0..w {
                        q[[y, x]] -= cq as f32 * i[[y, x]];
                        u[[y, x]] -= cu as f32 * i[[y, x]];
                    }
                }
            }
            assemble_stokes_cube(i, q, u)
        }
    }
}

/// Process one complete HWP set: build the Stokes cube, optionally apply
/// the IP correction, and write the per-cycle products. Returns the paths
/// written, the IP-corrected one last when requested.
pub fn polarimetry_file(
    set: &HwpSet,
    name: &str,
    options: &PolarimetryOptions,
    ctx: &WindowContext,
) -> Result<Vec<PathBuf>> {
    let outdir = match &options.output_directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            dir.clone()
        }
        None => set.pairs[0]
            .left
            .path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .to_path_buf(),
    };
    let outpath = outdir.join(format!("{name}_stokes_{:03}.fits", set.cycle));
    let inputs: Vec<&Path> = set.pairs.iter().flat_map(|p| p.paths()).collect();

    let ip_outpath = options
        .ip
        .as_ref()
        .map(|_| outdir.join(format!("{name}_stokes_{:03}_ip.fits", set.cycle)));
    let force = options.force || options.ip.as_ref().map(|ip| ip.force).unwrap_or(false);
    let current = !needs_recompute(&inputs, &outpath, force)
        && ip_outpath
            .as_ref()
            .map(|p| !needs_recompute(&inputs, p, force))
            .unwrap_or(true);
    if current {
        let mut written = vec![outpath];
        written.extend(ip_outpath);
        return Ok(written);
    }

    let mut frames = Vec::with_capacity(set.pairs.len());
    let mut headers = Vec::new();
    let mut parangs = Vec::new();
    for pair in &set.pairs {
        let left = Cube::open(&pair.left.path)?;
        let right = Cube::open(&pair.right.path)?;
        if let Some(parang) = left.header.float("PARANG") {
            parangs.push(parang);
        }
        frames.push((
            pair.hwp_angle(),
            left.frame(0).to_owned(),
            right.frame(0).to_owned(),
        ));
        headers.push(left.header);
    }

    let mut stokes = stokes_from_set(&frames)?;
    if options.derotate_pa && !parangs.is_empty() {
        let mean_pa = parangs.iter().sum::<f64>() / parangs.len() as f64;
        stokes = rotate_stokes(&stokes, mean_pa.to_radians());
    }

    let mut header = combine_headers(&headers);
    header.remove("BEAM");
    header.set(
        "STOKES",
        STOKES_PLANES.join(","),
        Some("Stokes cube plane names"),
    );
    header.set("HWPCYCLE", set.cycle as i64, Some("HWP cycle index"));
    fits::write_fits(&outpath, &stokes, &header)?;

    let mut written = vec![outpath];
    if let (Some(ip), Some(ip_outpath)) = (&options.ip, ip_outpath) {
        let corrected = apply_ip_correction(&stokes, ip, ctx);
        header.set("IP_METH", ip.method.to_string(), Some("IP correction method"));
        fits::write_fits(&ip_outpath, &corrected, &header)?;
        written.push(ip_outpath);
    }
    Ok(written)
}
