use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, ArrayView2, Axis};
use rayon::prelude::*;
use tracing::warn;

use crate::collapse::{collapse_cube, collapse_frames_files, compute_median};
use crate::consts::PUPIL_OFFSET;
use crate::cube::{Beam, Camera, Cube};
use crate::error::{BorealisError, Result};
use crate::headers::{apply_derotation_angles, fix_header};
use crate::io::fits::{self, Header};
use crate::paths::{get_paths, needs_recompute, PathSpec};
use crate::pipeline::config::{CalibrateOptions, CollapseMethod, CoordinateOptions};

/// Bad-pixel threshold in units of the residual standard deviation.
const BAD_PIXEL_SIGMA: f32 = 5.0;

/// Drop frames that are entirely zero or non-finite (dropped readouts).
pub fn filter_empty_frames(data: Array3<f32>) -> Array3<f32> {
    let keep: Vec<usize> = (0..data.len_of(Axis(0)))
        .filter(|&i| {
            data.index_axis(Axis(0), i)
                .iter()
                .any(|v| v.is_finite() && *v != 0.0)
        })
        .collect();
    if keep.len() == data.len_of(Axis(0)) {
        return data;
    }
    let (_, h, w) = data.dim();
    let mut filtered = Array3::<f32>::zeros((keep.len(), h, w));
    for (dst, &src) in keep.iter().enumerate() {
        filtered
            .index_axis_mut(Axis(0), dst)
            .assign(&data.index_axis(Axis(0), src));
    }
    filtered
}

fn median_filter_3x3(frame: &ArrayView2<f32>) -> Array2<f32> {
    let (h, w) = frame.dim();
    let mut result = Array2::<f32>::zeros((h, w));
    let mut window = [0.0f32; 9];
    for y in 0..h {
        for x in 0..w {
            let mut n = 0;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let sy = y as i64 + dy;
                    let sx = x as i64 + dx;
                    if sy >= 0 && sy < h as i64 && sx >= 0 && sx < w as i64 {
                        window[n] = frame[[sy as usize, sx as usize]];
                        n += 1;
                    }
                }
            }
            result[[y, x]] = compute_median(&mut window[..n]);
        }
    }
    result
}

/// Flag pixels deviating from their local median by more than
/// [`BAD_PIXEL_SIGMA`] residual standard deviations and return the
/// median-replaced frame.
pub fn fix_bad_pixels(frame: &ArrayView2<f32>) -> (Array2<bool>, Array2<f32>) {
    let smooth = median_filter_3x3(frame);
    let residual = frame.to_owned() - &smooth;
    let n = residual.len() as f32;
    let mean = residual.iter().sum::<f32>() / n;
    let var = residual.iter().map(|&v| (v - mean) * (v - mean)).sum::<f32>() / n;
    let sigma = var.sqrt();

    let mask = residual.mapv(|v| sigma > 0.0 && (v - mean).abs() > BAD_PIXEL_SIGMA * sigma);
    let mut clean = frame.to_owned();
    for ((y, x), &bad) in mask.indexed_iter() {
        if bad {
            clean[[y, x]] = smooth[[y, x]];
        }
    }
    (mask, clean)
}

/// Per-camera geometric distortion terms loaded from the transform CSV,
/// one `camera,angle,scale` row per camera.
fn load_distortion(path: &Path, camera: Camera) -> Result<(f64, f64)> {
    let text = std::fs::read_to_string(path)?;
    for line in text.lines().skip(1) {
        let mut fields = line.split(',').map(str::trim);
        let (Some(cam), Some(angle), Some(scale)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if cam.parse::<u8>().ok() == Some(camera.index()) {
            let angle = angle.parse::<f64>().map_err(|e| {
                BorealisError::Pipeline(format!("bad distortion angle in {}: {e}", path.display()))
            })?;
            let scale = scale.parse::<f64>().map_err(|e| {
                BorealisError::Pipeline(format!("bad distortion scale in {}: {e}", path.display()))
            })?;
            return Ok((angle, scale));
        }
    }
    Err(BorealisError::Pipeline(format!(
        "no distortion row for {camera} in {}",
        path.display()
    )))
}

/// Rotate and scale every frame about its center to match the pinhole
/// grid, stamping the applied terms into the header.
fn correct_distortion_cube(
    data: &mut Array3<f32>,
    angle: f64,
    scale: f64,
    header: &mut Header,
) {
    let (n, h, w) = data.dim();
    let center = crate::indexing::frame_center((h, w));
    let rad = angle.to_radians();
    let (sin, cos) = rad.sin_cos();
    let inv_scale = if scale != 0.0 { 1.0 / scale } else { 1.0 };

    for i in 0..n {
        let frame = data.index_axis(Axis(0), i).to_owned();
        let mut out = data.index_axis_mut(Axis(0), i);
        for y in 0..h {
            for x in 0..w {
                let dy = y as f64 - center.0;
                let dx = x as f64 - center.1;
                let src_y = center.0 + inv_scale * (cos * dy - sin * dx);
                let src_x = center.1 + inv_scale * (sin * dy + cos * dx);
                out[[y, x]] = crate::register::bilinear_sample(&frame.view(), src_y, src_x);
            }
        }
    }
    header.set("DISTSCAL", scale, Some("scaling ratio for distortion correction"));
    header.set("DISTANGL", angle, Some("[deg] offset angle for distortion correction"));
}

fn beam_outpaths(outpath: &Path) -> Result<(PathBuf, PathBuf)> {
    let stem = outpath
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| BorealisError::Pipeline(format!("bad path {}", outpath.display())))?;
    let parent = outpath.parent().unwrap_or_else(|| Path::new(""));
    Ok((
        parent.join(format!("{stem}_left.fits")),
        parent.join(format!("{stem}_right.fits")),
    ))
}

/// Calibrate one raw cube: dark subtraction, flat normalization, bad-pixel
/// correction, vertical flip, and a left/right beam split when the
/// wollaston is in. Writes one `_calib` file, or two beam files in PDI
/// mode, and never touches the raw input.
///
/// When a target coordinate is known it replaces the telescope-reported
/// pointing in the output headers.
pub fn calibrate_file(
    filename: &Path,
    camera: Camera,
    options: &CalibrateOptions,
    coordinate: Option<&CoordinateOptions>,
) -> Result<Vec<(PathBuf, Option<Beam>)>> {
    let spec = PathSpec::suffix("calib")
        .with_output_directory(options.output_directory.as_deref());
    let (path, outpath) = get_paths(filename, &spec)?;

    let header = fits::read_header(&path)?;
    let pdi_mode = header.string("X_IRCWOL") == Some("IN");

    if pdi_mode {
        let (outpath_left, outpath_right) = beam_outpaths(&outpath)?;
        if !needs_recompute(&[&path], &outpath_left, options.force)
            && !needs_recompute(&[&path], &outpath_right, options.force)
        {
            return Ok(vec![
                (outpath_left, Some(Beam::Left)),
                (outpath_right, Some(Beam::Right)),
            ]);
        }
    } else if !needs_recompute(&[&path], &outpath, options.force) {
        return Ok(vec![(outpath, None)]);
    }

    let cube = Cube::open(&path)?;
    let mut data = filter_empty_frames(cube.data);
    if data.len_of(Axis(0)) == 0 {
        return Err(BorealisError::EmptySequence);
    }
    // first two detector rows carry readout reference values, not signal
    data.slice_mut(ndarray::s![.., ..2, ..]).fill(0.0);

    let mut header = cube.header;
    fix_header(&mut header);
    apply_derotation_angles(&mut header, PUPIL_OFFSET);
    if let Some(coord) = coordinate {
        header.set("RA", coord.ra.as_str(), Some("right ascension of target"));
        header.set("DEC", coord.dec.as_str(), Some("declination of target"));
    }

    if let Some(dark_path) = options.master_darks.get(camera) {
        let dark = Cube::open(dark_path)?;
        let dark_frame = dark.frame(0).to_owned();
        check_frame_shape(&data, &dark_frame, dark_path)?;
        for mut frame in data.axis_iter_mut(Axis(0)) {
            frame -= &dark_frame;
        }
        header.set(
            "MDARK",
            dark_path.to_string_lossy().as_ref(),
            Some("file used for dark subtraction"),
        );
    }
    if let Some(flat_path) = options.master_flats.get(camera) {
        let flat = Cube::open(flat_path)?;
        // suppress pixels with no flat response instead of dividing by ~0
        let flat_frame = flat.frame(0).mapv(|v| if v < 0.1 { 1e4 } else { v });
        check_frame_shape(&data, &flat_frame, flat_path)?;
        for mut frame in data.axis_iter_mut(Axis(0)) {
            frame /= &flat_frame;
        }
        header.set(
            "MFLAT",
            flat_path.to_string_lossy().as_ref(),
            Some("file used for flat normalization"),
        );
    }
    if options.fix_bad_pixels {
        let mean_frame = data
            .mean_axis(Axis(0))
            .ok_or(BorealisError::EmptySequence)?;
        let (mask, _) = fix_bad_pixels(&mean_frame.view());
        for i in 0..data.len_of(Axis(0)) {
            let smooth = median_filter_3x3(&data.index_axis(Axis(0), i));
            let mut frame = data.index_axis_mut(Axis(0), i);
            for ((y, x), &bad) in mask.indexed_iter() {
                if bad {
                    frame[[y, x]] = smooth[[y, x]];
                }
            }
        }
    }
    if let Some(distortion) = &options.distortion {
        let (angle, scale) = load_distortion(&distortion.transform_filename, camera)?;
        correct_distortion_cube(&mut data, angle, scale, &mut header);
    }
    // flip so North is toward increasing row index
    data.invert_axis(Axis(1));

    if pdi_mode {
        let (outpath_left, outpath_right) = beam_outpaths(&outpath)?;
        let mid = data.len_of(Axis(2)) / 2;

        let mut left = data.clone();
        left.slice_mut(ndarray::s![.., .., mid..]).fill(f32::NAN);
        let mut left_header = header.clone();
        left_header.set("BEAM", Beam::Left.as_str(), Some("wollaston beam"));
        fits::write_fits(&outpath_left, &left, &left_header)?;

        let mut right = data;
        right.slice_mut(ndarray::s![.., .., ..mid]).fill(f32::NAN);
        header.set("BEAM", Beam::Right.as_str(), Some("wollaston beam"));
        fits::write_fits(&outpath_right, &right, &header)?;

        return Ok(vec![
            (outpath_left, Some(Beam::Left)),
            (outpath_right, Some(Beam::Right)),
        ]);
    }

    fits::write_fits(&outpath, &data, &header)?;
    Ok(vec![(outpath, None)])
}

fn check_frame_shape(data: &Array3<f32>, frame: &Array2<f32>, path: &Path) -> Result<()> {
    let (_, h, w) = data.dim();
    if frame.dim() != (h, w) {
        return Err(BorealisError::DimensionMismatch(format!(
            "{} is {}x{}, expected {}x{}",
            path.display(),
            frame.dim().1,
            frame.dim().0,
            w,
            h
        )));
    }
    Ok(())
}

/// Collapse and clean one raw dark cube into a `_collapsed` frame.
pub fn make_dark_file(
    filename: &Path,
    method: CollapseMethod,
    output_directory: Option<&Path>,
    force: bool,
) -> Result<PathBuf> {
    let spec = PathSpec::suffix("collapsed").with_output_directory(output_directory);
    let (path, outpath) = get_paths(filename, &spec)?;
    if !needs_recompute(&[&path], &outpath, force) {
        return Ok(outpath);
    }
    let cube = Cube::open(&path)?;
    let mut data = filter_empty_frames(cube.data);
    if data.len_of(Axis(0)) == 0 {
        return Err(BorealisError::EmptySequence);
    }
    data.slice_mut(ndarray::s![.., ..2, ..]).fill(0.0);
    let master = collapse_cube(&data, method)?;
    let (_, clean) = fix_bad_pixels(&master.view());
    let mut header = cube.header;
    header.set("COL_METH", method.to_string(), Some("cube collapse method"));
    fits::write_fits(&outpath, &clean.insert_axis(Axis(0)), &header)?;
    Ok(outpath)
}

/// Collapse, dark-subtract, clean, and median-normalize one raw flat cube.
pub fn make_flat_file(
    filename: &Path,
    dark_filename: Option<&Path>,
    method: CollapseMethod,
    output_directory: Option<&Path>,
    force: bool,
) -> Result<PathBuf> {
    let spec = PathSpec::suffix("collapsed").with_output_directory(output_directory);
    let (path, outpath) = get_paths(filename, &spec)?;
    if !needs_recompute(&[&path], &outpath, force) {
        return Ok(outpath);
    }
    let cube = Cube::open(&path)?;
    let mut data = filter_empty_frames(cube.data);
    if data.len_of(Axis(0)) == 0 {
        return Err(BorealisError::EmptySequence);
    }
    let mut header = cube.header;
    if let Some(dark_path) = dark_filename {
        let dark = Cube::open(dark_path)?;
        let dark_frame = dark.frame(0).to_owned();
        check_frame_shape(&data, &dark_frame, dark_path)?;
        for mut frame in data.axis_iter_mut(Axis(0)) {
            frame -= &dark_frame;
        }
        header.set(
            "MDARK",
            dark_path.to_string_lossy().as_ref(),
            Some("file used for dark subtraction"),
        );
    }
    data.slice_mut(ndarray::s![.., ..2, ..]).fill(0.0);
    let master = collapse_cube(&data, method)?;
    let (_, mut clean) = fix_bad_pixels(&master.view());

    let mut values: Vec<f32> = clean.iter().copied().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return Err(BorealisError::EmptySequence);
    }
    let norm = compute_median(&mut values);
    if norm != 0.0 {
        clean.mapv_inplace(|v| v / norm);
    }
    header.set("COL_METH", method.to_string(), Some("cube collapse method"));
    fits::write_fits(&outpath, &clean.insert_axis(Axis(0)), &header)?;
    Ok(outpath)
}

/// Group calibration files by the detector settings that must match
/// between darks and the data they correct.
pub fn sort_calib_files<P: AsRef<Path>>(filenames: &[P]) -> Result<HashMap<(i64, i64), Vec<PathBuf>>> {
    let mut groups: HashMap<(i64, i64), Vec<PathBuf>> = HashMap::new();
    for filename in filenames {
        let path = filename.as_ref();
        let header = fits::read_header(path)?;
        let key = calib_key(path, &header)?;
        groups.entry(key).or_default().push(path.to_path_buf());
    }
    Ok(groups)
}

fn calib_key(path: &Path, header: &Header) -> Result<(i64, i64)> {
    let gain = header
        .float("DETGAIN")
        .ok_or_else(|| fits::missing_keyword(path, "DETGAIN"))?;
    let exptime = header
        .float("EXPTIME")
        .ok_or_else(|| fits::missing_keyword(path, "EXPTIME"))?;
    let nsmp = header.float("DET-NSMP").unwrap_or(1.0);
    Ok((gain.round() as i64, (exptime * nsmp * 1e3).round() as i64))
}

fn master_name(prefix: &str, key: (i64, i64)) -> String {
    format!("{prefix}_em{}_{:05}ms.fits", key.0, key.1)
}

/// Build one master dark per detector-setting group.
pub fn make_master_dark<P: AsRef<Path> + Sync>(
    filenames: &[P],
    method: CollapseMethod,
    output_directory: &Path,
    force: bool,
) -> Result<Vec<PathBuf>> {
    let groups = sort_calib_files(filenames)?;
    std::fs::create_dir_all(output_directory)?;
    let collapsed_dir = output_directory.join("collapsed");

    let mut outnames = Vec::new();
    for (key, filelist) in groups {
        let outname = output_directory.join(master_name("master_dark", key));
        if !force && !crate::paths::is_stale(&filelist, &outname) {
            outnames.push(outname);
            continue;
        }
        let collapsed: Vec<PathBuf> = filelist
            .par_iter()
            .filter_map(|path| {
                make_dark_file(path, method, Some(&collapsed_dir), force)
                    .map_err(|e| warn!(file = %path.display(), error = %e, "skipping dark"))
                    .ok()
            })
            .collect();
        if collapsed.is_empty() {
            return Err(BorealisError::EmptySequence);
        }
        collapse_frames_files(&collapsed, &outname, method, force)?;
        outnames.push(outname);
    }
    Ok(outnames)
}

/// Build one master flat per detector-setting group, subtracting the
/// matching master dark when available.
pub fn make_master_flat<P: AsRef<Path> + Sync>(
    filenames: &[P],
    master_darks: Option<&[PathBuf]>,
    method: CollapseMethod,
    output_directory: &Path,
    force: bool,
) -> Result<Vec<PathBuf>> {
    let groups = sort_calib_files(filenames)?;
    let dark_groups = match master_darks {
        Some(darks) => sort_calib_files(darks)?,
        None => HashMap::new(),
    };
    std::fs::create_dir_all(output_directory)?;
    let collapsed_dir = output_directory.join("collapsed");

    let mut outnames = Vec::new();
    for (key, filelist) in groups {
        let outname = output_directory.join(master_name("master_flat", key));
        if !force && !crate::paths::is_stale(&filelist, &outname) {
            outnames.push(outname);
            continue;
        }
        let dark = dark_groups.get(&key).and_then(|d| d.first());
        let collapsed: Vec<PathBuf> = filelist
            .par_iter()
            .filter_map(|path| {
                make_flat_file(path, dark.map(|d| d.as_path()), method, Some(&collapsed_dir), force)
                    .map_err(|e| warn!(file = %path.display(), error = %e, "skipping flat"))
                    .ok()
            })
            .collect();
        if collapsed.is_empty() {
            return Err(BorealisError::EmptySequence);
        }
        collapse_frames_files(&collapsed, &outname, method, force)?;
        outnames.push(outname);
    }
    Ok(outnames)
}
