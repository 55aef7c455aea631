use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, Axis};
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::cube::Cube;
use crate::error::{BorealisError, Result};
use crate::io::fits::{self, Header};
use crate::paths::{get_paths, needs_recompute, PathSpec};
use crate::pipeline::config::{CollapseMethod, CollapseOptions};

/// Collapse a cube along its time axis with the given statistic.
pub fn collapse_cube(data: &Array3<f32>, method: CollapseMethod) -> Result<Array2<f32>> {
    let (n, h, w) = data.dim();
    if n == 0 {
        return Err(BorealisError::EmptySequence);
    }

    match method {
        CollapseMethod::Mean => data
            .mean_axis(Axis(0))
            .ok_or(BorealisError::EmptySequence),
        CollapseMethod::Median => Ok(collapse_pixelwise(data, |values| {
            compute_median(values)
        })),
        CollapseMethod::Biweight => Ok(collapse_pixelwise(data, |values| {
            biweight_location(values, 6.0)
        })),
        CollapseMethod::Varmean => {
            // weight each frame by its inverse variance
            let weights: Vec<f64> = (0..n)
                .map(|i| {
                    let frame = data.index_axis(Axis(0), i);
                    let mean = frame.iter().map(|&v| v as f64).sum::<f64>() / (h * w) as f64;
                    let var = frame
                        .iter()
                        .map(|&v| {
                            let d = v as f64 - mean;
                            d * d
                        })
                        .sum::<f64>()
                        / (h * w) as f64;
                    if var > 0.0 {
                        1.0 / var
                    } else {
                        0.0
                    }
                })
                .collect();
            let total: f64 = weights.iter().sum();
            if total == 0.0 {
                return data.mean_axis(Axis(0)).ok_or(BorealisError::EmptySequence);
            }
            let mut result = Array2::<f32>::zeros((h, w));
            for (i, &weight) in weights.iter().enumerate() {
                result.scaled_add((weight / total) as f32, &data.index_axis(Axis(0), i));
            }
            Ok(result)
        }
    }
}

/// Apply `stat` to the per-pixel time series. Parallelizes at the row
/// level for large frames.
fn collapse_pixelwise<F>(data: &Array3<f32>, stat: F) -> Array2<f32>
where
    F: Fn(&mut [f32]) -> f32 + Sync,
{
    let (n, h, w) = data.dim();

    let collapse_row = |row: usize| -> Vec<f32> {
        let mut values = vec![0.0f32; n];
        let mut out = vec![0.0f32; w];
        for (col, result) in out.iter_mut().enumerate() {
            for i in 0..n {
                values[i] = data[[i, row, col]];
            }
            *result = stat(&mut values);
        }
        out
    };

    let rows: Vec<Vec<f32>> = if h * w >= PARALLEL_PIXEL_THRESHOLD && n > 1 {
        (0..h).into_par_iter().map(collapse_row).collect()
    } else {
        (0..h).map(collapse_row).collect()
    };

    let mut result = Array2::<f32>::zeros((h, w));
    for (row, row_data) in rows.into_iter().enumerate() {
        for (col, val) in row_data.into_iter().enumerate() {
            result[[row, col]] = val;
        }
    }
    result
}

/// Median via `select_nth_unstable`, O(n) without a full sort.
pub fn compute_median(values: &mut [f32]) -> f32 {
    let n = values.len();
    if n == 1 {
        values[0]
    } else if n % 2 == 1 {
        let mid = n / 2;
        *values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b)).1
    } else {
        let mid = n / 2;
        values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        values[..mid].select_nth_unstable_by(mid - 1, |a, b| a.total_cmp(b));
        (values[mid - 1] + values[mid]) / 2.0
    }
}

/// Tukey biweight location with tuning constant `c` (in units of the MAD).
pub fn biweight_location(values: &mut [f32], c: f64) -> f32 {
    let median = compute_median(values) as f64;
    let mut deviations: Vec<f32> = values.iter().map(|&v| (v as f64 - median).abs() as f32).collect();
    let mad = compute_median(&mut deviations) as f64;
    if mad == 0.0 {
        return median as f32;
    }

    let mut numer = 0.0f64;
    let mut denom = 0.0f64;
    for &v in values.iter() {
        let u = (v as f64 - median) / (c * mad);
        if u.abs() < 1.0 {
            let weight = (1.0 - u * u).powi(2);
            numer += (v as f64 - median) * weight;
            denom += weight;
        }
    }
    if denom == 0.0 {
        median as f32
    } else {
        (median + numer / denom) as f32
    }
}

/// Collapse a single cube file, writing the `_collapsed` sibling unless it
/// is already current.
pub fn collapse_file(filename: &Path, options: &CollapseOptions) -> Result<PathBuf> {
    let spec = PathSpec::suffix("collapsed")
        .with_output_directory(options.output_directory.as_deref());
    let (path, outpath) = get_paths(filename, &spec)?;
    if !needs_recompute(&[&path], &outpath, options.force) {
        return Ok(outpath);
    }

    let cube = Cube::open(&path)?;
    let frame = collapse_cube(&cube.data, options.method)?;
    let mut header = cube.header;
    header.set(
        "COL_METH",
        options.method.to_string(),
        Some("cube collapse method"),
    );
    fits::write_fits(&outpath, &frame.insert_axis(Axis(0)), &header)?;
    Ok(outpath)
}

/// Keep the cards whose value is identical across every input header.
pub fn combine_headers(headers: &[Header]) -> Header {
    let mut combined = Header::new();
    let Some(first) = headers.first() else {
        return combined;
    };
    for card in first.iter() {
        if card.keyword == "COMMENT" || card.keyword == "HISTORY" {
            continue;
        }
        let unanimous = headers[1..]
            .iter()
            .all(|h| h.get(&card.keyword) == Some(&card.value));
        if unanimous {
            combined.set(&card.keyword, card.value.clone(), card.comment.as_deref());
        }
    }
    combined
}

/// Stack the first frame of each input file into a cube at `output`.
pub fn combine_frames_files<P: AsRef<Path>>(
    filenames: &[P],
    output: &Path,
    force: bool,
) -> Result<PathBuf> {
    if !needs_recompute(filenames, output, force) {
        return Ok(output.to_path_buf());
    }
    let mut frames = Vec::with_capacity(filenames.len());
    let mut headers = Vec::with_capacity(filenames.len());
    for filename in filenames {
        let cube = Cube::open(filename.as_ref())?;
        frames.push(cube.frame(0).to_owned());
        headers.push(cube.header);
    }
    let Some(first) = frames.first() else {
        return Err(BorealisError::EmptySequence);
    };
    let (h, w) = first.dim();
    let mut data = Array3::<f32>::zeros((frames.len(), h, w));
    for (i, frame) in frames.iter().enumerate() {
        if frame.dim() != (h, w) {
            return Err(BorealisError::DimensionMismatch(format!(
                "{}x{} vs {}x{}",
                frame.dim().1,
                frame.dim().0,
                w,
                h
            )));
        }
        data.index_axis_mut(Axis(0), i).assign(frame);
    }
    fits::write_fits(output, &data, &combine_headers(&headers))?;
    Ok(output.to_path_buf())
}

/// Collapse the first frames of the input files into one master frame.
pub fn collapse_frames_files<P: AsRef<Path>>(
    filenames: &[P],
    output: &Path,
    method: CollapseMethod,
    force: bool,
) -> Result<PathBuf> {
    if !needs_recompute(filenames, output, force) {
        return Ok(output.to_path_buf());
    }
    let mut frames = Vec::with_capacity(filenames.len());
    let mut headers = Vec::with_capacity(filenames.len());
    for filename in filenames {
        let cube = Cube::open(filename.as_ref())?;
        frames.push(cube.frame(0).to_owned());
        headers.push(cube.header);
    }
    let Some(first) = frames.first() else {
        return Err(BorealisError::EmptySequence);
    };
    let (h, w) = first.dim();
    let mut data = Array3::<f32>::zeros((frames.len(), h, w));
    for (i, frame) in frames.iter().enumerate() {
        data.index_axis_mut(Axis(0), i).assign(frame);
    }
    let frame = collapse_cube(&data, method)?;
    let mut header = combine_headers(&headers);
    header.set("COL_METH", method.to_string(), Some("cube collapse method"));
    fits::write_fits(output, &frame.insert_axis(Axis(0)), &header)?;
    Ok(output.to_path_buf())
}
