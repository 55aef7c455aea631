use std::ops::Range;
use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayView2, Axis, s};

use crate::cube::Cube;
use crate::error::{BorealisError, Result};
use crate::indexing::WindowContext;
use crate::io::fits;
use crate::paths::{get_paths, needs_recompute, PathSpec};
use crate::pipeline::config::{FrameSelectOptions, SelectionMetric};

/// Score a single windowed view with the given metric.
fn view_metric(view: &ArrayView2<f32>, metric: SelectionMetric) -> f64 {
    let n = view.len() as f64;
    match metric {
        SelectionMetric::Peak => view
            .iter()
            .fold(f64::NEG_INFINITY, |acc, &v| acc.max(v as f64)),
        SelectionMetric::L2norm => {
            view.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>() / n
        }
        SelectionMetric::Normvar => {
            let mean = view.iter().map(|&v| v as f64).sum::<f64>() / n;
            let var = view
                .iter()
                .map(|&v| {
                    let d = v as f64 - mean;
                    d * d
                })
                .sum::<f64>()
                / n;
            if mean != 0.0 {
                var / mean
            } else {
                0.0
            }
        }
    }
}

/// Per-frame metric values, averaged over the measurement windows.
pub fn measure_metrics(
    data: &Array3<f32>,
    metric: SelectionMetric,
    slices: &[(Range<usize>, Range<usize>)],
) -> Result<Vec<f64>> {
    let n = data.len_of(Axis(0));
    if n == 0 {
        return Err(BorealisError::EmptySequence);
    }

    let mut values = vec![0.0f64; n];
    if slices.is_empty() {
        for (i, value) in values.iter_mut().enumerate() {
            *value = view_metric(&data.index_axis(Axis(0), i), metric);
        }
        return Ok(values);
    }
    for (ys, xs) in slices {
        for (i, value) in values.iter_mut().enumerate() {
            let view = data.slice(s![i, ys.clone(), xs.clone()]);
            *value += view_metric(&view, metric);
        }
    }
    for value in values.iter_mut() {
        *value /= slices.len() as f64;
    }
    Ok(values)
}

/// Quantile with linear interpolation between order statistics.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = pos - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

/// Measure per-frame metrics for a cube file and write the `_metrics.csv`
/// side table, unless it is already current.
pub fn metric_file(
    filename: &Path,
    options: &FrameSelectOptions,
    ctx: &WindowContext,
) -> Result<PathBuf> {
    let spec = PathSpec::suffix("metrics")
        .with_output_directory(options.output_directory.as_deref())
        .with_filetype(".csv");
    let (path, outpath) = get_paths(filename, &spec)?;
    if !needs_recompute(&[&path], &outpath, options.force) {
        return Ok(outpath);
    }

    let cube = Cube::open(&path)?;
    let shape = (cube.height(), cube.width());
    let slices = ctx.measure_slices(shape, options.window_size as f64);
    let metrics = measure_metrics(&cube.data, options.metric, &slices)?;

    let mut table = String::new();
    for value in &metrics {
        table.push_str(&format!("{value}\n"));
    }
    std::fs::write(&outpath, table)?;
    Ok(outpath)
}

/// Discard frames below the cutoff quantile of the metric table, writing
/// the `_selected` cube.
pub fn frame_select_file(
    filename: &Path,
    metric_path: &Path,
    options: &FrameSelectOptions,
) -> Result<PathBuf> {
    let spec = PathSpec::suffix("selected")
        .with_output_directory(options.output_directory.as_deref());
    let (path, outpath) = get_paths(filename, &spec)?;
    if !needs_recompute(&[path.as_path(), metric_path], &outpath, options.force) {
        return Ok(outpath);
    }

    let cube = Cube::open(&path)?;
    let metrics = read_metrics(metric_path)?;
    if metrics.len() != cube.frame_count() {
        return Err(BorealisError::DimensionMismatch(format!(
            "{} metric values for {} frames",
            metrics.len(),
            cube.frame_count()
        )));
    }

    let cutoff = quantile(&metrics, options.cutoff);
    let keep: Vec<usize> = (0..metrics.len())
        .filter(|&i| metrics[i] >= cutoff)
        .collect();
    if keep.is_empty() {
        return Err(BorealisError::EmptySequence);
    }

    let (h, w) = (cube.height(), cube.width());
    let mut selected = Array3::<f32>::zeros((keep.len(), h, w));
    for (dst, &src) in keep.iter().enumerate() {
        selected.index_axis_mut(Axis(0), dst).assign(&cube.frame(src));
    }

    // best surviving frame, 1-indexed within the selected cube
    let best = keep
        .iter()
        .enumerate()
        .max_by(|(_, &a), (_, &b)| metrics[a].total_cmp(&metrics[b]))
        .map(|(dst, _)| dst + 1)
        .unwrap_or(1);

    let mut header = cube.header;
    header.set(
        "SEL_REF",
        best as i64,
        Some("index of frame with highest metric"),
    );
    fits::write_fits(&outpath, &selected, &header)?;
    Ok(outpath)
}

fn read_metrics(path: &Path) -> Result<Vec<f64>> {
    let text = std::fs::read_to_string(path)?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            line.trim()
                .parse::<f64>()
                .map_err(|e| BorealisError::Pipeline(format!("bad metric value: {e}")))
        })
        .collect()
}
