use std::f64::consts::TAU;
use std::path::{Path, PathBuf};

use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use num_complex::Complex;
use rustfft::FftPlanner;

use crate::cube::Cube;
use crate::error::{BorealisError, Result};
use crate::indexing::{frame_center, WindowContext};
use crate::io::fits;
use crate::paths::{get_paths, needs_recompute, PathSpec};
use crate::pipeline::config::{RegisterMethod, RegisterOptions};

/// Search window (in pixels) around the coarse correlation peak for the
/// upsampled DFT refinement.
const DFT_SEARCH_WINDOW: f64 = 1.5;

/// Sigma of the pre-measurement Gaussian smoothing.
const SMOOTH_SIGMA: f32 = 1.5;

/// Iterations of the reweighted-centroid model fits.
const MODEL_FIT_ITERATIONS: usize = 8;

/// Measured star position (cy, cx) for every frame of a cube.
///
/// Positions are measured inside the context's windows: the central PSF
/// cutout, or each satellite spot averaged. The `dft` method measures
/// frame-to-frame translation against the first frame instead of an
/// absolute position per frame.
pub fn measure_centers(
    data: &Array3<f32>,
    options: &RegisterOptions,
    ctx: &WindowContext,
) -> Result<Vec<(f64, f64)>> {
    let n = data.len_of(Axis(0));
    if n == 0 {
        return Err(BorealisError::EmptySequence);
    }
    let shape = (data.len_of(Axis(1)), data.len_of(Axis(2)));
    let slices = ctx.measure_slices(shape, options.window_size as f64);

    let prepared: Vec<Array2<f32>> = (0..n)
        .map(|i| {
            let frame = data.index_axis(Axis(0), i);
            if options.smooth {
                gaussian_smooth(&frame, SMOOTH_SIGMA)
            } else {
                frame.to_owned()
            }
        })
        .collect();

    if options.method == RegisterMethod::Dft {
        return measure_centers_dft(&prepared, options, &slices);
    }

    let mut centers = Vec::with_capacity(n);
    for frame in &prepared {
        let mut cy = 0.0;
        let mut cx = 0.0;
        for (ys, xs) in &slices {
            let view = frame.slice(s![ys.clone(), xs.clone()]);
            let (wy, wx) = measure_window_center(&view, options.method);
            cy += wy + ys.start as f64;
            cx += wx + xs.start as f64;
        }
        // the spots sit symmetrically about the star, so their mean is
        // the star position; with a single PSF window this is a no-op
        cy /= slices.len() as f64;
        cx /= slices.len() as f64;
        centers.push((cy, cx));
    }
    Ok(centers)
}

fn measure_centers_dft(
    frames: &[Array2<f32>],
    options: &RegisterOptions,
    slices: &[(std::ops::Range<usize>, std::ops::Range<usize>)],
) -> Result<Vec<(f64, f64)>> {
    let (ys, xs) = &slices[0];
    let reference = frames[0].slice(s![ys.clone(), xs.clone()]).to_owned();
    let (ry, rx) = centroid(&reference.view());
    let base = (ry + ys.start as f64, rx + xs.start as f64);

    let mut centers = Vec::with_capacity(frames.len());
    centers.push(base);
    for frame in &frames[1..] {
        let target = frame.slice(s![ys.clone(), xs.clone()]).to_owned();
        let (dy, dx) = cross_correlation_offset(&reference, &target, options.dft_factor)?;
        centers.push((base.0 + dy, base.1 + dx));
    }
    Ok(centers)
}

fn measure_window_center(view: &ArrayView2<f32>, method: RegisterMethod) -> (f64, f64) {
    match method {
        RegisterMethod::Com | RegisterMethod::Dft => centroid(view),
        RegisterMethod::Peak => peak_position(view),
        RegisterMethod::Gaussian => fit_model_center(view, ModelPsf::Gaussian),
        RegisterMethod::Moffat => fit_model_center(view, ModelPsf::Moffat),
        RegisterMethod::Airydisk => fit_model_center(view, ModelPsf::Airydisk),
    }
}

/// Intensity-weighted center of mass, (cy, cx) in window coordinates.
pub fn centroid(view: &ArrayView2<f32>) -> (f64, f64) {
    let (h, w) = view.dim();
    let mut sum_y = 0.0f64;
    let mut sum_x = 0.0f64;
    let mut sum_w = 0.0f64;
    for ((y, x), &value) in view.indexed_iter() {
        if value > 0.0 {
            let weight = value as f64;
            sum_y += y as f64 * weight;
            sum_x += x as f64 * weight;
            sum_w += weight;
        }
    }
    if sum_w > 0.0 {
        (sum_y / sum_w, sum_x / sum_w)
    } else {
        frame_center((h, w))
    }
}

/// Location of the brightest pixel.
pub fn peak_position(view: &ArrayView2<f32>) -> (f64, f64) {
    let mut best = f32::NEG_INFINITY;
    let mut pos = (0usize, 0usize);
    for ((y, x), &value) in view.indexed_iter() {
        if value > best {
            best = value;
            pos = (y, x);
        }
    }
    (pos.0 as f64, pos.1 as f64)
}

#[derive(Clone, Copy)]
enum ModelPsf {
    Gaussian,
    Moffat,
    Airydisk,
}

impl ModelPsf {
    fn profile(self, r2: f64, sigma2: f64) -> f64 {
        match self {
            Self::Gaussian => (-r2 / (2.0 * sigma2)).exp(),
            Self::Moffat => (1.0 + r2 / sigma2).powf(-2.5),
            Self::Airydisk => {
                // first-lobe approximation with the null at 1.22 sigma
                let x = std::f64::consts::PI * (r2 / sigma2).sqrt() / 1.22;
                if x < 1e-9 {
                    1.0
                } else {
                    let s = x.sin() / x;
                    s * s
                }
            }
        }
    }
}

/// PSF model fit by iteratively reweighted centroiding: weights follow the
/// model profile around the current estimate, pulling the centroid toward
/// the core and suppressing wings and neighbors.
fn fit_model_center(view: &ArrayView2<f32>, model: ModelPsf) -> (f64, f64) {
    let (h, w) = view.dim();
    let sigma = (h.min(w) as f64) / 4.0;
    let sigma2 = sigma * sigma;
    let mut center = centroid(view);

    for _ in 0..MODEL_FIT_ITERATIONS {
        let mut sum_y = 0.0f64;
        let mut sum_x = 0.0f64;
        let mut sum_w = 0.0f64;
        for ((y, x), &value) in view.indexed_iter() {
            if value <= 0.0 {
                continue;
            }
            let dy = y as f64 - center.0;
            let dx = x as f64 - center.1;
            let weight = value as f64 * model.profile(dy * dy + dx * dx, sigma2);
            sum_y += y as f64 * weight;
            sum_x += x as f64 * weight;
            sum_w += weight;
        }
        if sum_w <= 0.0 {
            break;
        }
        let next = (sum_y / sum_w, sum_x / sum_w);
        let moved = (next.0 - center.0).hypot(next.1 - center.1);
        center = next;
        if moved < 1e-4 {
            break;
        }
    }
    center
}

/// Translation (dy, dx) of `target` relative to `reference` via FFT
/// cross-correlation, refined to ~1/upsample px with a matrix-multiply DFT
/// around the coarse peak (Guizar-Sicairos et al. 2008).
pub fn cross_correlation_offset(
    reference: &Array2<f32>,
    target: &Array2<f32>,
    upsample: usize,
) -> Result<(f64, f64)> {
    let (h, w) = reference.dim();
    if target.dim() != (h, w) {
        return Err(BorealisError::DimensionMismatch(format!(
            "{}x{} vs {}x{}",
            w,
            h,
            target.dim().1,
            target.dim().0
        )));
    }

    let ref_fft = fft2d(reference);
    let tgt_fft = fft2d(target);
    let cross_power = normalized_cross_power(&ref_fft, &tgt_fft);
    let correlation = ifft2d(&cross_power);

    let (peak_row, peak_col) = find_peak(&correlation);
    let coarse_dy = if peak_row > h / 2 {
        peak_row as f64 - h as f64
    } else {
        peak_row as f64
    };
    let coarse_dx = if peak_col > w / 2 {
        peak_col as f64 - w as f64
    } else {
        peak_col as f64
    };

    if upsample <= 1 {
        let (sub_dy, sub_dx) = refine_peak_paraboloid(&correlation, peak_row, peak_col);
        return Ok((coarse_dy + sub_dy, coarse_dx + sub_dx));
    }

    Ok(refine_peak_dft(
        &cross_power,
        coarse_dy,
        coarse_dx,
        upsample as f64,
    ))
}

fn fft2d(data: &Array2<f32>) -> Array2<Complex<f64>> {
    let (h, w) = data.dim();
    let mut planner = FftPlanner::new();
    let fft_row = planner.plan_fft_forward(w);
    let fft_col = planner.plan_fft_forward(h);

    let mut result = data.mapv(|v| Complex::new(v as f64, 0.0));

    for mut row in result.rows_mut() {
        let mut buffer: Vec<Complex<f64>> = row.to_vec();
        fft_row.process(&mut buffer);
        for (dst, src) in row.iter_mut().zip(buffer) {
            *dst = src;
        }
    }
    for mut col in result.columns_mut() {
        let mut buffer: Vec<Complex<f64>> = col.to_vec();
        fft_col.process(&mut buffer);
        for (dst, src) in col.iter_mut().zip(buffer) {
            *dst = src;
        }
    }
    result
}

fn ifft2d(data: &Array2<Complex<f64>>) -> Array2<f64> {
    let (h, w) = data.dim();
    let mut planner = FftPlanner::new();
    let ifft_row = planner.plan_fft_inverse(w);
    let ifft_col = planner.plan_fft_inverse(h);

    let mut work = data.clone();
    for mut col in work.columns_mut() {
        let mut buffer: Vec<Complex<f64>> = col.to_vec();
        ifft_col.process(&mut buffer);
        for (dst, src) in col.iter_mut().zip(buffer) {
            *dst = src;
        }
    }
    for mut row in work.rows_mut() {
        let mut buffer: Vec<Complex<f64>> = row.to_vec();
        ifft_row.process(&mut buffer);
        for (dst, src) in row.iter_mut().zip(buffer) {
            *dst = src;
        }
    }
    let scale = 1.0 / (h * w) as f64;
    work.mapv(|v| v.re * scale)
}

fn normalized_cross_power(
    ref_fft: &Array2<Complex<f64>>,
    tgt_fft: &Array2<Complex<f64>>,
) -> Array2<Complex<f64>> {
    let mut result = Array2::<Complex<f64>>::zeros(ref_fft.dim());
    ndarray::Zip::from(&mut result)
        .and(ref_fft)
        .and(tgt_fft)
        .for_each(|out, &r, &t| {
            let cross = t * r.conj();
            let mag = cross.norm();
            *out = if mag > 1e-12 {
                cross / mag
            } else {
                Complex::new(0.0, 0.0)
            };
        });
    result
}

fn find_peak(data: &Array2<f64>) -> (usize, usize) {
    let mut best = f64::NEG_INFINITY;
    let mut pos = (0, 0);
    for ((y, x), &value) in data.indexed_iter() {
        if value > best {
            best = value;
            pos = (y, x);
        }
    }
    pos
}

/// Paraboloid fit on the 3x3 neighborhood around the integer peak.
fn refine_peak_paraboloid(
    correlation: &Array2<f64>,
    peak_row: usize,
    peak_col: usize,
) -> (f64, f64) {
    let (h, w) = correlation.dim();
    if peak_row == 0 || peak_row >= h - 1 || peak_col == 0 || peak_col >= w - 1 {
        return (0.0, 0.0);
    }

    let fit = |prev: f64, curr: f64, next: f64| -> f64 {
        let denom = prev - 2.0 * curr + next;
        if denom.abs() > 1e-12 {
            (prev - next) / (2.0 * denom)
        } else {
            0.0
        }
    };
    let dy = fit(
        correlation[[peak_row - 1, peak_col]],
        correlation[[peak_row, peak_col]],
        correlation[[peak_row + 1, peak_col]],
    );
    let dx = fit(
        correlation[[peak_row, peak_col - 1]],
        correlation[[peak_row, peak_col]],
        correlation[[peak_row, peak_col + 1]],
    );
    (dy.clamp(-0.5, 0.5), dx.clamp(-0.5, 0.5))
}

/// Evaluate the cross-correlation on a 1/upsample grid around the coarse
/// peak via matrix-multiply DFT and return the refined offset.
fn refine_peak_dft(
    cross_power: &Array2<Complex<f64>>,
    coarse_dy: f64,
    coarse_dx: f64,
    upsample: f64,
) -> (f64, f64) {
    let (h, w) = cross_power.dim();
    let size = (DFT_SEARCH_WINDOW * upsample).ceil() as usize;

    let row_kernel = dft_kernel(w, size, coarse_dx, upsample);
    let col_kernel = dft_kernel(h, size, coarse_dy, upsample);

    // conj(col_kernel)^T * cross_power * row_kernel
    let mut intermediate = Array2::<Complex<f64>>::zeros((size, w));
    for ur in 0..size {
        for c in 0..w {
            let mut sum = Complex::new(0.0, 0.0);
            for r in 0..h {
                sum += col_kernel[[r, ur]].conj() * cross_power[[r, c]];
            }
            intermediate[[ur, c]] = sum;
        }
    }
    let mut best = f64::NEG_INFINITY;
    let mut pos = (0, 0);
    for ur in 0..size {
        for uc in 0..size {
            let mut sum = Complex::new(0.0, 0.0);
            for c in 0..w {
                sum += intermediate[[ur, c]] * row_kernel[[c, uc]];
            }
            let value = sum.norm();
            if value > best {
                best = value;
                pos = (ur, uc);
            }
        }
    }

    let start_dy = coarse_dy - (size as f64 - 1.0) / (2.0 * upsample);
    let start_dx = coarse_dx - (size as f64 - 1.0) / (2.0 * upsample);
    (
        start_dy + pos.0 as f64 / upsample,
        start_dx + pos.1 as f64 / upsample,
    )
}

fn dft_kernel(n: usize, size: usize, center_shift: f64, upsample: f64) -> Array2<Complex<f64>> {
    let mut kernel = Array2::<Complex<f64>>::zeros((n, size));
    let half_n = n as f64 / 2.0;
    let start = center_shift - (size as f64 - 1.0) / (2.0 * upsample);
    for k in 0..n {
        let freq = if (k as f64) <= half_n {
            k as f64
        } else {
            k as f64 - n as f64
        };
        for j in 0..size {
            let pos = start + j as f64 / upsample;
            let phase = -TAU * freq * pos / n as f64;
            kernel[[k, j]] = Complex::new(phase.cos(), phase.sin());
        }
    }
    kernel
}

/// Separable Gaussian smoothing with kernel radius 3 sigma.
pub fn gaussian_smooth(frame: &ArrayView2<f32>, sigma: f32) -> Array2<f32> {
    let radius = (3.0 * sigma).ceil() as isize;
    let kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-(i * i) as f32 / (2.0 * sigma * sigma)).exp())
        .collect();
    let norm: f32 = kernel.iter().sum();

    let (h, w) = frame.dim();
    let mut horizontal = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (k, &kv) in kernel.iter().enumerate() {
                let sx = (x as isize + k as isize - radius).clamp(0, w as isize - 1) as usize;
                acc += frame[[y, sx]] * kv;
            }
            horizontal[[y, x]] = acc / norm;
        }
    }
    let mut result = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (k, &kv) in kernel.iter().enumerate() {
                let sy = (y as isize + k as isize - radius).clamp(0, h as isize - 1) as usize;
                acc += horizontal[[sy, x]] * kv;
            }
            result[[y, x]] = acc / norm;
        }
    }
    result
}

/// Bilinear sample with NaN outside the frame.
pub fn bilinear_sample(data: &ArrayView2<f32>, y: f64, x: f64) -> f32 {
    let (h, w) = data.dim();
    let y0 = y.floor() as i64;
    let x0 = x.floor() as i64;
    let fy = (y - y0 as f64) as f32;
    let fx = (x - x0 as f64) as f32;

    let sample = |r: i64, c: i64| -> f32 {
        if r >= 0 && r < h as i64 && c >= 0 && c < w as i64 {
            data[[r as usize, c as usize]]
        } else {
            f32::NAN
        }
    };
    let v00 = sample(y0, x0);
    let v01 = sample(y0, x0 + 1);
    let v10 = sample(y0 + 1, x0);
    let v11 = sample(y0 + 1, x0 + 1);

    v00 * (1.0 - fx) * (1.0 - fy)
        + v01 * fx * (1.0 - fy)
        + v10 * (1.0 - fx) * fy
        + v11 * fx * fy
}

/// Shift a frame by (dy, dx) with bilinear interpolation.
pub fn shift_frame(frame: &ArrayView2<f32>, dy: f64, dx: f64) -> Array2<f32> {
    let (h, w) = frame.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        bilinear_sample(frame, y as f64 - dy, x as f64 - dx)
    })
}

/// Rotate a frame by `-angle` degrees about `center` (frame center when
/// absent), the sense that puts North up for a parallactic angle.
pub fn derotate_frame(
    frame: &ArrayView2<f32>,
    angle_deg: f64,
    center: Option<(f64, f64)>,
) -> Array2<f32> {
    let (h, w) = frame.dim();
    let center = center.unwrap_or_else(|| frame_center((h, w)));
    let angle = (-angle_deg).to_radians();
    let (sin, cos) = angle.sin_cos();
    Array2::from_shape_fn((h, w), |(y, x)| {
        let dy = y as f64 - center.0;
        let dx = x as f64 - center.1;
        let src_y = center.0 + cos * dy - sin * dx;
        let src_x = center.1 + sin * dy + cos * dx;
        bilinear_sample(frame, src_y, src_x)
    })
}

/// Register a cube file: measure per-frame star positions, write the
/// `_offsets.csv` side table, and write the `_aligned` cube with every
/// frame shifted so the star lands on the geometric frame center.
pub fn register_file(
    filename: &Path,
    options: &RegisterOptions,
    ctx: &WindowContext,
) -> Result<PathBuf> {
    let spec = PathSpec::suffix("aligned")
        .with_output_directory(options.output_directory.as_deref());
    let (path, outpath) = get_paths(filename, &spec)?;
    let offsets_spec = PathSpec::suffix("offsets")
        .with_output_directory(options.output_directory.as_deref())
        .with_filetype(".csv");
    let (_, offsets_path) = get_paths(filename, &offsets_spec)?;
    if !needs_recompute(&[&path], &outpath, options.force)
        && !needs_recompute(&[&path], &offsets_path, options.force)
    {
        return Ok(outpath);
    }

    let cube = Cube::open(&path)?;
    let shape = (cube.height(), cube.width());
    let centers = measure_centers(&cube.data, options, ctx)?;
    let target = frame_center(shape);

    let mut table = String::from("cy,cx\n");
    for (cy, cx) in &centers {
        table.push_str(&format!("{cy},{cx}\n"));
    }
    std::fs::write(&offsets_path, table)?;

    let mut aligned = Array3::<f32>::zeros(cube.data.dim());
    for (i, (cy, cx)) in centers.iter().enumerate() {
        let shifted = shift_frame(&cube.frame(i), target.0 - cy, target.1 - cx);
        aligned.index_axis_mut(Axis(0), i).assign(&shifted);
    }
    fits::write_fits(&outpath, &aligned, &cube.header)?;
    Ok(outpath)
}
