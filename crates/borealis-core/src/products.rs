use std::path::{Path, PathBuf};

use ndarray::Array3;

use crate::collapse::{combine_frames_files, combine_headers};
use crate::cube::Cube;
use crate::error::{BorealisError, Result};
use crate::io::fits;
use crate::organization::{header_rows, HeaderRow};
use crate::paths::needs_recompute;

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Render header rows as CSV with the union of keys as columns, in
/// first-seen order.
pub fn header_table_csv(rows: &[HeaderRow]) -> String {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for (key, _) in row {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }

    let mut out = String::new();
    out.push_str(
        &columns
            .iter()
            .map(|c| csv_escape(c))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push('\n');
    for row in rows {
        let line: Vec<String> = columns
            .iter()
            .map(|col| {
                row.iter()
                    .find(|(k, _)| k == col)
                    .map(|(_, v)| csv_escape(v))
                    .unwrap_or_default()
            })
            .collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

/// Write the header-table CSV for the given inputs unless it is current.
pub fn header_table_file<P: AsRef<Path> + Sync>(
    filenames: &[P],
    outpath: &Path,
    force: bool,
) -> Result<PathBuf> {
    if !needs_recompute(filenames, outpath, force) {
        return Ok(outpath.to_path_buf());
    }
    if let Some(parent) = outpath.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rows = header_rows(filenames);
    std::fs::write(outpath, header_table_csv(&rows))?;
    Ok(outpath.to_path_buf())
}

/// Assemble the ADI products: per branch (camera, and beam in PDI mode), a
/// cube of the collapsed frames in time order plus the matching
/// derotation-angle list.
pub fn adi_products(
    records: &[(PathBuf, String)],
    name: &str,
    output_directory: &Path,
    force: bool,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_directory)?;
    let mut written = Vec::new();

    let mut branches: Vec<&str> = records.iter().map(|(_, b)| b.as_str()).collect();
    branches.sort_unstable();
    branches.dedup();

    for branch in branches {
        let mut paths: Vec<&PathBuf> = records
            .iter()
            .filter(|(_, b)| b == branch)
            .map(|(p, _)| p)
            .collect();
        if paths.is_empty() {
            continue;
        }

        // time order, so cube planes match the angle list
        let mut keyed: Vec<(f64, &PathBuf)> = paths
            .drain(..)
            .map(|p| {
                let mjd = fits::read_header(p)
                    .ok()
                    .and_then(|h| h.float("MJD"))
                    .unwrap_or(0.0);
                (mjd, p)
            })
            .collect();
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
        let ordered: Vec<&PathBuf> = keyed.iter().map(|(_, p)| *p).collect();

        let cube_path = output_directory.join(format!("{name}_adi_cube_{branch}.fits"));
        combine_frames_files(&ordered, &cube_path, force)?;
        written.push(cube_path);

        let angles_path = output_directory.join(format!("{name}_adi_angles_{branch}.csv"));
        if needs_recompute(&ordered, &angles_path, force) {
            let mut table = String::new();
            for path in &ordered {
                let parang = fits::read_header(path)?
                    .float("PARANG")
                    .unwrap_or(f64::NAN);
                table.push_str(&format!("{parang}\n"));
            }
            std::fs::write(&angles_path, table)?;
        }
        written.push(angles_path);
    }
    Ok(written)
}

/// Collapse the per-cycle Stokes cubes into the final PDI product by
/// averaging each plane over the cycles.
pub fn pdi_products<P: AsRef<Path> + Sync>(
    stokes_paths: &[P],
    name: &str,
    output_directory: &Path,
    force: bool,
) -> Result<PathBuf> {
    if stokes_paths.is_empty() {
        return Err(BorealisError::EmptySequence);
    }
    std::fs::create_dir_all(output_directory)?;
    let outpath = output_directory.join(format!("{name}_stokes_coll.fits"));
    if !needs_recompute(stokes_paths, &outpath, force) {
        return Ok(outpath);
    }

    let mut sum: Option<Array3<f32>> = None;
    let mut headers = Vec::new();
    for path in stokes_paths {
        let cube = Cube::open(path.as_ref())?;
        match &mut sum {
            Some(acc) => {
                if acc.dim() != cube.data.dim() {
                    return Err(BorealisError::DimensionMismatch(
                        "Stokes cubes differ in shape".to_string(),
                    ));
                }
                *acc += &cube.data;
            }
            None => sum = Some(cube.data),
        }
        headers.push(cube.header);
    }
    let mut mean = sum.ok_or(BorealisError::EmptySequence)?;
    mean /= stokes_paths.len() as f32;

    let mut header = combine_headers(&headers);
    header.remove("HWPCYCLE");
    header.set(
        "NCYCLES",
        stokes_paths.len() as i64,
        Some("HWP cycles combined"),
    );
    fits::write_fits(&outpath, &mean, &header)?;
    Ok(outpath)
}
