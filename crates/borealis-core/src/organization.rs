use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::warn;

use crate::error::Result;
use crate::io::fits::{self, Header};

/// One header-table row: the file path plus every card rendered as text.
pub type HeaderRow = Vec<(String, String)>;

fn header_row(path: &Path) -> Result<HeaderRow> {
    let header = fits::read_header(path)?;
    let mut row: HeaderRow = vec![(
        "path".to_string(),
        path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
            .to_string_lossy()
            .into_owned(),
    )];
    for card in header.iter() {
        row.push((card.keyword.clone(), card.value.to_string()));
    }
    Ok(row)
}

/// Harvest the headers of every input in parallel, sorted by observation
/// time. Unreadable files are logged and skipped.
pub fn header_rows<P: AsRef<Path> + Sync>(filenames: &[P]) -> Vec<HeaderRow> {
    let mut rows: Vec<HeaderRow> = filenames
        .par_iter()
        .filter_map(|f| {
            header_row(f.as_ref())
                .map_err(|e| warn!(file = %f.as_ref().display(), error = %e, "skipping header"))
                .ok()
        })
        .collect();
    rows.sort_by(|a, b| {
        let mjd = |row: &HeaderRow| {
            row.iter()
                .find(|(k, _)| k == "MJD")
                .and_then(|(_, v)| v.parse::<f64>().ok())
                .unwrap_or(0.0)
        };
        mjd(a).total_cmp(&mjd(b))
    });
    rows
}

/// Destination folder for a raw file based on its data type.
pub fn foldername(outdir: &Path, header: &Header) -> PathBuf {
    let subdir = "raw";
    match header.string("DATA-TYP") {
        Some("OBJECT") => {
            // subsort science frames by filter, gain, and exposure time
            let filt = header.string("X_IRCFLT").unwrap_or("open");
            let gain = header.float("DETGAIN").unwrap_or(0.0);
            let exptime_ms = header.float("EXPTIME").unwrap_or(0.0) * 1e3;
            let object = header
                .string("OBJECT")
                .unwrap_or("unknown")
                .replace(' ', "_");
            outdir
                .join(object)
                .join(format!("{filt}_em{gain:.0}_{exptime_ms:05.0}ms"))
        }
        Some("DARK") => outdir.join("darks").join(subdir),
        // sky flats are usually background frames, not flats
        Some("SKYFLAT") => outdir.join("skies").join(subdir),
        Some("FLAT") | Some("DOMEFLAT") => outdir.join("flats").join(subdir),
        Some("COMPARISON") => outdir.join("pinholes").join(subdir),
        _ => outdir.to_path_buf(),
    }
}

/// Move (or copy) one raw file into its type-derived folder.
pub fn sort_file(filename: &Path, outdir: &Path, copy: bool) -> Result<PathBuf> {
    let header = fits::read_header(filename)?;
    let foldname = foldername(outdir, &header);
    std::fs::create_dir_all(&foldname)?;
    let newname = foldname.join(filename.file_name().unwrap_or_default());
    if copy {
        std::fs::copy(filename, &newname)?;
    } else {
        std::fs::rename(filename, &newname)?;
    }
    Ok(newname)
}

/// Sort raw files in parallel; failures are logged and skipped.
pub fn sort_files<P: AsRef<Path> + Sync>(
    filenames: &[P],
    output_directory: Option<&Path>,
    copy: bool,
) -> Vec<PathBuf> {
    let outdir = match output_directory {
        Some(dir) => dir.to_path_buf(),
        None => filenames
            .first()
            .and_then(|f| f.as_ref().parent())
            .unwrap_or_else(|| Path::new(""))
            .to_path_buf(),
    };
    filenames
        .par_iter()
        .filter_map(|f| {
            sort_file(f.as_ref(), &outdir, copy)
                .map_err(|e| warn!(file = %f.as_ref().display(), error = %e, "could not sort"))
                .ok()
        })
        .collect()
}
