use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::Result;

/// How an output path should be derived from an input filename.
///
/// The usual convention is suffix-based: `test.fits` with suffix `calib`
/// becomes `test_calib.fits`, with compression extensions (`.fits.gz`,
/// `.fits.fz`) stripped first. An explicit `outname` overrides the
/// derivation entirely.
#[derive(Clone, Debug, Default)]
pub struct PathSpec<'a> {
    pub suffix: Option<&'a str>,
    pub outname: Option<&'a str>,
    pub output_directory: Option<&'a Path>,
    pub filetype: Option<&'a str>,
}

impl<'a> PathSpec<'a> {
    pub fn suffix(suffix: &'a str) -> Self {
        Self {
            suffix: Some(suffix),
            ..Self::default()
        }
    }

    pub fn with_output_directory(mut self, dir: Option<&'a Path>) -> Self {
        self.output_directory = dir;
        self
    }

    pub fn with_filetype(mut self, filetype: &'a str) -> Self {
        self.filetype = Some(filetype);
        self
    }
}

/// Resolve the canonical (input, output) path pair for a processing step.
///
/// The output directory is created (with parents) if it does not exist.
/// Resolution is idempotent: identical arguments always yield identical
/// paths.
pub fn get_paths(filename: &Path, spec: &PathSpec) -> Result<(PathBuf, PathBuf)> {
    let path = filename.to_path_buf();
    let output_directory = match spec.output_directory {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            dir.to_path_buf()
        }
        None => path.parent().unwrap_or_else(|| Path::new("")).to_path_buf(),
    };

    let outname = match spec.outname {
        Some(name) => name.to_string(),
        None => derive_outname(
            &path,
            spec.suffix.unwrap_or(""),
            spec.filetype.unwrap_or(".fits"),
        ),
    };

    let outpath = output_directory.join(outname);
    Ok((path, outpath))
}

/// Strip the `.fits` extension and any compression extension after it,
/// then append `_{suffix}` and the requested filetype.
fn derive_outname(path: &Path, suffix: &str, filetype: &str) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match name.find(".fits") {
        Some(idx) => &name[..idx],
        None => name.rsplit_once('.').map(|(s, _)| s).unwrap_or(&name),
    };
    if suffix.is_empty() {
        format!("{stem}{filetype}")
    } else {
        format!("{stem}_{suffix}{filetype}")
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// True if any of the inputs was modified strictly after the output.
pub fn any_file_newer<P: AsRef<Path>>(filenames: &[P], outpath: &Path) -> bool {
    let Some(out_mt) = mtime(outpath) else {
        return true;
    };
    filenames
        .iter()
        .any(|f| mtime(f.as_ref()).map(|mt| mt > out_mt).unwrap_or(true))
}

/// Staleness check used by every stage: an output must be recomputed when
/// it does not exist or when any input is newer than it.
pub fn is_stale<P: AsRef<Path>>(inputs: &[P], outpath: &Path) -> bool {
    if !outpath.is_file() {
        return true;
    }
    any_file_newer(inputs, outpath)
}

/// Skip policy shared by the stage implementations: recompute iff forced
/// or the output is stale with respect to its inputs.
pub fn needs_recompute<P: AsRef<Path>>(inputs: &[P], outpath: &Path, force: bool) -> bool {
    force || is_stale(inputs, outpath)
}
