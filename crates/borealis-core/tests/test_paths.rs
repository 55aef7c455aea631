use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use borealis_core::paths::{any_file_newer, get_paths, is_stale, needs_recompute, PathSpec};

#[test]
fn test_get_paths_suffix() {
    let (path, outpath) = get_paths(Path::new("test.fits"), &PathSpec::suffix("calib")).unwrap();
    assert_eq!(path, PathBuf::from("test.fits"));
    assert_eq!(outpath, PathBuf::from("test_calib.fits"));
}

#[test]
fn test_get_paths_compressed_inputs() {
    for name in ["test.fits.fz", "test.fits.gz"] {
        let (_, outpath) = get_paths(Path::new(name), &PathSpec::suffix("calib")).unwrap();
        assert_eq!(outpath, PathBuf::from("test_calib.fits"), "input {name}");
    }
}

#[test]
fn test_get_paths_filetype() {
    let spec = PathSpec::suffix("metrics").with_filetype(".csv");
    let (_, outpath) = get_paths(Path::new("test.fits"), &spec).unwrap();
    assert_eq!(outpath, PathBuf::from("test_metrics.csv"));
}

#[test]
fn test_get_paths_outname_overrides_suffix() {
    let spec = PathSpec {
        suffix: Some("calib"),
        outname: Some("custom.fits"),
        ..PathSpec::default()
    };
    let (_, outpath) = get_paths(Path::new("test.fits"), &spec).unwrap();
    assert_eq!(outpath, PathBuf::from("custom.fits"));
}

#[test]
fn test_get_paths_output_directory_created() {
    let tmp = tempfile::tempdir().unwrap();
    let outdir = tmp.path().join("nested").join("out");
    let spec = PathSpec::suffix("calib").with_output_directory(Some(&outdir));
    let (_, outpath) = get_paths(Path::new("test.fits"), &spec).unwrap();
    assert_eq!(outpath, outdir.join("test_calib.fits"));
    assert!(outdir.is_dir(), "output directory must be created");
}

#[test]
fn test_get_paths_defaults_to_input_parent() {
    let spec = PathSpec::suffix("calib");
    let (_, outpath) = get_paths(Path::new("data/raw/test.fits"), &spec).unwrap();
    assert_eq!(outpath, PathBuf::from("data/raw/test_calib.fits"));
}

#[test]
fn test_get_paths_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let outdir = tmp.path().join("out");
    let spec = PathSpec::suffix("aligned").with_output_directory(Some(&outdir));
    let first = get_paths(Path::new("cube.fits.gz"), &spec).unwrap();
    let second = get_paths(Path::new("cube.fits.gz"), &spec).unwrap();
    assert_eq!(first, second);
}

fn touch(path: &Path, age: Duration) {
    File::create(path).unwrap();
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

#[test]
fn test_is_stale_missing_output() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("in.fits");
    touch(&input, Duration::from_secs(10));
    assert!(is_stale(&[&input], &tmp.path().join("missing.fits")));
}

#[test]
fn test_is_stale_newer_input() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("in.fits");
    let output = tmp.path().join("out.fits");
    touch(&output, Duration::from_secs(100));
    touch(&input, Duration::from_secs(10));
    assert!(is_stale(&[&input], &output));
    assert!(any_file_newer(&[&input], &output));
}

#[test]
fn test_is_stale_current_output() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("in.fits");
    let output = tmp.path().join("out.fits");
    touch(&input, Duration::from_secs(100));
    touch(&output, Duration::from_secs(10));
    assert!(!is_stale(&[&input], &output));
    assert!(!any_file_newer(&[&input], &output));
}

#[test]
fn test_needs_recompute_force_wins() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("in.fits");
    let output = tmp.path().join("out.fits");
    touch(&input, Duration::from_secs(100));
    touch(&output, Duration::from_secs(10));
    assert!(!needs_recompute(&[&input], &output, false));
    assert!(needs_recompute(&[&input], &output, true));
}
