use std::path::PathBuf;

use approx::assert_abs_diff_eq;
use ndarray::Array2;

use borealis_core::cube::Beam;
use borealis_core::indexing::WindowContext;
use borealis_core::pipeline::config::{IpMethod, IpOptions};
use borealis_core::polarimetry::{
    apply_ip_correction, group_hwp_sets, pair_beams, rotate_stokes, stokes_from_set, PolFrame,
    PolPair,
};

const HWP_ANGLES: [f64; 4] = [0.0, 45.0, 22.5, 67.5];

fn frame(target: &str, mjd: f64, hwp_angle: f64, beam: Option<Beam>) -> PolFrame {
    PolFrame {
        path: PathBuf::from(format!("{target}_{mjd}_{hwp_angle}.fits")),
        target: target.to_string(),
        mjd,
        hwp_angle,
        beam,
    }
}

fn pair(target: &str, mjd: f64, hwp_angle: f64) -> PolPair {
    PolPair {
        left: frame(target, mjd, hwp_angle, Some(Beam::Left)),
        right: frame(target, mjd, hwp_angle, Some(Beam::Right)),
    }
}

/// Build `cycles` full HWP cycles plus `extra` leading positions of one
/// more, with `n_per_hwp` pairs at each position.
fn build_pairs(n_per_hwp: usize, cycles: usize, extra: usize) -> Vec<PolPair> {
    let mut pairs = Vec::new();
    let mut mjd = 60000.0;
    for _ in 0..cycles {
        for angle in HWP_ANGLES {
            for _ in 0..n_per_hwp {
                pairs.push(pair("AB Aur", mjd, angle));
                mjd += 0.001;
            }
        }
    }
    for angle in HWP_ANGLES.iter().take(extra) {
        for _ in 0..n_per_hwp {
            pairs.push(pair("AB Aur", mjd, *angle));
            mjd += 0.001;
        }
    }
    pairs
}

#[test]
fn test_grouping_two_complete_one_short() {
    // groups of sizes [N, N, N-1] positions: exactly the first two combine
    let pairs = build_pairs(1, 2, 3);
    let (complete, incomplete) = group_hwp_sets(pairs, 1);
    assert_eq!(complete.len(), 2);
    assert_eq!(incomplete.len(), 1);
    assert_eq!(incomplete[0].pairs.len(), 3);
    assert!(complete.iter().all(|set| set.is_complete(1)));
    assert!(!incomplete[0].is_complete(1));
}

#[test]
fn test_grouping_respects_n_per_hwp() {
    let pairs = build_pairs(3, 2, 0);
    let (complete, incomplete) = group_hwp_sets(pairs, 3);
    assert_eq!(complete.len(), 2);
    assert!(incomplete.is_empty());
    assert_eq!(complete[0].pairs.len(), 12);
}

#[test]
fn test_grouping_restart_closes_short_set() {
    // a missing 67.5 deg pair forces the first set closed when 0 deg repeats
    let mut pairs = Vec::new();
    let mut mjd = 60000.0;
    for angle in [0.0, 45.0, 22.5] {
        pairs.push(pair("AB Aur", mjd, angle));
        mjd += 0.001;
    }
    for angle in HWP_ANGLES {
        pairs.push(pair("AB Aur", mjd, angle));
        mjd += 0.001;
    }
    let (complete, incomplete) = group_hwp_sets(pairs, 1);
    assert_eq!(complete.len(), 1);
    assert_eq!(incomplete.len(), 1);
    assert_eq!(incomplete[0].pairs.len(), 3);
}

#[test]
fn test_grouping_separates_targets() {
    let mut pairs = build_pairs(1, 1, 0);
    let mut mjd = 70000.0;
    for angle in HWP_ANGLES {
        pairs.push(pair("HD 1160", mjd, angle));
        mjd += 0.001;
    }
    let (complete, _) = group_hwp_sets(pairs, 1);
    assert_eq!(complete.len(), 2);
    let targets: Vec<&str> = complete.iter().map(|s| s.target.as_str()).collect();
    assert!(targets.contains(&"AB Aur"));
    assert!(targets.contains(&"HD 1160"));
}

#[test]
fn test_pair_beams_matches_simultaneous_frames() {
    let frames = vec![
        frame("AB Aur", 1.0, 0.0, Some(Beam::Left)),
        frame("AB Aur", 1.0, 0.0, Some(Beam::Right)),
        frame("AB Aur", 2.0, 45.0, Some(Beam::Left)),
    ];
    let (pairs, unpaired) = pair_beams(frames);
    assert_eq!(pairs.len(), 1);
    assert_eq!(unpaired.len(), 1);
    assert_eq!(unpaired[0].mjd, 2.0);
}

fn synthetic_set(i0: f32, q: f32, u: f32) -> Vec<(f64, Array2<f32>, Array2<f32>)> {
    // left/right = (I +- d)/2 with d the polarized signal at each position
    HWP_ANGLES
        .iter()
        .map(|&angle| {
            let d = match angle {
                a if a == 0.0 => q,
                a if a == 45.0 => -q,
                a if a == 22.5 => u,
                _ => -u,
            };
            let left = Array2::from_elem((8, 8), (i0 + d) / 2.0);
            let right = Array2::from_elem((8, 8), (i0 - d) / 2.0);
            (angle, left, right)
        })
        .collect()
}

#[test]
fn test_stokes_double_difference() {
    let stokes = stokes_from_set(&synthetic_set(1.0, 0.2, -0.1)).unwrap();
    assert_eq!(stokes.dim(), (7, 8, 8));
    assert_abs_diff_eq!(stokes[[0, 4, 4]], 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(stokes[[1, 4, 4]], 0.2, epsilon = 1e-6);
    assert_abs_diff_eq!(stokes[[2, 4, 4]], -0.1, epsilon = 1e-6);
    let expected_lp = (0.2f32 * 0.2 + 0.1 * 0.1).sqrt();
    assert_abs_diff_eq!(stokes[[5, 4, 4]], expected_lp, epsilon = 1e-6);
}

#[test]
fn test_rotate_stokes_by_90_flips_q_and_u() {
    let stokes = stokes_from_set(&synthetic_set(1.0, 0.2, -0.1)).unwrap();
    let rotated = rotate_stokes(&stokes, std::f64::consts::FRAC_PI_2);
    assert_abs_diff_eq!(rotated[[1, 4, 4]], -0.2, epsilon = 1e-5);
    assert_abs_diff_eq!(rotated[[2, 4, 4]], 0.1, epsilon = 1e-5);
    assert_abs_diff_eq!(rotated[[0, 4, 4]], 1.0, epsilon = 1e-6);
}

#[test]
fn test_ip_photometry_removes_stellar_polarization() {
    // uniform fractional polarization is entirely instrumental
    let stokes = stokes_from_set(&synthetic_set(1.0, 0.05, -0.02)).unwrap();
    let options = IpOptions {
        method: IpMethod::Photometry,
        aper_rad: 3.0,
        force: false,
    };
    let corrected = apply_ip_correction(&stokes, &options, &WindowContext::default());
    assert_abs_diff_eq!(corrected[[1, 4, 4]], 0.0, epsilon = 1e-5);
    assert_abs_diff_eq!(corrected[[2, 4, 4]], 0.0, epsilon = 1e-5);
    assert_abs_diff_eq!(corrected[[0, 4, 4]], 1.0, epsilon = 1e-6);
}

#[test]
fn test_stokes_rejects_missing_position() {
    let mut set = synthetic_set(1.0, 0.1, 0.1);
    set.retain(|(angle, _, _)| *angle != 67.5);
    assert!(stokes_from_set(&set).is_err());
}
