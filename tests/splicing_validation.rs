// tests/splicing_validation.rs
//
// Spectral round-trip checks of the coarsen/interpolate pair on a padded
// patch that spans the whole periodic box, where the expected values have
// closed forms.

use std::f64::consts::{FRAC_1_SQRT_2, PI};

use zoomgrid::coupling::{fft_coarsen, fft_interpolate};
use zoomgrid::mesh::PatchGrid;
use zoomgrid::noise_grid::{NoiseGrid, PaddedNoiseGrid};

const NC: usize = 16;

/// Splice `top` into an initially empty padded patch covering the full box
/// (margin half the live extent on each side), then coarsen the padded field
/// back to the parent resolution.
fn splice_and_coarsen(top: &NoiseGrid) -> PatchGrid {
    let mut fine = PaddedNoiseGrid::new([0, 0, 0], (NC, NC, NC), NC as i32 / 2);
    fft_interpolate(top, &mut fine).unwrap();

    let (px, py, pz) = fine.padded_dims();
    let m = fine.margin(0) as i64;
    let mut r = PatchGrid::new(0, px, py, pz, [0, 0, 0]);
    for i in 0..px as i64 {
        for j in 0..py as i64 {
            for k in 0..pz as i64 {
                r.set(i, j, k, fine.at(i - m, j - m, k - m));
            }
        }
    }

    let mut coarse = PatchGrid::cubic(0, NC);
    fft_coarsen(&r, &mut coarse).unwrap();
    coarse
}

// The padded patch starts at coarse cell -margin/2, so coarsened cell i
// lines up with parent cell i - margin/2.
const SHIFT: i64 = -(NC as i64) / 4;

#[test]
fn dc_survives_splice_then_coarsen() {
    let mut top = NoiseGrid::new(NC);
    top.data_mut().fill(0.75);

    let coarse = splice_and_coarsen(&top);
    for i in 0..NC as i64 {
        for j in 0..NC as i64 {
            for k in 0..NC as i64 {
                assert!(
                    (coarse.get(i, j, k) - 0.75).abs() < 1e-10,
                    "({i},{j},{k}) = {}",
                    coarse.get(i, j, k)
                );
            }
        }
    }
}

#[test]
fn passband_mode_round_trips_exactly() {
    // k = 1 sits below both blend windows, and the half-cell phases of the
    // two transforms cancel, so the mode must come back verbatim (shifted
    // by the patch origin)
    let mut top = NoiseGrid::new(NC);
    for i in 0..NC {
        for j in 0..NC {
            for k in 0..NC {
                top.data_mut()[(i * NC + j) * NC + k] =
                    (2.0 * PI * i as f64 / NC as f64).cos();
            }
        }
    }

    let coarse = splice_and_coarsen(&top);
    for i in 0..NC as i64 {
        for j in 0..NC as i64 {
            for k in 0..NC as i64 {
                let want = top.at_wrapped(i + SHIFT, j + SHIFT, k + SHIFT);
                assert!(
                    (coarse.get(i, j, k) - want).abs() < 1e-9,
                    "({i},{j},{k}): {} vs {}",
                    coarse.get(i, j, k),
                    want
                );
            }
        }
    }
}

#[test]
fn rolloff_band_attenuates_by_the_meyer_window() {
    // k = 3 with the splice window kmax = NC/4 = 4 lands at the midpoint of
    // the Meyer rolloff, so the transplanted amplitude is exactly 1/sqrt(2);
    // the coarsen window is still fully open there
    let mut top = NoiseGrid::new(NC);
    for i in 0..NC {
        for j in 0..NC {
            for k in 0..NC {
                top.data_mut()[(i * NC + j) * NC + k] =
                    (2.0 * PI * 3.0 * i as f64 / NC as f64).cos();
            }
        }
    }

    let coarse = splice_and_coarsen(&top);
    let mut amp = 0.0;
    for i in 0..NC as i64 {
        for j in 0..NC as i64 {
            for k in 0..NC as i64 {
                let phase = 2.0 * PI * 3.0 * (i + SHIFT) as f64 / NC as f64;
                amp += coarse.get(i, j, k) * phase.cos();
            }
        }
    }
    amp *= 2.0 / (NC * NC * NC) as f64;
    assert!(
        (amp - FRAC_1_SQRT_2).abs() < 1e-6,
        "rolloff amplitude {amp}"
    );
}

#[test]
fn stopband_mode_is_not_transplanted() {
    // k = 6 exceeds 4/3 of the splice kmax, so the window is zero and the
    // fine patch keeps none of it
    let mut top = NoiseGrid::new(NC);
    for i in 0..NC {
        for j in 0..NC {
            for k in 0..NC {
                top.data_mut()[(i * NC + j) * NC + k] =
                    (2.0 * PI * 6.0 * i as f64 / NC as f64).cos();
            }
        }
    }

    let mut fine = PaddedNoiseGrid::new([0, 0, 0], (NC, NC, NC), NC as i32 / 2);
    fft_interpolate(&top, &mut fine).unwrap();
    let m = fine.margin(0) as i64;
    for i in -m..(NC as i64 + m) {
        for j in -m..(NC as i64 + m) {
            for k in -m..(NC as i64 + m) {
                assert!(
                    fine.at(i, j, k).abs() < 1e-10,
                    "({i},{j},{k}) = {}",
                    fine.at(i, j, k)
                );
            }
        }
    }
}
