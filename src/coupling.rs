// src/coupling.rs

use rayon::prelude::*;
use rustfft::num_complex::Complex;

use crate::error::GridError;
use crate::fft3::Fft3;
use crate::mesh::PatchGrid;
use crate::noise_grid::{CoarseSource, PaddedNoiseGrid};

/// Blend window width of `fft_coarsen`, as a fraction of the coarse grid
/// linear size per axis. 0.5 puts the rolloff at the coarse Nyquist.
pub const COARSEN_BLEND_FRACTION: f64 = 0.5;

/// Blend window width of `fft_interpolate`; 0.25 rolls the coarse
/// contribution off at half the coarse Nyquist.
pub const SPLICE_BLEND_FRACTION: f64 = 0.25;

/// Meyer scaling function: a smooth low-pass window equal to 1 below
/// `2/3 kmax`, 0 above `4/3 kmax`, with a C^3 cosine rolloff in between.
pub fn meyer_scaling_function(k: f64, kmax: f64) -> f64 {
    fn nu(x: f64) -> f64 {
        if x <= 0.0 {
            0.0
        } else if x >= 1.0 {
            1.0
        } else {
            x * x * x * x * (35.0 - 84.0 * x + 70.0 * x * x - 20.0 * x * x * x)
        }
    }
    let four_pi_thirds = 4.0 * std::f64::consts::PI / 3.0;
    let kk = k.abs() / kmax * four_pi_thirds;
    if kk < 0.5 * four_pi_thirds {
        1.0
    } else if kk < four_pi_thirds {
        (0.5 * std::f64::consts::PI * nu(3.0 * kk / (2.0 * std::f64::consts::PI) - 1.0)).cos()
    } else {
        0.0
    }
}

#[inline]
fn signed_freq(i: usize, n: usize) -> f64 {
    if i <= n / 2 {
        i as f64
    } else {
        i as f64 - n as f64
    }
}

/// Fine bin holding the same physical frequency as coarse bin `i`.
#[inline]
fn alias_bin(i: usize, nc: usize, nf: usize) -> usize {
    if i > nc / 2 {
        i + nf / 2
    } else {
        i
    }
}

/// Replace a coarse grid with the spectrally faithful degrade of a fine
/// grid covering the same volume at twice the resolution.
///
/// The fine spectrum is resampled onto the coarse k-grid with a half-cell
/// phase correction (coarse cell centers sit between fine ones) and damped
/// through the Meyer window, so there is no hard frequency cutoff and the
/// mean is preserved exactly.
pub fn fft_coarsen(fine: &PatchGrid, coarse: &mut PatchGrid) -> Result<(), GridError> {
    fft_coarsen_windowed(fine, coarse, COARSEN_BLEND_FRACTION)
}

pub fn fft_coarsen_windowed(
    fine: &PatchGrid,
    coarse: &mut PatchGrid,
    blend_fraction: f64,
) -> Result<(), GridError> {
    let (nxf, nyf, nzf) = fine.extents();
    let (nxc, nyc, nzc) = coarse.extents();
    if (nxf, nyf, nzf) != (2 * nxc, 2 * nyc, 2 * nzc) {
        return Err(GridError::ShapeMismatch {
            op: "fft_coarsen",
            lhs: (nxf, nyf, nzf),
            rhs: (nxc, nyc, nzc),
        });
    }

    let mut cfine = vec![Complex::default(); nxf * nyf * nzf];
    cfine
        .par_chunks_mut(nyf * nzf)
        .enumerate()
        .for_each(|(i, plane)| {
            for j in 0..nyf {
                for k in 0..nzf {
                    plane[j * nzf + k] =
                        Complex::new(fine.get(i as i64, j as i64, k as i64), 0.0);
                }
            }
        });
    Fft3::new(nxf, nyf, nzf).forward(&mut cfine);

    let kmax = [
        blend_fraction * nxc as f64,
        blend_fraction * nyc as f64,
        blend_fraction * nzc as f64,
    ];
    let mut ccoarse = vec![Complex::default(); nxc * nyc * nzc];
    {
        let fine_modes = &cfine;
        ccoarse
            .par_chunks_mut(nyc * nzc)
            .enumerate()
            .for_each(|(i, plane)| {
                let ii = alias_bin(i, nxc, nxf);
                let kx = signed_freq(i, nxc);
                let wx = meyer_scaling_function(kx, kmax[0]);
                for j in 0..nyc {
                    let jj = alias_bin(j, nyc, nyf);
                    let ky = signed_freq(j, nyc);
                    let wy = meyer_scaling_function(ky, kmax[1]);
                    for k in 0..nzc {
                        let kk = alias_bin(k, nzc, nzf);
                        let kz = signed_freq(k, nzc);
                        let wz = meyer_scaling_function(kz, kmax[2]);

                        let phase = (kx / nxc as f64 + ky / nyc as f64 + kz / nzc as f64)
                            * 0.5
                            * std::f64::consts::PI;
                        let rot = Complex::new(phase.cos(), phase.sin());
                        let val = fine_modes[(ii * nyf + jj) * nzf + kk] * rot * 0.125;
                        plane[j * nzc + k] = val * (wx * wy * wz);
                    }
                }
            });
    }
    Fft3::new(nxc, nyc, nzc).inverse(&mut ccoarse);

    for i in 0..nxc {
        for j in 0..nyc {
            for k in 0..nzc {
                coarse.set(
                    i as i64,
                    j as i64,
                    k as i64,
                    ccoarse[(i * nyc + j) * nzc + k].re,
                );
            }
        }
    }
    Ok(())
}

/// Splice the low-frequency content of the parent level into a padded fine
/// working grid, keeping the fine grid's own high-frequency content.
///
/// The coarse block covering the padded fine region starts half a margin
/// before the fine patch (in coarse cells); the periodic base grid resolves
/// that by wrapping, an intermediate patch from its own margin. Per mode
/// the result is `(1-w)*fine + w*coarse` with the Meyer blend `w`, so the
/// transition is smooth and the coarse DC carries over exactly.
pub fn fft_interpolate(
    coarse: &dyn CoarseSource,
    fine: &mut PaddedNoiseGrid,
) -> Result<(), GridError> {
    fft_interpolate_windowed(coarse, fine, SPLICE_BLEND_FRACTION)
}

pub fn fft_interpolate_windowed(
    coarse: &dyn CoarseSource,
    fine: &mut PaddedNoiseGrid,
    blend_fraction: f64,
) -> Result<(), GridError> {
    let (nxf, nyf, nzf) = fine.padded_dims();
    if nxf % 2 != 0 || nyf % 2 != 0 || nzf % 2 != 0 {
        return Err(GridError::ConfigConflict(format!(
            "fft_interpolate requires even padded extents, got ({nxf},{nyf},{nzf})"
        )));
    }
    let (nxc, nyc, nzc) = (nxf / 2, nyf / 2, nzf / 2);

    let lo = [
        fine.offset(0) - fine.margin(0) as i64 / 2,
        fine.offset(1) - fine.margin(1) as i64 / 2,
        fine.offset(2) - fine.margin(2) as i64 / 2,
    ];
    let hi = [lo[0] + nxc as i64, lo[1] + nyc as i64, lo[2] + nzc as i64];
    if !coarse.contains_block(lo, hi) {
        return Err(GridError::SpliceOutOfBounds { lo, hi });
    }

    let mut ccoarse = vec![Complex::default(); nxc * nyc * nzc];
    ccoarse
        .par_chunks_mut(nyc * nzc)
        .enumerate()
        .for_each(|(i, plane)| {
            for j in 0..nyc {
                for k in 0..nzc {
                    plane[j * nzc + k] = Complex::new(
                        coarse.sample(lo[0] + i as i64, lo[1] + j as i64, lo[2] + k as i64),
                        0.0,
                    );
                }
            }
        });

    let mut cfine: Vec<Complex<f64>> = fine
        .data()
        .par_iter()
        .map(|&v| Complex::new(v, 0.0))
        .collect();

    Fft3::new(nxc, nyc, nzc).forward(&mut ccoarse);
    let fft_fine = Fft3::new(nxf, nyf, nzf);
    fft_fine.forward(&mut cfine);

    let kmax = [
        blend_fraction * nxc as f64,
        blend_fraction * nyc as f64,
        blend_fraction * nzc as f64,
    ];
    // only the coarse-resolution bins are touched; the rest of the fine
    // spectrum stays as it is
    for i in 0..nxc {
        let ii = alias_bin(i, nxc, nxf);
        let kx = signed_freq(i, nxc);
        let wx = meyer_scaling_function(kx, kmax[0]);
        for j in 0..nyc {
            let jj = alias_bin(j, nyc, nyf);
            let ky = signed_freq(j, nyc);
            let wy = meyer_scaling_function(ky, kmax[1]);
            for k in 0..nzc {
                let kk = alias_bin(k, nzc, nzf);
                let kz = signed_freq(k, nzc);
                let w = wx * wy * meyer_scaling_function(kz, kmax[2]);
                if w == 0.0 {
                    continue;
                }

                let phase = -(kx / nxc as f64 + ky / nyc as f64 + kz / nzc as f64)
                    * 0.5
                    * std::f64::consts::PI;
                let rot = Complex::new(phase.cos(), phase.sin());
                let val = ccoarse[(i * nyc + j) * nzc + k] * rot * 8.0;

                let qf = (ii * nyf + jj) * nzf + kk;
                cfine[qf] = cfine[qf] * (1.0 - w) + val * w;
            }
        }
    }

    fft_fine.inverse(&mut cfine);
    fine.data_mut()
        .par_iter_mut()
        .zip(cfine.par_iter())
        .for_each(|(d, c)| *d = c.re);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise_grid::NoiseGrid;
    use std::f64::consts::PI;

    #[test]
    fn meyer_window_shape() {
        assert_eq!(meyer_scaling_function(0.0, 4.0), 1.0);
        assert_eq!(meyer_scaling_function(1.0, 4.0), 1.0);
        assert_eq!(meyer_scaling_function(4.0, 4.0), 0.0);
        assert_eq!(meyer_scaling_function(-5.0, 4.0), 0.0);
        let w = meyer_scaling_function(3.0, 4.0);
        assert!((w - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12, "w = {w}");
        // monotone through the rolloff
        let mut prev = 1.0;
        for s in 0..=20 {
            let k = 8.0 / 3.0 + (4.0 / 3.0) * s as f64 / 20.0;
            let w = meyer_scaling_function(k, 4.0);
            assert!(w <= prev + 1e-14);
            prev = w;
        }
    }

    #[test]
    fn coarsen_preserves_constants() {
        let mut fine = PatchGrid::cubic(0, 16);
        fine.fill(3.25);
        let mut coarse = PatchGrid::cubic(0, 8);
        fft_coarsen(&fine, &mut coarse).unwrap();
        for i in 0..8 {
            for j in 0..8 {
                for k in 0..8 {
                    assert!((coarse.get(i, j, k) - 3.25).abs() < 1e-10);
                }
            }
        }
    }

    #[test]
    fn coarsen_rejects_wrong_ratio() {
        let fine = PatchGrid::cubic(0, 16);
        let mut coarse = PatchGrid::cubic(0, 6);
        assert!(matches!(
            fft_coarsen(&fine, &mut coarse),
            Err(GridError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn coarsen_resamples_low_mode_at_cell_centers() {
        // a passband cosine must come out sampled at the coarse positions,
        // i.e. shifted by half a fine cell relative to naive decimation
        let n = 16usize;
        let mut fine = PatchGrid::cubic(0, n);
        for i in 0..n {
            let v = (2.0 * PI * i as f64 / n as f64).cos();
            for j in 0..n {
                for k in 0..n {
                    fine.set(i as i64, j as i64, k as i64, v);
                }
            }
        }
        let mut coarse = PatchGrid::cubic(0, n / 2);
        fft_coarsen(&fine, &mut coarse).unwrap();
        for i in 0..n / 2 {
            let expect = (2.0 * PI * (2.0 * i as f64 + 0.5) / n as f64).cos();
            let got = coarse.get(i as i64, 0, 0);
            assert!((got - expect).abs() < 1e-9, "cell {i}: {got} vs {expect}");
        }
    }

    #[test]
    fn coarsen_attenuates_near_nyquist_smoothly() {
        // mode 3 on an 8^3 target sits in the rolloff: neither passed
        // untouched nor cut to zero
        let n = 16usize;
        let mut fine = PatchGrid::cubic(0, n);
        for i in 0..n {
            let v = (2.0 * PI * 3.0 * i as f64 / n as f64).cos();
            for j in 0..n {
                for k in 0..n {
                    fine.set(i as i64, j as i64, k as i64, v);
                }
            }
        }
        let mut coarse = PatchGrid::cubic(0, n / 2);
        fft_coarsen(&fine, &mut coarse).unwrap();
        // project back onto the expected shifted cosine to read the amplitude
        let mut amp = 0.0;
        for i in 0..n / 2 {
            let c = (2.0 * PI * 3.0 * (2.0 * i as f64 + 0.5) / n as f64).cos();
            amp += coarse.get(i as i64, 0, 0) * c;
        }
        amp /= (n / 2) as f64 / 2.0;
        assert!(
            (amp - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9,
            "amplitude {amp}"
        );
    }

    #[test]
    fn splice_preserves_coarse_mean_on_constants() {
        let mut top = NoiseGrid::new(16);
        top.data_mut().iter_mut().for_each(|v| *v = 1.75);
        let mut fine = PaddedNoiseGrid::new([4, 4, 4], (8, 8, 8), 4);
        fine.data_mut().iter_mut().for_each(|v| *v = -0.5);
        fft_interpolate(&top, &mut fine).unwrap();
        for i in -4..12 {
            assert!(
                (fine.at(i, 0, 0) - 1.75).abs() < 1e-10,
                "cell {i} = {}",
                fine.at(i, 0, 0)
            );
        }
    }

    #[test]
    fn splice_transplants_a_low_coarse_mode() {
        // coarse k=1 cosine across the full box; the padded fine grid spans
        // the whole box too, so the result must be a unit-amplitude k=1
        // cosine in padded-grid coordinates
        let n = 16usize;
        let mut top = NoiseGrid::new(n);
        {
            let data = top.data_mut();
            for i in 0..n {
                let v = (2.0 * PI * i as f64 / n as f64).cos();
                for j in 0..n {
                    for k in 0..n {
                        data[(i * n + j) * n + k] = v;
                    }
                }
            }
        }
        let mut fine = PaddedNoiseGrid::new([0, 0, 0], (n, n, n), n as i32 / 2);
        fft_interpolate(&top, &mut fine).unwrap();

        let (pnx, _, _) = fine.padded_dims();
        assert_eq!(pnx, 2 * n);
        let m = fine.margin(0) as i64;
        let mut a = 0.0;
        let mut b = 0.0;
        let mut mean = 0.0;
        for i in 0..pnx as i64 {
            let v = fine.at(i - m, 0, 0);
            let th = 2.0 * PI * i as f64 / pnx as f64;
            a += v * th.cos();
            b += v * th.sin();
            mean += v;
        }
        let amp = (a * a + b * b).sqrt() * 2.0 / pnx as f64;
        assert!((amp - 1.0).abs() < 1e-9, "amplitude {amp}");
        assert!(mean.abs() / (pnx as f64) < 1e-10);
        // coarse field is uniform along y and z, so the splice must be too
        assert!((fine.at(3, -2, 5) - fine.at(3, 0, 0)).abs() < 1e-10);
    }

    #[test]
    fn splice_rejects_block_outside_margins() {
        let coarse = PaddedNoiseGrid::new([0, 0, 0], (8, 8, 8), 2);
        // child sits too close to the parent edge for its margin
        let mut fine = PaddedNoiseGrid::new([0, 0, 0], (12, 12, 12), 6);
        assert!(matches!(
            fft_interpolate(&coarse, &mut fine),
            Err(GridError::SpliceOutOfBounds { .. })
        ));
    }
}
