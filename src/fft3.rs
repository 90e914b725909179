// src/fft3.rs

use std::sync::Arc;

use rayon::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// 3D complex FFT over a contiguous buffer laid out as
/// `q = (i*ny + j)*nz + k`.
///
/// Built from 1D plans applied axis by axis. The forward transform is
/// unnormalized; the inverse applies the `1/N` scale, so a forward/inverse
/// pair is the identity.
pub struct Fft3 {
    nx: usize,
    ny: usize,
    nz: usize,
    fwd_x: Arc<dyn Fft<f64>>,
    inv_x: Arc<dyn Fft<f64>>,
    fwd_y: Arc<dyn Fft<f64>>,
    inv_y: Arc<dyn Fft<f64>>,
    fwd_z: Arc<dyn Fft<f64>>,
    inv_z: Arc<dyn Fft<f64>>,
}

impl Fft3 {
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        Self {
            nx,
            ny,
            nz,
            fwd_x: planner.plan_fft_forward(nx),
            inv_x: planner.plan_fft_inverse(nx),
            fwd_y: planner.plan_fft_forward(ny),
            inv_y: planner.plan_fft_inverse(ny),
            fwd_z: planner.plan_fft_forward(nz),
            inv_z: planner.plan_fft_inverse(nz),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    pub fn forward(&self, data: &mut [Complex<f64>]) {
        self.transform(data, &self.fwd_x, &self.fwd_y, &self.fwd_z);
    }

    pub fn inverse(&self, data: &mut [Complex<f64>]) {
        self.transform(data, &self.inv_x, &self.inv_y, &self.inv_z);
        let scale = 1.0 / self.len() as f64;
        data.par_iter_mut().for_each(|v| *v *= scale);
    }

    fn transform(
        &self,
        data: &mut [Complex<f64>],
        plan_x: &Arc<dyn Fft<f64>>,
        plan_y: &Arc<dyn Fft<f64>>,
        plan_z: &Arc<dyn Fft<f64>>,
    ) {
        let (nx, ny, nz) = (self.nx, self.ny, self.nz);
        assert_eq!(data.len(), nx * ny * nz, "buffer does not match plan dims");

        // z axis: rows are contiguous
        data.par_chunks_mut(nz).for_each(|row| {
            plan_z.process(row);
        });

        // y axis: gather strided columns plane by plane
        data.par_chunks_mut(ny * nz).for_each(|plane| {
            let mut col = vec![Complex::default(); ny];
            for k in 0..nz {
                for j in 0..ny {
                    col[j] = plane[j * nz + k];
                }
                plan_y.process(&mut col);
                for j in 0..ny {
                    plane[j * nz + k] = col[j];
                }
            }
        });

        // x axis: transpose into x-contiguous scratch, transform, scatter back
        let mut tmp = vec![Complex::default(); nx * ny * nz];
        {
            let src = &*data;
            tmp.par_chunks_mut(nx).enumerate().for_each(|(jk, line)| {
                for (i, v) in line.iter_mut().enumerate() {
                    *v = src[i * ny * nz + jk];
                }
            });
        }
        tmp.par_chunks_mut(nx).for_each(|line| {
            plan_x.process(line);
        });
        data.par_chunks_mut(ny * nz).enumerate().for_each(|(i, plane)| {
            for (jk, v) in plane.iter_mut().enumerate() {
                *v = tmp[jk * nx + i];
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(nx: usize, ny: usize, nz: usize) -> Vec<Complex<f64>> {
        // deterministic but unstructured values
        (0..nx * ny * nz)
            .map(|q| {
                let x = (q as f64 * 0.61803398875).fract();
                Complex::new(x - 0.5, (x * 2.3).fract() - 0.5)
            })
            .collect()
    }

    #[test]
    fn forward_inverse_is_identity() {
        let (nx, ny, nz) = (8, 4, 6);
        let fft = Fft3::new(nx, ny, nz);
        let orig = buf(nx, ny, nz);
        let mut data = orig.clone();
        fft.forward(&mut data);
        fft.inverse(&mut data);
        for (a, b) in data.iter().zip(orig.iter()) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn single_mode_lands_in_one_bin() {
        let (nx, ny, nz) = (8, 8, 8);
        let fft = Fft3::new(nx, ny, nz);
        let mut data = vec![Complex::default(); nx * ny * nz];
        for i in 0..nx {
            for j in 0..ny {
                for k in 0..nz {
                    let phase = 2.0 * std::f64::consts::PI
                        * (2.0 * i as f64 / nx as f64 + k as f64 / nz as f64);
                    data[(i * ny + j) * nz + k] = Complex::new(phase.cos(), phase.sin());
                }
            }
        }
        fft.forward(&mut data);
        let n = (nx * ny * nz) as f64;
        for i in 0..nx {
            for j in 0..ny {
                for k in 0..nz {
                    let v = data[(i * ny + j) * nz + k];
                    let expect = if i == 2 && j == 0 && k == 1 { n } else { 0.0 };
                    assert!(
                        (v - Complex::new(expect, 0.0)).norm() < 1e-9,
                        "bin ({i},{j},{k}) = {v}"
                    );
                }
            }
        }
    }
}
