// src/transfer.rs

use rayon::prelude::*;
use rustfft::num_complex::Complex;

use crate::fft3::Fft3;

/// Scale-dependent transfer kernel, indexed by wavenumber and level.
///
/// The physics behind the kernel is opaque to the grid engine; it only
/// multiplies mode amplitudes. `k` is in radians per box length.
pub trait TransferFunction: Send + Sync {
    fn evaluate(&self, k: f64, level: u32) -> f64;
}

/// Unit kernel; passes the noise through unchanged.
pub struct IdentityTransfer;

impl TransferFunction for IdentityTransfer {
    fn evaluate(&self, _k: f64, _level: u32) -> f64 {
        1.0
    }
}

/// Pure power-law kernel `T(k) = amplitude * k^(index/2)`, handy for
/// smoke tests with a scale-dependent spectrum.
pub struct PowerLawTransfer {
    pub index: f64,
    pub amplitude: f64,
}

impl TransferFunction for PowerLawTransfer {
    fn evaluate(&self, k: f64, _level: u32) -> f64 {
        if k <= 0.0 {
            0.0
        } else {
            self.amplitude * k.powf(0.5 * self.index)
        }
    }
}

/// Per-mode options of the convolution pass.
#[derive(Clone, Copy, Default)]
pub struct ConvolveOptions {
    /// Stagger the field by half a cell (cell-corner vs cell-center
    /// output convention).
    pub shift: bool,
    /// Normalize the noise modes to unit modulus before applying the
    /// kernel, keeping only their phases. Full-domain kernels only; a
    /// patch kernel ignores it, its mode set is not the run's spectrum.
    pub fix_amplitude: bool,
    /// Negate all mode amplitudes (paired-simulation runs).
    pub flip_amplitude: bool,
}

/// k-space kernel bound to one level, mirroring a fetch-then-apply use:
/// fetch once per level, convolve the level's working buffer in place.
pub struct SpectralKernel<'a> {
    tf: &'a dyn TransferFunction,
    level: u32,
    is_patch: bool,
}

impl<'a> SpectralKernel<'a> {
    pub fn fetch(tf: &'a dyn TransferFunction, level: u32, is_patch: bool) -> Self {
        Self {
            tf,
            level,
            is_patch,
        }
    }

    /// Convolve a real buffer of layout `q = (i*ny + j)*nz + k` in place.
    ///
    /// The wavenumber of mode `(mx,my,mz)` follows from the physical cell
    /// size at this level, `h = 2^-level` box lengths.
    pub fn convolve(
        &self,
        data: &mut [f64],
        dims: (usize, usize, usize),
        opts: &ConvolveOptions,
    ) {
        let (nx, ny, nz) = dims;
        assert_eq!(data.len(), nx * ny * nz, "buffer does not match dims");
        let h = 1.0 / (1u64 << self.level) as f64;

        let mut cdata: Vec<Complex<f64>> =
            data.par_iter().map(|&v| Complex::new(v, 0.0)).collect();
        let fft = Fft3::new(nx, ny, nz);
        fft.forward(&mut cdata);

        let two_pi = 2.0 * std::f64::consts::PI;
        let tf = self.tf;
        let level = self.level;
        let is_patch = self.is_patch;
        let opts = *opts;
        cdata
            .par_chunks_mut(ny * nz)
            .enumerate()
            .for_each(|(i, plane)| {
                let fx = signed_freq(i, nx);
                for j in 0..ny {
                    let fy = signed_freq(j, ny);
                    for k in 0..nz {
                        let fz = signed_freq(k, nz);
                        let q = j * nz + k;

                        let kmag = two_pi
                            * ((fx / (nx as f64 * h)).powi(2)
                                + (fy / (ny as f64 * h)).powi(2)
                                + (fz / (nz as f64 * h)).powi(2))
                            .sqrt();

                        let mut v = plane[q];
                        if opts.fix_amplitude && !is_patch && kmag > 0.0 {
                            let norm = v.norm();
                            if norm > 0.0 {
                                v /= norm;
                            }
                        }
                        if opts.flip_amplitude {
                            v = -v;
                        }
                        v *= tf.evaluate(kmag, level);
                        if opts.shift {
                            let phase = -std::f64::consts::PI
                                * (fx / nx as f64 + fy / ny as f64 + fz / nz as f64);
                            v *= Complex::new(phase.cos(), phase.sin());
                        }
                        plane[q] = v;
                    }
                }
            });

        fft.inverse(&mut cdata);
        data.par_iter_mut()
            .zip(cdata.par_iter())
            .for_each(|(d, c)| *d = c.re);
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
