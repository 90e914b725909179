// src/noise_grid.rs

use rayon::prelude::*;

use crate::error::GridError;
use crate::mesh::PatchGrid;
use crate::noise::NoiseSource;

/// Coarse-side data access for the splicing pass.
///
/// The periodic base grid resolves out-of-range indices by wrapping; a
/// padded intermediate grid resolves them inside its own margin. The
/// splicing code itself never needs to know which case it is in.
pub trait CoarseSource: Sync {
    /// Value at a (possibly out-of-range) cell index.
    fn sample(&self, i: i64, j: i64, k: i64) -> f64;

    /// Whether the half-open index block `[lo, hi)` can be sampled.
    fn contains_block(&self, lo: [i64; 3], hi: [i64; 3]) -> bool;
}

/// Full-domain periodic working grid for the base level.
pub struct NoiseGrid {
    nx: usize,
    ny: usize,
    nz: usize,
    data: Vec<f64>,
}

impl NoiseGrid {
    pub fn new(n: usize) -> Self {
        Self::with_dims(n, n, n)
    }

    pub fn with_dims(nx: usize, ny: usize, nz: usize) -> Self {
        Self {
            nx,
            ny,
            nz,
            data: vec![0.0; nx * ny * nz],
        }
    }

    #[inline]
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nz)
    }

    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    #[inline]
    pub fn at_wrapped(&self, i: i64, j: i64, k: i64) -> f64 {
        let iw = i.rem_euclid(self.nx as i64) as usize;
        let jw = j.rem_euclid(self.ny as i64) as usize;
        let kw = k.rem_euclid(self.nz as i64) as usize;
        self.data[(iw * self.ny + jw) * self.nz + kw]
    }

    /// Fill from the noise source; global coordinates coincide with local
    /// ones on the full-domain grid.
    pub fn fill_noise(&mut self, noise: &dyn NoiseSource, level: u32) {
        let (ny, nz) = (self.ny, self.nz);
        self.data
            .par_chunks_mut(ny * nz)
            .enumerate()
            .for_each(|(i, plane)| {
                for j in 0..ny {
                    for k in 0..nz {
                        plane[j * nz + k] = noise.sample(level, i as i64, j as i64, k as i64);
                    }
                }
            });
    }

    /// Copy into a hierarchy grid of the same extents.
    pub fn copy_to(&self, target: &mut PatchGrid) -> Result<(), GridError> {
        if target.extents() != self.dims() {
            return Err(GridError::ShapeMismatch {
                op: "noise grid copy",
                lhs: self.dims(),
                rhs: target.extents(),
            });
        }
        for i in 0..self.nx {
            for j in 0..self.ny {
                for k in 0..self.nz {
                    target.set(
                        i as i64,
                        j as i64,
                        k as i64,
                        self.data[(i * self.ny + j) * self.nz + k],
                    );
                }
            }
        }
        Ok(())
    }

    pub fn mean(&self) -> f64 {
        self.data.iter().sum::<f64>() / self.data.len() as f64
    }
}

impl CoarseSource for NoiseGrid {
    fn sample(&self, i: i64, j: i64, k: i64) -> f64 {
        self.at_wrapped(i, j, k)
    }

    fn contains_block(&self, _lo: [i64; 3], _hi: [i64; 3]) -> bool {
        true
    }
}

/// Refinement-patch working grid with convolution margins.
///
/// The live (unpadded) region has extents `(nx, ny, nz)`; `margin` extra
/// cells on every side absorb the wrap-around of the isolated convolution.
/// `offset` locates the live region relative to the parent patch's live
/// origin, in parent (coarse) cells.
pub struct PaddedNoiseGrid {
    offset: [i64; 3],
    nx: usize,
    ny: usize,
    nz: usize,
    mx: usize,
    my: usize,
    mz: usize,
    data: Vec<f64>,
}

impl PaddedNoiseGrid {
    /// A `margin` of zero or less selects double padding: half the live
    /// extent on every side, giving a padded grid twice the patch size.
    pub fn new(offset: [i64; 3], extent: (usize, usize, usize), margin: i32) -> Self {
        let (nx, ny, nz) = extent;
        let (mx, my, mz) = if margin <= 0 {
            (nx / 2, ny / 2, nz / 2)
        } else {
            (margin as usize, margin as usize, margin as usize)
        };
        let data = vec![0.0; (nx + 2 * mx) * (ny + 2 * my) * (nz + 2 * mz)];
        Self {
            offset,
            nx,
            ny,
            nz,
            mx,
            my,
            mz,
            data,
        }
    }

    #[inline]
    pub fn offset(&self, dim: usize) -> i64 {
        self.offset[dim]
    }

    #[inline]
    pub fn extents(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nz)
    }

    #[inline]
    pub fn margin(&self, dim: usize) -> usize {
        [self.mx, self.my, self.mz][dim]
    }

    #[inline]
    pub fn padded_dims(&self) -> (usize, usize, usize) {
        (self.nx + 2 * self.mx, self.ny + 2 * self.my, self.nz + 2 * self.mz)
    }

    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Signed access; the margins are reached with indices in
    /// `-margin..extent+margin`.
    #[inline]
    pub fn at(&self, i: i64, j: i64, k: i64) -> f64 {
        let (_, py, pz) = self.padded_dims();
        debug_assert!(
            i >= -(self.mx as i64)
                && i < (self.nx + self.mx) as i64
                && j >= -(self.my as i64)
                && j < (self.ny + self.my) as i64
                && k >= -(self.mz as i64)
                && k < (self.nz + self.mz) as i64,
            "padded grid index ({i},{j},{k}) out of range"
        );
        let q = (((i + self.mx as i64) as usize) * py + (j + self.my as i64) as usize) * pz
            + (k + self.mz as i64) as usize;
        self.data[q]
    }

    /// Fill the whole padded region from the noise source. `abs_offset` is
    /// the absolute position of the live region in level-native fine cells.
    pub fn fill_noise(&mut self, noise: &dyn NoiseSource, level: u32, abs_offset: [i64; 3]) {
        let (_, py, pz) = self.padded_dims();
        let o = [
            abs_offset[0] - self.mx as i64,
            abs_offset[1] - self.my as i64,
            abs_offset[2] - self.mz as i64,
        ];
        self.data
            .par_chunks_mut(py * pz)
            .enumerate()
            .for_each(|(i, plane)| {
                for j in 0..py {
                    for k in 0..pz {
                        plane[j * pz + k] = noise.sample(
                            level,
                            o[0] + i as i64,
                            o[1] + j as i64,
                            o[2] + k as i64,
                        );
                    }
                }
            });
    }

    /// Copy the live region into a hierarchy grid of matching extents,
    /// discarding the margins.
    pub fn copy_unpad(&self, target: &mut PatchGrid) -> Result<(), GridError> {
        if target.extents() != self.extents() {
            return Err(GridError::ShapeMismatch {
                op: "copy_unpad",
                lhs: self.extents(),
                rhs: target.extents(),
            });
        }
        for i in 0..self.nx as i64 {
            for j in 0..self.ny as i64 {
                for k in 0..self.nz as i64 {
                    target.set(i, j, k, self.at(i, j, k));
                }
            }
        }
        Ok(())
    }

    /// Mean over the live region only.
    pub fn mean(&self) -> f64 {
        let mut sum = 0.0;
        for i in 0..self.nx as i64 {
            for j in 0..self.ny as i64 {
                for k in 0..self.nz as i64 {
                    sum += self.at(i, j, k);
                }
            }
        }
        sum / (self.nx * self.ny * self.nz) as f64
    }
}

impl CoarseSource for PaddedNoiseGrid {
    fn sample(&self, i: i64, j: i64, k: i64) -> f64 {
        self.at(i, j, k)
    }

    fn contains_block(&self, lo: [i64; 3], hi: [i64; 3]) -> bool {
        let m = [self.mx as i64, self.my as i64, self.mz as i64];
        let n = [self.nx as i64, self.ny as i64, self.nz as i64];
        (0..3).all(|d| lo[d] >= -m[d] && hi[d] <= n[d] + m[d])
    }
}
