// src/mesh/grid.rs

use rayon::prelude::*;

use crate::error::GridError;

/// Single-level rectangular 3D array with an optional ghost-cell margin.
///
/// The live region has extents `(nx, ny, nz)`; storage covers
/// `(nx+2*nbnd) * (ny+2*nbnd) * (nz+2*nbnd)` cells so that signed indices
/// in `-nbnd..extent+nbnd` are valid on every axis. The `offset` triple
/// locates the live region relative to the parent level's origin, in
/// parent-grid cell units.
#[derive(Clone)]
pub struct PatchGrid {
    nx: usize,
    ny: usize,
    nz: usize,
    nbnd: usize,
    offset: [i64; 3],
    data: Vec<f64>,
}

impl PatchGrid {
    pub fn new(nbnd: usize, nx: usize, ny: usize, nz: usize, offset: [i64; 3]) -> Self {
        let ntot = (nx + 2 * nbnd) * (ny + 2 * nbnd) * (nz + 2 * nbnd);
        Self {
            nx,
            ny,
            nz,
            nbnd,
            offset,
            data: vec![0.0; ntot],
        }
    }

    /// Cubic grid with zero offset, the common case for base levels.
    pub fn cubic(nbnd: usize, n: usize) -> Self {
        Self::new(nbnd, n, n, n, [0, 0, 0])
    }

    #[inline]
    pub fn extents(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nz)
    }

    #[inline]
    pub fn size(&self, dim: usize) -> usize {
        [self.nx, self.ny, self.nz][dim]
    }

    #[inline]
    pub fn nbnd(&self) -> usize {
        self.nbnd
    }

    #[inline]
    pub fn offset(&self, dim: usize) -> i64 {
        self.offset[dim]
    }

    pub fn set_offset(&mut self, offset: [i64; 3]) {
        self.offset = offset;
    }

    #[inline]
    fn stride(&self) -> (usize, usize, usize) {
        (
            self.nx + 2 * self.nbnd,
            self.ny + 2 * self.nbnd,
            self.nz + 2 * self.nbnd,
        )
    }

    /// Storage index for signed cell coordinates. Ghost cells are reached
    /// with negative indices down to `-nbnd`.
    #[inline]
    fn idx(&self, i: i64, j: i64, k: i64) -> usize {
        let (_, syt, szt) = self.stride();
        let b = self.nbnd as i64;
        debug_assert!(
            i >= -b
                && i < self.nx as i64 + b
                && j >= -b
                && j < self.ny as i64 + b
                && k >= -b
                && k < self.nz as i64 + b,
            "grid index ({i},{j},{k}) out of range for extents {:?} with nbnd {}",
            self.extents(),
            self.nbnd
        );
        (((i + b) as usize) * syt + (j + b) as usize) * szt + (k + b) as usize
    }

    #[inline]
    pub fn get(&self, i: i64, j: i64, k: i64) -> f64 {
        self.data[self.idx(i, j, k)]
    }

    #[inline]
    pub fn set(&mut self, i: i64, j: i64, k: i64, v: f64) {
        let q = self.idx(i, j, k);
        self.data[q] = v;
    }

    #[inline]
    pub fn add_to(&mut self, i: i64, j: i64, k: i64, v: f64) {
        let q = self.idx(i, j, k);
        self.data[q] += v;
    }

    pub fn zero(&mut self) {
        self.data.par_iter_mut().for_each(|v| *v = 0.0);
    }

    pub fn fill(&mut self, value: f64) {
        self.data.par_iter_mut().for_each(|v| *v = value);
    }

    /// Mean over the live region only; ghost cells do not contribute.
    pub fn mean(&self) -> f64 {
        let mut sum = 0.0;
        for i in 0..self.nx as i64 {
            for j in 0..self.ny as i64 {
                for k in 0..self.nz as i64 {
                    sum += self.get(i, j, k);
                }
            }
        }
        sum / (self.nx * self.ny * self.nz) as f64
    }

    pub fn add_scalar(&mut self, s: f64) {
        self.data.par_iter_mut().for_each(|v| *v += s);
    }

    pub fn multiply_scalar(&mut self, s: f64) {
        self.data.par_iter_mut().for_each(|v| *v *= s);
    }

    fn check_shape(&self, other: &PatchGrid, op: &'static str) -> Result<(), GridError> {
        if self.extents() != other.extents() || self.nbnd != other.nbnd {
            return Err(GridError::ShapeMismatch {
                op,
                lhs: self.extents(),
                rhs: other.extents(),
            });
        }
        Ok(())
    }

    pub fn add_assign_elementwise(&mut self, other: &PatchGrid) -> Result<(), GridError> {
        self.check_shape(other, "add_assign_elementwise")?;
        self.data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .for_each(|(a, b)| *a += b);
        Ok(())
    }

    pub fn sub_assign_elementwise(&mut self, other: &PatchGrid) -> Result<(), GridError> {
        self.check_shape(other, "sub_assign_elementwise")?;
        self.data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .for_each(|(a, b)| *a -= b);
        Ok(())
    }

    pub fn multiply_assign_elementwise(&mut self, other: &PatchGrid) -> Result<(), GridError> {
        self.check_shape(other, "multiply_assign_elementwise")?;
        self.data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .for_each(|(a, b)| *a *= b);
        Ok(())
    }
}
