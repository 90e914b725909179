// src/mesh/mask.rs

/// Cell lies outside the region of interest.
pub const MASK_OUTSIDE: i16 = -1;
/// Cell is inside the region and not covered by a finer level.
pub const MASK_LEAF: i16 = 1;
/// Cell is inside the region and covered by a finer level.
pub const MASK_REFINED: i16 = 2;

/// Tri-state refinement flags co-extensive with one level's live region.
///
/// Freshly allocated cells hold 0 until the mask build pass classifies them.
#[derive(Clone)]
pub struct RefinementMask {
    nx: usize,
    ny: usize,
    nz: usize,
    mask: Vec<i16>,
}

impl RefinementMask {
    pub fn new(nx: usize, ny: usize, nz: usize, value: i16) -> Self {
        Self {
            nx,
            ny,
            nz,
            mask: vec![value; nx * ny * nz],
        }
    }

    pub fn empty() -> Self {
        Self {
            nx: 0,
            ny: 0,
            nz: 0,
            mask: Vec::new(),
        }
    }

    #[inline]
    pub fn extents(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nz)
    }

    #[inline]
    fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.nx && j < self.ny && k < self.nz);
        (i * self.ny + j) * self.nz + k
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> i16 {
        self.mask[self.idx(i, j, k)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, v: i16) {
        let q = self.idx(i, j, k);
        self.mask[q] = v;
    }

    pub fn count_flagged(&self) -> usize {
        self.mask.iter().filter(|&&v| v > 0).count()
    }

    pub fn count_notflagged(&self) -> usize {
        self.mask.iter().filter(|&&v| v <= 0).count()
    }

    pub fn count_value(&self, v: i16) -> usize {
        self.mask.iter().filter(|&&m| m == v).count()
    }

    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }
}
