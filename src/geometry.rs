// src/geometry.rs

use log::{debug, info};

use crate::config::GeometryConfig;
use crate::error::GridError;
use crate::region::RegionGenerator;

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Cell shift granularity (in base-level cells) keeping the re-centering
/// congruent with an external grid that tiles the domain in multiples of
/// `base_unit`.
fn get_shift_unit(base_unit: i64, levelmin: u32) -> i64 {
    let mut level_m = 0u32;
    while base_unit * (1i64 << level_m) < (1i64 << levelmin) {
        level_m += 1;
    }
    std::cmp::max(
        1,
        (1i64 << levelmin) / gcd(base_unit * (1i64 << level_m), 1i64 << levelmin),
    )
}

/// Per-level grid layout of a zoom setup.
///
/// The solver turns the region of interest into integer patch offsets and
/// extents for every level, aligned so that each patch nests in its parent
/// with factor-of-2 spacing. Offsets come in two flavors: relative to the
/// parent grid in parent cells, and absolute in level-native cells, tied by
/// `abs(l) == 2*abs(l-1) + 2*rel(l)`.
#[derive(Clone, Debug)]
pub struct RefinementGeometry {
    levelmin: u32,
    levelmax: u32,
    levelmin_tf: u32,
    padding: u32,
    margin: i32,
    x0: Vec<[f64; 3]>,
    xl: Vec<[f64; 3]>,
    offsets: Vec<[i64; 3]>,
    absoffsets: Vec<[i64; 3]>,
    len: Vec<[i64; 3]>,
    xshift: [i64; 3],
    rshift: [f64; 3],
}

impl RefinementGeometry {
    /// Solve the per-level layout for a region of interest.
    ///
    /// The region generator is consulted for the bounding box and forced
    /// dimensions, and receives the realized finest-level bounding box back
    /// through `update_aabb` once the layout is fixed.
    pub fn solve(
        cfg: &GeometryConfig,
        region: &mut dyn RegionGenerator,
    ) -> Result<Self, GridError> {
        let levelmin = cfg.levelmin;
        let levelmax = cfg.levelmax;
        let levelmin_tf = cfg.levelmin_tf.unwrap_or(levelmin).max(levelmin);
        if levelmax < levelmin {
            return Err(GridError::ConfigConflict(format!(
                "levelmax {} below levelmin {}",
                levelmax, levelmin
            )));
        }

        let gridding_unit = cfg.gridding_unit as i64;
        let mut blocking_factor = cfg.blocking_factor as i64;
        if gridding_unit != 2 && blocking_factor == 0 {
            blocking_factor = gridding_unit;
        } else if gridding_unit != 2 && blocking_factor != 0 && gridding_unit != blocking_factor {
            return Err(GridError::ConfigConflict(format!(
                "incompatible gridding unit {} and blocking factor {}",
                gridding_unit, blocking_factor
            )));
        }

        let (mut x0ref, lxref, lnref) = if levelmin != levelmax {
            let (left, right) = region.get_aabb(levelmax);
            let lx = [right[0] - left[0], right[1] - left[1], right[2] - left[2]];
            info!(
                "refinement region bounding box: left {:?}, right {:?}",
                left, right
            );
            (left, lx, region.is_grid_dim_forced())
        } else {
            ([0.0; 3], [1.0; 3], None)
        };
        let have_nref = lnref.is_some();
        let lnref = lnref.unwrap_or([0; 3]);

        let ncoarse = 1i64 << levelmin;

        // domain shift that re-centers the region of interest
        let xc = [
            (x0ref[0] + 0.5 * lxref[0]).rem_euclid(1.0),
            (x0ref[1] + 0.5 * lxref[1]).rem_euclid(1.0),
            (x0ref[2] + 0.5 * lxref[2]).rem_euclid(1.0),
        ];
        let mut xshift = [0i64; 3];
        if levelmin != levelmax && (!cfg.no_shift || cfg.force_shift) {
            let shift_unit = get_shift_unit(cfg.random_base_unit.max(1), levelmin);
            if shift_unit != 1 {
                info!(
                    "volume can only be shifted by multiples of {} coarse cells",
                    shift_unit
                );
            }
            for d in 0..3 {
                xshift[d] =
                    ((0.5 - xc[d]) * ncoarse as f64 / shift_unit as f64 + 0.5) as i64 * shift_unit;
            }
        }
        let rshift = [
            -(xshift[0] as f64) / ncoarse as f64,
            -(xshift[1] as f64) / ncoarse as f64,
            -(xshift[2] as f64) / ncoarse as f64,
        ];
        for d in 0..3 {
            x0ref[d] += xshift[d] as f64 / ncoarse as f64;
        }

        let nlev = levelmax as usize + 1;
        let x0 = vec![[0.0; 3]; nlev];
        let xl = vec![[1.0; 3]; nlev];
        let offsets = vec![[0i64; 3]; nlev];
        let absoffsets = vec![[0i64; 3]; nlev];
        let mut len = vec![[0i64; 3]; nlev];
        for l in 0..=levelmin {
            let n = 1i64 << l;
            len[l as usize] = [n, n, n];
        }

        let mut geo = Self {
            levelmin,
            levelmax,
            levelmin_tf,
            padding: cfg.padding,
            margin: cfg.margin,
            x0,
            xl,
            offsets,
            absoffsets,
            len,
            xshift,
            rshift,
        };

        // unigrid setups need no patch layout
        if levelmax == levelmin {
            geo.padding = 0;
            return Ok(geo);
        }

        let nresmax = 1i64 << levelmax;
        let mut lo = [
            (x0ref[0] * nresmax as f64) as i64,
            (x0ref[1] * nresmax as f64) as i64,
            (x0ref[2] * nresmax as f64) as i64,
        ];
        let mut hi = [
            ((x0ref[0] + lxref[0]) * nresmax as f64) as i64,
            ((x0ref[1] + lxref[1]) * nresmax as f64) as i64,
            ((x0ref[2] + lxref[2]) * nresmax as f64) as i64,
        ];

        // alignment of the finest level
        if cfg.align_top {
            let nref = 1i64 << (levelmax - levelmin + 1);
            if have_nref {
                let sub = 1i64 << (levelmax - levelmin);
                if lnref.iter().any(|&n| n % sub != 0) {
                    return Err(GridError::AlignmentConflict(
                        "ref_dims cannot be aligned with the base grid under align_top".into(),
                    ));
                }
            }
            for d in 0..3 {
                lo[d] = lo[d] / nref * nref;
                let hr = hi[d] / nref * nref;
                hi[d] = if hr < hi[d] { (hi[d] / nref + 1) * nref } else { hr };
            }
        } else if cfg.preserve_dims {
            for d in 0..3 {
                let al = if xshift[d] >= 0 { 1 } else { -1 };
                lo[d] += al * (lo[d] % 2);
                hi[d] += al * (hi[d] % 2);
            }
        } else {
            debug!(
                "internal refinement bounding box: [{},{}]x[{},{}]x[{},{}]",
                lo[0], hi[0], lo[1], hi[1], lo[2], hi[2]
            );
            for d in 0..3 {
                lo[d] -= lo[d] % gridding_unit;
                if hi[d] % gridding_unit != 0 {
                    hi[d] = (hi[d] / gridding_unit + 1) * gridding_unit;
                }
            }
        }

        if blocking_factor != 0 {
            let coarse_block = 2 * blocking_factor;
            for d in 0..3 {
                lo[d] -= lo[d] % coarse_block;
                hi[d] += (nresmax - hi[d]) % coarse_block;
            }
        }

        if have_nref {
            for d in 0..3 {
                hi[d] = lo[d] + lnref[d];
            }
        }

        // the bounding box must lie inside the (shifted) domain
        for d in 0..3 {
            lo[d] = (lo[d] % nresmax + nresmax) % nresmax;
            hi[d] = (hi[d] % nresmax + nresmax) % nresmax;
        }
        if lo[0] >= hi[0] || lo[1] >= hi[1] || lo[2] >= hi[2] {
            return Err(GridError::DegenerateBox {
                level: levelmax,
                il: lo[0],
                ir: hi[0],
                jl: lo[1],
                jr: hi[1],
                kl: lo[2],
                kr: hi[2],
            });
        }

        let lmax = levelmax as usize;
        geo.absoffsets[lmax] = lo;
        geo.len[lmax] = [hi[0] - lo[0], hi[1] - lo[1], hi[2] - lo[2]];

        if cfg.equal_extent {
            if have_nref && (lnref[0] != lnref[1] || lnref[0] != lnref[2]) {
                return Err(GridError::ConfigConflict(
                    "equal_extent conflicts with unequal ref_dims".into(),
                ));
            }
            let nmax = *geo.len[lmax].iter().max().unwrap();
            for d in 0..3 {
                let dx = ((nmax - geo.len[lmax][d]) as f64 * 0.5) as i64;
                geo.absoffsets[lmax][d] -= dx;
                geo.len[lmax][d] = nmax;
            }
            for d in 0..3 {
                lo[d] = geo.absoffsets[lmax][d];
                hi[d] = lo[d] + nmax;
            }
        }

        let padding = cfg.padding as i64;

        // walk down to the base, adding the padding buffer at each level
        for level in (levelmin + 1..levelmax).rev() {
            let l = level as usize;
            for d in 0..3 {
                lo[d] = (lo[d] as f64 * 0.5 - padding as f64) as i64;
                hi[d] = (hi[d] as f64 * 0.5 + padding as f64) as i64;
            }

            if cfg.align_top {
                let nref = 1i64 << (level - levelmin);
                for d in 0..3 {
                    lo[d] = lo[d] / nref * nref;
                    hi[d] = (hi[d] / nref + 1) * nref;
                }
            } else if cfg.preserve_dims {
                for d in 0..3 {
                    let al = if xshift[d] >= 0 { 1 } else { -1 };
                    lo[d] += al * (lo[d] % 2);
                    hi[d] += al * (hi[d] % 2);
                }
            } else {
                for d in 0..3 {
                    lo[d] -= lo[d] % gridding_unit;
                    if hi[d] % gridding_unit != 0 {
                        hi[d] = (hi[d] / gridding_unit + 1) * gridding_unit;
                    }
                }
            }

            if blocking_factor != 0 {
                let coarse_block = 2 * blocking_factor;
                let nres = 1i64 << level;
                for d in 0..3 {
                    lo[d] -= lo[d] % coarse_block;
                    hi[d] += (nres - hi[d]) % coarse_block;
                }
            }

            if lo[0] >= hi[0]
                || lo[1] >= hi[1]
                || lo[2] >= hi[2]
                || lo.iter().any(|&v| v < 0)
            {
                return Err(GridError::DegenerateBox {
                    level,
                    il: lo[0],
                    ir: hi[0],
                    jl: lo[1],
                    jr: hi[1],
                    kl: lo[2],
                    kr: hi[2],
                });
            }

            geo.absoffsets[l] = lo;
            geo.len[l] = [hi[0] - lo[0], hi[1] - lo[1], hi[2] - lo[2]];

            if blocking_factor != 0 {
                for d in 0..3 {
                    geo.len[l][d] += geo.len[l][d] % blocking_factor;
                }
            }

            if cfg.equal_extent {
                let nmax = *geo.len[l].iter().max().unwrap();
                for d in 0..3 {
                    let dx = ((nmax - geo.len[l][d]) as f64 * 0.5) as i64;
                    geo.absoffsets[l][d] -= dx;
                    geo.len[l][d] = nmax;
                }
                for d in 0..3 {
                    lo[d] = geo.absoffsets[l][d];
                    hi[d] = lo[d] + nmax;
                }
            }
        }

        // relative offsets from the (possibly re-aligned) absolute ones,
        // then a forward sweep so both stay exactly consistent
        for level in (levelmin + 1..=levelmax).rev() {
            let l = level as usize;
            for d in 0..3 {
                geo.offsets[l][d] = geo.absoffsets[l][d] / 2 - geo.absoffsets[l - 1][d];
            }
        }
        for level in levelmin + 1..=levelmax {
            let l = level as usize;
            for d in 0..3 {
                geo.absoffsets[l][d] = 2 * geo.absoffsets[l - 1][d] + 2 * geo.offsets[l][d];
            }
        }

        for level in levelmin + 1..=levelmax {
            let l = level as usize;
            let h = 1.0 / (1u64 << level) as f64;
            for d in 0..3 {
                geo.x0[l][d] = h * geo.absoffsets[l][d] as f64;
                geo.xl[l][d] = h * geo.len[l][d] as f64;
            }
        }

        // no zoom patch may span more than half the box at its level
        for level in levelmin + 1..=levelmax {
            let l = level as usize;
            let half = 1i64 << (level - 1);
            if geo.len[l].iter().any(|&n| n > half) {
                return Err(GridError::PatchTooLarge {
                    level,
                    nx: geo.len[l][0],
                    ny: geo.len[l][1],
                    nz: geo.len[l][2],
                    half,
                });
            }
        }

        // tell the region generator what was actually realized
        let left = [
            geo.x0[lmax][0] + rshift[0],
            geo.x0[lmax][1] + rshift[1],
            geo.x0[lmax][2] + rshift[2],
        ];
        let right = [
            left[0] + geo.xl[lmax][0],
            left[1] + geo.xl[lmax][1],
            left[2] + geo.xl[lmax][2],
        ];
        region.update_aabb(left, right);

        Ok(geo)
    }

    #[inline]
    pub fn levelmin(&self) -> u32 {
        self.levelmin
    }

    #[inline]
    pub fn levelmax(&self) -> u32 {
        self.levelmax
    }

    /// Level at which the convolution pass starts; at least `levelmin`.
    #[inline]
    pub fn levelmin_tf(&self) -> u32 {
        self.levelmin_tf
    }

    /// Absolute offset in level-native cells.
    #[inline]
    pub fn offset_abs(&self, level: u32, dim: usize) -> i64 {
        self.absoffsets[level as usize][dim]
    }

    /// Offset relative to the parent level, in parent cells.
    #[inline]
    pub fn offset(&self, level: u32, dim: usize) -> i64 {
        self.offsets[level as usize][dim]
    }

    #[inline]
    pub fn size(&self, level: u32, dim: usize) -> i64 {
        self.len[level as usize][dim]
    }

    /// Domain shift in coarse cells.
    #[inline]
    pub fn get_shift(&self, dim: usize) -> i64 {
        self.xshift[dim]
    }

    /// Domain shift in box units (the inverse of the cell shift).
    #[inline]
    pub fn get_coord_shift(&self) -> [f64; 3] {
        self.rshift
    }

    /// Convolution margin in fine cells; zero or negative selects double
    /// padding.
    #[inline]
    pub fn get_margin(&self) -> i32 {
        self.margin
    }

    #[inline]
    pub fn get_padding(&self) -> u32 {
        self.padding
    }

    /// Patch origin in box units.
    pub fn origin(&self, level: u32) -> [f64; 3] {
        self.x0[level as usize]
    }

    /// Patch extent in box units.
    pub fn extent(&self, level: u32) -> [f64; 3] {
        self.xl[level as usize]
    }

    /// Resize one level in place, keeping parent and child offsets
    /// consistent. Extents in level cells, offsets absolute.
    pub fn adjust_level(
        &mut self,
        level: u32,
        extent: (usize, usize, usize),
        abs_offset: [i64; 3],
    ) {
        let l = level as usize;
        let h = 1.0 / (1u64 << level) as f64;
        let d = [
            self.absoffsets[l][0] - abs_offset[0],
            self.absoffsets[l][1] - abs_offset[1],
            self.absoffsets[l][2] - abs_offset[2],
        ];
        let n = [extent.0 as i64, extent.1 as i64, extent.2 as i64];
        for dim in 0..3 {
            self.offsets[l][dim] -= d[dim] / 2;
            self.absoffsets[l][dim] = abs_offset[dim];
            self.len[l][dim] = n[dim];
            self.x0[l][dim] = h * abs_offset[dim] as f64;
            self.xl[l][dim] = h * n[dim] as f64;
        }
        if level < self.levelmax {
            for dim in 0..3 {
                self.offsets[l + 1][dim] += d[dim];
            }
        }
        self.find_new_levelmin();
    }

    /// Recompute the base level as the finest full-domain level.
    pub fn find_new_levelmin(&mut self) {
        let old = self.levelmin;
        for level in 0..=self.levelmax {
            let n = 1i64 << level;
            let l = level as usize;
            if self.absoffsets[l] == [0, 0, 0] && self.len[l] == [n, n, n] {
                self.levelmin = level;
            }
        }
        if old != self.levelmin {
            info!("refinement geometry: new levelmin {}", self.levelmin);
        }
    }

    /// Dump the level structure through the logger.
    pub fn log_structure(&self) {
        if self.xshift != [0, 0, 0] {
            info!(
                "domain shifted by ({}, {}, {}) coarse cells",
                self.xshift[0], self.xshift[1], self.xshift[2]
            );
        }
        for level in self.levelmin..=self.levelmax {
            let l = level as usize;
            info!(
                "level {:3}: offset = {:?}, offset_abs = {:?}, size = {:?}",
                level, self.offsets[l], self.absoffsets[l], self.len[l]
            );
        }
    }
}
