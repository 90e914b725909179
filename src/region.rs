// src/region.rs

use log::{info, warn};

use crate::config::RegionConfig;
use crate::error::GridError;

/// Query interface for the region of interest driving refinement.
///
/// Implementations describe a (possibly periodically wrapped) volume in
/// `[0,1)^3` box units; the geometry solver only sees this interface and
/// receives the generator explicitly, it never reaches for shared state.
pub trait RegionGenerator: Send + Sync {
    /// Axis-aligned bounding box of the region at a given level,
    /// as `(left, right)` corners. `right - left` may wrap the domain.
    fn get_aabb(&self, level: u32) -> ([f64; 3], [f64; 3]);

    /// Whether a point (box units) intersects the region.
    fn query_point(&self, x: &[f64; 3], level: u32) -> bool;

    /// Exact cell dimensions at the finest level, when the region forces
    /// them instead of deriving them from an extent.
    fn is_grid_dim_forced(&self) -> Option<[i64; 3]>;

    /// Region center in box units.
    fn get_center(&self) -> [f64; 3];

    /// Feedback from the geometry solver: the bounding box the grids
    /// actually realize, so subsequent queries agree with the layout.
    fn update_aabb(&mut self, left: [f64; 3], right: [f64; 3]);
}

/// Rectangular region, optionally periodically wrapped.
#[derive(Debug)]
pub struct BoxRegion {
    x0ref: [f64; 3],
    lxref: [f64; 3],
    xcref: [f64; 3],
    lnref: [i64; 3],
    have_nref: bool,
    do_extra_padding: bool,
    padding: u32,
    padding_fine: f64,
}

impl BoxRegion {
    pub fn new(cfg: &RegionConfig, levelmin: u32, levelmax: u32, padding: u32) -> Result<Self, GridError> {
        if levelmin == levelmax {
            // unigrid: the whole domain is the region
            return Ok(Self {
                x0ref: [0.0; 3],
                lxref: [1.0; 3],
                xcref: [0.5; 3],
                lnref: [0; 3],
                have_nref: false,
                do_extra_padding: false,
                padding: 0,
                padding_fine: 0.0,
            });
        }

        if cfg.ref_offset.is_none() && cfg.ref_center.is_none() {
            return Err(GridError::ConfigConflict(
                "levelmin != levelmax but neither ref_offset nor ref_center given".into(),
            ));
        }
        if cfg.ref_extent.is_none() && cfg.ref_dims.is_none() {
            return Err(GridError::ConfigConflict(
                "levelmin != levelmax but neither ref_extent nor ref_dims given".into(),
            ));
        }

        let (lxref, lnref, have_nref) = if let Some(ext) = cfg.ref_extent {
            (ext, [0; 3], false)
        } else {
            let nd = cfg.ref_dims.unwrap();
            let h = 1.0 / (1u64 << levelmax) as f64;
            (
                [nd[0] as f64 * h, nd[1] as f64 * h, nd[2] as f64 * h],
                nd,
                true,
            )
        };

        let (x0ref, xcref) = if let Some(xc) = cfg.ref_center {
            let x0 = [
                (xc[0] - 0.5 * lxref[0] + 1.0).rem_euclid(1.0),
                (xc[1] - 0.5 * lxref[1] + 1.0).rem_euclid(1.0),
                (xc[2] - 0.5 * lxref[2] + 1.0).rem_euclid(1.0),
            ];
            (x0, xc)
        } else {
            let x0 = cfg.ref_offset.unwrap();
            let xc = [
                (x0[0] + 0.5 * lxref[0]).rem_euclid(1.0),
                (x0[1] + 0.5 * lxref[1]).rem_euclid(1.0),
                (x0[2] + 0.5 * lxref[2]).rem_euclid(1.0),
            ];
            (x0, xc)
        };

        let do_extra_padding = cfg.extra_fine_padding;
        let padding_fine = if do_extra_padding {
            (padding + 1) as f64 / (1u64 << levelmax) as f64
        } else {
            0.0
        };

        Ok(Self {
            x0ref,
            lxref,
            xcref,
            lnref,
            have_nref,
            do_extra_padding,
            padding,
            padding_fine,
        })
    }
}

impl RegionGenerator for BoxRegion {
    fn get_aabb(&self, level: u32) -> ([f64; 3], [f64; 3]) {
        let pad = if self.do_extra_padding {
            (self.padding + 1) as f64 / (1u64 << level) as f64
        } else {
            0.0
        };
        let mut left = [0.0; 3];
        let mut right = [0.0; 3];
        for d in 0..3 {
            left[d] = self.x0ref[d] - pad;
            right[d] = self.x0ref[d] + self.lxref[d] + pad;
        }
        (left, right)
    }

    fn query_point(&self, x: &[f64; 3], _level: u32) -> bool {
        // the grids already realize the AABB exactly; only the shrunk
        // variant has to re-check point membership
        if !self.do_extra_padding {
            return true;
        }
        let mut check = true;
        for d in 0..3 {
            let mut dx = x[d] - self.x0ref[d];
            if dx < -0.5 {
                dx += 1.0;
            } else if dx > 0.5 {
                dx -= 1.0;
            }
            check &= dx >= self.padding_fine && dx <= self.lxref[d] - self.padding_fine;
        }
        check
    }

    fn is_grid_dim_forced(&self) -> Option<[i64; 3]> {
        if self.have_nref {
            Some(self.lnref)
        } else {
            None
        }
    }

    fn get_center(&self) -> [f64; 3] {
        self.xcref
    }

    fn update_aabb(&mut self, left: [f64; 3], right: [f64; 3]) {
        for d in 0..3 {
            let mut dx = right[d] - left[d];
            if dx < -0.5 {
                dx += 1.0;
            } else if dx > 0.5 {
                dx -= 1.0;
            }
            self.x0ref[d] = left[d];
            self.lxref[d] = dx;
            self.xcref[d] = left[d] + 0.5 * dx;
        }
    }
}

/// Names of the available region generator variants.
pub fn available_regions() -> &'static [&'static str] {
    &["box"]
}

/// Instantiate a region generator by its configured name.
pub fn select_region_generator(
    cfg: &RegionConfig,
    levelmin: u32,
    levelmax: u32,
    padding: u32,
) -> Result<Box<dyn RegionGenerator>, GridError> {
    match cfg.region.as_str() {
        "box" => {
            info!("selecting region generator 'box'");
            Ok(Box::new(BoxRegion::new(cfg, levelmin, levelmax, padding)?))
        }
        other => {
            warn!(
                "unknown region generator '{}', available: {:?}",
                other,
                available_regions()
            );
            Err(GridError::UnknownRegion(other.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_cfg(center: [f64; 3], extent: [f64; 3]) -> RegionConfig {
        RegionConfig {
            ref_center: Some(center),
            ref_extent: Some(extent),
            ..Default::default()
        }
    }

    #[test]
    fn center_and_extent_define_the_aabb() {
        let r = BoxRegion::new(&box_cfg([0.5, 0.5, 0.5], [0.2, 0.2, 0.2]), 6, 8, 4).unwrap();
        let (left, right) = r.get_aabb(8);
        for d in 0..3 {
            assert!((left[d] - 0.4).abs() < 1e-12);
            assert!((right[d] - 0.6).abs() < 1e-12);
        }
        assert!(r.is_grid_dim_forced().is_none());
    }

    #[test]
    fn forced_dims_imply_extent() {
        let cfg = RegionConfig {
            ref_center: Some([0.5, 0.5, 0.5]),
            ref_dims: Some([16, 16, 32]),
            ..Default::default()
        };
        let r = BoxRegion::new(&cfg, 6, 8, 4).unwrap();
        assert_eq!(r.is_grid_dim_forced(), Some([16, 16, 32]));
        let (left, right) = r.get_aabb(8);
        assert!((right[2] - left[2] - 32.0 / 256.0).abs() < 1e-12);
    }

    #[test]
    fn missing_anchor_or_extent_is_a_config_error() {
        let cfg = RegionConfig::default();
        assert!(matches!(
            BoxRegion::new(&cfg, 6, 8, 4),
            Err(GridError::ConfigConflict(_))
        ));
        let cfg = RegionConfig {
            ref_center: Some([0.5; 3]),
            ..Default::default()
        };
        assert!(matches!(
            BoxRegion::new(&cfg, 6, 8, 4),
            Err(GridError::ConfigConflict(_))
        ));
    }

    #[test]
    fn unknown_region_name_is_rejected() {
        let cfg = RegionConfig {
            region: "ellipsoid".into(),
            ..Default::default()
        };
        assert!(matches!(
            select_region_generator(&cfg, 6, 8, 4),
            Err(GridError::UnknownRegion(_))
        ));
    }

    #[test]
    fn every_available_region_is_selectable() {
        for name in available_regions() {
            let cfg = RegionConfig {
                region: name.to_string(),
                ref_center: Some([0.5; 3]),
                ref_extent: Some([0.2; 3]),
                ..Default::default()
            };
            assert!(
                select_region_generator(&cfg, 6, 8, 4).is_ok(),
                "variant '{name}' failed to instantiate"
            );
        }
    }

    #[test]
    fn update_aabb_feeds_back_into_queries() {
        let mut r = BoxRegion::new(&box_cfg([0.5, 0.5, 0.5], [0.2, 0.2, 0.2]), 6, 8, 4).unwrap();
        r.update_aabb([0.3, 0.3, 0.3], [0.7, 0.7, 0.7]);
        let (left, right) = r.get_aabb(8);
        assert!((left[0] - 0.3).abs() < 1e-12);
        assert!((right[0] - 0.7).abs() < 1e-12);
        assert!((r.get_center()[0] - 0.5).abs() < 1e-12);
    }
}
