// src/density.rs

use std::time::Instant;

use log::{info, warn};

use crate::config::DensityConfig;
use crate::coupling::{fft_coarsen, fft_interpolate};
use crate::error::GridError;
use crate::geometry::RefinementGeometry;
use crate::mesh::{GridHierarchy, PatchGrid};
use crate::noise::NoiseSource;
use crate::noise_grid::{NoiseGrid, PaddedNoiseGrid};
use crate::transfer::{ConvolveOptions, SpectralKernel, TransferFunction};

fn convolve_options(cfg: &DensityConfig) -> ConvolveOptions {
    ConvolveOptions {
        shift: cfg.shift_field,
        fix_amplitude: cfg.fix_mode_amplitude,
        flip_amplitude: cfg.flip_mode_amplitude,
    }
}

/// Synthesize the density field for a setup without refinement levels.
///
/// The field is computed on the full-domain grid at `levelmin_tf`,
/// coarsened down to `levelmin` if the two differ, and normalized to zero
/// mean on the base grid.
pub fn generate_density_unigrid(
    cfg: &DensityConfig,
    geom: &RefinementGeometry,
    tf: &dyn TransferFunction,
    noise: &dyn NoiseSource,
    delta: &mut GridHierarchy,
) -> Result<(), GridError> {
    let t0 = Instant::now();
    let levelmin = geom.levelmin();
    let levelmin_tf = geom.levelmin_tf();
    info!("generating unigrid density at level {}", levelmin_tf);

    let opts = convolve_options(cfg);
    let nbase = 1usize << levelmin_tf;
    let mut top = NoiseGrid::new(nbase);
    top.fill_noise(noise, levelmin_tf);
    let top_dims = top.dims();
    SpectralKernel::fetch(tf, levelmin_tf, false).convolve(top.data_mut(), top_dims, &opts);

    delta.create_base_hierarchy(levelmin_tf);
    top.copy_to(delta.get_grid_mut(levelmin_tf)?)?;

    for level in (levelmin.max(1)..=levelmin_tf).rev() {
        let (fine, coarse) = delta.get_grid_with_parent_mut(level)?;
        fft_coarsen(fine, coarse)?;
    }
    delta.find_new_levelmin();

    normalize_density(delta)?;
    info!(
        "unigrid density took {:.3} s",
        t0.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Synthesize the density field for a zoom setup.
///
/// Levels are processed coarse to fine: each level's padded working grid
/// is filled from the noise source, convolved with the level kernel, and
/// Fourier-spliced against the level below so that long modes carry over
/// while the fine grid contributes only what the coarse one cannot
/// resolve. The hierarchy is then reconciled with the geometry and
/// normalized.
pub fn generate_density_hierarchy(
    cfg: &DensityConfig,
    geom: &RefinementGeometry,
    tf: &dyn TransferFunction,
    noise: &dyn NoiseSource,
    delta: &mut GridHierarchy,
) -> Result<(), GridError> {
    let t0 = Instant::now();
    let levelmin = geom.levelmin();
    let levelmax = geom.levelmax();
    let levelmin_tf = geom.levelmin_tf();

    if levelmax == levelmin {
        return generate_density_unigrid(cfg, geom, tf, noise, delta);
    }
    if cfg.fix_mode_amplitude {
        warn!("amplitude fixing is meant for unigrid runs, not zoom setups");
    }

    let opts = convolve_options(cfg);

    let nbase = 1usize << levelmin_tf;
    let mut top = NoiseGrid::new(nbase);
    top.fill_noise(noise, levelmin_tf);
    let top_dims = top.dims();
    SpectralKernel::fetch(tf, levelmin_tf, false).convolve(top.data_mut(), top_dims, &opts);

    delta.create_base_hierarchy(levelmin_tf);
    top.copy_to(delta.get_grid_mut(levelmin_tf)?)?;

    // absolute offset of the current coarse working grid, in its own cells
    let mut coarse_abs = [0i64; 3];
    let mut prev: Option<PaddedNoiseGrid> = None;

    for level in levelmin_tf + 1..=levelmax {
        let extent = (
            geom.size(level, 0) as usize,
            geom.size(level, 1) as usize,
            geom.size(level, 2) as usize,
        );
        let abs_off = [
            geom.offset_abs(level, 0),
            geom.offset_abs(level, 1),
            geom.offset_abs(level, 2),
        ];
        // offset relative to the working grid below, which may be the
        // full-domain base rather than the geometric parent patch
        let rel_off = [
            abs_off[0] / 2 - coarse_abs[0],
            abs_off[1] / 2 - coarse_abs[1],
            abs_off[2] / 2 - coarse_abs[2],
        ];
        info!(
            "level {}: patch {:?} at {:?} (margin {})",
            level,
            extent,
            abs_off,
            geom.get_margin()
        );

        let mut fine = PaddedNoiseGrid::new(rel_off, extent, geom.get_margin());
        fine.fill_noise(noise, level, abs_off);
        let fine_dims = fine.padded_dims();
        SpectralKernel::fetch(tf, level, true).convolve(fine.data_mut(), fine_dims, &opts);

        if cfg.fourier_splicing {
            match &prev {
                None => fft_interpolate(&top, &mut fine)?,
                Some(coarse) => fft_interpolate(coarse, &mut fine)?,
            }
        }

        delta.add_patch(rel_off, extent);
        fine.copy_unpad(delta.get_grid_mut(level)?)?;

        coarse_abs = abs_off;
        prev = Some(fine);
    }

    coarsen_density(geom, delta, cfg.fourier_splicing)?;
    normalize_density(delta)?;

    info!(
        "density hierarchy took {:.3} s",
        t0.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Average each 2x2x2 fine block into the parent cell it covers.
fn restrict_straight(fine: &PatchGrid, coarse: &mut PatchGrid) {
    let (nxf, nyf, nzf) = fine.extents();
    let off = [fine.offset(0), fine.offset(1), fine.offset(2)];
    for i in 0..(nxf / 2) as i64 {
        for j in 0..(nyf / 2) as i64 {
            for k in 0..(nzf / 2) as i64 {
                let mut sum = 0.0;
                for di in 0..2 {
                    for dj in 0..2 {
                        for dk in 0..2 {
                            sum += fine.get(2 * i + di, 2 * j + dj, 2 * k + dk);
                        }
                    }
                }
                coarse.set(i + off[0], j + off[1], k + off[2], 0.125 * sum);
            }
        }
    }
}

/// Bring the hierarchy into agreement with the geometry.
///
/// Coarse levels are refilled from the finer data (spectrally when
/// `fourier` is set, by 8-cell averaging otherwise) and every level whose
/// extents or offsets disagree with the geometry is re-cut to match. In
/// the Fourier case the fine data is authoritative when re-cutting; in the
/// averaging case the coarse mean is enforced on the fine patch.
pub fn coarsen_density(
    geom: &RefinementGeometry,
    delta: &mut GridHierarchy,
    fourier: bool,
) -> Result<(), GridError> {
    let levelmin_tf = delta.level_min();

    if fourier {
        for level in (geom.levelmin().max(1)..=levelmin_tf).rev() {
            let (fine, coarse) = delta.get_grid_with_parent_mut(level)?;
            fft_coarsen(fine, coarse)?;
        }
    } else {
        for level in (1..=delta.level_max()).rev() {
            let (fine, coarse) = delta.get_grid_with_parent_mut(level)?;
            restrict_straight(fine, coarse);
        }
    }
    delta.find_new_levelmin();

    for level in 1..=geom.levelmax().min(delta.level_max()) {
        let want = (
            geom.size(level, 0) as usize,
            geom.size(level, 1) as usize,
            geom.size(level, 2) as usize,
        );
        let want_abs = [
            geom.offset_abs(level, 0),
            geom.offset_abs(level, 1),
            geom.offset_abs(level, 2),
        ];
        let g = delta.get_grid(level)?;
        let have_abs = [
            delta.offset_abs(level, 0),
            delta.offset_abs(level, 1),
            delta.offset_abs(level, 2),
        ];
        if g.extents() != want || have_abs != want_abs {
            info!(
                "level {}: cutting patch {:?}@{:?} to {:?}@{:?}",
                level,
                g.extents(),
                have_abs,
                want,
                want_abs
            );
            delta.cut_patch(level, want_abs, want, !fourier)?;
        }
    }

    // averaging restriction leaks the patch means into the base grid;
    // recenter it so the domain stays at zero density contrast
    if !fourier {
        normalize_levelmin_density(delta)?;
    }
    Ok(())
}

/// Subtract the base-grid mean from all refinement levels.
pub fn normalize_density(delta: &mut GridHierarchy) -> Result<(), GridError> {
    let levelmin = delta.level_min();
    let mean = delta.get_grid(levelmin)?.mean();
    info!("subtracting density mean {:+e}", mean);
    for level in levelmin..=delta.level_max() {
        delta.get_grid_mut(level)?.add_scalar(-mean);
    }
    Ok(())
}

/// Subtract the base-grid mean from the base grid only.
pub fn normalize_levelmin_density(delta: &mut GridHierarchy) -> Result<(), GridError> {
    let levelmin = delta.level_min();
    let mean = delta.get_grid(levelmin)?.mean();
    delta.get_grid_mut(levelmin)?.add_scalar(-mean);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GeometryConfig, RegionConfig};
    use crate::noise::WhiteNoise;
    use crate::region::BoxRegion;
    use crate::transfer::IdentityTransfer;

    fn solve_geometry(cfg: &GeometryConfig, region: &RegionConfig) -> RefinementGeometry {
        let mut r = BoxRegion::new(region, cfg.levelmin, cfg.levelmax, cfg.padding).unwrap();
        RefinementGeometry::solve(cfg, &mut r).unwrap()
    }

    #[test]
    fn unigrid_density_is_normalized() {
        let gcfg = GeometryConfig {
            levelmin: 4,
            levelmax: 4,
            ..Default::default()
        };
        let geom = solve_geometry(&gcfg, &RegionConfig::default());
        let mut delta = GridHierarchy::new(4);
        generate_density_unigrid(
            &DensityConfig::default(),
            &geom,
            &IdentityTransfer,
            &WhiteNoise::new(1234),
            &mut delta,
        )
        .unwrap();
        assert_eq!(delta.level_min(), 4);
        assert_eq!(delta.count_leaf_cells(), 4096);
        assert!(delta.get_grid(4).unwrap().mean().abs() < 1e-12);
    }

    #[test]
    fn restriction_averages_blocks() {
        let mut fine = PatchGrid::new(0, 4, 4, 4, [1, 1, 1]);
        fine.fill(2.0);
        fine.set(0, 0, 0, 10.0);
        let mut coarse = PatchGrid::cubic(0, 8);
        restrict_straight(&fine, &mut coarse);
        assert!((coarse.get(1, 1, 1) - 3.0).abs() < 1e-12);
        assert!((coarse.get(2, 2, 2) - 2.0).abs() < 1e-12);
        assert_eq!(coarse.get(0, 0, 0), 0.0);
    }

    #[test]
    fn hierarchy_matches_geometry_layout() {
        let gcfg = GeometryConfig {
            levelmin: 4,
            levelmax: 5,
            padding: 2,
            margin: 4,
            ..Default::default()
        };
        let rcfg = RegionConfig {
            ref_center: Some([0.5, 0.5, 0.5]),
            ref_extent: Some([0.25, 0.25, 0.25]),
            ..Default::default()
        };
        let geom = solve_geometry(&gcfg, &rcfg);
        let mut delta = GridHierarchy::new(4);
        generate_density_hierarchy(
            &DensityConfig::default(),
            &geom,
            &IdentityTransfer,
            &WhiteNoise::new(99),
            &mut delta,
        )
        .unwrap();
        assert_eq!(delta.level_max(), 5);
        for d in 0..3 {
            assert_eq!(delta.size(5, d) as i64, geom.size(5, d));
            assert_eq!(delta.offset_abs(5, d), geom.offset_abs(5, d));
        }
        assert!(delta.get_grid(4).unwrap().mean().abs() < 1e-12);
    }

    #[test]
    fn averaging_coarsen_recenters_the_base_level() {
        let gcfg = GeometryConfig {
            levelmin: 4,
            levelmax: 5,
            padding: 2,
            ..Default::default()
        };
        let rcfg = RegionConfig {
            ref_center: Some([0.5, 0.5, 0.5]),
            ref_extent: Some([0.25, 0.25, 0.25]),
            ..Default::default()
        };
        let geom = solve_geometry(&gcfg, &rcfg);
        let mut delta = GridHierarchy::new(4);
        delta.create_base_hierarchy(4);
        delta.add_patch(
            [geom.offset(5, 0), geom.offset(5, 1), geom.offset(5, 2)],
            (
                geom.size(5, 0) as usize,
                geom.size(5, 1) as usize,
                geom.size(5, 2) as usize,
            ),
        );
        delta.get_grid_mut(4).unwrap().fill(1.5);
        delta.get_grid_mut(5).unwrap().fill(3.0);

        coarsen_density(&geom, &mut delta, false).unwrap();

        // restriction leaks the patch values into the base footprint; the
        // closing correction must bring the base grid back to zero mean
        // while leaving the patch untouched
        assert!(delta.get_grid(4).unwrap().mean().abs() < 1e-12);
        assert!((delta.get_grid(5).unwrap().get(0, 0, 0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn constant_noise_comes_out_exactly_flat() {
        // a spatially constant source is pure DC: every stage (convolution,
        // splicing, reconciliation) must carry it unchanged, and the final
        // normalization must cancel it on all levels
        struct Flat;
        impl NoiseSource for Flat {
            fn sample(&self, _level: u32, _i: i64, _j: i64, _k: i64) -> f64 {
                2.5
            }
        }
        let gcfg = GeometryConfig {
            levelmin: 4,
            levelmax: 6,
            padding: 2,
            margin: 4,
            ..Default::default()
        };
        let rcfg = RegionConfig {
            ref_center: Some([0.5, 0.5, 0.5]),
            ref_extent: Some([0.2, 0.2, 0.2]),
            ..Default::default()
        };
        let geom = solve_geometry(&gcfg, &rcfg);
        let mut delta = GridHierarchy::new(4);
        generate_density_hierarchy(
            &DensityConfig::default(),
            &geom,
            &IdentityTransfer,
            &Flat,
            &mut delta,
        )
        .unwrap();
        for level in delta.level_min()..=delta.level_max() {
            let g = delta.get_grid(level).unwrap();
            let (nx, ny, nz) = g.extents();
            for i in 0..nx as i64 {
                for j in 0..ny as i64 {
                    for k in 0..nz as i64 {
                        assert!(
                            g.get(i, j, k).abs() < 1e-8,
                            "level {level} cell ({i},{j},{k}) = {}",
                            g.get(i, j, k)
                        );
                    }
                }
            }
        }
    }
}
