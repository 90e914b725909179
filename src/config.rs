// src/config.rs

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Layout parameters for the refinement geometry solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Base level; the domain is `2^levelmin` cells across.
    pub levelmin: u32,
    /// Finest refinement level.
    pub levelmax: u32,
    /// Level at which transfer-function convolution starts; defaults to
    /// `levelmin` when `None`.
    pub levelmin_tf: Option<u32>,
    /// Snap every refinement patch to the cell edges of the base level.
    pub align_top: bool,
    /// Keep forced grid dimensions intact while aligning (parity snap
    /// signed by the domain shift).
    pub preserve_dims: bool,
    /// Pad every refinement patch to a cube.
    pub equal_extent: bool,
    /// Offsets and extents become multiples of this factor; 0 disables.
    pub blocking_factor: u32,
    /// Granularity of patch boundaries in cells; must be even.
    pub gridding_unit: u32,
    /// Coarse-cell buffer added around each intermediate level.
    pub padding: u32,
    /// Convolution margin of the padded working grids, in fine cells;
    /// zero or negative selects double padding (half the patch extent).
    pub margin: i32,
    /// Suppress the automatic re-centering shift of the domain.
    pub no_shift: bool,
    /// Apply the re-centering shift even when `no_shift` is set.
    pub force_shift: bool,
    /// Congruence unit of the noise tiling; the domain shift is restricted
    /// to multiples of a compatible cell count.
    pub random_base_unit: i64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            levelmin: 7,
            levelmax: 7,
            levelmin_tf: None,
            align_top: false,
            preserve_dims: false,
            equal_extent: false,
            blocking_factor: 0,
            gridding_unit: 2,
            padding: 8,
            margin: 4,
            no_shift: false,
            force_shift: false,
            random_base_unit: 1,
        }
    }
}

/// Parameters of the region of interest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Region generator variant; `"box"` is the only built-in today.
    pub region: String,
    /// Lower corner of the box in `[0,1)` box units.
    pub ref_offset: Option<[f64; 3]>,
    /// Center of the box; alternative to `ref_offset`.
    pub ref_center: Option<[f64; 3]>,
    /// Extent of the box in box units.
    pub ref_extent: Option<[f64; 3]>,
    /// Exact cell dimensions at `levelmax`; alternative to `ref_extent`.
    pub ref_dims: Option<[i64; 3]>,
    /// Shrink the queried region by one padding unit of fine cells, for
    /// consumers that cannot tolerate region cells near the patch edge.
    pub extra_fine_padding: bool,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            region: "box".to_string(),
            ref_offset: None,
            ref_center: None,
            ref_extent: None,
            ref_dims: None,
            extra_fine_padding: false,
        }
    }
}

/// Options for the density synthesis pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DensityConfig {
    /// Force unit modulus on the white-noise modes before convolution.
    pub fix_mode_amplitude: bool,
    /// Negate all mode amplitudes (paired-simulation variance tests).
    pub flip_mode_amplitude: bool,
    /// Blend refinement patches against their parent in Fourier space;
    /// disabling falls back to straight-injection averaging.
    pub fourier_splicing: bool,
    /// Stagger the convolved field by half a cell.
    pub shift_field: bool,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            fix_mode_amplitude: false,
            flip_mode_amplitude: false,
            fourier_splicing: true,
            shift_field: false,
        }
    }
}

/// Full run description, serialized next to outputs for provenance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub geometry: GeometryConfig,
    pub region: RegionConfig,
    pub density: DensityConfig,
    pub seed: u64,
}

impl RunConfig {
    pub fn write_to_dir(&self, out_dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(out_dir)?;
        let path = out_dir.join("run_config.json");
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let cfg = RunConfig::default();
        let s = serde_json::to_string(&cfg).unwrap();
        let back: RunConfig = serde_json::from_str(&s).unwrap();
        assert_eq!(back.geometry.levelmin, cfg.geometry.levelmin);
        assert_eq!(back.geometry.padding, 8);
        assert_eq!(back.region.region, "box");
        assert!(back.density.fourier_splicing);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: RunConfig =
            serde_json::from_str(r#"{"geometry":{"levelmin":5,"levelmax":7}}"#).unwrap();
        assert_eq!(cfg.geometry.levelmin, 5);
        assert_eq!(cfg.geometry.levelmax, 7);
        assert_eq!(cfg.geometry.gridding_unit, 2);
        assert!(!cfg.density.flip_mode_amplitude);
    }
}
