// src/error.rs

use thiserror::Error;

/// Errors raised by the grid-hierarchy engine.
///
/// All variants are fatal: they indicate either an invalid configuration or
/// an internal invariant violation. The core has no I/O and no external
/// services, so there are no transient-failure or retry paths; a `GridError`
/// must abort the run.
#[derive(Debug, Error)]
pub enum GridError {
    /// The refinement bounding box became degenerate while solving the
    /// per-level geometry.
    #[error(
        "degenerate refinement bounding box on level {level}: [{il},{ir}]x[{jl},{jr}]x[{kl},{kr}]"
    )]
    DegenerateBox {
        level: u32,
        il: i64,
        ir: i64,
        jl: i64,
        jr: i64,
        kl: i64,
        kr: i64,
    },

    /// A refinement patch may not span more than half the domain at its level.
    #[error("on level {level}, subgrid extent ({nx},{ny},{nz}) exceeds half the box ({half} cells)")]
    PatchTooLarge {
        level: u32,
        nx: i64,
        ny: i64,
        nz: i64,
        half: i64,
    },

    /// Forced grid dimensions cannot be reconciled with the requested alignment.
    #[error("alignment conflict: {0}")]
    AlignmentConflict(String),

    /// Mutually incompatible configuration values.
    #[error("configuration conflict: {0}")]
    ConfigConflict(String),

    #[error("unknown region generator '{0}'")]
    UnknownRegion(String),

    #[error("attempt to access level {level} but maximum level is {levelmax}")]
    NoSuchLevel { level: u32, levelmax: u32 },

    /// Elementwise operation between grids of incompatible shape.
    #[error("{op}: incompatible grid shapes {lhs:?} vs {rhs:?}")]
    ShapeMismatch {
        op: &'static str,
        lhs: (usize, usize, usize),
        rhs: (usize, usize, usize),
    },

    /// Patch repositioning must stay aligned to the factor-of-2 refinement.
    #[error("cut_patch on level {level}: offset shift ({dx},{dy},{dz}) is not even")]
    OddPatchShift { level: u32, dx: i64, dy: i64, dz: i64 },

    /// A coarse block needed for splicing reaches outside the source grid.
    #[error("splice source block [{lo:?},{hi:?}) not contained in coarse grid")]
    SpliceOutOfBounds { lo: [i64; 3], hi: [i64; 3] },

    /// Leaf-cell bookkeeping disagrees with the refinement mask.
    #[error("leaf cell count mismatch: mask says {from_mask}, hierarchy says {from_grids}")]
    LeafCountMismatch {
        from_mask: usize,
        from_grids: usize,
    },
}
