// src/mesh/mod.rs

pub mod grid;
pub mod hierarchy;
pub mod mask;

pub use grid::PatchGrid;
pub use hierarchy::GridHierarchy;
pub use mask::{RefinementMask, MASK_LEAF, MASK_OUTSIDE, MASK_REFINED};
