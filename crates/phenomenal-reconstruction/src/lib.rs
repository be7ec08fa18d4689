//! Reconstruction stages of phenomenal-rs.
//!
//! - [`carving`]: multi-view voxel carving of a [`VoxelLattice`] into a
//!   [`VoxelGrid`], with optional octree refinement
//! - [`graph`]: the voxel adjacency [`VoxelGraph`]
//! - [`skeleton`]: shortest-path-tree skeletonization into a [`Skeleton`]
//! - [`reduction`]: visibility-based pruning of skeleton segments
//!
//! Enable the `parallel` feature to evaluate the per-voxel and per-view
//! tests on rayon's thread pool. Output is identical either way.
//!
//! [`VoxelLattice`]: phenomenal_core::VoxelLattice
//! [`VoxelGrid`]: phenomenal_core::VoxelGrid
//! [`Skeleton`]: phenomenal_core::Skeleton

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
// Lattice indices and pixel coordinates convert between i32, u32 and f64
#![allow(clippy::cast_precision_loss)]

pub mod carving;
pub mod graph;
mod parallel;
pub mod reduction;
pub mod skeleton;

pub use carving::{carve, carve_grid, reprojection_error, ViewError};
pub use graph::VoxelGraph;
pub use reduction::{reduce, visible_views};
pub use skeleton::{skeletonize, skeletonize_from};
