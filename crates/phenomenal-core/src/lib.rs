//! Core data model for phenomenal-rs.
//!
//! This crate provides the types shared by every pipeline stage:
//! - [`VoxelGrid`] occupancy sets on a [`LatticeFrame`], and bounded
//!   [`VoxelLattice`] candidate spaces for carving
//! - the [`Projection`] capability and a fitted [`CameraCalibration`]
//! - [`BinaryImage`] silhouettes grouped into a validated [`MultiViewInput`]
//! - [`Skeleton`] segment arenas and their labeled / analyzed wrappers
//! - per-stage options and the segmentation [`store`]

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Builder patterns return Self which doesn't need must_use
#![allow(clippy::must_use_candidate)]
// Option names mirror their persisted JSON keys
#![allow(clippy::struct_field_names)]

pub mod calibration;
pub mod error;
pub mod lattice;
pub mod options;
pub mod segment;
pub mod silhouette;
pub mod store;
pub mod voxel_grid;

pub use calibration::{CameraCalibration, CameraKind, Projection};
pub use error::{PhenomenalError, Result};
pub use lattice::{LatticeFrame, VoxelIndex, VoxelLattice};
pub use options::{
    AnalysisOptions, CarvingOptions, Connectivity, GraphOptions, OrganOptions, PipelineOptions,
    ReductionOptions, SkeletonOptions,
};
pub use segment::{
    AnalyzedSegment, LabeledSegment, OrganLabel, PlantTraits, SegmentId, SegmentTraits, Skeleton,
    SkeletonSegment, VoxelSegmentation, VoxelSegmentationInfo,
};
pub use silhouette::{BinaryImage, MultiViewInput, SilhouetteSet, View, ViewAngle, ViewGroup};
pub use voxel_grid::VoxelGrid;

// Re-export glam types for convenience
pub use glam::{DVec2, DVec3};
