//! phenomenal-rs: 3D plant reconstruction and organ segmentation.
//!
//! A plant is carved into voxels from calibrated binary silhouettes, the
//! voxels are skeletonized, skeleton segments that too few views support are
//! merged away, and the remaining segments are labeled as organs and
//! measured.
//!
//! # Quick Start
//!
//! ```no_run
//! use phenomenal::*;
//!
//! fn main() -> Result<()> {
//!     init_logging();
//!
//!     let camera = CameraCalibration::from_json_file("side_calibration.json")?;
//!     let mut silhouettes = SilhouetteSet::new();
//!     for angle in [0.0, 30.0, 60.0, 90.0] {
//!         silhouettes.insert(angle, BinaryImage::new(2454, 2056));
//!     }
//!     let views = MultiViewInput::single("side", std::sync::Arc::new(camera), silhouettes)?;
//!
//!     let lattice = VoxelLattice::enclosing(
//!         DVec3::new(-500.0, -500.0, -100.0),
//!         DVec3::new(500.0, 500.0, 1500.0),
//!         8.0,
//!     )?;
//!     let output = Pipeline::new(PipelineOptions::default())?.run(&lattice, &views)?;
//!     write_segmentation_info("plant.json.gz", &output.info)?;
//!     Ok(())
//! }
//! ```
//!
//! # Stages
//!
//! - [`carve`] - multi-view voxel carving into a [`VoxelGrid`]
//! - [`VoxelGraph::build`] - voxel adjacency graph
//! - [`skeletonize`] - shortest-path-tree skeleton
//! - [`reduce`] - visibility-based segment reduction
//! - [`segment_organs`] - stem / mature leaf / growing leaf labeling
//! - [`analyze`] - per-organ and whole-plant traits
//!
//! [`Pipeline`] runs them in order with one [`PipelineOptions`].

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

mod pipeline;

pub use phenomenal_core::{
    calibration::{CameraCalibration, CameraKind, Projection},
    error::{PhenomenalError, Result},
    lattice::{LatticeFrame, VoxelIndex, VoxelLattice},
    options::{
        AnalysisOptions, CarvingOptions, Connectivity, GraphOptions, OrganOptions,
        PipelineOptions, ReductionOptions, SkeletonOptions,
    },
    segment::{
        AnalyzedSegment, LabeledSegment, OrganLabel, PlantTraits, SegmentId, SegmentTraits,
        Skeleton, SkeletonSegment, VoxelSegmentation, VoxelSegmentationInfo,
    },
    silhouette::{BinaryImage, MultiViewInput, SilhouetteSet, View, ViewGroup},
    store::{
        read_labeled_voxels, read_segmentation, read_segmentation_info, read_voxel_grid,
        write_labeled_voxels, write_segmentation, write_segmentation_info, write_voxel_grid,
        LabeledVoxels, ARCHIVE_EXTENSION,
    },
    voxel_grid::VoxelGrid,
    DVec2, DVec3,
};
pub use phenomenal_core::store;
pub use phenomenal_reconstruction::{
    carve, carve_grid, reduce, reprojection_error, skeletonize, skeletonize_from, visible_views,
    ViewError, VoxelGraph,
};
pub use phenomenal_segmentation::{analyze, segment_organs};

pub use pipeline::{Pipeline, PipelineOutput};

/// Initializes `env_logger` once; later calls are no-ops.
///
/// Log levels follow `RUST_LOG`, e.g. `RUST_LOG=phenomenal_reconstruction=debug`.
pub fn init_logging() {
    let _ = env_logger::try_init();
}
