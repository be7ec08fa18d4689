//! Runs every stage in order.

use phenomenal_core::{
    MultiViewInput, PipelineOptions, Result, Skeleton, VoxelGrid, VoxelLattice, VoxelSegmentation,
    VoxelSegmentationInfo,
};
use phenomenal_reconstruction::{carve, reduce, skeletonize, VoxelGraph};
use phenomenal_segmentation::{analyze, segment_organs};

/// Every intermediate structure produced by one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub grid: VoxelGrid,
    pub graph: VoxelGraph,
    pub skeleton: Skeleton,
    /// The skeleton after visibility-based reduction.
    pub reduced: Skeleton,
    pub segmentation: VoxelSegmentation,
    pub info: VoxelSegmentationInfo,
}

/// A validated configuration for the full reconstruction pipeline.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    options: PipelineOptions,
}

impl Pipeline {
    /// Creates a pipeline, rejecting out-of-range options.
    pub fn new(options: PipelineOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    /// Returns the options the pipeline runs with.
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Carves `lattice` against `views`, then runs the remaining stages.
    ///
    /// An empty carving result is not an error: every later stage yields an
    /// empty structure.
    pub fn run(&self, lattice: &VoxelLattice, views: &MultiViewInput) -> Result<PipelineOutput> {
        let grid = carve(lattice, views, &self.options.carving)?;
        self.run_grid(grid, views)
    }

    /// Runs every stage after carving on an existing voxel grid.
    pub fn run_grid(&self, grid: VoxelGrid, views: &MultiViewInput) -> Result<PipelineOutput> {
        let o = &self.options;
        let graph = VoxelGraph::build(&grid, &o.graph);
        let skeleton = skeletonize(&grid, &graph, &o.skeleton);
        let reduced = reduce(&skeleton, views, &o.reduction)?;
        let segmentation = segment_organs(&reduced, &o.organs);
        let info = analyze(&segmentation, &o.analysis);
        if info.is_empty() {
            log::warn!("pipeline: reconstruction produced no segment");
        }
        Ok(PipelineOutput {
            grid,
            graph,
            skeleton,
            reduced,
            segmentation,
            info,
        })
    }
}
