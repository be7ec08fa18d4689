//! Configuration options for every pipeline stage.
//!
//! Options are plain serde structs. Distances expressed "in voxels" are
//! multiplied by the grid's voxel size at run time, so one configuration
//! works across resolutions.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PhenomenalError, Result};

/// Options for the whole reconstruction and segmentation pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Voxel carving.
    pub carving: CarvingOptions,
    /// Adjacency graph construction.
    pub graph: GraphOptions,
    /// Skeleton extraction.
    pub skeleton: SkeletonOptions,
    /// Visibility-based segment reduction.
    pub reduction: ReductionOptions,
    /// Organ labeling.
    pub organs: OrganOptions,
    /// Trait computation.
    pub analysis: AnalysisOptions,
}

impl PipelineOptions {
    /// Parses options from JSON; absent fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Reads options from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let options: Self = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        options.validate()?;
        Ok(options)
    }

    /// Checks every option against its accepted range.
    pub fn validate(&self) -> Result<()> {
        self.carving.validate()?;
        self.graph.validate()?;
        self.skeleton.validate()?;
        self.reduction.validate()?;
        self.organs.validate()?;
        self.analysis.validate()
    }
}

fn positive(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PhenomenalError::InvalidOption {
            name,
            reason: format!("{value} must be finite and > 0"),
        })
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(PhenomenalError::InvalidOption {
            name,
            reason: format!("{value} must be finite and >= 0"),
        })
    }
}

/// Voxel carving options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarvingOptions {
    /// Minimum number of agreeing silhouettes per view group, at least 1.
    /// Groups absent from the map require every one of their silhouettes.
    pub min_visible: BTreeMap<String, usize>,
    /// Number of octree levels tested before the per-voxel test (0 = flat).
    pub refinement_levels: u32,
}

impl CarvingOptions {
    /// Returns the number of agreeing silhouettes required in a group with
    /// `available` silhouettes.
    #[must_use]
    pub fn required_for(&self, group: &str, available: usize) -> usize {
        self.min_visible
            .get(group)
            .map_or(available, |&n| n.min(available))
    }

    /// Rejects groups that would require no agreeing silhouette at all.
    pub fn validate(&self) -> Result<()> {
        if let Some(group) = self.min_visible.iter().find(|(_, &n)| n == 0).map(|(g, _)| g) {
            return Err(PhenomenalError::InvalidOption {
                name: "carving.min_visible",
                reason: format!("group '{group}' must require at least 1 silhouette"),
            });
        }
        Ok(())
    }
}

/// Voxel neighborhood used when linking graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// Face neighbors.
    Six,
    /// Face and edge neighbors.
    Eighteen,
    /// Face, edge and corner neighbors.
    #[default]
    TwentySix,
}

/// Adjacency graph options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphOptions {
    /// Neighborhood linking adjacent voxels.
    pub connectivity: Connectivity,
    /// Also bridge gaps between disconnected pieces of the voxel set.
    pub connect_all_points: bool,
    /// Largest gap bridged by local linking, in voxels.
    pub gap_factor: f64,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::TwentySix,
            connect_all_points: false,
            gap_factor: 2.0,
        }
    }
}

impl GraphOptions {
    fn validate(&self) -> Result<()> {
        if self.gap_factor.is_finite() && self.gap_factor >= 1.0 {
            Ok(())
        } else {
            Err(PhenomenalError::InvalidOption {
                name: "graph.gap_factor",
                reason: format!("{} must be finite and >= 1", self.gap_factor),
            })
        }
    }
}

/// Skeleton extraction options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkeletonOptions {
    /// Geodesic radius around the skeleton within which voxels count as
    /// explained, in voxels.
    pub coverage_radius: f64,
    /// Shortest side branch kept as its own path, in voxels.
    pub min_branch_length: f64,
}

impl Default for SkeletonOptions {
    fn default() -> Self {
        Self {
            coverage_radius: 2.0,
            min_branch_length: 3.0,
        }
    }
}

impl SkeletonOptions {
    fn validate(&self) -> Result<()> {
        positive("skeleton.coverage_radius", self.coverage_radius)?;
        non_negative("skeleton.min_branch_length", self.min_branch_length)
    }
}

/// Segment reduction options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionOptions {
    /// Views that must corroborate a segment for it to be kept.
    pub required_visible: usize,
    /// Foreground pixels a view must show for it to corroborate a segment.
    pub nb_min_pixel: usize,
    /// Only count pixels not also covered by another segment's projection.
    pub exclusive_pixels: bool,
}

impl Default for ReductionOptions {
    fn default() -> Self {
        Self {
            required_visible: 4,
            nb_min_pixel: 100,
            exclusive_pixels: true,
        }
    }
}

impl ReductionOptions {
    fn validate(&self) -> Result<()> {
        if self.nb_min_pixel == 0 {
            return Err(PhenomenalError::InvalidOption {
                name: "reduction.nb_min_pixel",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Organ labeling options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganOptions {
    /// Largest angle from vertical for a segment to extend the main axis, in degrees.
    pub max_stem_inclination_deg: f64,
    /// Heights closer than this are equally long main-axis candidates, in voxels.
    pub tie_tolerance: f64,
    /// Shortest segment labeled as a leaf, in voxels.
    pub min_leaf_length: f64,
    /// Fraction of stem height below the apex where leaves are still growing.
    pub growing_zone_ratio: f64,
    /// Largest gap between successive mature insertions, as a fraction of stem height.
    pub max_internode_ratio: f64,
}

impl Default for OrganOptions {
    fn default() -> Self {
        Self {
            max_stem_inclination_deg: 45.0,
            tie_tolerance: 0.5,
            min_leaf_length: 3.0,
            growing_zone_ratio: 0.1,
            max_internode_ratio: 0.5,
        }
    }
}

impl OrganOptions {
    fn validate(&self) -> Result<()> {
        if !(self.max_stem_inclination_deg.is_finite()
            && (0.0..=90.0).contains(&self.max_stem_inclination_deg))
        {
            return Err(PhenomenalError::InvalidOption {
                name: "organs.max_stem_inclination_deg",
                reason: format!("{} must lie in [0, 90]", self.max_stem_inclination_deg),
            });
        }
        non_negative("organs.tie_tolerance", self.tie_tolerance)?;
        non_negative("organs.min_leaf_length", self.min_leaf_length)?;
        non_negative("organs.growing_zone_ratio", self.growing_zone_ratio)?;
        positive("organs.max_internode_ratio", self.max_internode_ratio)
    }
}

/// Trait computation options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Polyline points used to estimate a direction at an insertion point.
    pub direction_window: usize,
    /// Largest inscribed ball radius searched for, in voxels.
    pub max_ball_radius: f64,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            direction_window: 3,
            max_ball_radius: 15.0,
        }
    }
}

impl AnalysisOptions {
    fn validate(&self) -> Result<()> {
        if self.direction_window == 0 {
            return Err(PhenomenalError::InvalidOption {
                name: "analysis.direction_window",
                reason: "must be at least 1".to_string(),
            });
        }
        positive("analysis.max_ball_radius", self.max_ball_radius)
    }
}
