//! Skeleton segments and the labeled/analyzed wrappers built on them.
//!
//! A [`SkeletonSegment`] is immutable once produced. Later stages wrap it
//! rather than mutate it: [`LabeledSegment`] adds an organ label and
//! [`AnalyzedSegment`] adds traits. Segments live in arenas (`Vec`) indexed
//! by [`SegmentId`]; parents are referenced by id and always precede their
//! children.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::error::{PhenomenalError, Result};
use crate::lattice::{LatticeFrame, VoxelIndex};

/// Stable index of a segment in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub usize);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A maximal simple skeleton path and the voxels it explains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonSegment {
    id: SegmentId,
    parent: Option<SegmentId>,
    component: usize,
    polyline: Vec<DVec3>,
    voxels: BTreeSet<VoxelIndex>,
    visible_views: Option<usize>,
}

impl SkeletonSegment {
    /// Creates a segment. `polyline` runs from the insertion point to the tip.
    #[must_use]
    pub fn new(
        id: SegmentId,
        parent: Option<SegmentId>,
        component: usize,
        polyline: Vec<DVec3>,
        voxels: BTreeSet<VoxelIndex>,
    ) -> Self {
        Self {
            id,
            parent,
            component,
            polyline,
            voxels,
            visible_views: None,
        }
    }

    /// Returns a copy carrying the number of views that corroborate it.
    #[must_use]
    pub fn with_visible_views(mut self, views: usize) -> Self {
        self.visible_views = Some(views);
        self
    }

    /// Returns a copy renumbered into another arena.
    #[must_use]
    pub fn renumbered(mut self, id: SegmentId, parent: Option<SegmentId>) -> Self {
        self.id = id;
        self.parent = parent;
        self
    }

    /// Returns the segment id.
    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Returns the segment this one branches from.
    #[must_use]
    pub fn parent(&self) -> Option<SegmentId> {
        self.parent
    }

    /// Returns the index of the connected component holding the segment.
    #[must_use]
    pub fn component(&self) -> usize {
        self.component
    }

    /// Returns the ordered path points, insertion first.
    #[must_use]
    pub fn polyline(&self) -> &[DVec3] {
        &self.polyline
    }

    /// Returns the voxels claimed by this segment.
    #[must_use]
    pub fn voxels(&self) -> &BTreeSet<VoxelIndex> {
        &self.voxels
    }

    /// Returns the number of corroborating views, once reduction has run.
    #[must_use]
    pub fn visible_views(&self) -> Option<usize> {
        self.visible_views
    }

    /// Returns the first polyline point.
    #[must_use]
    pub fn insertion_point(&self) -> Option<DVec3> {
        self.polyline.first().copied()
    }

    /// Returns the last polyline point.
    #[must_use]
    pub fn tip(&self) -> Option<DVec3> {
        self.polyline.last().copied()
    }

    /// Returns the 3D length along the polyline.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.polyline.windows(2).map(|w| w[0].distance(w[1])).sum()
    }

    /// Returns the vector from the first to the last polyline point.
    #[must_use]
    pub fn chord(&self) -> DVec3 {
        match (self.insertion_point(), self.tip()) {
            (Some(a), Some(b)) => b - a,
            _ => DVec3::ZERO,
        }
    }

    /// Returns the highest polyline z.
    #[must_use]
    pub fn top(&self) -> f64 {
        self.polyline
            .iter()
            .map(|p| p.z)
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Checks arena invariants: ids equal positions and parents precede children.
pub fn check_arena(ids: impl IntoIterator<Item = (SegmentId, Option<SegmentId>)>) -> Result<()> {
    for (pos, (id, parent)) in ids.into_iter().enumerate() {
        if id.0 != pos {
            return Err(PhenomenalError::Decode(format!(
                "segment {id} stored at position {pos}"
            )));
        }
        if let Some(p) = parent {
            if p.0 >= pos {
                return Err(PhenomenalError::Decode(format!(
                    "segment {id} references parent {p} that does not precede it"
                )));
            }
        }
    }
    Ok(())
}

/// An arena of skeleton segments covering one voxel grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    frame: LatticeFrame,
    segments: Vec<SkeletonSegment>,
    components: usize,
}

impl Skeleton {
    /// Creates a skeleton from an arena whose ids match positions.
    #[must_use]
    pub fn new(frame: LatticeFrame, segments: Vec<SkeletonSegment>, components: usize) -> Self {
        debug_assert!(check_arena(segments.iter().map(|s| (s.id, s.parent))).is_ok());
        Self {
            frame,
            segments,
            components,
        }
    }

    /// Returns the lattice frame of the skeletonized grid.
    #[must_use]
    pub fn frame(&self) -> LatticeFrame {
        self.frame
    }

    /// Returns the segments in id order.
    #[must_use]
    pub fn segments(&self) -> &[SkeletonSegment] {
        &self.segments
    }

    /// Returns a segment by id.
    #[must_use]
    pub fn get(&self, id: SegmentId) -> Option<&SkeletonSegment> {
        self.segments.get(id.0)
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if the skeleton has no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the number of connected components that were skeletonized.
    #[must_use]
    pub fn components(&self) -> usize {
        self.components
    }

    /// Returns true if the plant was reconstructed in several pieces.
    #[must_use]
    pub fn is_multi_component(&self) -> bool {
        self.components > 1
    }

    /// Returns the ids of segments branching from `id`, in id order.
    #[must_use]
    pub fn children(&self, id: SegmentId) -> Vec<SegmentId> {
        self.segments
            .iter()
            .filter(|s| s.parent == Some(id))
            .map(|s| s.id)
            .collect()
    }

    /// Returns the total number of voxels claimed by all segments.
    #[must_use]
    pub fn voxel_count(&self) -> usize {
        self.segments.iter().map(|s| s.voxels.len()).sum()
    }
}

/// Organ class of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganLabel {
    /// Main axis of the plant.
    Stem,
    /// Fully developed leaf inserted below the growing apex.
    MatureLeaf,
    /// Leaf still elongating near the apex.
    GrowingLeaf,
    /// Segment that could not be classified.
    Unknown,
}

impl OrganLabel {
    /// Returns true for mature and growing leaves.
    #[must_use]
    pub fn is_leaf(self) -> bool {
        matches!(self, Self::MatureLeaf | Self::GrowingLeaf)
    }

    /// Returns the label's persisted name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stem => "stem",
            Self::MatureLeaf => "mature_leaf",
            Self::GrowingLeaf => "growing_leaf",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for OrganLabel {
    type Err = PhenomenalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stem" => Ok(Self::Stem),
            "mature_leaf" => Ok(Self::MatureLeaf),
            "growing_leaf" => Ok(Self::GrowingLeaf),
            "unknown" => Ok(Self::Unknown),
            other => Err(PhenomenalError::Decode(format!("unknown organ label '{other}'"))),
        }
    }
}

impl fmt::Display for OrganLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A skeleton segment with its organ label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSegment {
    segment: SkeletonSegment,
    label: OrganLabel,
    rank: Option<usize>,
}

impl LabeledSegment {
    /// Wraps a segment with a label and, for leaves, a 1-based rank.
    #[must_use]
    pub fn new(segment: SkeletonSegment, label: OrganLabel, rank: Option<usize>) -> Self {
        Self {
            segment,
            label,
            rank,
        }
    }

    /// Returns the wrapped skeleton segment.
    #[must_use]
    pub fn segment(&self) -> &SkeletonSegment {
        &self.segment
    }

    /// Returns the organ label.
    #[must_use]
    pub fn label(&self) -> OrganLabel {
        self.label
    }

    /// Returns the leaf rank ordered by insertion height, bottom leaf first.
    #[must_use]
    pub fn rank(&self) -> Option<usize> {
        self.rank
    }
}

/// Skeleton segments annotated with organ labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoxelSegmentation {
    frame: LatticeFrame,
    segments: Vec<LabeledSegment>,
    components: usize,
}

impl VoxelSegmentation {
    /// Creates a segmentation from a labeled arena.
    #[must_use]
    pub fn new(frame: LatticeFrame, segments: Vec<LabeledSegment>, components: usize) -> Self {
        debug_assert!(
            check_arena(segments.iter().map(|s| (s.segment.id, s.segment.parent))).is_ok()
        );
        Self {
            frame,
            segments,
            components,
        }
    }

    /// Returns the lattice frame of the segmented grid.
    #[must_use]
    pub fn frame(&self) -> LatticeFrame {
        self.frame
    }

    /// Returns the labeled segments in id order.
    #[must_use]
    pub fn segments(&self) -> &[LabeledSegment] {
        &self.segments
    }

    /// Returns a labeled segment by id.
    #[must_use]
    pub fn get(&self, id: SegmentId) -> Option<&LabeledSegment> {
        self.segments.get(id.0)
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if there are no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the number of connected components of the reconstruction.
    #[must_use]
    pub fn components(&self) -> usize {
        self.components
    }

    /// Returns the number of segments carrying `label`.
    #[must_use]
    pub fn count(&self, label: OrganLabel) -> usize {
        self.segments.iter().filter(|s| s.label == label).count()
    }

    /// Returns the total number of voxels claimed by all segments.
    #[must_use]
    pub fn voxel_count(&self) -> usize {
        self.segments.iter().map(|s| s.segment.voxels.len()).sum()
    }
}

/// Per-segment traits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentTraits {
    /// 3D length along the polyline.
    pub length: f64,
    /// Height of the insertion point above the plant base.
    pub insertion_height: f64,
    /// Angle between the segment and the parent direction at the insertion
    /// point, in degrees. `None` for segments without a parent.
    pub insertion_angle: Option<f64>,
    /// Height of the highest polyline point above the plant base.
    pub tip_height: f64,
    /// Number of views corroborating the segment, if reduction ran.
    pub visible_views: Option<usize>,
    /// Number of claimed voxels.
    pub voxel_count: usize,
    /// Radius of the largest voxel-filled ball centred on the polyline, in
    /// world units.
    pub max_inscribed_radius: f64,
}

/// A labeled segment with its traits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedSegment {
    labeled: LabeledSegment,
    traits: SegmentTraits,
}

impl AnalyzedSegment {
    /// Attaches traits to a labeled segment.
    #[must_use]
    pub fn new(labeled: LabeledSegment, traits: SegmentTraits) -> Self {
        Self { labeled, traits }
    }

    /// Returns the labeled segment.
    #[must_use]
    pub fn labeled(&self) -> &LabeledSegment {
        &self.labeled
    }

    /// Returns the skeleton segment.
    #[must_use]
    pub fn segment(&self) -> &SkeletonSegment {
        &self.labeled.segment
    }

    /// Returns the organ label.
    #[must_use]
    pub fn label(&self) -> OrganLabel {
        self.labeled.label
    }

    /// Returns the computed traits.
    #[must_use]
    pub fn traits(&self) -> &SegmentTraits {
        &self.traits
    }
}

/// Whole-plant aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlantTraits {
    /// Number of stem segments.
    pub stem_segment_count: usize,
    /// Number of mature leaves.
    pub mature_leaf_count: usize,
    /// Number of growing leaves.
    pub growing_leaf_count: usize,
    /// Number of unclassified segments.
    pub unknown_count: usize,
    /// Highest voxel centre above the plant base.
    pub total_height: f64,
    /// Summed length of all stem segments.
    pub stem_length: f64,
    /// Twice the largest inscribed radius along the stem.
    pub stem_diameter: f64,
    /// Number of voxels in the segmentation.
    pub voxel_count: usize,
    /// Occupied volume in world units.
    pub volume: f64,
    /// Number of connected components of the reconstruction.
    pub components: usize,
}

impl PlantTraits {
    /// Returns the number of mature and growing leaves.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.mature_leaf_count + self.growing_leaf_count
    }
}

/// A segmentation with per-segment and whole-plant traits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoxelSegmentationInfo {
    frame: LatticeFrame,
    segments: Vec<AnalyzedSegment>,
    plant: PlantTraits,
}

impl VoxelSegmentationInfo {
    /// Creates an analysis result.
    #[must_use]
    pub fn new(frame: LatticeFrame, segments: Vec<AnalyzedSegment>, plant: PlantTraits) -> Self {
        debug_assert!(check_arena(
            segments.iter().map(|s| (s.segment().id, s.segment().parent))
        )
        .is_ok());
        Self {
            frame,
            segments,
            plant,
        }
    }

    /// Returns the lattice frame of the analyzed grid.
    #[must_use]
    pub fn frame(&self) -> LatticeFrame {
        self.frame
    }

    /// Returns the analyzed segments in id order.
    #[must_use]
    pub fn segments(&self) -> &[AnalyzedSegment] {
        &self.segments
    }

    /// Returns the whole-plant aggregates.
    #[must_use]
    pub fn plant(&self) -> &PlantTraits {
        &self.plant
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if there are no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(id: usize, parent: Option<usize>, points: &[[f64; 3]]) -> SkeletonSegment {
        SkeletonSegment::new(
            SegmentId(id),
            parent.map(SegmentId),
            0,
            points.iter().map(|&p| DVec3::from_array(p)).collect(),
            BTreeSet::new(),
        )
    }

    #[test]
    fn test_segment_geometry() {
        let s = segment(0, None, &[[0.0, 0.0, 0.0], [0.0, 0.0, 3.0], [4.0, 0.0, 3.0]]);
        assert!((s.length() - 7.0).abs() < 1e-12);
        assert_eq!(s.chord(), DVec3::new(4.0, 0.0, 3.0));
        assert_eq!(s.top(), 3.0);
        assert_eq!(s.visible_views(), None);
        assert_eq!(s.with_visible_views(3).visible_views(), Some(3));
    }

    #[test]
    fn test_children() {
        let frame = LatticeFrame::new(DVec3::ZERO, 1.0).unwrap();
        let skeleton = Skeleton::new(
            frame,
            vec![
                segment(0, None, &[[0.0; 3]]),
                segment(1, Some(0), &[[0.0; 3]]),
                segment(2, Some(0), &[[0.0; 3]]),
                segment(3, Some(2), &[[0.0; 3]]),
            ],
            1,
        );
        assert_eq!(skeleton.children(SegmentId(0)), vec![SegmentId(1), SegmentId(2)]);
        assert_eq!(skeleton.children(SegmentId(3)), Vec::<SegmentId>::new());
        assert!(!skeleton.is_multi_component());
    }

    #[test]
    fn test_check_arena() {
        let ok = [(SegmentId(0), None), (SegmentId(1), Some(SegmentId(0)))];
        assert!(check_arena(ok).is_ok());
        let gap = [(SegmentId(0), None), (SegmentId(2), None)];
        assert!(check_arena(gap).is_err());
        let forward = [(SegmentId(0), Some(SegmentId(1))), (SegmentId(1), None)];
        assert!(check_arena(forward).is_err());
    }

    #[test]
    fn test_label_names() {
        assert_eq!(OrganLabel::MatureLeaf.to_string(), "mature_leaf");
        assert_eq!(
            serde_json::to_string(&OrganLabel::GrowingLeaf).unwrap(),
            "\"growing_leaf\""
        );
        assert!(OrganLabel::GrowingLeaf.is_leaf());
        assert!(!OrganLabel::Stem.is_leaf());
        for label in [
            OrganLabel::Stem,
            OrganLabel::MatureLeaf,
            OrganLabel::GrowingLeaf,
            OrganLabel::Unknown,
        ] {
            assert_eq!(label.as_str().parse::<OrganLabel>().unwrap(), label);
        }
        assert!("leaf".parse::<OrganLabel>().is_err());
    }
}
