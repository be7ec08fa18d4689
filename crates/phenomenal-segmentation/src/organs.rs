//! Organ labeling of skeleton segments.
//!
//! The main axis is searched in the largest component only. Starting from
//! its root segments, a candidate axis follows children whose chord stays
//! within `max_stem_inclination_deg` of vertical, until no child qualifies.
//! The candidate reaching highest wins. Candidates whose tops lie within
//! `tie_tolerance` voxels of the best are equally long; among those the one
//! with more voxels wins, then the one with the lexicographically smallest
//! segment ids. This tie-break is a heuristic, not an optimality criterion.
//!
//! Segments branching off the main axis are leaves, visited by insertion
//! height. A leaf is growing when it is inserted in the apex zone (the top
//! `growing_zone_ratio` of the stem) or more than `max_internode_ratio` of
//! the stem height above the previous mature leaf; every leaf above the
//! first growing one is growing too. Leaves shorter than `min_leaf_length`
//! voxels are unknown. Segments further out inherit the label of the leaf
//! they hang from.

use std::collections::BTreeSet;

use phenomenal_core::{
    LabeledSegment, OrganLabel, OrganOptions, SegmentId, Skeleton, SkeletonSegment,
    VoxelSegmentation,
};

/// Angle between a segment's chord and the +z axis, in degrees.
fn inclination(segment: &SkeletonSegment) -> f64 {
    let chord = segment.chord();
    let length = chord.length();
    if length <= f64::EPSILON {
        return 0.0;
    }
    (chord.z / length).clamp(-1.0, 1.0).acos().to_degrees()
}

/// A root-to-leaf chain of near-vertical segments.
#[derive(Debug, Clone)]
struct AxisCandidate {
    ids: Vec<usize>,
    top: f64,
    support: usize,
}

/// Returns the component holding the most voxels, ties to the lowest index.
fn main_component(skeleton: &Skeleton) -> usize {
    let mut voxels = vec![0usize; skeleton.components().max(1)];
    for s in skeleton.segments() {
        if let Some(slot) = voxels.get_mut(s.component()) {
            *slot += s.voxels().len();
        }
    }
    voxels
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
        .map_or(0, |(i, _)| i)
}

fn axis_candidates(
    skeleton: &Skeleton,
    children: &[Vec<usize>],
    component: usize,
    max_inclination: f64,
) -> Vec<AxisCandidate> {
    let segments = skeleton.segments();
    let upright = |i: usize| inclination(&segments[i]) <= max_inclination;
    let roots: Vec<usize> = segments
        .iter()
        .filter(|s| s.parent().is_none() && s.component() == component)
        .map(|s| s.id().0)
        .collect();
    let mut starts: Vec<usize> = roots.iter().copied().filter(|&i| upright(i)).collect();
    if starts.is_empty() {
        starts = roots;
    }

    let mut candidates = Vec::new();
    let mut stack: Vec<Vec<usize>> = starts.into_iter().rev().map(|i| vec![i]).collect();
    while let Some(path) = stack.pop() {
        let last = path[path.len() - 1];
        let next: Vec<usize> = children[last].iter().copied().filter(|&c| upright(c)).collect();
        if next.is_empty() {
            let top = path
                .iter()
                .map(|&i| segments[i].top())
                .fold(f64::NEG_INFINITY, f64::max);
            let support = path.iter().map(|&i| segments[i].voxels().len()).sum();
            candidates.push(AxisCandidate {
                ids: path,
                top,
                support,
            });
            continue;
        }
        for &c in next.iter().rev() {
            let mut extended = path.clone();
            extended.push(c);
            stack.push(extended);
        }
    }
    candidates
}

fn pick_axis(candidates: Vec<AxisCandidate>, tolerance: f64) -> Option<AxisCandidate> {
    let best_top = candidates
        .iter()
        .map(|c| c.top)
        .fold(f64::NEG_INFINITY, f64::max);
    candidates
        .into_iter()
        .filter(|c| c.top >= best_top - tolerance)
        .min_by(|a, b| b.support.cmp(&a.support).then_with(|| a.ids.cmp(&b.ids)))
}

/// Labels every segment of a (reduced) skeleton.
///
/// An empty skeleton gives an empty segmentation.
#[must_use]
pub fn segment_organs(skeleton: &Skeleton, options: &OrganOptions) -> VoxelSegmentation {
    let frame = skeleton.frame();
    if skeleton.is_empty() {
        log::warn!("organ segmentation: skeleton has no segment, segmentation is empty");
        return VoxelSegmentation::new(frame, Vec::new(), skeleton.components());
    }
    let size = frame.voxel_size();
    let segments = skeleton.segments();

    let mut children = vec![Vec::new(); segments.len()];
    for s in segments {
        if let Some(p) = s.parent() {
            children[p.0].push(s.id().0);
        }
    }

    let component = main_component(skeleton);
    let candidates = axis_candidates(skeleton, &children, component, options.max_stem_inclination_deg);
    let tied = candidates.len();
    let axis = pick_axis(candidates, options.tie_tolerance * size);
    let stem: BTreeSet<usize> = axis.iter().flat_map(|a| a.ids.iter().copied()).collect();
    if let Some(axis) = &axis {
        log::debug!(
            "organ segmentation: main axis {:?} out of {tied} candidates (top {:.3}, {} voxels)",
            axis.ids,
            axis.top,
            axis.support
        );
    }

    let base_z = stem
        .first()
        .and_then(|&i| segments[i].insertion_point())
        .map_or(0.0, |p| p.z);
    let apex_z = axis.as_ref().map_or(base_z, |a| a.top);
    let stem_height = (apex_z - base_z).max(0.0);

    // Leaves hang directly from the stem, or share its root.
    let mut leaves: Vec<(f64, usize)> = segments
        .iter()
        .filter(|s| s.component() == component && !stem.contains(&s.id().0))
        .filter(|s| s.parent().map_or(true, |p| stem.contains(&p.0)))
        .map(|s| (s.insertion_point().map_or(base_z, |p| p.z), s.id().0))
        .collect();
    leaves.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut labels = vec![OrganLabel::Unknown; segments.len()];
    let mut ranks: Vec<Option<usize>> = vec![None; segments.len()];
    for &i in &stem {
        labels[i] = OrganLabel::Stem;
    }

    let growing_floor = apex_z - options.growing_zone_ratio * stem_height;
    let max_gap = options.max_internode_ratio * stem_height;
    let mut last_mature: Option<f64> = None;
    let mut growing = false;
    let mut rank = 0;
    for (z, i) in leaves {
        if segments[i].length() < options.min_leaf_length * size {
            continue;
        }
        growing = growing || z >= growing_floor || last_mature.is_some_and(|m| z - m > max_gap);
        if growing {
            labels[i] = OrganLabel::GrowingLeaf;
        } else {
            labels[i] = OrganLabel::MatureLeaf;
            last_mature = Some(z);
        }
        rank += 1;
        ranks[i] = Some(rank);
    }

    // Parents precede children, so one pass propagates leaf labels outwards.
    for s in segments {
        let i = s.id().0;
        if stem.contains(&i) || ranks[i].is_some() {
            continue;
        }
        if let Some(SegmentId(p)) = s.parent() {
            if !stem.contains(&p) && labels[p].is_leaf() {
                labels[i] = labels[p];
            }
        }
    }

    let labeled: Vec<LabeledSegment> = segments
        .iter()
        .map(|s| LabeledSegment::new(s.clone(), labels[s.id().0], ranks[s.id().0]))
        .collect();
    let segmentation = VoxelSegmentation::new(frame, labeled, skeleton.components());
    log::info!(
        "organ segmentation: {} stem, {} mature, {} growing, {} unknown segments",
        segmentation.count(OrganLabel::Stem),
        segmentation.count(OrganLabel::MatureLeaf),
        segmentation.count(OrganLabel::GrowingLeaf),
        segmentation.count(OrganLabel::Unknown)
    );
    segmentation
}
