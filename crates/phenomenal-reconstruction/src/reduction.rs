//! Visibility-based segment reduction.
//!
//! A segment is corroborated by a view when enough foreground pixels of
//! that view are hit by the projection of its polyline and voxel centres.
//! With `exclusive_pixels` only pixels no other segment projects onto
//! count. Segments corroborated by fewer than `required_visible` views are
//! merged into their nearest kept ancestor; root segments are always kept.
//! A merged segment that leads to kept segments and continues its ancestor's
//! path extends that path; otherwise its path is handed to its kept
//! descendants. After merging, a kept segment
//! that became the only child of its parent and continues it end to start is
//! fused into the parent.
//!
//! Voxels are never dropped: the total voxel count is the same before and
//! after reduction.

use std::collections::{BTreeSet, HashMap};

use glam::DVec3;
use phenomenal_core::{
    LatticeFrame, MultiViewInput, ReductionOptions, Result, SegmentId, Skeleton, SkeletonSegment,
    View, VoxelIndex,
};

use crate::parallel;

/// Polyline steps used to estimate where a line is heading.
const ALIGNMENT_WINDOW: usize = 3;

/// Per-segment count of foreground pixels supporting it in one view.
fn supporting_pixels(
    view: &View<'_>,
    frame: LatticeFrame,
    segments: &[SkeletonSegment],
    exclusive: bool,
) -> Result<Vec<usize>> {
    let mut hits: Vec<BTreeSet<(u32, u32)>> = Vec::with_capacity(segments.len());
    for segment in segments {
        let mut pixels = BTreeSet::new();
        let points = segment
            .polyline()
            .iter()
            .copied()
            .chain(segment.voxels().iter().map(|&v| frame.center(v)));
        for p in points {
            if let Some((x, y)) = view.image.pixel_of(view.project(p)?) {
                if view.image.get(x, y) {
                    pixels.insert((x, y));
                }
            }
        }
        hits.push(pixels);
    }

    if !exclusive {
        return Ok(hits.iter().map(BTreeSet::len).collect());
    }
    let mut shared: HashMap<(u32, u32), usize> = HashMap::new();
    for pixels in &hits {
        for &px in pixels {
            *shared.entry(px).or_default() += 1;
        }
    }
    Ok(hits
        .iter()
        .map(|pixels| pixels.iter().filter(|px| shared[px] == 1).count())
        .collect())
}

/// Returns, for every segment, the number of views that corroborate it.
pub fn visible_views(
    skeleton: &Skeleton,
    views: &MultiViewInput,
    options: &ReductionOptions,
) -> Result<Vec<usize>> {
    let all: Vec<View<'_>> = views.views().collect();
    let per_view = parallel::map(&all, |view| {
        supporting_pixels(view, skeleton.frame(), skeleton.segments(), options.exclusive_pixels)
    })?;
    Ok((0..skeleton.len())
        .map(|i| {
            per_view
                .iter()
                .filter(|counts| counts[i] >= options.nb_min_pixel)
                .count()
        })
        .collect())
}

/// Prunes segments that too few views corroborate.
///
/// The returned skeleton carries the visible-view count of every kept
/// segment. Ids are compacted; parents still precede children.
pub fn reduce(
    skeleton: &Skeleton,
    views: &MultiViewInput,
    options: &ReductionOptions,
) -> Result<Skeleton> {
    let segments = skeleton.segments();
    let visible = visible_views(skeleton, views, options)?;

    // Owner of each segment's voxels once unsupported segments are merged.
    let mut owner: Vec<usize> = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        let kept = visible[i] >= options.required_visible;
        owner.push(match segment.parent() {
            Some(p) if !kept => owner[p.0],
            _ => i,
        });
    }
    let parent_of = |i: usize| segments[i].parent().map(|p| owner[p.0]);
    let lines = merged_lines(segments, &owner);

    let mut kept_children: HashMap<usize, usize> = HashMap::new();
    for i in (0..segments.len()).filter(|&i| owner[i] == i) {
        if let Some(p) = parent_of(i) {
            *kept_children.entry(p).or_default() += 1;
        }
    }

    // Head of the fused chain each kept segment ends up in.
    let mut head: Vec<usize> = (0..segments.len()).collect();
    for i in (0..segments.len()).filter(|&i| owner[i] == i) {
        if let Some(p) = parent_of(i) {
            if kept_children.get(&p) == Some(&1) && continues(&lines[p], &lines[i]) {
                head[i] = head[p];
            }
        }
    }

    let mut polylines: HashMap<usize, Vec<DVec3>> = HashMap::new();
    let mut voxels: HashMap<usize, BTreeSet<VoxelIndex>> = HashMap::new();
    let mut support: HashMap<usize, usize> = HashMap::new();
    for (i, segment) in segments.iter().enumerate() {
        let h = head[owner[i]];
        voxels.entry(h).or_default().extend(segment.voxels().iter().copied());
        if owner[i] != i {
            continue;
        }
        let line = polylines.entry(h).or_default();
        let skip = usize::from(!line.is_empty());
        line.extend(lines[i].iter().skip(skip).copied());
        let best = support.entry(h).or_default();
        *best = (*best).max(visible[i]);
    }

    let survivors: Vec<usize> = (0..segments.len())
        .filter(|&i| owner[i] == i && head[i] == i)
        .collect();
    let new_id: HashMap<usize, SegmentId> = survivors
        .iter()
        .enumerate()
        .map(|(n, &i)| (i, SegmentId(n)))
        .collect();

    let mut reduced = Vec::with_capacity(survivors.len());
    for &i in &survivors {
        let parent = parent_of(i).map(|p| new_id[&head[p]]);
        reduced.push(
            SkeletonSegment::new(
                new_id[&i],
                parent,
                segments[i].component(),
                polylines.remove(&i).unwrap_or_default(),
                voxels.remove(&i).unwrap_or_default(),
            )
            .with_visible_views(support.get(&i).copied().unwrap_or_default()),
        );
    }

    let merged = (0..segments.len()).filter(|&i| owner[i] != i).count();
    let fused = (0..segments.len())
        .filter(|&i| owner[i] == i && head[i] != i)
        .count();
    log::info!(
        "segment reduction: kept {} of {} segments ({merged} merged, {fused} fused)",
        reduced.len(),
        segments.len()
    );
    Ok(Skeleton::new(skeleton.frame(), reduced, skeleton.components()))
}

/// Returns whether `child` starts where `parent` ends.
fn continues(parent: &[DVec3], child: &[DVec3]) -> bool {
    match (parent.last(), child.first()) {
        (Some(a), Some(b)) => same_point(*a, *b),
        _ => false,
    }
}

fn same_point(a: DVec3, b: DVec3) -> bool {
    a.distance_squared(b) < 1e-18
}

/// `prefix` up to the point where `polyline` starts, followed by `polyline`.
///
/// Falls back to `polyline` alone when it does not start on `prefix`.
fn graft(prefix: &[DVec3], polyline: &[DVec3]) -> Vec<DVec3> {
    let Some(&start) = polyline.first() else {
        return Vec::new();
    };
    match prefix.iter().rposition(|&p| same_point(p, start)) {
        Some(at) => prefix[..=at]
            .iter()
            .chain(&polyline[1..])
            .copied()
            .collect(),
        None => polyline.to_vec(),
    }
}

/// Direction a polyline ends with, over its last `window` steps.
fn end_direction(line: &[DVec3], window: usize) -> DVec3 {
    match line.len() {
        0 | 1 => DVec3::Z,
        n => (line[n - 1] - line[n - 1 - window.min(n - 1)])
            .try_normalize()
            .unwrap_or(DVec3::Z),
    }
}

/// Polylines of the kept segments once removed segments are merged.
///
/// A removed segment extends its owner's line when it leads to kept
/// segments, starts at the line's tip, and is the sibling best aligned with
/// the line's end direction. Any other removed segment hands its path down to
/// its kept descendants, which then start where it left the owner's line.
/// Either way every kept child still starts on its new parent's polyline.
fn merged_lines(segments: &[SkeletonSegment], owner: &[usize]) -> Vec<Vec<DVec3>> {
    let n = segments.len();
    let mut feeds = vec![false; n];
    let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, segment) in segments.iter().enumerate().rev() {
        if let Some(p) = segment.parent() {
            let leads_to_kept = owner[i] == i || feeds[i];
            feeds[p.0] |= leads_to_kept;
            children.entry(p.0).or_default().insert(0, i);
        }
    }

    let mut lines: Vec<Vec<DVec3>> = vec![Vec::new(); n];
    let mut lead: HashMap<usize, Vec<DVec3>> = HashMap::new();
    for (i, segment) in segments.iter().enumerate() {
        let own = match segment.parent().and_then(|p| lead.get(&p.0)) {
            Some(prefix) => graft(prefix, segment.polyline()),
            None => segment.polyline().to_vec(),
        };
        let o = owner[i];
        if o == i {
            lines[i] = own;
            continue;
        }
        let extends = feeds[i]
            && continues(&lines[o], &own)
            && segment.parent().is_some_and(|p| {
                let heading = end_direction(&lines[o], ALIGNMENT_WINDOW);
                let start = own[0];
                children
                    .get(&p.0)
                    .into_iter()
                    .flatten()
                    .filter(|&&c| segments[c].insertion_point().is_some_and(|q| same_point(q, start)))
                    .map(|&c| (c, segments[c].chord().normalize_or_zero().dot(heading)))
                    .max_by(|x, y| x.1.total_cmp(&y.1).then(y.0.cmp(&x.0)))
                    .is_some_and(|(c, _)| c == i)
            });
        if extends {
            lines[o].extend(own.into_iter().skip(1));
        } else {
            lead.insert(i, own);
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::DVec2;
    use phenomenal_core::{BinaryImage, Projection, SilhouetteSet};

    use super::*;

    fn frame() -> LatticeFrame {
        LatticeFrame::new(DVec3::ZERO, 1.0).unwrap()
    }

    /// A segment through `points`. Child segments start at the junction,
    /// which they leave to the parent's voxel set.
    fn segment(id: usize, parent: Option<usize>, points: &[(i32, i32, i32)]) -> SkeletonSegment {
        let f = frame();
        let cells: Vec<VoxelIndex> = points.iter().map(|&(x, y, z)| VoxelIndex::new(x, y, z)).collect();
        let polyline = cells.iter().map(|&v| f.center(v)).collect();
        let skip = usize::from(parent.is_some());
        let voxels = cells.into_iter().skip(skip).collect();
        SkeletonSegment::new(SegmentId(id), parent.map(SegmentId), 0, polyline, voxels)
    }

    /// Stem split at z = 5 with a branch along +x.
    fn forked() -> Skeleton {
        let lower: Vec<_> = (0..=5).map(|z| (0, 0, z)).collect();
        let upper: Vec<_> = (5..=10).map(|z| (0, 0, z)).collect();
        let branch: Vec<_> = (0..=4).map(|x| (x, 0, 5)).collect();
        Skeleton::new(
            frame(),
            vec![
                segment(0, None, &lower),
                segment(1, Some(0), &upper),
                segment(2, Some(0), &branch),
            ],
            1,
        )
    }

    /// Orthographic side views at 1 px per unit, 41 px square, with the
    /// pixels for which `foreground(x, y)` holds set.
    fn masked_views(angles: &[f64], foreground: impl Fn(u32, u32) -> bool) -> MultiViewInput {
        let projection: Arc<dyn Projection> = Arc::new(|p: DVec3, angle: f64| {
            let a = angle.to_radians();
            DVec2::new(p.x * a.cos() + p.y * a.sin() + 20.5, 20.5 - p.z)
        });
        let set: SilhouetteSet = angles
            .iter()
            .map(|&angle| {
                let mut img = BinaryImage::new(41, 41);
                for y in 0..41 {
                    for x in 0..41 {
                        img.set(x, y, foreground(x, y));
                    }
                }
                (angle, img)
            })
            .collect();
        MultiViewInput::single("side", projection, set).unwrap()
    }

    /// Side views showing everything within `|x| <= width` as foreground.
    fn views(angles: &[f64], width: f64) -> MultiViewInput {
        masked_views(angles, |x, _| (f64::from(x) + 0.5 - 20.5).abs() <= width)
    }

    fn options(required_visible: usize, nb_min_pixel: usize) -> ReductionOptions {
        ReductionOptions {
            required_visible,
            nb_min_pixel,
            exclusive_pixels: true,
        }
    }

    #[test]
    fn test_unsupported_branch_merges_and_stem_fuses() {
        let s = forked();
        let reduced = reduce(&s, &views(&[0.0, 90.0], 0.6), &options(2, 3)).unwrap();
        assert_eq!(reduced.len(), 1);
        let stem = &reduced.segments()[0];
        assert_eq!(stem.parent(), None);
        assert_eq!(stem.polyline().len(), 11);
        assert_eq!(stem.tip(), Some(DVec3::new(0.0, 0.0, 10.0)));
        assert_eq!(reduced.voxel_count(), s.voxel_count());
    }

    /// Stem in three pieces joined at z = 4 and z = 8, with a leaf at each
    /// joint: lower, middle, leaf along +x at z = 4, upper, leaf along -x at z = 8.
    fn jointed() -> Skeleton {
        let lower: Vec<_> = (0..=4).map(|z| (0, 0, z)).collect();
        let middle: Vec<_> = (4..=8).map(|z| (0, 0, z)).collect();
        let upper: Vec<_> = (8..=12).map(|z| (0, 0, z)).collect();
        let low_leaf: Vec<_> = (0..=4).map(|x| (x, 0, 4)).collect();
        let high_leaf: Vec<_> = (0..=4).map(|x| (-x, 0, 8)).collect();
        Skeleton::new(
            frame(),
            vec![
                segment(0, None, &lower),
                segment(1, Some(0), &middle),
                segment(2, Some(0), &low_leaf),
                segment(3, Some(1), &upper),
                segment(4, Some(1), &high_leaf),
            ],
            1,
        )
    }

    fn on_polyline(point: DVec3, segment: &SkeletonSegment) -> bool {
        segment.polyline().iter().any(|&p| p.distance(point) < 1e-9)
    }

    #[test]
    fn test_removed_middle_piece_extends_parent_path() {
        let s = jointed();
        // Rows of z = 5..=7 are background, so the middle piece has no
        // exclusive support.
        let v = masked_views(&[0.0, 180.0], |_, y| !(13..=15).contains(&y));
        let visible = visible_views(&s, &v, &options(2, 3)).unwrap();
        assert_eq!(visible, vec![2, 0, 2, 2, 2]);

        let reduced = reduce(&s, &v, &options(2, 3)).unwrap();
        assert_eq!(reduced.len(), 4);
        let stem = &reduced.segments()[0];
        assert_eq!(stem.polyline().len(), 9);
        assert!((stem.length() - 8.0).abs() < 1e-12);

        let upper = &reduced.segments()[2];
        assert_eq!(upper.parent(), Some(SegmentId(0)));
        assert_eq!(upper.insertion_point(), Some(DVec3::new(0.0, 0.0, 8.0)));
        for child in &reduced.segments()[1..] {
            let parent = &reduced.segments()[child.parent().unwrap().0];
            assert!(on_polyline(child.insertion_point().unwrap(), parent));
        }

        let total = |sk: &Skeleton| sk.segments().iter().map(SkeletonSegment::length).sum::<f64>();
        assert!((total(&reduced) - total(&s)).abs() < 1e-12);
        assert_eq!(reduced.voxel_count(), s.voxel_count());
    }

    #[test]
    fn test_removed_side_branch_hands_path_to_kept_child() {
        // Stem tip at z = 6 continues upwards and sends a branch along +x
        // whose end turns down into a twig.
        let stem: Vec<_> = (0..=6).map(|z| (0, 0, z)).collect();
        let top: Vec<_> = (6..=10).map(|z| (0, 0, z)).collect();
        let branch: Vec<_> = (0..=3).map(|x| (x, 0, 6)).collect();
        let twig: Vec<_> = (0..=3).map(|k| (3, 0, 6 - k)).collect();
        let s = Skeleton::new(
            frame(),
            vec![
                segment(0, None, &stem),
                segment(1, Some(0), &top),
                segment(2, Some(0), &branch),
                segment(3, Some(2), &twig),
            ],
            1,
        );
        // The branch row is background beside the stem column.
        let v = masked_views(&[0.0], |x, y| !(y == 14 && (21..=23).contains(&x)));
        let mut opts = options(1, 2);
        opts.exclusive_pixels = false;
        assert_eq!(visible_views(&s, &v, &opts).unwrap(), vec![1, 1, 0, 1]);

        let reduced = reduce(&s, &v, &opts).unwrap();
        assert_eq!(reduced.len(), 3);
        let stem = &reduced.segments()[0];
        assert_eq!(stem.polyline().len(), 7);
        let twig = &reduced.segments()[2];
        assert_eq!(twig.parent(), Some(SegmentId(0)));
        assert_eq!(twig.insertion_point(), Some(DVec3::new(0.0, 0.0, 6.0)));
        assert!(on_polyline(twig.insertion_point().unwrap(), stem));
        assert_eq!(twig.polyline().len(), 7);
        assert!((twig.length() - 6.0).abs() < 1e-12);
        assert_eq!(twig.voxels().len(), 3);
        assert_eq!(reduced.voxel_count(), s.voxel_count());
    }

    #[test]
    fn test_supported_branch_is_kept() {
        let s = forked();
        let reduced = reduce(&s, &views(&[0.0, 180.0], 20.0), &options(2, 3)).unwrap();
        assert_eq!(reduced.len(), 3);
        assert!(reduced.segments().iter().all(|seg| seg.visible_views() == Some(2)));
        assert_eq!(reduced.voxel_count(), s.voxel_count());
    }

    #[test]
    fn test_shared_pixels_do_not_count_when_exclusive() {
        let s = forked();
        let v = views(&[90.0], 20.0);
        let exclusive = visible_views(&s, &v, &options(1, 1)).unwrap();
        let mut opts = options(1, 1);
        opts.exclusive_pixels = false;
        let shared = visible_views(&s, &v, &opts).unwrap();
        // At 90 degrees the branch projects onto the stem's column.
        assert_eq!(exclusive[2], 0);
        assert_eq!(shared[2], 1);
    }

    #[test]
    fn test_no_views_keeps_roots_only() {
        let s = forked();
        let reduced = reduce(&s, &MultiViewInput::default(), &options(1, 1)).unwrap();
        assert_eq!(reduced.len(), 1);
        assert_eq!(reduced.voxel_count(), s.voxel_count());
        assert_eq!(reduced.segments()[0].visible_views(), Some(0));
    }

    #[test]
    fn test_empty_skeleton() {
        let s = Skeleton::new(frame(), Vec::new(), 0);
        let reduced = reduce(&s, &views(&[0.0], 1.0), &ReductionOptions::default()).unwrap();
        assert!(reduced.is_empty());
    }
}
