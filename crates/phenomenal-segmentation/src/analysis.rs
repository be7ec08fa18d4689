//! Per-segment and whole-plant architecture traits.

use std::collections::{BTreeMap, HashSet};

use glam::DVec3;
use phenomenal_core::{
    AnalysisOptions, AnalyzedSegment, LatticeFrame, OrganLabel, PlantTraits, SegmentTraits,
    SkeletonSegment, VoxelIndex, VoxelSegmentation, VoxelSegmentationInfo,
};

/// Direction of `polyline` leaving its first point, over `window` steps.
fn initial_direction(polyline: &[DVec3], window: usize) -> Option<DVec3> {
    let end = polyline.get(window.min(polyline.len().saturating_sub(1)))?;
    (*end - polyline[0]).try_normalize()
}

/// Tangent of `polyline` at the point closest to `at`, over `window` steps.
fn local_tangent(polyline: &[DVec3], at: DVec3, window: usize) -> Option<DVec3> {
    let k = polyline
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.distance_squared(at).total_cmp(&b.1.distance_squared(at)))
        .map(|(k, _)| k)?;
    let (from, to) = if k == 0 {
        (0, window.min(polyline.len() - 1))
    } else {
        (k.saturating_sub(window), k)
    };
    (polyline[to] - polyline[from]).try_normalize()
}

/// Angle in degrees between a child and its parent at the insertion point.
///
/// Falls back to the vertical when the parent has no usable direction.
fn insertion_angle(segment: &SkeletonSegment, parent: &SkeletonSegment, window: usize) -> Option<f64> {
    let own = initial_direction(segment.polyline(), window)?;
    let insertion = segment.insertion_point()?;
    let axis = local_tangent(parent.polyline(), insertion, window).unwrap_or(DVec3::Z);
    Some(own.dot(axis).clamp(-1.0, 1.0).acos().to_degrees())
}

/// Lattice offsets within `max_radius` voxels, grouped by squared length,
/// nearest shell first.
#[allow(clippy::cast_possible_truncation)]
fn ball_shells(max_radius: f64) -> Vec<(i32, Vec<(i32, i32, i32)>)> {
    let reach = max_radius.floor() as i32;
    let limit = max_radius * max_radius;
    let mut shells: BTreeMap<i32, Vec<(i32, i32, i32)>> = BTreeMap::new();
    for dz in -reach..=reach {
        for dy in -reach..=reach {
            for dx in -reach..=reach {
                let d2 = dx * dx + dy * dy + dz * dz;
                if d2 > 0 && f64::from(d2) <= limit {
                    shells.entry(d2).or_default().push((dx, dy, dz));
                }
            }
        }
    }
    shells.into_iter().collect()
}

/// Radius in voxels of the largest ball around `center` whose lattice
/// cells are all occupied.
fn inscribed_radius(
    occupied: &HashSet<VoxelIndex>,
    center: VoxelIndex,
    shells: &[(i32, Vec<(i32, i32, i32)>)],
) -> f64 {
    if !occupied.contains(&center) {
        return 0.0;
    }
    let mut radius = 0.0;
    for (d2, offsets) in shells {
        if !offsets
            .iter()
            .all(|&(dx, dy, dz)| occupied.contains(&center.offset(dx, dy, dz)))
        {
            break;
        }
        radius = f64::from(*d2).sqrt();
    }
    radius
}

/// Largest inscribed radius along a segment's polyline, in world units.
fn thickness(
    segment: &SkeletonSegment,
    frame: LatticeFrame,
    occupied: &HashSet<VoxelIndex>,
    shells: &[(i32, Vec<(i32, i32, i32)>)],
) -> f64 {
    segment
        .polyline()
        .iter()
        .map(|&p| inscribed_radius(occupied, frame.index_of(p), shells))
        .fold(0.0, f64::max)
        * frame.voxel_size()
}

/// Computes traits for every segment and aggregates for the whole plant.
///
/// Heights are measured above the lowest voxel centre of the segmentation.
#[must_use]
pub fn analyze(segmentation: &VoxelSegmentation, options: &AnalysisOptions) -> VoxelSegmentationInfo {
    let frame = segmentation.frame();
    let (mut base_z, mut top_z) = (f64::INFINITY, f64::NEG_INFINITY);
    for labeled in segmentation.segments() {
        for &v in labeled.segment().voxels() {
            let z = frame.center(v).z;
            base_z = base_z.min(z);
            top_z = top_z.max(z);
        }
    }
    if !base_z.is_finite() {
        base_z = 0.0;
        top_z = 0.0;
    }

    let mut plant = PlantTraits {
        total_height: top_z - base_z,
        voxel_count: segmentation.voxel_count(),
        components: segmentation.components(),
        ..PlantTraits::default()
    };
    plant.volume = plant.voxel_count as f64 * frame.voxel_size().powi(3);

    let occupied: HashSet<VoxelIndex> = segmentation
        .segments()
        .iter()
        .flat_map(|l| l.segment().voxels().iter().copied())
        .collect();
    let shells = ball_shells(options.max_ball_radius);

    let mut analyzed = Vec::with_capacity(segmentation.len());
    for labeled in segmentation.segments() {
        let segment = labeled.segment();
        let traits = SegmentTraits {
            length: segment.length(),
            insertion_height: segment.insertion_point().map_or(0.0, |p| p.z - base_z),
            insertion_angle: segment
                .parent()
                .and_then(|p| segmentation.get(p))
                .and_then(|p| insertion_angle(segment, p.segment(), options.direction_window)),
            tip_height: if segment.polyline().is_empty() {
                0.0
            } else {
                segment.top() - base_z
            },
            visible_views: segment.visible_views(),
            voxel_count: segment.voxels().len(),
            max_inscribed_radius: thickness(segment, frame, &occupied, &shells),
        };

        match labeled.label() {
            OrganLabel::Stem => {
                plant.stem_segment_count += 1;
                plant.stem_length += traits.length;
                plant.stem_diameter = plant.stem_diameter.max(2.0 * traits.max_inscribed_radius);
            }
            OrganLabel::MatureLeaf => plant.mature_leaf_count += 1,
            OrganLabel::GrowingLeaf => plant.growing_leaf_count += 1,
            OrganLabel::Unknown => plant.unknown_count += 1,
        }
        analyzed.push(AnalyzedSegment::new(labeled.clone(), traits));
    }

    log::info!(
        "architecture: {} leaves ({} mature, {} growing), height {:.3}, stem length {:.3}",
        plant.leaf_count(),
        plant.mature_leaf_count,
        plant.growing_leaf_count,
        plant.total_height,
        plant.stem_length
    );
    VoxelSegmentationInfo::new(frame, analyzed, plant)
}
