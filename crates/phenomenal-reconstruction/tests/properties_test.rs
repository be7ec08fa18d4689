//! Property tests over the reconstruction stages.

mod common;

use std::collections::BTreeSet;

use common::synthetic_scene::{grid_of, side_views, unit_frame};
use phenomenal_core::{
    CarvingOptions, Connectivity, GraphOptions, ReductionOptions, Skeleton, SkeletonOptions,
    SkeletonSegment, VoxelGrid, VoxelIndex, VoxelLattice,
};
use phenomenal_reconstruction::{carve, reduce, skeletonize, visible_views, VoxelGraph};
use proptest::prelude::*;

const ANGLES: [f64; 6] = [0.0, 30.0, 60.0, 90.0, 120.0, 150.0];

fn cells() -> impl Strategy<Value = BTreeSet<(i32, i32, i32)>> {
    prop::collection::btree_set((0i32..6, 0i32..6, 0i32..8), 1..40)
}

fn connectivity() -> impl Strategy<Value = Connectivity> {
    prop_oneof![
        Just(Connectivity::Six),
        Just(Connectivity::Eighteen),
        Just(Connectivity::TwentySix),
    ]
}

fn assert_partition(grid: &VoxelGrid, skeleton: &Skeleton) {
    let mut seen = BTreeSet::new();
    for segment in skeleton.segments() {
        for &v in segment.voxels() {
            assert!(seen.insert(v), "voxel {v:?} claimed twice");
        }
        if let Some(p) = segment.parent() {
            assert!(p < segment.id());
        }
    }
    assert_eq!(&seen, grid.index_set());
}

/// Every child starts on a point of its parent's polyline.
fn assert_children_attached(skeleton: &Skeleton) {
    for segment in skeleton.segments() {
        let (Some(p), Some(start)) = (segment.parent(), segment.insertion_point()) else {
            continue;
        };
        let parent = &skeleton.segments()[p.0];
        assert!(
            parent.polyline().iter().any(|q| q.distance(start) < 1e-9),
            "segment {} starts off its parent {}",
            segment.id(),
            p
        );
    }
}

fn path_length(skeleton: &Skeleton) -> f64 {
    skeleton.segments().iter().map(SkeletonSegment::length).sum()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn carving_never_grows_with_more_views(cells in cells(), extra in 1usize..=4) {
        let object = grid_of(cells);
        let lattice =
            VoxelLattice::new(unit_frame(), VoxelIndex::new(-1, -1, -1), VoxelIndex::new(7, 7, 9))
                .unwrap();
        let options = CarvingOptions::default();

        let few = carve(&lattice, &side_views(&object, &ANGLES[..2]), &options).unwrap();
        let many = carve(&lattice, &side_views(&object, &ANGLES[..2 + extra]), &options).unwrap();

        prop_assert!(many.len() <= few.len());
        prop_assert!(many.indices().all(|v| few.contains(v)));
        prop_assert!(object.indices().all(|v| many.contains(v)));
    }

    #[test]
    fn skeleton_claims_every_voxel_once(
        cells in cells(),
        connectivity in connectivity(),
        connect_all_points in any::<bool>(),
    ) {
        let grid = grid_of(cells);
        let graph = VoxelGraph::build(
            &grid,
            &GraphOptions { connectivity, connect_all_points, ..GraphOptions::default() },
        );
        prop_assert_eq!(graph.node_count(), grid.len());
        if connect_all_points {
            prop_assert!(graph.is_connected());
        }
        let skeleton = skeletonize(&grid, &graph, &SkeletonOptions::default());
        prop_assert_eq!(skeleton.components(), graph.components().len());
        assert_partition(&grid, &skeleton);
    }

    #[test]
    fn reduction_conserves_voxels(
        cells in cells(),
        required_visible in 0usize..4,
        nb_min_pixel in 1usize..4,
        exclusive_pixels in any::<bool>(),
    ) {
        let grid = grid_of(cells);
        let graph = VoxelGraph::build(&grid, &GraphOptions::default());
        let skeleton = skeletonize(&grid, &graph, &SkeletonOptions::default());
        let views = side_views(&grid, &ANGLES[..3]);
        let options = ReductionOptions { required_visible, nb_min_pixel, exclusive_pixels };

        assert_children_attached(&skeleton);

        let reduced = reduce(&skeleton, &views, &options).unwrap();
        prop_assert!(reduced.len() <= skeleton.len());
        assert_children_attached(&reduced);

        // Kept segments never lose path.
        let visible = visible_views(&skeleton, &views, &options).unwrap();
        let kept: f64 = skeleton
            .segments()
            .iter()
            .zip(&visible)
            .filter(|(s, &n)| s.parent().is_none() || n >= required_visible)
            .map(|(s, _)| s.length())
            .sum();
        prop_assert!(path_length(&reduced) + 1e-9 >= kept);
        prop_assert_eq!(reduced.voxel_count(), skeleton.voxel_count());
        assert_partition(&grid, &reduced);
        prop_assert!(reduced.segments().iter().all(|s| s.visible_views().is_some()));
    }
}
