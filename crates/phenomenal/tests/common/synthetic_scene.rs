//! Synthetic orthographic turntable scenes for pipeline tests.

use std::sync::Arc;

use phenomenal::{
    BinaryImage, DVec2, DVec3, LatticeFrame, MultiViewInput, Projection, SilhouetteSet, VoxelGrid,
    VoxelIndex, VoxelLattice,
};

pub const IMAGE_SIZE: u32 = 64;

/// Orthographic side camera at one pixel per world unit, turning the
/// object about the z axis.
pub fn turntable() -> Arc<dyn Projection> {
    Arc::new(|p: DVec3, angle: f64| {
        let a = angle.to_radians();
        let c = f64::from(IMAGE_SIZE) / 2.0 + 0.5;
        DVec2::new(p.x * a.cos() + p.y * a.sin() + c, c - p.z)
    })
}

/// Side views in which exactly the pixels under the voxel centres of
/// `visible` are foreground.
pub fn side_views(visible: &VoxelGrid, angles: &[f64]) -> MultiViewInput {
    let projection = turntable();
    let set: SilhouetteSet = angles
        .iter()
        .map(|&angle| {
            let mut image = BinaryImage::new(IMAGE_SIZE, IMAGE_SIZE);
            for p in visible.centers() {
                if let Some((x, y)) = image.pixel_of(projection.project(p, angle)) {
                    image.set(x, y, true);
                }
            }
            (angle, image)
        })
        .collect();
    MultiViewInput::single("side", projection, set).expect("consistent views")
}

pub fn unit_frame() -> LatticeFrame {
    LatticeFrame::new(DVec3::ZERO, 1.0).expect("valid frame")
}

pub fn grid_of(cells: impl IntoIterator<Item = (i32, i32, i32)>) -> VoxelGrid {
    VoxelGrid::from_indices(
        unit_frame(),
        cells.into_iter().map(|(x, y, z)| VoxelIndex::new(x, y, z)),
    )
}

/// Candidate space around the scenes used in these tests.
pub fn lattice() -> VoxelLattice {
    VoxelLattice::new(unit_frame(), VoxelIndex::new(-8, -8, -2), VoxelIndex::new(8, 8, 14))
        .expect("valid lattice")
}

/// A vertical stem of 12 voxels.
pub fn stem() -> Vec<(i32, i32, i32)> {
    (0..12).map(|z| (0, 0, z)).collect()
}

/// A lateral branch of 6 voxels along +x at mid height.
pub fn branch() -> Vec<(i32, i32, i32)> {
    (1..=6).map(|x| (x, 0, 6)).collect()
}
