//! Synthetic orthographic turntable scenes for integration tests.

use std::sync::Arc;

use phenomenal_core::{
    BinaryImage, DVec2, DVec3, LatticeFrame, MultiViewInput, Projection, SilhouetteSet, VoxelGrid,
    VoxelIndex,
};

/// Width and height of every rendered silhouette.
pub const IMAGE_SIZE: u32 = 64;

/// Orthographic side camera at one pixel per world unit. The object turns
/// about the z axis by the view angle; image rows grow downwards.
pub fn turntable() -> Arc<dyn Projection> {
    Arc::new(|p: DVec3, angle: f64| {
        let a = angle.to_radians();
        let c = f64::from(IMAGE_SIZE) / 2.0 + 0.5;
        DVec2::new(p.x * a.cos() + p.y * a.sin() + c, c - p.z)
    })
}

/// Marks the pixel under each point as foreground, per angle.
pub fn render(points: &[DVec3], angles: &[f64]) -> SilhouetteSet {
    let projection = turntable();
    angles
        .iter()
        .map(|&angle| {
            let mut image = BinaryImage::new(IMAGE_SIZE, IMAGE_SIZE);
            for &p in points {
                if let Some((x, y)) = image.pixel_of(projection.project(p, angle)) {
                    image.set(x, y, true);
                }
            }
            (angle, image)
        })
        .collect()
}

/// Side views of `grid` rendered from its voxel centres.
pub fn side_views(grid: &VoxelGrid, angles: &[f64]) -> MultiViewInput {
    let centers: Vec<DVec3> = grid.centers().collect();
    MultiViewInput::single("side", turntable(), render(&centers, angles)).expect("consistent views")
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
