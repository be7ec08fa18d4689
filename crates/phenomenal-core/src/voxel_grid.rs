//! Carved voxel occupancy sets.

use std::collections::BTreeSet;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::error::{PhenomenalError, Result};
use crate::lattice::{LatticeFrame, VoxelIndex};

/// An unordered set of unique occupied cells on one lattice.
///
/// Grids are never mutated after construction; [`VoxelGrid::filter`] and
/// friends produce new grids instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoxelGrid {
    frame: LatticeFrame,
    voxels: BTreeSet<VoxelIndex>,
}

impl VoxelGrid {
    /// Creates an empty grid on the given lattice.
    #[must_use]
    pub fn empty(frame: LatticeFrame) -> Self {
        Self {
            frame,
            voxels: BTreeSet::new(),
        }
    }

    /// Creates a grid from lattice indices. Duplicates collapse.
    pub fn from_indices(frame: LatticeFrame, indices: impl IntoIterator<Item = VoxelIndex>) -> Self {
        Self {
            frame,
            voxels: indices.into_iter().collect(),
        }
    }

    /// Creates a grid from world-space centres, each of which must sit on the
    /// lattice defined by `origin` and `voxel_size`.
    pub fn from_centers(
        origin: DVec3,
        voxel_size: f64,
        centers: impl IntoIterator<Item = DVec3>,
    ) -> Result<Self> {
        let frame = LatticeFrame::new(origin, voxel_size)?;
        let voxels = centers
            .into_iter()
            .map(|c| {
                frame.snap(c).ok_or(PhenomenalError::OffLattice {
                    x: c.x,
                    y: c.y,
                    z: c.z,
                })
            })
            .collect::<Result<BTreeSet<_>>>()?;
        Ok(Self { frame, voxels })
    }

    /// Returns the lattice frame of the grid.
    #[must_use]
    pub fn frame(&self) -> LatticeFrame {
        self.frame
    }

    /// Returns the side length of one voxel.
    #[must_use]
    pub fn voxel_size(&self) -> f64 {
        self.frame.voxel_size()
    }

    /// Returns the number of occupied voxels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    /// Returns true if no voxel is occupied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    /// Returns whether a cell is occupied.
    #[must_use]
    pub fn contains(&self, index: VoxelIndex) -> bool {
        self.voxels.contains(&index)
    }

    /// Iterates over occupied indices in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = VoxelIndex> + '_ {
        self.voxels.iter().copied()
    }

    /// Returns the occupied index set.
    #[must_use]
    pub fn index_set(&self) -> &BTreeSet<VoxelIndex> {
        &self.voxels
    }

    /// Iterates over world-space voxel centres in index order.
    pub fn centers(&self) -> impl Iterator<Item = DVec3> + '_ {
        self.voxels.iter().map(|&i| self.frame.center(i))
    }

    /// Returns the world-space centre of a cell.
    #[must_use]
    pub fn center(&self, index: VoxelIndex) -> DVec3 {
        self.frame.center(index)
    }

    /// Returns the occupied volume in world units.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn volume(&self) -> f64 {
        self.voxels.len() as f64 * self.voxel_size().powi(3)
    }

    /// Returns a new grid holding only the voxels accepted by `keep`.
    #[must_use]
    pub fn filter(&self, mut keep: impl FnMut(VoxelIndex) -> bool) -> Self {
        Self {
            frame: self.frame,
            voxels: self.voxels.iter().copied().filter(|&i| keep(i)).collect(),
        }
    }

    /// Returns the bounding box of voxel centres, or `None` for an empty grid.
    #[must_use]
    pub fn bounds(&self) -> Option<(DVec3, DVec3)> {
        let mut centers = self.centers();
        let first = centers.next()?;
        Some(centers.fold((first, first), |(lo, hi), c| (lo.min(c), hi.max(c))))
    }

    /// Returns the lowest voxel (smallest z), breaking ties by index order.
    ///
    /// This is the plant base used as skeleton root.
    #[must_use]
    pub fn lowest(&self) -> Option<VoxelIndex> {
        self.voxels.iter().copied().min_by_key(|i| (i.z, *i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_frame() -> LatticeFrame {
        LatticeFrame::new(DVec3::ZERO, 1.0).unwrap()
    }

    #[test]
    fn test_duplicates_collapse() {
        let idx = VoxelIndex::new(1, 2, 3);
        let grid = VoxelGrid::from_indices(unit_frame(), [idx, idx, VoxelIndex::default()]);
        assert_eq!(grid.len(), 2);
        assert!(grid.contains(idx));
    }

    #[test]
    fn test_from_centers_rejects_off_lattice() {
        let ok = VoxelGrid::from_centers(DVec3::ZERO, 2.0, [DVec3::new(2.0, 4.0, -2.0)]);
        assert_eq!(ok.unwrap().len(), 1);
        let bad = VoxelGrid::from_centers(DVec3::ZERO, 2.0, [DVec3::new(1.0, 0.0, 0.0)]);
        assert!(matches!(bad, Err(PhenomenalError::OffLattice { .. })));
        let size = VoxelGrid::from_centers(DVec3::ZERO, 0.0, []);
        assert!(matches!(size, Err(PhenomenalError::InvalidVoxelSize(_))));
    }

    #[test]
    fn test_filter_produces_new_grid() {
        let grid = VoxelGrid::from_indices(unit_frame(), (0..5).map(|z| VoxelIndex::new(0, 0, z)));
        let low = grid.filter(|i| i.z < 2);
        assert_eq!(grid.len(), 5);
        assert_eq!(low.len(), 2);
    }

    #[test]
    fn test_lowest_and_bounds() {
        let grid = VoxelGrid::from_indices(
            unit_frame(),
            [
                VoxelIndex::new(3, 0, 1),
                VoxelIndex::new(2, 5, 1),
                VoxelIndex::new(0, 0, 4),
            ],
        );
        assert_eq!(grid.lowest(), Some(VoxelIndex::new(2, 5, 1)));
        let (lo, hi) = grid.bounds().unwrap();
        assert_eq!(lo, DVec3::new(0.0, 0.0, 1.0));
        assert_eq!(hi, DVec3::new(3.0, 5.0, 4.0));
        assert!(VoxelGrid::empty(unit_frame()).bounds().is_none());
    }
}
