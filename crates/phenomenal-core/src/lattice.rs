//! Integer voxel lattice: indices, the world frame that places them, and
//! bounded candidate spaces for carving.

use glam::{DVec3, IVec3};
use serde::{Deserialize, Serialize};

use crate::error::{PhenomenalError, Result};

/// Integer coordinates of a cell on a voxel lattice.
///
/// Ordering is lexicographic on `(x, y, z)`, which gives every ordered
/// collection of voxels a stable iteration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(from = "[i32; 3]", into = "[i32; 3]")]
pub struct VoxelIndex {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl VoxelIndex {
    /// Creates a new voxel index.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Returns the index shifted by an integer offset.
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Returns the index as a glam integer vector.
    #[must_use]
    pub fn as_ivec3(self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }
}

impl From<[i32; 3]> for VoxelIndex {
    fn from(v: [i32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<VoxelIndex> for [i32; 3] {
    fn from(v: VoxelIndex) -> Self {
        [v.x, v.y, v.z]
    }
}

impl From<IVec3> for VoxelIndex {
    fn from(v: IVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

/// Places lattice indices in world space.
///
/// The centre of cell `i` is `origin + i * voxel_size`; every cell is an
/// axis-aligned cube of side `voxel_size` around its centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatticeFrame {
    origin: DVec3,
    voxel_size: f64,
}

impl LatticeFrame {
    /// Creates a frame, rejecting non-positive or non-finite voxel sizes.
    pub fn new(origin: DVec3, voxel_size: f64) -> Result<Self> {
        if !(voxel_size.is_finite() && voxel_size > 0.0) {
            return Err(PhenomenalError::InvalidVoxelSize(voxel_size));
        }
        if !origin.is_finite() {
            return Err(PhenomenalError::InvalidBounds(format!(
                "origin {origin} is not finite"
            )));
        }
        Ok(Self { origin, voxel_size })
    }

    /// Returns the world position of index zero.
    #[must_use]
    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    /// Returns the side length of one cell.
    #[must_use]
    pub fn voxel_size(&self) -> f64 {
        self.voxel_size
    }

    /// Returns the world-space centre of a cell.
    #[must_use]
    pub fn center(&self, index: VoxelIndex) -> DVec3 {
        self.origin + index.as_ivec3().as_dvec3() * self.voxel_size
    }

    /// Returns the index of the cell containing `point`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn index_of(&self, point: DVec3) -> VoxelIndex {
        let rel = ((point - self.origin) / self.voxel_size).round();
        VoxelIndex::new(rel.x as i32, rel.y as i32, rel.z as i32)
    }

    /// Returns the index of `point` if it is a cell centre, within a
    /// tolerance of one millionth of the voxel size.
    #[must_use]
    pub fn snap(&self, point: DVec3) -> Option<VoxelIndex> {
        let index = self.index_of(point);
        let err = (self.center(index) - point).abs().max_element();
        (err <= self.voxel_size * 1e-6).then_some(index)
    }

    /// Returns the eight corners of the box spanning cells `min..=max`.
    #[must_use]
    pub fn block_corners(&self, min: VoxelIndex, max: VoxelIndex) -> [DVec3; 8] {
        let half = DVec3::splat(self.voxel_size * 0.5);
        let lo = self.center(min) - half;
        let hi = self.center(max) + half;
        [
            DVec3::new(lo.x, lo.y, lo.z),
            DVec3::new(hi.x, lo.y, lo.z),
            DVec3::new(lo.x, hi.y, lo.z),
            DVec3::new(hi.x, hi.y, lo.z),
            DVec3::new(lo.x, lo.y, hi.z),
            DVec3::new(hi.x, lo.y, hi.z),
            DVec3::new(lo.x, hi.y, hi.z),
            DVec3::new(hi.x, hi.y, hi.z),
        ]
    }
}

/// A bounded candidate space: every cell between two inclusive corner indices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoxelLattice {
    frame: LatticeFrame,
    min: VoxelIndex,
    max: VoxelIndex,
}

impl VoxelLattice {
    /// Creates a candidate lattice spanning `min..=max` in the given frame.
    pub fn new(frame: LatticeFrame, min: VoxelIndex, max: VoxelIndex) -> Result<Self> {
        if min.x > max.x || min.y > max.y || min.z > max.z {
            return Err(PhenomenalError::InvalidBounds(format!(
                "min {min:?} exceeds max {max:?}"
            )));
        }
        Ok(Self { frame, min, max })
    }

    /// Creates the smallest lattice with origin at `bbox_min` whose cell
    /// centres cover the world box `bbox_min..=bbox_max`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn enclosing(bbox_min: DVec3, bbox_max: DVec3, voxel_size: f64) -> Result<Self> {
        let frame = LatticeFrame::new(bbox_min, voxel_size)?;
        if !bbox_max.is_finite() || bbox_max.cmplt(bbox_min).any() {
            return Err(PhenomenalError::InvalidBounds(format!(
                "box {bbox_min} .. {bbox_max} is empty or not finite"
            )));
        }
        let extent = ((bbox_max - bbox_min) / voxel_size).ceil();
        let max = VoxelIndex::new(extent.x as i32, extent.y as i32, extent.z as i32);
        Self::new(frame, VoxelIndex::default(), max)
    }

    /// Returns the world frame of the lattice.
    #[must_use]
    pub fn frame(&self) -> LatticeFrame {
        self.frame
    }

    /// Returns the inclusive lower corner index.
    #[must_use]
    pub fn min(&self) -> VoxelIndex {
        self.min
    }

    /// Returns the inclusive upper corner index.
    #[must_use]
    pub fn max(&self) -> VoxelIndex {
        self.max
    }

    /// Returns the number of cells along each axis.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn dims(&self) -> [usize; 3] {
        [
            (self.max.x - self.min.x + 1) as usize,
            (self.max.y - self.min.y + 1) as usize,
            (self.max.z - self.min.z + 1) as usize,
        ]
    }

    /// Returns the total number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        let [nx, ny, nz] = self.dims();
        nx * ny * nz
    }

    /// Returns true if the lattice has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether an index lies inside the lattice.
    #[must_use]
    pub fn contains(&self, index: VoxelIndex) -> bool {
        (self.min.x..=self.max.x).contains(&index.x)
            && (self.min.y..=self.max.y).contains(&index.y)
            && (self.min.z..=self.max.z).contains(&index.z)
    }

    /// Flattens a lattice index to a linear index (x fastest).
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn flatten_index(&self, index: VoxelIndex) -> usize {
        let [nx, ny, _] = self.dims();
        let i = (index.x - self.min.x) as usize;
        let j = (index.y - self.min.y) as usize;
        let k = (index.z - self.min.z) as usize;
        i + j * nx + k * nx * ny
    }

    /// Unflattens a linear index to a lattice index.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn unflatten_index(&self, idx: usize) -> VoxelIndex {
        let [nx, ny, _] = self.dims();
        let x = idx % nx;
        let y = (idx / nx) % ny;
        let z = idx / (nx * ny);
        self.min.offset(x as i32, y as i32, z as i32)
    }

    /// Iterates over every cell in linear order.
    pub fn iter(&self) -> impl Iterator<Item = VoxelIndex> + '_ {
        (0..self.len()).map(|i| self.unflatten_index(i))
    }
}
