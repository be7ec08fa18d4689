//! Multi-view voxel carving.
//!
//! A candidate cell is kept when, in every view group, enough silhouettes
//! see its centre as foreground. All views are checked before a voxel is
//! accepted; a voxel is only rejected early once it can no longer reach the
//! required count.
//!
//! With `refinement_levels > 0` carving starts from blocks of
//! `2^levels` cells per axis. A block survives when the bounding box of its
//! projected corners touches foreground, which is a superset of what its
//! cells' centres can see, so refinement never loses a voxel the flat test
//! would keep.

use glam::{DVec2, DVec3};
use phenomenal_core::{
    CarvingOptions, LatticeFrame, MultiViewInput, Result, View, VoxelGrid, VoxelIndex,
    VoxelLattice,
};

use crate::parallel;

/// Number of agreeing silhouettes required in each view group, in group order.
fn requirements(views: &MultiViewInput, options: &CarvingOptions) -> Vec<usize> {
    views
        .groups()
        .iter()
        .map(|g| options.required_for(g.name(), g.silhouettes().len()))
        .collect()
}

/// True when carving cannot corroborate any voxel.
fn degenerate(views: &MultiViewInput) -> bool {
    views.groups().is_empty() || views.groups().iter().any(|g| g.silhouettes().is_empty())
}

/// Counts, group by group, the views for which `sees` holds and checks the
/// counts against `required`.
fn consistent(
    views: &MultiViewInput,
    required: &[usize],
    mut sees: impl FnMut(&View<'_>) -> Result<bool>,
) -> Result<bool> {
    for (group, &need) in views.groups().iter().zip(required) {
        let mut remaining = group.silhouettes().len();
        let mut seen = 0;
        for view in views.group_views(group) {
            remaining -= 1;
            if sees(&view)? {
                seen += 1;
            }
            if seen + remaining < need {
                return Ok(false);
            }
        }
        if seen < need {
            return Ok(false);
        }
    }
    Ok(true)
}

fn center_is_consistent(center: DVec3, views: &MultiViewInput, required: &[usize]) -> Result<bool> {
    consistent(views, required, |view| view.sees(center))
}

/// Returns whether the projected footprint of a world box touches foreground.
fn footprint_touches_foreground(view: &View<'_>, corners: &[DVec3; 8]) -> Result<bool> {
    let mut lo = DVec2::splat(f64::INFINITY);
    let mut hi = DVec2::splat(f64::NEG_INFINITY);
    for &c in corners {
        let p = view.project(c)?;
        lo = lo.min(p);
        hi = hi.max(p);
    }
    Ok(view.image.any_foreground_in(lo, hi))
}

/// Carves every cell of a bounded candidate lattice.
pub fn carve(
    lattice: &VoxelLattice,
    views: &MultiViewInput,
    options: &CarvingOptions,
) -> Result<VoxelGrid> {
    options.validate()?;
    let frame = lattice.frame();
    if degenerate(views) {
        log::warn!("voxel carving: no silhouette to corroborate against, grid is empty");
        return Ok(VoxelGrid::empty(frame));
    }
    let required = requirements(views, options);

    let kept = if options.refinement_levels == 0 {
        let candidates: Vec<VoxelIndex> = lattice.iter().collect();
        parallel::retain(candidates, |&i| {
            center_is_consistent(frame.center(i), views, &required)
        })?
    } else {
        carve_blocks(lattice, views, &required, options.refinement_levels)?
    };

    let grid = VoxelGrid::from_indices(frame, kept);
    log_result(lattice.len(), &grid);
    Ok(grid)
}

/// Filters an existing grid, keeping voxels consistent with every view.
pub fn carve_grid(
    candidates: &VoxelGrid,
    views: &MultiViewInput,
    options: &CarvingOptions,
) -> Result<VoxelGrid> {
    options.validate()?;
    let frame = candidates.frame();
    if degenerate(views) {
        log::warn!("voxel carving: no silhouette to corroborate against, grid is empty");
        return Ok(VoxelGrid::empty(frame));
    }
    let required = requirements(views, options);
    let kept = parallel::retain(candidates.indices().collect(), |&i| {
        center_is_consistent(frame.center(i), views, &required)
    })?;
    let grid = VoxelGrid::from_indices(frame, kept);
    log_result(candidates.len(), &grid);
    Ok(grid)
}

fn log_result(candidates: usize, grid: &VoxelGrid) {
    if grid.is_empty() {
        log::warn!("voxel carving: no voxel out of {candidates} is consistent with the views");
    } else {
        log::info!(
            "voxel carving: kept {} of {candidates} candidate voxels (volume {:.3})",
            grid.len(),
            grid.volume()
        );
    }
}

/// An axis-aligned block of `span^3` cells whose lowest cell is `base`.
#[derive(Debug, Clone, Copy)]
struct Block {
    base: VoxelIndex,
    span: i32,
}

impl Block {
    fn last_cell(self, lattice: &VoxelLattice) -> VoxelIndex {
        let m = lattice.max();
        VoxelIndex::new(
            (self.base.x + self.span - 1).min(m.x),
            (self.base.y + self.span - 1).min(m.y),
            (self.base.z + self.span - 1).min(m.z),
        )
    }

    fn children(self, lattice: &VoxelLattice) -> impl Iterator<Item = Block> + '_ {
        let half = self.span / 2;
        (0..8).filter_map(move |octant| {
            let base = self.base.offset(
                (octant & 1) * half,
                ((octant >> 1) & 1) * half,
                ((octant >> 2) & 1) * half,
            );
            lattice.contains(base).then_some(Block { base, span: half })
        })
    }
}

fn carve_blocks(
    lattice: &VoxelLattice,
    views: &MultiViewInput,
    required: &[usize],
    levels: u32,
) -> Result<Vec<VoxelIndex>> {
    let frame: LatticeFrame = lattice.frame();
    let span = 1_i32 << levels.min(16);
    let (min, max) = (lattice.min(), lattice.max());

    let mut blocks = Vec::new();
    for z in (min.z..=max.z).step_by(span as usize) {
        for y in (min.y..=max.y).step_by(span as usize) {
            for x in (min.x..=max.x).step_by(span as usize) {
                blocks.push(Block {
                    base: VoxelIndex::new(x, y, z),
                    span,
                });
            }
        }
    }

    while blocks.first().is_some_and(|b| b.span > 1) {
        let tested = blocks.len();
        let survivors = parallel::retain(blocks, |b| {
            let corners = frame.block_corners(b.base, b.last_cell(lattice));
            consistent(views, required, |view| {
                footprint_touches_foreground(view, &corners)
            })
        })?;
        log::debug!(
            "voxel carving: {} of {tested} blocks of span {} survive",
            survivors.len(),
            survivors.first().map_or(0, |b| b.span)
        );
        blocks = survivors.into_iter().flat_map(|b| b.children(lattice)).collect();
    }

    let cells = blocks.into_iter().map(|b| b.base).collect();
    parallel::retain(cells, |&i| center_is_consistent(frame.center(i), views, required))
}

/// Silhouette disagreement for one view after reprojecting a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewError {
    /// View group name.
    pub group: String,
    /// Acquisition angle in degrees.
    pub angle: f64,
    /// Foreground pixels no voxel footprint covers.
    pub missing: usize,
    /// Covered pixels that are background in the silhouette.
    pub spurious: usize,
}

impl ViewError {
    /// Returns the number of disagreeing pixels.
    #[must_use]
    pub fn total(&self) -> usize {
        self.missing + self.spurious
    }
}

/// Reprojects every voxel footprint into each view and counts pixels that
/// disagree with the silhouette.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn reprojection_error(grid: &VoxelGrid, views: &MultiViewInput) -> Result<Vec<ViewError>> {
    let frame = grid.frame();
    let all: Vec<View<'_>> = views.views().collect();
    let mut errors = Vec::with_capacity(all.len());
    for view in all {
        let (w, h) = (view.image.width(), view.image.height());
        let mut covered = vec![false; w as usize * h as usize];
        for i in grid.indices() {
            let mut lo = DVec2::splat(f64::INFINITY);
            let mut hi = DVec2::splat(f64::NEG_INFINITY);
            for c in frame.block_corners(i, i) {
                let p = view.project(c)?;
                lo = lo.min(p);
                hi = hi.max(p);
            }
            let lo = lo.floor().max(DVec2::ZERO);
            let hi = hi.floor().min(DVec2::new(f64::from(w) - 1.0, f64::from(h) - 1.0));
            if lo.x > hi.x || lo.y > hi.y {
                continue;
            }
            for y in lo.y as u32..=hi.y as u32 {
                for x in lo.x as u32..=hi.x as u32 {
                    covered[y as usize * w as usize + x as usize] = true;
                }
            }
        }
        let mut missing = 0;
        let mut spurious = 0;
        for y in 0..h {
            for x in 0..w {
                match (view.image.get(x, y), covered[y as usize * w as usize + x as usize]) {
                    (true, false) => missing += 1,
                    (false, true) => spurious += 1,
                    _ => {}
                }
            }
        }
        errors.push(ViewError {
            group: view.group.to_string(),
            angle: view.angle,
            missing,
            spurious,
        });
    }
    Ok(errors)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use phenomenal_core::{BinaryImage, PhenomenalError, Projection, SilhouetteSet};

    fn ortho() -> Arc<dyn Projection> {
        Arc::new(|p: DVec3, angle: f64| {
            let a = angle.to_radians();
            DVec2::new(p.x * a.cos() + p.y * a.sin() + 10.5, 10.5 - p.z)
        })
    }

    fn render(points: &[DVec3], angles: &[f64]) -> SilhouetteSet {
        let projection = ortho();
        angles
            .iter()
            .map(|&angle| {
                let mut img = BinaryImage::new(21, 21);
                for &p in points {
                    let q = projection.project(p, angle);
                    img.set(q.x.floor() as u32, q.y.floor() as u32, true);
                }
                (angle, img)
            })
            .collect()
    }

    fn cube() -> Vec<DVec3> {
        let mut pts = Vec::new();
        for x in -1..=1 {
            for y in -1..=1 {
                for z in 0..=2 {
                    pts.push(DVec3::new(f64::from(x), f64::from(y), f64::from(z)));
                }
            }
        }
        pts
    }

    fn lattice() -> VoxelLattice {
        let frame = LatticeFrame::new(DVec3::ZERO, 1.0).unwrap();
        VoxelLattice::new(frame, VoxelIndex::new(-3, -3, -1), VoxelIndex::new(3, 3, 4)).unwrap()
    }

    fn input(angles: &[f64]) -> MultiViewInput {
        MultiViewInput::single("side", ortho(), render(&cube(), angles)).unwrap()
    }

    #[test]
    fn test_two_views_recover_cube() {
        let grid = carve(&lattice(), &input(&[0.0, 90.0]), &CarvingOptions::default()).unwrap();
        assert_eq!(grid.len(), 27);
        for p in cube() {
            assert!(grid.contains(grid.frame().index_of(p)));
        }
    }

    #[test]
    fn test_refinement_matches_flat() {
        let views = input(&[0.0, 45.0, 90.0]);
        let flat = carve(&lattice(), &views, &CarvingOptions::default()).unwrap();
        for levels in 1..=3 {
            let options = CarvingOptions {
                refinement_levels: levels,
                ..CarvingOptions::default()
            };
            let refined = carve(&lattice(), &views, &options).unwrap();
            assert_eq!(refined.index_set(), flat.index_set(), "levels = {levels}");
        }
    }

    #[test]
    fn test_more_views_never_add_voxels() {
        let one = carve(&lattice(), &input(&[0.0]), &CarvingOptions::default()).unwrap();
        let two = carve(&lattice(), &input(&[0.0, 90.0]), &CarvingOptions::default()).unwrap();
        assert!(two.len() <= one.len());
        assert!(two.indices().all(|i| one.contains(i)));
    }

    #[test]
    fn test_relaxed_requirement() {
        let views = input(&[0.0, 90.0]);
        let strict = carve(&lattice(), &views, &CarvingOptions::default()).unwrap();
        let mut options = CarvingOptions::default();
        options.min_visible.insert("side".to_string(), 1);
        let relaxed = carve(&lattice(), &views, &options).unwrap();
        assert!(relaxed.len() > strict.len());
        assert!(strict.indices().all(|i| relaxed.contains(i)));
    }

    #[test]
    fn test_zero_requirement_rejected() {
        let views = input(&[0.0, 90.0]);
        let mut options = CarvingOptions::default();
        options.min_visible.insert("side".to_string(), 0);
        let err = carve(&lattice(), &views, &options).unwrap_err();
        assert!(matches!(err, PhenomenalError::InvalidOption { name: "carving.min_visible", .. }));
        let grid = carve(&lattice(), &views, &CarvingOptions::default()).unwrap();
        assert!(carve_grid(&grid, &views, &options).is_err());
    }

    #[test]
    fn test_carve_grid_filters_candidates() {
        let views = input(&[0.0, 90.0]);
        let frame = LatticeFrame::new(DVec3::ZERO, 1.0).unwrap();
        let candidates = VoxelGrid::from_indices(
            frame,
            [VoxelIndex::new(0, 0, 0), VoxelIndex::new(2, 2, 2), VoxelIndex::new(1, -1, 2)],
        );
        let grid = carve_grid(&candidates, &views, &CarvingOptions::default()).unwrap();
        assert_eq!(grid.len(), 2);
        assert!(!grid.contains(VoxelIndex::new(2, 2, 2)));
    }

    #[test]
    fn test_empty_silhouettes_give_empty_grid() {
        let views = MultiViewInput::single("side", ortho(), SilhouetteSet::new()).unwrap();
        let grid = carve(&lattice(), &views, &CarvingOptions::default()).unwrap();
        assert!(grid.is_empty());
        let grid = carve(&lattice(), &MultiViewInput::default(), &CarvingOptions::default()).unwrap();
        assert!(grid.is_empty());
    }

    #[test]
    fn test_non_finite_projection_fails() {
        let bad: Arc<dyn Projection> = Arc::new(|_p: DVec3, _a: f64| DVec2::splat(f64::INFINITY));
        let views =
            MultiViewInput::single("side", bad, render(&cube(), &[0.0])).unwrap();
        let err = carve(&lattice(), &views, &CarvingOptions::default()).unwrap_err();
        assert!(matches!(err, PhenomenalError::NonFiniteProjection { .. }));
    }

    #[test]
    fn test_reprojection_covers_silhouette() {
        let views = input(&[0.0, 90.0]);
        let grid = carve(&lattice(), &views, &CarvingOptions::default()).unwrap();
        let errors = reprojection_error(&grid, &views).unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.missing == 0));
    }
}
