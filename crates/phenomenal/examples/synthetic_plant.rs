//! Reconstructs a synthetic plant seen by an orthographic turntable camera.
//!
//! Run with: cargo run --example synthetic_plant -- [output.json.gz]

use std::sync::Arc;

use phenomenal::*;

const IMAGE_SIZE: u32 = 160;

/// Stem of 60 voxels with four leaves rising at 45 degrees, then bending.
fn plant_cells() -> Vec<(i32, i32, i32)> {
    let mut cells: Vec<_> = (0..60).map(|z| (0, 0, z)).collect();
    for (z, (dx, dy)) in [(12, (1, 0)), (24, (-1, 0)), (36, (0, 1)), (55, (0, -1))] {
        for k in 1..=12 {
            let rise = k.min(8);
            cells.push((k * dx, k * dy, z + rise));
        }
    }
    cells
}

fn main() -> Result<()> {
    init_logging();

    let frame = LatticeFrame::new(DVec3::ZERO, 1.0)?;
    let centers: Vec<DVec3> = plant_cells()
        .into_iter()
        .map(|(x, y, z)| frame.center(VoxelIndex::new(x, y, z)))
        .collect();

    let camera: Arc<dyn Projection> = Arc::new(|p: DVec3, angle: f64| {
        let a = angle.to_radians();
        let c = f64::from(IMAGE_SIZE) / 2.0 + 0.5;
        DVec2::new(p.x * a.cos() + p.y * a.sin() + c, c + 40.0 - p.z)
    });
    let silhouettes: SilhouetteSet = (0..12)
        .map(|i| {
            let angle = f64::from(i) * 30.0;
            let mut image = BinaryImage::new(IMAGE_SIZE, IMAGE_SIZE);
            for &p in &centers {
                if let Some((x, y)) = image.pixel_of(camera.project(p, angle)) {
                    image.set(x, y, true);
                }
            }
            (angle, image)
        })
        .collect();
    let views = MultiViewInput::single("side", camera, silhouettes)?;

    let mut options = PipelineOptions::default();
    options.reduction.nb_min_pixel = 3;
    options.carving.refinement_levels = 3;
    let lattice = VoxelLattice::new(frame, VoxelIndex::new(-20, -20, -2), VoxelIndex::new(20, 20, 70))?;
    let output = Pipeline::new(options)?.run(&lattice, &views)?;

    let errors = reprojection_error(&output.grid, &views)?;
    let missing: usize = errors.iter().map(|e| e.missing).sum();
    println!("carved {} voxels, {missing} silhouette pixels unexplained", output.grid.len());
    for segment in output.info.segments() {
        let t = segment.traits();
        println!(
            "segment {} {:<13} length {:6.2} insertion {:6.2} angle {}",
            segment.segment().id(),
            segment.label(),
            t.length,
            t.insertion_height,
            t.insertion_angle.map_or("-".to_string(), |a| format!("{a:.1}")),
        );
    }
    let plant = output.info.plant();
    println!(
        "{} leaves ({} mature, {} growing), height {:.1}",
        plant.leaf_count(),
        plant.mature_leaf_count,
        plant.growing_leaf_count,
        plant.total_height
    );

    if let Some(path) = std::env::args().nth(1) {
        write_segmentation_info(&path, &output.info)?;
        println!("wrote {path}");
    }
    Ok(())
}
