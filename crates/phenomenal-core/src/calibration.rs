//! Calibrated projection from world space into silhouette pixels.
//!
//! Calibration *fitting* happens elsewhere; this module only consumes fitted
//! parameters. Anything that can map a 3D point seen at a turntable angle to
//! pixel coordinates implements [`Projection`], including plain closures.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use glam::{DMat3, DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Maps a world point observed at a given acquisition angle (degrees) to
/// pixel coordinates `(column, row)`.
pub trait Projection: Send + Sync {
    /// Projects `point` into the image taken at `angle` degrees.
    fn project(&self, point: DVec3, angle: f64) -> DVec2;

    /// Angles this calibration was fitted for, if it is restricted to a set.
    ///
    /// `None` means any angle can be projected.
    fn calibrated_angles(&self) -> Option<&[f64]> {
        None
    }
}

impl<F> Projection for F
where
    F: Fn(DVec3, f64) -> DVec2 + Send + Sync,
{
    fn project(&self, point: DVec3, angle: f64) -> DVec2 {
        self(point, angle)
    }
}

/// Camera placement relative to the turntable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraKind {
    /// Horizontal camera looking at the plant from the side.
    #[default]
    Side,
    /// Camera above the plant looking down.
    Top,
}

impl CameraKind {
    /// Returns the default camera axes expressed in world coordinates, as
    /// matrix columns `(image x, image y, optical axis)`.
    #[must_use]
    pub fn default_origin_axis(self) -> DMat3 {
        match self {
            Self::Side => DMat3::from_cols(DVec3::X, DVec3::NEG_Z, DVec3::Y),
            Self::Top => DMat3::from_cols(DVec3::X, DVec3::NEG_Y, DVec3::NEG_Z),
        }
    }
}

/// Fitted pinhole camera observing a plant on a rotating turntable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    /// Side or top camera.
    pub kind: CameraKind,
    /// Image width in pixels.
    pub width_image: f64,
    /// Image height in pixels.
    pub height_image: f64,
    /// Focal length along image x, in pixels.
    pub focal_length_x: f64,
    /// Focal length along image y, in pixels.
    pub focal_length_y: f64,
    /// Camera centre in world coordinates.
    pub position: DVec3,
    /// Extra rotation about the camera x, y and z axes, in radians.
    pub rotation: DVec3,
    /// Multiplier applied to acquisition angles before turning the plant.
    pub angle_factor: f64,
    /// Camera axes in world coordinates before `rotation` is applied.
    pub origin_axis: DMat3,
    /// Angles the calibration was fitted for. Empty means unrestricted.
    #[serde(default)]
    pub angles: Vec<f64>,
}

impl CameraCalibration {
    /// Creates a calibration with default axes for `kind` and no extra rotation.
    #[must_use]
    pub fn new(
        kind: CameraKind,
        image_size: (f64, f64),
        focal_length: (f64, f64),
        position: DVec3,
    ) -> Self {
        Self {
            kind,
            width_image: image_size.0,
            height_image: image_size.1,
            focal_length_x: focal_length.0,
            focal_length_y: focal_length.1,
            position,
            rotation: DVec3::ZERO,
            angle_factor: 1.0,
            origin_axis: kind.default_origin_axis(),
            angles: Vec::new(),
        }
    }

    /// Restricts the calibration to a set of acquisition angles.
    #[must_use]
    pub fn with_angles(mut self, angles: Vec<f64>) -> Self {
        self.angles = angles;
        self
    }

    /// Returns the rotation taking camera-frame vectors to world vectors.
    #[must_use]
    pub fn camera_rotation(&self) -> DMat3 {
        self.origin_axis
            * DMat3::from_rotation_x(self.rotation.x)
            * DMat3::from_rotation_y(self.rotation.y)
            * DMat3::from_rotation_z(self.rotation.z)
    }

    /// Expresses a world point in the camera frame after turning the plant
    /// by `angle` degrees.
    #[must_use]
    pub fn camera_point(&self, point: DVec3, angle: f64) -> DVec3 {
        let turned = DMat3::from_rotation_z((angle * self.angle_factor).to_radians()) * point;
        self.camera_rotation().transpose() * (turned - self.position)
    }

    /// Loads calibration parameters from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Writes calibration parameters as pretty-printed JSON.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

impl Projection for CameraCalibration {
    fn project(&self, point: DVec3, angle: f64) -> DVec2 {
        let p = self.camera_point(point, angle);
        DVec2::new(
            p.x / p.z * self.focal_length_x + self.width_image / 2.0,
            p.y / p.z * self.focal_length_y + self.height_image / 2.0,
        )
    }

    fn calibrated_angles(&self) -> Option<&[f64]> {
        (!self.angles.is_empty()).then_some(self.angles.as_slice())
    }
}
