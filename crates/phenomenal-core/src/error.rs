//! Error types for phenomenal-rs.

use thiserror::Error;

/// The main error type for phenomenal-rs operations.
///
/// Only malformed input and unreadable archives are errors. Degenerate but
/// valid results (empty grids, disconnected skeletons, zero segments) flow
/// through the pipeline as empty structures instead.
#[derive(Error, Debug)]
pub enum PhenomenalError {
    /// Voxel size must be strictly positive and finite.
    #[error("invalid voxel size {0}: must be finite and > 0")]
    InvalidVoxelSize(f64),

    /// Lattice bounds are reversed or not finite.
    #[error("invalid lattice bounds: {0}")]
    InvalidBounds(String),

    /// A point does not sit on the lattice of the grid it is added to.
    #[error("point ({x}, {y}, {z}) is not a lattice centre")]
    OffLattice { x: f64, y: f64, z: f64 },

    /// A silhouette contains a pixel value that is neither background nor foreground.
    #[error("non-binary image: pixel ({x}, {y}) has value {value}")]
    NonBinaryImage { x: u32, y: u32, value: u8 },

    /// Data size mismatch.
    #[error("data size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Calibrations and silhouettes do not describe the same view groups.
    #[error("view group '{0}' has silhouettes but no calibration, or the reverse")]
    ViewGroupMismatch(String),

    /// A silhouette was acquired at an angle its calibration does not cover.
    #[error("view group '{group}' has no calibration for angle {angle}")]
    AngleMismatch { group: String, angle: f64 },

    /// A projection returned a non-finite pixel coordinate.
    #[error("projection of ({x}, {y}, {z}) in view '{group}' at angle {angle} is not finite")]
    NonFiniteProjection {
        group: String,
        angle: f64,
        x: f64,
        y: f64,
        z: f64,
    },

    /// An option value is out of its accepted range.
    #[error("invalid option '{name}': {reason}")]
    InvalidOption { name: &'static str, reason: String },

    /// A persisted archive could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A persisted archive was written by an unsupported format version.
    #[error("unsupported archive version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// A specialized Result type for phenomenal-rs operations.
pub type Result<T> = std::result::Result<T, PhenomenalError>;
