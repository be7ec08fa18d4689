//! Organ segmentation and architecture analysis for phenomenal-rs.
//!
//! [`segment_organs`] labels the segments of a reduced [`Skeleton`] as stem,
//! mature leaf, growing leaf or unknown. [`analyze`] attaches per-segment
//! traits and whole-plant aggregates to the labeled segmentation.
//!
//! [`Skeleton`]: phenomenal_core::Skeleton

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
// Voxel counts become volumes
#![allow(clippy::cast_precision_loss)]

pub mod analysis;
pub mod organs;

pub use analysis::analyze;
pub use organs::segment_organs;
