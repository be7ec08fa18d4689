//! Binary silhouettes and the calibrated multi-view input consumed by
//! carving and segment reduction.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::calibration::Projection;
use crate::error::{PhenomenalError, Result};

/// Pixel value marking foreground in 8-bit silhouettes.
pub const FOREGROUND: u8 = 255;
/// Pixel value marking background in 8-bit silhouettes.
pub const BACKGROUND: u8 = 0;

/// A foreground/background mask, stored row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryImage {
    width: u32,
    height: u32,
    pixels: Vec<bool>,
}

impl BinaryImage {
    /// Creates an all-background image.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![false; width as usize * height as usize],
        }
    }

    /// Creates an image from a row-major boolean mask.
    pub fn from_mask(width: u32, height: u32, mask: Vec<bool>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if mask.len() != expected {
            return Err(PhenomenalError::SizeMismatch {
                expected,
                actual: mask.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels: mask,
        })
    }

    /// Creates an image from row-major 8-bit data holding only
    /// [`BACKGROUND`] and [`FOREGROUND`] values.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_raw(width: u32, height: u32, data: &[u8]) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(PhenomenalError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let pixels = data
            .iter()
            .enumerate()
            .map(|(i, &value)| match value {
                FOREGROUND => Ok(true),
                BACKGROUND => Ok(false),
                _ => Err(PhenomenalError::NonBinaryImage {
                    x: (i % width as usize) as u32,
                    y: (i / width as usize) as u32,
                    value,
                }),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Converts an already binarized grayscale image.
    pub fn from_luma(image: &image::GrayImage) -> Result<Self> {
        Self::from_raw(image.width(), image.height(), image.as_raw())
    }

    /// Returns the image width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the image height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns whether pixel `(x, y)` is foreground. Out of range is background.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.pixels[y as usize * self.width as usize + x as usize]
    }

    /// Sets pixel `(x, y)`. Out-of-range writes are ignored.
    pub fn set(&mut self, x: u32, y: u32, foreground: bool) {
        if x < self.width && y < self.height {
            self.pixels[y as usize * self.width as usize + x as usize] = foreground;
        }
    }

    /// Returns the integer pixel containing a sub-pixel position, if inside.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn pixel_of(&self, position: DVec2) -> Option<(u32, u32)> {
        let p = position.floor();
        let inside = p.x >= 0.0
            && p.y >= 0.0
            && p.x < f64::from(self.width)
            && p.y < f64::from(self.height);
        inside.then(|| (p.x as u32, p.y as u32))
    }

    /// Returns whether the pixel containing `position` is foreground.
    #[must_use]
    pub fn is_foreground_at(&self, position: DVec2) -> bool {
        self.pixel_of(position).is_some_and(|(x, y)| self.get(x, y))
    }

    /// Returns whether any pixel of the box `min..=max` is foreground.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn any_foreground_in(&self, min: DVec2, max: DVec2) -> bool {
        if self.width == 0 || self.height == 0 {
            return false;
        }
        let w = f64::from(self.width - 1);
        let h = f64::from(self.height - 1);
        let lo = min.floor();
        let hi = max.floor();
        if hi.x < 0.0 || hi.y < 0.0 || lo.x > w || lo.y > h {
            return false;
        }
        let (x0, y0) = (lo.x.max(0.0) as u32, lo.y.max(0.0) as u32);
        let (x1, y1) = (hi.x.min(w) as u32, hi.y.min(h) as u32);
        (y0..=y1).any(|y| (x0..=x1).any(|x| self.get(x, y)))
    }

    /// Returns the number of foreground pixels.
    #[must_use]
    pub fn foreground_count(&self) -> usize {
        self.pixels.iter().filter(|&&p| p).count()
    }
}

/// Acquisition angle in degrees, totally ordered so it can key a map.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewAngle(pub f64);

impl PartialEq for ViewAngle {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ViewAngle {}

impl PartialOrd for ViewAngle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ViewAngle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Silhouettes of one view group, keyed by acquisition angle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SilhouetteSet {
    images: BTreeMap<ViewAngle, BinaryImage>,
}

impl SilhouetteSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the silhouette taken at `angle` degrees, replacing any previous one.
    pub fn insert(&mut self, angle: f64, image: BinaryImage) -> &mut Self {
        self.images.insert(ViewAngle(angle), image);
        self
    }

    /// Returns the silhouette taken at `angle` degrees.
    #[must_use]
    pub fn get(&self, angle: f64) -> Option<&BinaryImage> {
        self.images.get(&ViewAngle(angle))
    }

    /// Returns the number of silhouettes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Returns true if the set holds no silhouette.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Iterates over `(angle, silhouette)` in ascending angle order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &BinaryImage)> {
        self.images.iter().map(|(a, img)| (a.0, img))
    }
}

impl FromIterator<(f64, BinaryImage)> for SilhouetteSet {
    fn from_iter<T: IntoIterator<Item = (f64, BinaryImage)>>(iter: T) -> Self {
        Self {
            images: iter.into_iter().map(|(a, img)| (ViewAngle(a), img)).collect(),
        }
    }
}

/// One calibrated camera group ("side", "top", ...) and its silhouettes.
#[derive(Clone)]
pub struct ViewGroup {
    name: String,
    projection: Arc<dyn Projection>,
    silhouettes: SilhouetteSet,
}

impl fmt::Debug for ViewGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewGroup")
            .field("name", &self.name)
            .field("angles", &self.silhouettes.iter().map(|(a, _)| a).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ViewGroup {
    /// Returns the group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the group's projection.
    #[must_use]
    pub fn projection(&self) -> &dyn Projection {
        self.projection.as_ref()
    }

    /// Returns the group's silhouettes.
    #[must_use]
    pub fn silhouettes(&self) -> &SilhouetteSet {
        &self.silhouettes
    }
}

/// A single calibrated silhouette.
#[derive(Clone, Copy)]
pub struct View<'a> {
    /// Name of the group the view belongs to.
    pub group: &'a str,
    /// Acquisition angle in degrees.
    pub angle: f64,
    /// The silhouette.
    pub image: &'a BinaryImage,
    projection: &'a dyn Projection,
}

impl View<'_> {
    /// Projects a world point into this view, rejecting non-finite results.
    pub fn project(&self, point: DVec3) -> Result<DVec2> {
        let p = self.projection.project(point, self.angle);
        if p.is_finite() {
            Ok(p)
        } else {
            Err(PhenomenalError::NonFiniteProjection {
                group: self.group.to_string(),
                angle: self.angle,
                x: point.x,
                y: point.y,
                z: point.z,
            })
        }
    }

    /// Returns whether `point` projects onto a foreground pixel.
    pub fn sees(&self, point: DVec3) -> Result<bool> {
        Ok(self.image.is_foreground_at(self.project(point)?))
    }
}

/// Validated mapping from view group to calibration and silhouettes.
///
/// Construction fails fast when the two mappings name different groups or
/// when a silhouette angle is outside its calibration's fitted angles.
#[derive(Debug, Clone, Default)]
pub struct MultiViewInput {
    groups: Vec<ViewGroup>,
}

impl MultiViewInput {
    /// Pairs calibrations with silhouettes by group name.
    pub fn new(
        calibrations: BTreeMap<String, Arc<dyn Projection>>,
        mut silhouettes: BTreeMap<String, SilhouetteSet>,
    ) -> Result<Self> {
        if let Some(name) = silhouettes.keys().find(|k| !calibrations.contains_key(*k)) {
            return Err(PhenomenalError::ViewGroupMismatch(name.clone()));
        }
        let mut groups = Vec::with_capacity(calibrations.len());
        for (name, projection) in calibrations {
            let Some(set) = silhouettes.remove(&name) else {
                return Err(PhenomenalError::ViewGroupMismatch(name));
            };
            if let Some(angles) = projection.calibrated_angles() {
                if let Some((angle, _)) = set
                    .iter()
                    .find(|(a, _)| !angles.iter().any(|c| (c - a).abs() < 1e-9))
                {
                    return Err(PhenomenalError::AngleMismatch { group: name, angle });
                }
            }
            groups.push(ViewGroup {
                name,
                projection,
                silhouettes: set,
            });
        }
        Ok(Self { groups })
    }

    /// Convenience constructor for a single view group.
    pub fn single(
        name: impl Into<String>,
        projection: Arc<dyn Projection>,
        silhouettes: SilhouetteSet,
    ) -> Result<Self> {
        let name = name.into();
        Self::new(
            BTreeMap::from([(name.clone(), projection)]),
            BTreeMap::from([(name, silhouettes)]),
        )
    }

    /// Returns the view groups in name order.
    #[must_use]
    pub fn groups(&self) -> &[ViewGroup] {
        &self.groups
    }

    /// Returns the total number of silhouettes across all groups.
    #[must_use]
    pub fn view_count(&self) -> usize {
        self.groups.iter().map(|g| g.silhouettes.len()).sum()
    }

    /// Iterates over every calibrated silhouette, group by group.
    pub fn views(&self) -> impl Iterator<Item = View<'_>> {
        self.groups.iter().flat_map(|g| {
            g.silhouettes.iter().map(move |(angle, image)| View {
                group: &g.name,
                angle,
                image,
                projection: g.projection.as_ref(),
            })
        })
    }

    /// Iterates over the silhouettes of one group.
    pub fn group_views<'a>(&'a self, group: &'a ViewGroup) -> impl Iterator<Item = View<'a>> {
        group.silhouettes.iter().map(move |(angle, image)| View {
            group: &group.name,
            angle,
            image,
            projection: group.projection.as_ref(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CameraCalibration, CameraKind};

    fn ortho() -> Arc<dyn Projection> {
        Arc::new(|p: DVec3, _a: f64| DVec2::new(p.x, p.y))
    }

    #[test]
    fn test_from_raw_rejects_gray() {
        let img = BinaryImage::from_raw(2, 2, &[0, 255, 255, 0]).unwrap();
        assert!(img.get(1, 0));
        assert!(!img.get(0, 0));
        let err = BinaryImage::from_raw(2, 2, &[0, 255, 128, 0]).unwrap_err();
        assert!(matches!(
            err,
            PhenomenalError::NonBinaryImage { x: 0, y: 1, value: 128 }
        ));
        assert!(BinaryImage::from_raw(2, 2, &[0; 3]).is_err());
    }

    #[test]
    fn test_from_luma() {
        let mut gray = image::GrayImage::new(3, 2);
        gray.put_pixel(2, 1, image::Luma([255]));
        let img = BinaryImage::from_luma(&gray).unwrap();
        assert!(img.get(2, 1));
        assert_eq!(img.foreground_count(), 1);
    }

    #[test]
    fn test_foreground_lookup() {
        let mut img = BinaryImage::new(4, 4);
        img.set(2, 1, true);
        assert!(img.is_foreground_at(DVec2::new(2.7, 1.2)));
        assert!(!img.is_foreground_at(DVec2::new(-0.5, 1.2)));
        assert!(!img.is_foreground_at(DVec2::new(9.0, 1.0)));
        assert!(img.any_foreground_in(DVec2::new(-3.0, -3.0), DVec2::new(2.0, 1.0)));
        assert!(!img.any_foreground_in(DVec2::new(3.0, 0.0), DVec2::new(8.0, 8.0)));
        assert!(!img.any_foreground_in(DVec2::new(5.0, 5.0), DVec2::new(8.0, 8.0)));
    }

    #[test]
    fn test_view_group_mismatch() {
        let calibrations = BTreeMap::from([("side".to_string(), ortho())]);
        let silhouettes = BTreeMap::from([("top".to_string(), SilhouetteSet::new())]);
        let err = MultiViewInput::new(calibrations, silhouettes).unwrap_err();
        assert!(matches!(err, PhenomenalError::ViewGroupMismatch(g) if g == "top"));

        let calibrations = BTreeMap::from([("side".to_string(), ortho())]);
        let err = MultiViewInput::new(calibrations, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, PhenomenalError::ViewGroupMismatch(g) if g == "side"));
    }

    #[test]
    fn test_angle_mismatch() {
        let cam = CameraCalibration::new(CameraKind::Side, (10.0, 10.0), (1.0, 1.0), DVec3::NEG_Y)
            .with_angles(vec![0.0, 90.0]);
        let set: SilhouetteSet = [(0.0, BinaryImage::new(10, 10)), (45.0, BinaryImage::new(10, 10))]
            .into_iter()
            .collect();
        let err = MultiViewInput::single("side", Arc::new(cam), set).unwrap_err();
        assert!(matches!(err, PhenomenalError::AngleMismatch { angle, .. } if angle == 45.0));
    }

    #[test]
    fn test_views_and_non_finite_projection() {
        let set: SilhouetteSet = [(30.0, BinaryImage::new(4, 4)), (0.0, BinaryImage::new(4, 4))]
            .into_iter()
            .collect();
        let bad: Arc<dyn Projection> = Arc::new(|_p: DVec3, _a: f64| DVec2::new(f64::NAN, 0.0));
        let input = MultiViewInput::single("side", bad, set).unwrap();
        assert_eq!(input.view_count(), 2);
        let angles: Vec<f64> = input.views().map(|v| v.angle).collect();
        assert_eq!(angles, vec![0.0, 30.0]);
        let view = input.views().next().unwrap();
        assert!(matches!(
            view.sees(DVec3::ZERO),
            Err(PhenomenalError::NonFiniteProjection { .. })
        ));
    }
}
