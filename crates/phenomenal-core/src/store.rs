//! Persistence of segmentations as gzip-compressed JSON (`.json.gz`), of
//! voxel grids as plain point lists, and of labeled voxels as comma-separated
//! rows.
//!
//! Archives carry a format version and a kind tag. Readers decode the whole
//! stream before building anything, so a truncated or corrupt archive is an
//! error and never a partial segmentation.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use glam::DVec3;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{PhenomenalError, Result};
use crate::segment::{check_arena, OrganLabel, VoxelSegmentation, VoxelSegmentationInfo};
use crate::voxel_grid::VoxelGrid;

/// Version written into every archive.
pub const FORMAT_VERSION: u32 = 1;

/// Conventional file suffix of segmentation archives.
pub const ARCHIVE_EXTENSION: &str = ".json.gz";

/// What an archive holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    /// A [`VoxelSegmentation`].
    Segmentation,
    /// A [`VoxelSegmentationInfo`].
    SegmentationInfo,
}

/// A structure that can be stored in a segmentation archive.
pub trait Archived: Serialize + DeserializeOwned {
    /// Kind tag written into the archive.
    const KIND: ArchiveKind;

    /// Checks structural invariants after decoding.
    fn check(&self) -> Result<()>;
}

impl Archived for VoxelSegmentation {
    const KIND: ArchiveKind = ArchiveKind::Segmentation;

    fn check(&self) -> Result<()> {
        check_arena(
            self.segments()
                .iter()
                .map(|s| (s.segment().id(), s.segment().parent())),
        )
    }
}

impl Archived for VoxelSegmentationInfo {
    const KIND: ArchiveKind = ArchiveKind::SegmentationInfo;

    fn check(&self) -> Result<()> {
        check_arena(
            self.segments()
                .iter()
                .map(|s| (s.segment().id(), s.segment().parent())),
        )
    }
}

#[derive(Serialize)]
struct DocumentRef<'a, T> {
    version: u32,
    kind: ArchiveKind,
    data: &'a T,
}

#[derive(Deserialize)]
struct Document {
    version: u32,
    kind: ArchiveKind,
    data: serde_json::Value,
}

/// Encodes a value as a gzip-compressed JSON archive into `writer`.
pub fn to_writer<T: Archived, W: Write>(writer: W, value: &T) -> Result<()> {
    let mut encoder = GzEncoder::new(writer, Compression::default());
    let doc = DocumentRef {
        version: FORMAT_VERSION,
        kind: T::KIND,
        data: value,
    };
    serde_json::to_writer(&mut encoder, &doc)?;
    encoder.finish()?.flush()?;
    Ok(())
}

/// Decodes an archive from `reader`.
pub fn from_reader<T: Archived, R: Read>(reader: R) -> Result<T> {
    let mut json = Vec::new();
    GzDecoder::new(reader)
        .read_to_end(&mut json)
        .map_err(|e| PhenomenalError::Decode(format!("corrupt or truncated archive: {e}")))?;
    let doc: Document = serde_json::from_slice(&json)
        .map_err(|e| PhenomenalError::Decode(format!("malformed archive document: {e}")))?;
    if doc.version != FORMAT_VERSION {
        return Err(PhenomenalError::UnsupportedVersion {
            found: doc.version,
            expected: FORMAT_VERSION,
        });
    }
    if doc.kind != T::KIND {
        return Err(PhenomenalError::Decode(format!(
            "archive holds {:?}, expected {:?}",
            doc.kind,
            T::KIND
        )));
    }
    let value: T = serde_json::from_value(doc.data)
        .map_err(|e| PhenomenalError::Decode(format!("malformed archive payload: {e}")))?;
    value.check()?;
    Ok(value)
}

/// Encodes a value into an in-memory archive.
pub fn to_bytes<T: Archived>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    to_writer(&mut bytes, value)?;
    Ok(bytes)
}

/// Decodes an in-memory archive.
pub fn from_bytes<T: Archived>(bytes: &[u8]) -> Result<T> {
    from_reader(bytes)
}

fn warn_on_extension(path: &Path) {
    let conventional = path
        .to_str()
        .is_some_and(|p| p.ends_with(ARCHIVE_EXTENSION));
    if !conventional {
        log::warn!(
            "segmentation archive {} does not use the {ARCHIVE_EXTENSION} suffix",
            path.display()
        );
    }
}

/// Writes a segmentation archive.
pub fn write_segmentation(path: impl AsRef<Path>, value: &VoxelSegmentation) -> Result<()> {
    write_archive(path.as_ref(), value)
}

/// Reads a segmentation archive.
pub fn read_segmentation(path: impl AsRef<Path>) -> Result<VoxelSegmentation> {
    read_archive(path.as_ref())
}

/// Writes an analyzed segmentation archive.
pub fn write_segmentation_info(path: impl AsRef<Path>, value: &VoxelSegmentationInfo) -> Result<()> {
    write_archive(path.as_ref(), value)
}

/// Reads an analyzed segmentation archive.
pub fn read_segmentation_info(path: impl AsRef<Path>) -> Result<VoxelSegmentationInfo> {
    read_archive(path.as_ref())
}

fn write_archive<T: Archived>(path: &Path, value: &T) -> Result<()> {
    warn_on_extension(path);
    to_writer(BufWriter::new(File::create(path)?), value)?;
    log::debug!("wrote {:?} archive to {}", T::KIND, path.display());
    Ok(())
}

fn read_archive<T: Archived>(path: &Path) -> Result<T> {
    let value = from_reader(BufReader::new(File::open(path)?))?;
    log::debug!("read {:?} archive from {}", T::KIND, path.display());
    Ok(value)
}

const XYZ_HEADER: &str = "# voxel_size";

/// Writes a grid as a point list: a header line with voxel size and origin,
/// then one `x y z` centre per line.
pub fn write_voxel_grid<W: Write>(mut writer: W, grid: &VoxelGrid) -> Result<()> {
    let origin = grid.frame().origin();
    writeln!(
        writer,
        "{XYZ_HEADER} {} origin {} {} {}",
        grid.voxel_size(),
        origin.x,
        origin.y,
        origin.z
    )?;
    for c in grid.centers() {
        writeln!(writer, "{} {} {}", c.x, c.y, c.z)?;
    }
    writer.flush()?;
    Ok(())
}

fn parse_f64(token: Option<&str>, line: usize) -> Result<f64> {
    token
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| PhenomenalError::Decode(format!("line {line}: expected a number")))
}

/// Reads a grid written by [`write_voxel_grid`].
pub fn read_voxel_grid<R: BufRead>(reader: R) -> Result<VoxelGrid> {
    let mut lines = reader.lines();
    let header = lines
        .next()
        .ok_or_else(|| PhenomenalError::Decode("empty point list".to_string()))??;
    let rest = header
        .strip_prefix(XYZ_HEADER)
        .ok_or_else(|| PhenomenalError::Decode("missing voxel size header".to_string()))?;
    let mut tokens = rest.split_whitespace();
    let voxel_size = parse_f64(tokens.next(), 1)?;
    if tokens.next() != Some("origin") {
        return Err(PhenomenalError::Decode("missing origin in header".to_string()));
    }
    let origin = DVec3::new(
        parse_f64(tokens.next(), 1)?,
        parse_f64(tokens.next(), 1)?,
        parse_f64(tokens.next(), 1)?,
    );
    let mut centers = Vec::new();
    for (i, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut t = line.split_whitespace();
        centers.push(DVec3::new(
            parse_f64(t.next(), i + 2)?,
            parse_f64(t.next(), i + 2)?,
            parse_f64(t.next(), i + 2)?,
        ));
    }
    VoxelGrid::from_centers(origin, voxel_size, centers)
}

const LABELED_HEADER: &str = "x_coord,y_coord,z_coord,voxel_size,label";

/// Voxel centres grouped by organ label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledVoxels {
    /// Voxel size shared by every row; `None` when there are no rows.
    pub voxel_size: Option<f64>,
    /// Centres per label, in file order.
    pub centers: BTreeMap<OrganLabel, Vec<DVec3>>,
}

impl LabeledVoxels {
    /// Returns the total number of voxels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.centers.values().map(Vec::len).sum()
    }

    /// Returns true if no voxel was read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writes every voxel centre of a segmentation with its organ label, one
/// `x,y,z,voxel_size,label` row per voxel after a header row.
pub fn write_labeled_voxels<W: Write>(mut writer: W, segmentation: &VoxelSegmentation) -> Result<()> {
    let frame = segmentation.frame();
    let size = frame.voxel_size();
    writeln!(writer, "{LABELED_HEADER}")?;
    for labeled in segmentation.segments() {
        for &v in labeled.segment().voxels() {
            let c = frame.center(v);
            writeln!(writer, "{},{},{},{size},{}", c.x, c.y, c.z, labeled.label())?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Reads rows written by [`write_labeled_voxels`].
pub fn read_labeled_voxels<R: BufRead>(reader: R) -> Result<LabeledVoxels> {
    let mut lines = reader.lines();
    let header = lines
        .next()
        .ok_or_else(|| PhenomenalError::Decode("empty labeled point list".to_string()))??;
    if header.trim() != LABELED_HEADER {
        return Err(PhenomenalError::Decode(format!(
            "unexpected labeled point list header '{header}'"
        )));
    }

    let mut voxels = LabeledVoxels::default();
    for (i, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = i + 2;
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let [x, y, z, size, label] = fields.as_slice() else {
            return Err(PhenomenalError::Decode(format!(
                "line {row}: expected 5 fields, got {}",
                fields.len()
            )));
        };
        let center = DVec3::new(
            parse_f64(Some(*x), row)?,
            parse_f64(Some(*y), row)?,
            parse_f64(Some(*z), row)?,
        );
        let size = parse_f64(Some(*size), row)?;
        match voxels.voxel_size {
            None => voxels.voxel_size = Some(size),
            Some(known) if known != size => {
                return Err(PhenomenalError::Decode(format!(
                    "line {row}: voxel size {size} differs from {known}"
                )));
            }
            Some(_) => {}
        }
        let label: OrganLabel = label.parse()?;
        voxels.centers.entry(label).or_default().push(center);
    }
    Ok(voxels)
}
