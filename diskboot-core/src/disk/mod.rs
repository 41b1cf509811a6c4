//! Commodore disk image decoding.
//!
//! This module provides the read-only decoding pipeline:
//! - `DiskGeometry`: Track/sector layout resolved from format and size
//! - `DiskImage`: Bounds-checked sector access and chain walking
//! - `Directory`: Directory entries in on-disk order
//! - `ExtractedProgram`: Load address + payload of a program file

mod directory;
mod geometry;
mod image;
mod program;

use std::fmt;
use std::path::Path;

pub use directory::{find_first_program, Directory, DirectoryEntry, PRG_TYPE};
pub use geometry::{DiskFormat, DiskGeometry, TrackSector, SECTOR_SIZE};
pub use image::{DiskImage, Sector, SectorChain, SECTOR_PAYLOAD};
pub use program::{extract_program, read_file_chain, ExtractedProgram};

use crate::error::{BootError, BootResult};

/// Raw-track (GCR) image formats. These carry no decodable filesystem here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawTrackFormat {
    G64,
    G71,
}

/// What kind of image a file holds, as chosen by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Sector(DiskFormat),
    RawTrack(RawTrackFormat),
}

impl ImageKind {
    /// Detect the image kind from a file name's extension.
    pub fn from_path(path: &Path) -> BootResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        if let Some(format) = DiskFormat::from_extension(&ext) {
            return Ok(Self::Sector(format));
        }
        match ext.as_str() {
            "g64" => Ok(Self::RawTrack(RawTrackFormat::G64)),
            "g71" => Ok(Self::RawTrack(RawTrackFormat::G71)),
            _ => Err(BootError::UnsupportedImageType(path.display().to_string())),
        }
    }

    /// Mount type name understood by the device.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Sector(format) => format.type_name(),
            Self::RawTrack(RawTrackFormat::G64) => "g64",
            Self::RawTrack(RawTrackFormat::G71) => "g71",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sector(format) => write!(f, "{}", format),
            Self::RawTrack(RawTrackFormat::G64) => f.write_str("G64"),
            Self::RawTrack(RawTrackFormat::G71) => f.write_str("G71"),
        }
    }
}

/// The first program on a sector image, located and extracted.
#[derive(Debug, Clone)]
pub struct FoundProgram {
    pub entry: DirectoryEntry,
    pub program: ExtractedProgram,
}

/// Resolve geometry, find the first program entry and extract it.
pub fn first_program(format: DiskFormat, bytes: Vec<u8>) -> BootResult<FoundProgram> {
    let geometry = DiskGeometry::resolve(format, bytes.len())?;
    let image = DiskImage::new(geometry, bytes);
    let entry = find_first_program(&image)?;
    log::info!(
        "found program '{}' at {} ({} blocks)",
        entry.name(),
        entry.start,
        entry.blocks
    );
    let program = extract_program(&image, entry.start)?;
    Ok(FoundProgram { entry, program })
}
