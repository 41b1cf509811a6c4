//! Sector geometry for Commodore sector-image formats.
//!
//! A sector image is a flat dump of every sector in track order, optionally
//! followed by a one-byte-per-sector error-information table. The image size
//! alone selects between the track-count variants of a format; there is no
//! fuzzy matching.

use std::fmt;

use crate::error::{BootError, BootResult};

/// Size of every sector in bytes.
pub const SECTOR_SIZE: usize = 256;

/// A (track, sector) location. Tracks are 1-based, sectors 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackSector {
    pub track: u8,
    pub sector: u8,
}

impl TrackSector {
    pub const fn new(track: u8, sector: u8) -> Self {
        Self { track, sector }
    }
}

impl fmt::Display for TrackSector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track {} sector {}", self.track, self.sector)
    }
}

/// Sector-image formats with a known layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskFormat {
    /// 1541 single-sided, 35 or 40 tracks.
    D64,
    /// 1571 double-sided, 70 tracks.
    D71,
    /// 8050 (77 tracks) or 8250 (154 tracks).
    D80,
    /// 1581 3.5", 80 tracks of 40 sectors.
    D81,
}

impl DiskFormat {
    /// Format for a file extension (case-insensitive, without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "d64" => Some(Self::D64),
            "d71" => Some(Self::D71),
            "d80" | "d82" => Some(Self::D80),
            "d81" => Some(Self::D81),
            _ => None,
        }
    }

    /// Mount type name understood by the device.
    pub fn type_name(self) -> &'static str {
        match self {
            Self::D64 => "d64",
            Self::D71 => "d71",
            Self::D80 => "d80",
            Self::D81 => "d81",
        }
    }

    /// Candidate track counts, smallest first.
    fn track_counts(self) -> &'static [u8] {
        match self {
            Self::D64 => &[35, 40],
            Self::D71 => &[70],
            Self::D80 => &[77, 154],
            Self::D81 => &[80],
        }
    }

    /// First directory sector.
    pub fn directory(self) -> TrackSector {
        match self {
            Self::D64 | Self::D71 => TrackSector::new(18, 1),
            Self::D80 => TrackSector::new(39, 1),
            Self::D81 => TrackSector::new(40, 3),
        }
    }

    /// Sectors on `track` (1-based). Tracks beyond a side repeat that side's zones.
    pub fn sectors_per_track(self, track: u8) -> u8 {
        match self {
            Self::D64 => zone_1541(track),
            Self::D71 => zone_1541(((track.saturating_sub(1)) % 35) + 1),
            Self::D80 => zone_8050(((track.saturating_sub(1)) % 77) + 1),
            Self::D81 => 40,
        }
    }
}

impl fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::D64 => "D64",
            Self::D71 => "D71",
            Self::D80 => "D80",
            Self::D81 => "D81",
        })
    }
}

fn zone_1541(track: u8) -> u8 {
    match track {
        0..=17 => 21,
        18..=24 => 19,
        25..=30 => 18,
        _ => 17,
    }
}

fn zone_8050(track: u8) -> u8 {
    match track {
        0..=39 => 29,
        40..=53 => 27,
        54..=64 => 25,
        _ => 23,
    }
}

/// Resolved layout of one image. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskGeometry {
    format: DiskFormat,
    tracks: u8,
    /// Index of the first sector of each track; `track_starts[tracks]` is the total.
    track_starts: Vec<usize>,
    has_error_table: bool,
}

impl DiskGeometry {
    /// Resolve the geometry of a `format` image that is `size` bytes long.
    pub fn resolve(format: DiskFormat, size: usize) -> BootResult<Self> {
        for &tracks in format.track_counts() {
            let geometry = Self::build(format, tracks, false);
            let data_size = geometry.data_size();
            let with_errors = data_size + geometry.total_sectors();

            if size == data_size {
                return Ok(geometry);
            }
            if size == with_errors {
                return Ok(Self {
                    has_error_table: true,
                    ..geometry
                });
            }
        }
        Err(BootError::UnsupportedImageSize { format, size })
    }

    fn build(format: DiskFormat, tracks: u8, has_error_table: bool) -> Self {
        let mut track_starts = Vec::with_capacity(tracks as usize + 1);
        let mut total = 0usize;
        track_starts.push(0);
        for track in 1..=tracks {
            total += format.sectors_per_track(track) as usize;
            track_starts.push(total);
        }
        Self {
            format,
            tracks,
            track_starts,
            has_error_table,
        }
    }

    pub fn format(&self) -> DiskFormat {
        self.format
    }

    pub fn tracks(&self) -> u8 {
        self.tracks
    }

    pub fn directory(&self) -> TrackSector {
        self.format.directory()
    }

    pub fn has_error_table(&self) -> bool {
        self.has_error_table
    }

    pub fn sectors_per_track(&self, track: u8) -> u8 {
        self.format.sectors_per_track(track)
    }

    pub fn total_sectors(&self) -> usize {
        self.track_starts.last().copied().unwrap_or(0)
    }

    /// Size of the sector data, excluding any error table.
    pub fn data_size(&self) -> usize {
        self.total_sectors() * SECTOR_SIZE
    }

    /// Byte offset of a sector, validating that it exists on this disk.
    pub fn offset(&self, location: TrackSector) -> BootResult<usize> {
        let TrackSector { track, sector } = location;
        if track < 1 || track > self.tracks || sector >= self.sectors_per_track(track) {
            return Err(BootError::OutOfRange(location));
        }
        let track_start = self
            .track_starts
            .get(track as usize - 1)
            .copied()
            .ok_or(BootError::OutOfRange(location))?;
        Ok((track_start + sector as usize) * SECTOR_SIZE)
    }
}
