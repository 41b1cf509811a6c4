//! Bounds-checked sector access and sector-chain traversal.

use std::collections::HashSet;

use super::geometry::{DiskGeometry, TrackSector, SECTOR_SIZE};
use crate::error::{BootError, BootResult};

/// Payload bytes following the two-byte link in each sector.
pub const SECTOR_PAYLOAD: usize = SECTOR_SIZE - 2;

/// A raw sector image paired with its geometry.
///
/// Any trailing error-information table is dropped on construction, so the
/// buffer only ever holds sector data.
#[derive(Debug, Clone)]
pub struct DiskImage {
    geometry: DiskGeometry,
    data: Vec<u8>,
}

impl DiskImage {
    pub fn new(geometry: DiskGeometry, mut data: Vec<u8>) -> Self {
        if geometry.has_error_table() {
            data.truncate(geometry.data_size());
        }
        Self { geometry, data }
    }

    pub fn geometry(&self) -> &DiskGeometry {
        &self.geometry
    }

    /// Sector data without any error table.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Read exactly one sector.
    pub fn sector(&self, location: TrackSector) -> BootResult<Sector<'_>> {
        let offset = self.geometry.offset(location)?;
        let available = self.data.len().saturating_sub(offset);
        let data = self
            .data
            .get(offset..offset + SECTOR_SIZE)
            .and_then(|bytes| <&[u8; SECTOR_SIZE]>::try_from(bytes).ok())
            .ok_or(BootError::TruncatedImage {
                location,
                available,
            })?;
        log::trace!("read {} at offset {:#07x}", location, offset);
        Ok(Sector { location, data })
    }

    /// Walk the linked chain of sectors starting at `start`.
    ///
    /// The walk is a pure function of the image: calling this again restarts it.
    pub fn chain(&self, start: TrackSector) -> SectorChain<'_> {
        SectorChain {
            image: self,
            next: Some(start),
            visited: HashSet::new(),
            revisited: None,
        }
    }
}

/// One 256-byte sector borrowed from an image.
#[derive(Debug, Clone, Copy)]
pub struct Sector<'a> {
    location: TrackSector,
    data: &'a [u8; SECTOR_SIZE],
}

impl<'a> Sector<'a> {
    pub fn location(&self) -> TrackSector {
        self.location
    }

    pub fn bytes(&self) -> &'a [u8; SECTOR_SIZE] {
        self.data
    }

    /// Raw link bytes: next track, next sector (or used-byte count when the track is 0).
    pub fn link(&self) -> (u8, u8) {
        (self.data[0], self.data[1])
    }

    /// Next sector in the chain, or `None` for the terminal sector.
    pub fn next(&self) -> Option<TrackSector> {
        match self.link() {
            (0, _) => None,
            (track, sector) => Some(TrackSector::new(track, sector)),
        }
    }

    /// Bytes after the link header.
    pub fn payload(&self) -> &'a [u8] {
        &self.data[2..]
    }
}

/// Lazy walk over a sector chain.
///
/// Ends at the first sector whose link track is 0, after a read error, or
/// when a link points back at an already visited sector. The last case is
/// reported by [`SectorChain::revisited`]; callers decide whether it is fatal.
pub struct SectorChain<'a> {
    image: &'a DiskImage,
    next: Option<TrackSector>,
    visited: HashSet<TrackSector>,
    revisited: Option<TrackSector>,
}

impl SectorChain<'_> {
    /// Location whose revisit stopped the walk, if any.
    pub fn revisited(&self) -> Option<TrackSector> {
        self.revisited
    }
}

impl<'a> Iterator for SectorChain<'a> {
    type Item = BootResult<Sector<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let location = self.next.take()?;
        if !self.visited.insert(location) {
            log::debug!("chain revisits {}", location);
            self.revisited = Some(location);
            return None;
        }
        match self.image.sector(location) {
            Ok(sector) => {
                self.next = sector.next();
                Some(Ok(sector))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
