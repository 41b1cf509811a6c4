//! Directory chain walking.
//!
//! Each directory sector holds eight 32-byte slots. The first two bytes of
//! the sector (the first slot's leading bytes) are the chain link; the
//! remaining slots leave those two bytes unused. Slot layout:
//! - Byte 2: File type (bit 7 = closed, low nibble = type code)
//! - Bytes 3-4: First track/sector of the file's data chain
//! - Bytes 5-20: Name, padded with $A0
//! - Bytes 30-31: Size in blocks (little-endian)

use std::collections::VecDeque;

use super::geometry::TrackSector;
use super::image::{DiskImage, Sector, SectorChain};
use crate::error::{BootError, BootResult};

/// Size of one directory slot.
pub const ENTRY_SIZE: usize = 32;

/// Slots per directory sector.
pub const ENTRIES_PER_SECTOR: usize = 8;

/// Type code of a program file.
pub const PRG_TYPE: u8 = 0x02;

/// Mask selecting the type code from the file-type byte.
const TYPE_MASK: u8 = 0x0F;

/// Closed-file flag in the file-type byte.
const CLOSED_FLAG: u8 = 0x80;

/// Pad byte used in name fields.
const NAME_PAD: u8 = 0xA0;

/// One occupied directory slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub file_type: u8,
    pub start: TrackSector,
    pub raw_name: [u8; 16],
    pub blocks: u16,
}

impl DirectoryEntry {
    /// Parse a slot. Returns `None` for an empty slot or one without a data chain.
    pub fn parse(slot: &[u8; ENTRY_SIZE]) -> Option<Self> {
        let file_type = slot[2];
        let start = TrackSector::new(slot[3], slot[4]);
        if file_type == 0 || start.track == 0 {
            return None;
        }
        let mut raw_name = [0u8; 16];
        raw_name.copy_from_slice(&slot[5..21]);
        Some(Self {
            file_type,
            start,
            raw_name,
            blocks: u16::from_le_bytes([slot[30], slot[31]]),
        })
    }

    pub fn type_code(&self) -> u8 {
        self.file_type & TYPE_MASK
    }

    pub fn is_program(&self) -> bool {
        self.type_code() == PRG_TYPE
    }

    pub fn is_closed(&self) -> bool {
        self.file_type & CLOSED_FLAG != 0
    }

    /// Name with pad bytes collapsed to spaces and whitespace trimmed.
    pub fn name(&self) -> String {
        let text: String = self
            .raw_name
            .iter()
            .map(|&b| if b == NAME_PAD { ' ' } else { b as char })
            .collect();
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

fn sector_entries<'a>(sector: Sector<'a>) -> impl Iterator<Item = DirectoryEntry> + 'a {
    sector
        .bytes()
        .chunks_exact(ENTRY_SIZE)
        .take(ENTRIES_PER_SECTOR)
        .filter_map(|chunk| <&[u8; ENTRY_SIZE]>::try_from(chunk).ok())
        .filter_map(DirectoryEntry::parse)
}

/// Lazy iterator over occupied directory entries in on-disk order.
///
/// A link back to an already visited directory sector ends the listing
/// without error.
pub struct Directory<'a> {
    chain: SectorChain<'a>,
    pending: VecDeque<DirectoryEntry>,
}

impl<'a> Directory<'a> {
    pub fn new(image: &'a DiskImage) -> Self {
        Self {
            chain: image.chain(image.geometry().directory()),
            pending: VecDeque::new(),
        }
    }
}

impl Iterator for Directory<'_> {
    type Item = BootResult<DirectoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.pending.pop_front() {
                return Some(Ok(entry));
            }
            match self.chain.next()? {
                Ok(sector) => {
                    log::debug!("directory sector at {}", sector.location());
                    self.pending.extend(sector_entries(sector));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// First program entry in directory order.
pub fn find_first_program(image: &DiskImage) -> BootResult<DirectoryEntry> {
    for entry in Directory::new(image) {
        let entry = entry?;
        if entry.is_program() {
            return Ok(entry);
        }
    }
    Err(BootError::NoProgramFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{DiskFormat, DiskGeometry};

    const D64_SIZE: usize = 174_848;

    fn write_slot(data: &mut [u8], offset: usize, slot: usize, file_type: u8, start: (u8, u8), name: &str) {
        let base = offset + slot * ENTRY_SIZE;
        data[base + 2] = file_type;
        data[base + 3] = start.0;
        data[base + 4] = start.1;
        for i in 0..16 {
            data[base + 5 + i] = *name.as_bytes().get(i).unwrap_or(&NAME_PAD);
        }
        data[base + 30] = 1;
    }

    fn image_with(setup: impl FnOnce(&DiskGeometry, &mut Vec<u8>)) -> DiskImage {
        let geometry = DiskGeometry::resolve(DiskFormat::D64, D64_SIZE).unwrap();
        let mut data = vec![0u8; D64_SIZE];
        setup(&geometry, &mut data);
        DiskImage::new(geometry, data)
    }

    fn offset(geometry: &DiskGeometry, track: u8, sector: u8) -> usize {
        geometry.offset(TrackSector::new(track, sector)).unwrap()
    }

    #[test]
    fn test_name_decoding() {
        let mut slot = [0u8; ENTRY_SIZE];
        slot[2] = 0x82;
        slot[3] = 17;
        slot[5..21].copy_from_slice(b"  MY  GAME\xA0\xA0\xA0\xA0\xA0\xA0");
        let entry = DirectoryEntry::parse(&slot).unwrap();
        assert_eq!(entry.name(), "MY GAME");
        assert!(entry.is_program());
        assert!(entry.is_closed());
    }

    #[test]
    fn test_empty_and_chainless_slots_skipped() {
        let mut slot = [0u8; ENTRY_SIZE];
        assert!(DirectoryEntry::parse(&slot).is_none());
        slot[2] = 0x82;
        assert!(DirectoryEntry::parse(&slot).is_none());
    }

    #[test]
    fn test_all_eight_slots_visible() {
        let image = image_with(|g, data| {
            let dir = offset(g, 18, 1);
            for slot in 0..8 {
                write_slot(data, dir, slot, 0x81, (1, slot as u8), "SEQ");
            }
        });
        assert_eq!(Directory::new(&image).count(), 8);
    }

    #[test]
    fn test_first_program_in_chain_order() {
        let image = image_with(|g, data| {
            let dir = offset(g, 18, 1);
            data[dir] = 18;
            data[dir + 1] = 4;
            write_slot(data, dir, 0, 0x81, (1, 0), "NOTES");
            let next = offset(g, 18, 4);
            write_slot(data, next, 3, 0x82, (2, 0), "FIRST");
            write_slot(data, next, 5, 0x82, (3, 0), "SECOND");
        });
        let entry = find_first_program(&image).unwrap();
        assert_eq!(entry.name(), "FIRST");
        assert_eq!(entry.start, TrackSector::new(2, 0));
    }

    #[test]
    fn test_type_filter_ignores_closed_flag() {
        let image = image_with(|g, data| {
            write_slot(data, offset(g, 18, 1), 0, 0x02, (9, 1), "SPLAT");
        });
        assert_eq!(find_first_program(&image).unwrap().name(), "SPLAT");
    }

    #[test]
    fn test_no_program() {
        let image = image_with(|g, data| {
            write_slot(data, offset(g, 18, 1), 0, 0x81, (1, 0), "DATA");
        });
        assert!(matches!(
            find_first_program(&image),
            Err(BootError::NoProgramFound)
        ));
    }

    #[test]
    fn test_cyclic_directory_ends_listing() {
        let image = image_with(|g, data| {
            let dir = offset(g, 18, 1);
            data[dir] = 18;
            data[dir + 1] = 1;
            write_slot(data, dir, 0, 0x81, (1, 0), "LOOPED");
        });
        let entries: Vec<_> = Directory::new(&image).collect();
        assert_eq!(entries.len(), 1);
        assert!(matches!(
            find_first_program(&image),
            Err(BootError::NoProgramFound)
        ));
    }

    #[test]
    fn test_bad_link_is_an_error() {
        let image = image_with(|g, data| {
            let dir = offset(g, 18, 1);
            data[dir] = 99;
            data[dir + 1] = 0;
        });
        assert!(matches!(
            find_first_program(&image),
            Err(BootError::OutOfRange(_))
        ));
    }
}
