//! Program chain extraction.

use super::geometry::TrackSector;
use super::image::{DiskImage, SECTOR_PAYLOAD};
use crate::error::{BootError, BootResult};

/// A program file split into its load address and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedProgram {
    load_address: u16,
    payload: Vec<u8>,
}

impl ExtractedProgram {
    /// Split raw file bytes into the little-endian load address and payload.
    ///
    /// Fails unless there is at least one payload byte after the address.
    pub fn from_raw(raw: &[u8]) -> BootResult<Self> {
        match raw {
            [lo, hi, payload @ ..] if !payload.is_empty() => Ok(Self {
                load_address: u16::from_le_bytes([*lo, *hi]),
                payload: payload.to_vec(),
            }),
            _ => Err(BootError::PayloadTooSmall(raw.len())),
        }
    }

    pub fn load_address(&self) -> u16 {
        self.load_address
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// First address past the payload. May exceed $FFFF for a malformed file.
    pub fn end_address(&self) -> u32 {
        self.load_address as u32 + self.payload.len() as u32
    }

    /// Reassemble the on-disk byte stream (load address + payload).
    pub fn to_raw(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.payload.len() + 2);
        raw.extend_from_slice(&self.load_address.to_le_bytes());
        raw.extend_from_slice(&self.payload);
        raw
    }
}

/// Used-byte count of a terminal sector; zero or out-of-range means a full sector.
fn terminal_len(declared: u8) -> usize {
    match declared as usize {
        0 => SECTOR_PAYLOAD,
        n if n > SECTOR_PAYLOAD => SECTOR_PAYLOAD,
        n => n,
    }
}

/// Read the raw bytes of the file whose data chain starts at `start`.
///
/// A chain that revisits a sector is [`BootError::CorruptChain`]; a file
/// shorter than its two-byte load address is [`BootError::PayloadTooSmall`].
pub fn read_file_chain(image: &DiskImage, start: TrackSector) -> BootResult<Vec<u8>> {
    let mut chain = image.chain(start);
    let mut raw = Vec::new();

    for sector in chain.by_ref() {
        let sector = sector?;
        let payload = sector.payload();
        match sector.link() {
            (0, declared) => {
                let used = terminal_len(declared);
                raw.extend_from_slice(payload.get(..used).unwrap_or(payload));
            }
            _ => raw.extend_from_slice(payload),
        }
    }

    if let Some(location) = chain.revisited() {
        return Err(BootError::CorruptChain(location));
    }
    if raw.len() < 2 {
        return Err(BootError::PayloadTooSmall(raw.len()));
    }
    log::debug!("read {} bytes from chain at {}", raw.len(), start);
    Ok(raw)
}

/// Extract the program whose data chain starts at `start`.
pub fn extract_program(image: &DiskImage, start: TrackSector) -> BootResult<ExtractedProgram> {
    let raw = read_file_chain(image, start)?;
    ExtractedProgram::from_raw(&raw)
}
