//! Tokenized BASIC detection and interpreter pointer fixup.
//!
//! A BASIC V2 program in memory is a linked list of lines:
//! - Bytes 0-1: Address of the next line (0 = end of program)
//! - Bytes 2-3: Line number
//! - Bytes 4..: Tokenized text, terminated by $00

use crate::config::MachineMap;
use crate::disk::ExtractedProgram;
use crate::error::{BootError, BootResult};

/// Largest line number the interpreter accepts.
pub const MAX_LINE_NUMBER: u16 = 63999;

/// Allowed distance between a line's link and the byte after its terminator.
///
/// Some producers write links that are off by a byte or two. This is a
/// heuristic; not every tokenizer is known to stay inside it.
pub const LINK_TOLERANCE: usize = 2;

/// Upper bound on lines walked before giving up.
pub const MAX_LINES: usize = 2000;

fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    let pair = bytes.get(at..at.checked_add(2)?)?;
    Some(u16::from_le_bytes([pair[0], pair[1]]))
}

/// Whether `program` looks like a tokenized BASIC listing loaded at the text origin.
///
/// Never fails: anything malformed is simply "not BASIC".
pub fn is_basic_program(program: &ExtractedProgram, machine: &MachineMap) -> bool {
    program.load_address() == machine.basic_start
        && walk_lines(program.payload(), machine.basic_start)
}

fn walk_lines(text: &[u8], origin: u16) -> bool {
    let mut pos = 0usize;

    for _ in 0..MAX_LINES {
        let Some(link) = read_u16(text, pos) else {
            return false;
        };
        if link == 0 {
            return true;
        }

        let Some(number) = read_u16(text, pos + 2) else {
            return false;
        };
        if number == 0 || number > MAX_LINE_NUMBER {
            return false;
        }

        let Some(terminator) = text
            .get(pos + 4..)
            .and_then(|body| body.iter().position(|&b| b == 0))
        else {
            return false;
        };
        let line_end = pos + 4 + terminator + 1;

        let Some(next) = (link as usize).checked_sub(origin as usize) else {
            return false;
        };
        if next >= text.len() || next <= pos || next.abs_diff(line_end) > LINK_TOLERANCE {
            return false;
        }
        pos = next;
    }

    log::debug!("gave up walking BASIC lines after {}", MAX_LINES);
    false
}

/// Writes that make the interpreter treat the whole payload as program text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerFixup {
    /// Address of the pointer block (TXTTAB).
    pub address: u16,
    /// TXTTAB, VARTAB, ARYTAB, STREND (little-endian pairs).
    pub pointers: [u8; 8],
    /// First address past the loaded payload.
    pub end_address: u16,
    /// Empty variable table marker written at `end_address`.
    pub marker: [u8; 2],
}

impl PointerFixup {
    /// Compute the fixup for a program loaded at the text origin.
    ///
    /// Variables start after the entire payload, not just after the BASIC
    /// text, so machine code appended to the listing survives.
    pub fn for_program(program: &ExtractedProgram, machine: &MachineMap) -> BootResult<Self> {
        let end = program.end_address();
        if end < machine.min_end_address as u32 || end > machine.max_end_address as u32 {
            return Err(BootError::SuspiciousEndAddress(end));
        }
        let end_address = end as u16;
        let [start_lo, start_hi] = machine.basic_start.to_le_bytes();
        let [lo, hi] = end_address.to_le_bytes();
        Ok(Self {
            address: machine.pointer_block,
            pointers: [start_lo, start_hi, lo, hi, lo, hi, lo, hi],
            end_address,
            marker: [0, 0],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build `lines` as a BASIC program at $0801, returning the raw file bytes.
    fn listing(lines: &[(u16, &[u8])]) -> Vec<u8> {
        let mut text = Vec::new();
        for (number, body) in lines {
            let next = 0x0801 + text.len() + 4 + body.len() + 1;
            text.extend_from_slice(&(next as u16).to_le_bytes());
            text.extend_from_slice(&number.to_le_bytes());
            text.extend_from_slice(body);
            text.push(0);
        }
        text.extend_from_slice(&[0, 0]);
        let mut raw = vec![0x01, 0x08];
        raw.extend(text);
        raw
    }

    fn classify(raw: &[u8]) -> bool {
        let program = ExtractedProgram::from_raw(raw).unwrap();
        is_basic_program(&program, &MachineMap::default())
    }

    #[test]
    fn test_well_formed_listing() {
        // 10 PRINT"HI" / 20 GOTO 10
        let raw = listing(&[(10, &b"\x99\"HI\""[..]), (20, &b"\x89 10"[..])]);
        assert!(classify(&raw));
    }

    #[test]
    fn test_listing_with_appended_code() {
        let mut raw = listing(&[(2024, &b"\x9e2061"[..])]);
        raw.extend_from_slice(&[0xA9, 0x00, 0x8D, 0x20, 0xD0, 0x60]);
        assert!(classify(&raw));
    }

    #[test]
    fn test_wrong_load_address() {
        let mut raw = listing(&[(10, &b"\x80"[..])]);
        raw[1] = 0xC0;
        assert!(!classify(&raw));
    }

    #[test]
    fn test_missing_terminator() {
        let mut raw = listing(&[(10, &b"\x99\"HELLO\""[..])]);
        raw.truncate(raw.len() - 3);
        assert!(!classify(&raw));
    }

    #[test]
    fn test_line_number_bounds() {
        assert!(!classify(&listing(&[(0, &b"\x80"[..])])));
        assert!(!classify(&listing(&[(64000, &b"\x80"[..])])));
        assert!(classify(&listing(&[(63999, &b"\x80"[..])])));
    }

    #[test]
    fn test_link_beyond_tolerance() {
        let mut raw = listing(&[(10, &b"\x80"[..]), (20, &b"\x80"[..])]);
        let exact = u16::from_le_bytes([raw[2], raw[3]]);
        raw[2..4].copy_from_slice(&(exact + 3).to_le_bytes());
        assert!(!classify(&raw));
    }

    #[test]
    fn test_link_within_tolerance_is_followed() {
        // First line's link points one byte past its terminator, where a pad byte sits.
        let mut raw = vec![0x01, 0x08];
        raw.extend_from_slice(&[0x08, 0x08, 10, 0, 0x80, 0, 0xFF]);
        raw.extend_from_slice(&[0x00, 0x00]);
        assert!(classify(&raw));
    }

    #[test]
    fn test_empty_listing_is_basic() {
        let raw = [0x01, 0x08, 0x00, 0x00];
        assert!(classify(&raw));

        let program = ExtractedProgram::from_raw(&raw).unwrap();
        let fixup = PointerFixup::for_program(&program, &MachineMap::default()).unwrap();
        assert_eq!(fixup.end_address, 0x0803);
    }

    #[test]
    fn test_self_link_terminates() {
        let raw = [0x01, 0x08, 0x01, 0x08, 10, 0, 0x80, 0];
        assert!(!classify(&raw));
    }

    #[test]
    fn test_fixup_spans_whole_payload() {
        let mut raw = listing(&[(10, &b"\x9e2062"[..])]);
        raw.extend_from_slice(&[0xEA; 100]);
        let program = ExtractedProgram::from_raw(&raw).unwrap();
        let fixup = PointerFixup::for_program(&program, &MachineMap::default()).unwrap();

        let end = 0x0801 + (raw.len() - 2) as u16;
        let [lo, hi] = end.to_le_bytes();
        assert_eq!(fixup.address, 0x002B);
        assert_eq!(fixup.pointers, [0x01, 0x08, lo, hi, lo, hi, lo, hi]);
        assert_eq!(fixup.end_address, end);
        assert_eq!(fixup.marker, [0, 0]);
    }

    #[test]
    fn test_fixup_rejects_insane_end() {
        let machine = MachineMap::default();
        let tiny = ExtractedProgram::from_raw(&[0x01, 0x08, 0x00]).unwrap();
        assert!(matches!(
            PointerFixup::for_program(&tiny, &machine),
            Err(BootError::SuspiciousEndAddress(0x0802))
        ));

        let mut huge = vec![0x01, 0x08];
        huge.resize(2 + 0xA000 - 0x0801, 0xEA);
        let huge = ExtractedProgram::from_raw(&huge).unwrap();
        assert!(matches!(
            PointerFixup::for_program(&huge, &machine),
            Err(BootError::SuspiciousEndAddress(0xA000))
        ));
    }
}
