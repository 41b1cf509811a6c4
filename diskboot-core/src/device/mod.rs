//! Remote device abstraction.
//!
//! The `Device` trait mirrors the device's REST operations one call at a
//! time. Two implementations are provided:
//! - `HttpDevice`: Talks to a real device over HTTP
//! - `MemoryDevice`: In-memory stand-in for tests

mod http;
mod memory;

use std::fmt;

pub use http::{parse_drive_listing, HttpDevice};
pub use memory::{DeviceCall, MemoryDevice};

use crate::config::MountMode;
use crate::error::{BootError, BootResult};

/// Drive the image is mounted on.
pub const PRIMARY_DRIVE: &str = "a";

/// Emulated drive hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveMode {
    Cbm1541,
    Cbm1571,
    Cbm1581,
}

impl DriveMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cbm1541 => "1541",
            Self::Cbm1571 => "1571",
            Self::Cbm1581 => "1581",
        }
    }
}

impl fmt::Display for DriveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameterless drive actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveCommand {
    On,
    Reset,
    Remove,
}

impl DriveCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Reset => "reset",
            Self::Remove => "remove",
        }
    }
}

/// One drive as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DriveStatus {
    pub name: String,
    pub enabled: bool,
    pub bus_id: Option<i64>,
    pub drive_type: Option<String>,
}

/// Image upload parameters.
#[derive(Debug, Clone, Copy)]
pub struct MountRequest<'a> {
    pub image: &'a [u8],
    pub filename: &'a str,
    pub image_type: &'a str,
    pub mode: MountMode,
}

/// Operations of the device's remote-control API.
///
/// Each call is a single request; none of them retry.
pub trait Device {
    /// Reset the machine.
    fn reset(&mut self) -> BootResult<()>;

    /// Reboot the machine (slower than a reset).
    fn reboot(&mut self) -> BootResult<()>;

    /// Read one byte of emulated memory.
    fn read_byte(&mut self, address: u16) -> BootResult<u8>;

    /// Write a block of emulated memory in one request.
    fn write_block(&mut self, address: u16, data: &[u8]) -> BootResult<()>;

    /// Write one byte of emulated memory.
    fn write_byte(&mut self, address: u16, value: u8) -> BootResult<()>;

    /// List the device's drives.
    fn drive_status(&mut self) -> BootResult<Vec<DriveStatus>>;

    /// Select the emulated drive hardware.
    fn set_drive_mode(&mut self, drive: &str, mode: DriveMode) -> BootResult<()>;

    /// Power on, reset or eject a drive.
    fn drive_command(&mut self, drive: &str, command: DriveCommand) -> BootResult<()>;

    /// Upload and mount an image.
    fn upload_image(&mut self, drive: &str, request: MountRequest<'_>) -> BootResult<()>;

    /// Full mount sequence: power on, eject, upload, then reset so the drive notices.
    fn mount(&mut self, drive: &str, request: MountRequest<'_>) -> BootResult<()> {
        self.drive_command(drive, DriveCommand::On)?;
        self.drive_command(drive, DriveCommand::Remove)?;
        self.upload_image(drive, request)?;
        self.drive_command(drive, DriveCommand::Reset)
    }

    /// Bus id of a drive; must be present and positive.
    fn bus_id(&mut self, drive: &str) -> BootResult<i64> {
        self.drive_status()?
            .into_iter()
            .find(|status| status.name.eq_ignore_ascii_case(drive))
            .and_then(|status| status.bus_id)
            .filter(|&id| id > 0)
            .ok_or_else(|| BootError::BusIdUnavailable(drive.to_string()))
    }
}
