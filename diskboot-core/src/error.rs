//! Error types for disk decoding and device control.

use thiserror::Error;

use crate::disk::{DiskFormat, TrackSector};

/// Errors that can occur while decoding an image or driving the device.
#[derive(Error, Debug)]
pub enum BootError {
    #[error("Unsupported image type: {0}")]
    UnsupportedImageType(String),

    #[error("Unsupported {format} image size: {size} bytes")]
    UnsupportedImageSize { format: DiskFormat, size: usize },

    #[error("Sector out of range: {0}")]
    OutOfRange(TrackSector),

    #[error("Truncated image at {location}: expected 256 bytes, {available} available")]
    TruncatedImage {
        location: TrackSector,
        available: usize,
    },

    #[error("No program found in directory")]
    NoProgramFound,

    #[error("Loop detected in program chain at {0}")]
    CorruptChain(TrackSector),

    #[error("Program payload is too small: {0} bytes")]
    PayloadTooSmall(usize),

    #[error("Program does not fit in memory: ${load:04X} + {len} bytes")]
    ProgramTooLarge { load: u16, len: usize },

    #[error("Bus id unavailable for drive {0}")]
    BusIdUnavailable(String),

    #[error("Invalid bus id: {0}")]
    InvalidBusId(i64),

    #[error("{format} images cannot be mounted on the device")]
    UnsupportedDriveFormat { format: DiskFormat },

    #[error("DMA load failed after {attempts} attempts")]
    DmaLoadFailed {
        attempts: u32,
        #[source]
        source: Box<BootError>,
    },

    #[error("Suspicious end address: ${0:X}")]
    SuspiciousEndAddress(u32),

    #[error("Command too long: {len} bytes (queue holds {max})")]
    CommandTooLong { len: usize, max: usize },

    #[error("Keyboard queue still busy after {polls} polls")]
    KeyboardBusy { polls: u32 },

    #[error("No transition out of state {0:?}")]
    InvalidTransition(crate::loader::LoadState),

    #[error("Device error: {0}")]
    Device(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for diskboot operations.
pub type BootResult<T> = Result<T, BootError>;
