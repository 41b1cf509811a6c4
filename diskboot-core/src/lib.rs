//! Disk image boot core.
//!
//! This crate boots the first program of a Commodore disk image on a
//! networked C64 device:
//! - Disk decoding: geometry, sector chains, directory and program extraction
//! - BASIC detection and interpreter pointer fixup
//! - Keyboard queue injection
//! - Device API access (HTTP or in-memory)
//!
//! # Architecture
//!
//! Decoding is pure and happens up front in a `BootPlan`. The
//! `LoadOrchestrator` then drives any `Device` through an explicit state
//! machine: reboot, drive setup, mount, DMA load, pointer fixup, start.

pub mod basic;
pub mod config;
pub mod device;
pub mod disk;
pub mod error;
pub mod keyboard;
pub mod loader;

pub use basic::{is_basic_program, PointerFixup};
pub use config::{BootConfig, MachineMap, MountMode, Timing};
pub use device::{Device, DeviceCall, DriveMode, DriveStatus, HttpDevice, MemoryDevice, PRIMARY_DRIVE};
pub use disk::{
    extract_program, find_first_program, first_program, Directory, DirectoryEntry, DiskFormat,
    DiskGeometry, DiskImage, ExtractedProgram, FoundProgram, ImageKind, RawTrackFormat,
    TrackSector,
};
pub use error::{BootError, BootResult};
pub use loader::{BootPayload, BootPlan, LoadOrchestrator, LoadState};
