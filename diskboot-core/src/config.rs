//! Run configuration.
//!
//! A `BootConfig` is built once per run (defaults, then an optional JSON
//! file, then command-line overrides) and is read-only afterwards.
//!
//! Example `diskboot.json`:
//! ```json
//! {
//!   "cycles": 3,
//!   "resetBetweenCycles": true,
//!   "timing": { "cycleDelayMs": 2000 }
//! }
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BootResult;

/// How the device mounts the uploaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    #[default]
    ReadOnly,
    ReadWrite,
    Unlinked,
}

impl MountMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "readonly",
            Self::ReadWrite => "readwrite",
            Self::Unlinked => "unlinked",
        }
    }
}

impl fmt::Display for MountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MountMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "readonly" | "ro" => Ok(Self::ReadOnly),
            "readwrite" | "rw" => Ok(Self::ReadWrite),
            "unlinked" => Ok(Self::Unlinked),
            other => Err(format!("unknown mount mode: {}", other)),
        }
    }
}

/// Delays and poll bounds of the load sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Timing {
    /// Wait after a machine reboot.
    pub reboot_settle_ms: u64,
    /// Wait after mounting the image.
    pub mount_settle_ms: u64,
    /// Interval between keyboard queue polls.
    pub keyboard_poll_ms: u64,
    /// Polls before giving up on a busy keyboard queue.
    pub keyboard_poll_limit: u32,
    /// Wait between DMA attempts.
    pub dma_backoff_ms: u64,
    /// Wait between cycles.
    pub cycle_delay_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            reboot_settle_ms: 800,
            mount_settle_ms: 400,
            keyboard_poll_ms: 50,
            keyboard_poll_limit: 200,
            dma_backoff_ms: 250,
            cycle_delay_ms: 0,
        }
    }
}

impl Timing {
    /// No waiting at all (for tests against an in-memory device).
    pub fn immediate() -> Self {
        Self {
            reboot_settle_ms: 0,
            mount_settle_ms: 0,
            keyboard_poll_ms: 0,
            keyboard_poll_limit: 200,
            dma_backoff_ms: 0,
            cycle_delay_ms: 0,
        }
    }

    pub fn reboot_settle(&self) -> Duration {
        Duration::from_millis(self.reboot_settle_ms)
    }

    pub fn mount_settle(&self) -> Duration {
        Duration::from_millis(self.mount_settle_ms)
    }

    pub fn keyboard_poll(&self) -> Duration {
        Duration::from_millis(self.keyboard_poll_ms)
    }

    pub fn dma_backoff(&self) -> Duration {
        Duration::from_millis(self.dma_backoff_ms)
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.cycle_delay_ms)
    }
}

/// Fixed addresses of the target machine (C64 KERNAL/BASIC V2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MachineMap {
    /// BASIC text origin.
    pub basic_start: u16,
    /// TXTTAB; followed by VARTAB, ARYTAB and STREND.
    pub pointer_block: u16,
    /// Keyboard buffer.
    pub keyboard_buffer: u16,
    /// Number of characters in the keyboard buffer.
    pub keyboard_count: u16,
    /// Keyboard buffer capacity.
    pub keyboard_capacity: u8,
    /// Lowest acceptable end-of-program address after a fixup.
    pub min_end_address: u16,
    /// Highest acceptable end-of-program address (marker must fit below BASIC ROM).
    pub max_end_address: u16,
    /// Lowest bus id a drive may report.
    pub min_bus_id: u8,
    /// Highest bus id a drive may report. Only 8 and 9 fit the raw-track LOAD command.
    pub max_bus_id: u8,
}

impl Default for MachineMap {
    fn default() -> Self {
        Self {
            basic_start: 0x0801,
            pointer_block: 0x002B,
            keyboard_buffer: 0x0277,
            keyboard_count: 0x00C6,
            keyboard_capacity: 10,
            min_end_address: 0x0803,
            max_end_address: 0x9FFE,
            min_bus_id: 8,
            max_bus_id: 30,
        }
    }
}

/// Complete run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BootConfig {
    pub timing: Timing,
    pub machine: MachineMap,
    /// DMA retries after the first failed attempt.
    pub dma_retries: u32,
    /// Number of load/run cycles.
    pub cycles: u32,
    /// Reset the machine between cycles.
    pub reset_between_cycles: bool,
    pub mount_mode: MountMode,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            timing: Timing::default(),
            machine: MachineMap::default(),
            dma_retries: 3,
            cycles: 1,
            reset_between_cycles: false,
            mount_mode: MountMode::ReadOnly,
        }
    }
}

impl BootConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> BootResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> BootResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
