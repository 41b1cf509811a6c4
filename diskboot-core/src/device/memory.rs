//! In-memory device for testing.

use super::{Device, DriveCommand, DriveMode, DriveStatus, MountRequest, PRIMARY_DRIVE};
use crate::config::{MachineMap, MountMode};
use crate::error::{BootError, BootResult};

const MEMORY_SIZE: usize = 0x10000;

/// A request as seen by the device, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Reset,
    Reboot,
    ReadByte(u16),
    WriteBlock { address: u16, len: usize },
    WriteByte { address: u16, value: u8 },
    DriveStatus,
    SetDriveMode { drive: String, mode: DriveMode },
    DriveCommand { drive: String, command: DriveCommand },
    Upload {
        drive: String,
        filename: String,
        image_type: String,
        mode: MountMode,
        len: usize,
    },
}

/// Emulated device: 64KB of RAM, a drive listing and a call log.
///
/// The keyboard queue drains whenever its count is polled while non-zero,
/// as if the machine had read the keys; drained bytes are kept in `typed()`.
pub struct MemoryDevice {
    memory: Vec<u8>,
    calls: Vec<DeviceCall>,
    drives: Vec<DriveStatus>,
    keyboard_buffer: u16,
    keyboard_count: u16,
    keyboard_stuck: bool,
    typed: Vec<u8>,
    failing_block_writes: u32,
    mounted: Option<String>,
}

impl Default for MemoryDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDevice {
    /// Device with drive `a` on bus 8 and the default machine map.
    pub fn new() -> Self {
        Self::with_machine(&MachineMap::default())
    }

    pub fn with_machine(machine: &MachineMap) -> Self {
        Self {
            memory: vec![0; MEMORY_SIZE],
            calls: Vec::new(),
            drives: vec![DriveStatus {
                name: PRIMARY_DRIVE.to_string(),
                enabled: true,
                bus_id: Some(8),
                drive_type: Some("1541".to_string()),
            }],
            keyboard_buffer: machine.keyboard_buffer,
            keyboard_count: machine.keyboard_count,
            keyboard_stuck: false,
            typed: Vec::new(),
            failing_block_writes: 0,
            mounted: None,
        }
    }

    /// Replace the drive listing.
    pub fn set_drives(&mut self, drives: Vec<DriveStatus>) {
        self.drives = drives;
    }

    /// Make the next `count` block writes fail.
    pub fn fail_block_writes(&mut self, count: u32) {
        self.failing_block_writes = count;
    }

    /// Keep the keyboard queue from ever draining.
    pub fn stick_keyboard(&mut self) {
        self.keyboard_stuck = true;
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Memory contents at `address..address + len`.
    pub fn peek(&self, address: u16, len: usize) -> &[u8] {
        let start = address as usize;
        let end = (start + len).min(MEMORY_SIZE);
        &self.memory[start..end]
    }

    /// Bytes the machine has taken from the keyboard queue so far.
    pub fn typed(&self) -> &[u8] {
        &self.typed
    }

    /// Bytes still waiting in the keyboard queue.
    pub fn pending_keys(&self) -> &[u8] {
        let count = self.memory[self.keyboard_count as usize] as usize;
        self.peek(self.keyboard_buffer, count)
    }

    /// Filename of the mounted image, if any.
    pub fn mounted(&self) -> Option<&str> {
        self.mounted.as_deref()
    }

    fn drain_keyboard(&mut self) {
        let pending = self.pending_keys().to_vec();
        self.typed.extend(pending);
        self.memory[self.keyboard_count as usize] = 0;
    }
}

impl Device for MemoryDevice {
    fn reset(&mut self) -> BootResult<()> {
        self.calls.push(DeviceCall::Reset);
        self.memory[self.keyboard_count as usize] = 0;
        Ok(())
    }

    fn reboot(&mut self) -> BootResult<()> {
        self.calls.push(DeviceCall::Reboot);
        self.memory.fill(0);
        Ok(())
    }

    fn read_byte(&mut self, address: u16) -> BootResult<u8> {
        self.calls.push(DeviceCall::ReadByte(address));
        let value = self.memory[address as usize];
        if address == self.keyboard_count && value != 0 && !self.keyboard_stuck {
            self.drain_keyboard();
        }
        Ok(value)
    }

    fn write_block(&mut self, address: u16, data: &[u8]) -> BootResult<()> {
        self.calls.push(DeviceCall::WriteBlock {
            address,
            len: data.len(),
        });
        if self.failing_block_writes > 0 {
            self.failing_block_writes -= 1;
            return Err(BootError::Device("injected write failure".to_string()));
        }
        let start = address as usize;
        let target = self
            .memory
            .get_mut(start..start + data.len())
            .ok_or_else(|| BootError::Device(format!("write past end of memory at ${:04X}", address)))?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn write_byte(&mut self, address: u16, value: u8) -> BootResult<()> {
        self.calls.push(DeviceCall::WriteByte { address, value });
        self.memory[address as usize] = value;
        Ok(())
    }

    fn drive_status(&mut self) -> BootResult<Vec<DriveStatus>> {
        self.calls.push(DeviceCall::DriveStatus);
        Ok(self.drives.clone())
    }

    fn set_drive_mode(&mut self, drive: &str, mode: DriveMode) -> BootResult<()> {
        self.calls.push(DeviceCall::SetDriveMode {
            drive: drive.to_string(),
            mode,
        });
        Ok(())
    }

    fn drive_command(&mut self, drive: &str, command: DriveCommand) -> BootResult<()> {
        self.calls.push(DeviceCall::DriveCommand {
            drive: drive.to_string(),
            command,
        });
        if command == DriveCommand::Remove {
            self.mounted = None;
        }
        Ok(())
    }

    fn upload_image(&mut self, drive: &str, request: MountRequest<'_>) -> BootResult<()> {
        self.calls.push(DeviceCall::Upload {
            drive: drive.to_string(),
            filename: request.filename.to_string(),
            image_type: request.image_type.to_string(),
            mode: request.mode,
            len: request.image.len(),
        });
        self.mounted = Some(request.filename.to_string());
        Ok(())
    }
}
