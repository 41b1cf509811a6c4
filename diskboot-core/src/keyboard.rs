//! Command injection through the KERNAL keyboard queue.
//!
//! The machine reads typed keys from a fixed buffer whose fill level lives
//! in a separate count byte. A command is written only once the queue is
//! empty, so the device never drains a half-written queue.

use std::thread;

use crate::config::{MachineMap, Timing};
use crate::device::Device;
use crate::error::{BootError, BootResult};

/// PETSCII carriage return.
pub const RETURN: u8 = 0x0D;

/// `L<shift-O>"*",8,1<CR>`: the abbreviated LOAD that fits the queue.
pub const LOAD_TEMPLATE: [u8; 10] = [0x4C, 0xCF, 0x22, 0x2A, 0x22, 0x2C, 0x38, 0x2C, 0x31, RETURN];

/// Position of the device-number digit in [`LOAD_TEMPLATE`].
const BUS_DIGIT: usize = 6;

/// Encode ASCII text as unshifted PETSCII (letters upper-cased, `\n` as RETURN).
pub fn petscii(text: &str) -> Vec<u8> {
    text.bytes()
        .map(|b| match b {
            b'\n' => RETURN,
            b'a'..=b'z' => b.to_ascii_uppercase(),
            _ => b,
        })
        .collect()
}

/// `RUN<CR>`.
pub fn run_command() -> Vec<u8> {
    petscii("RUN\n")
}

/// `SYS <address><CR>`.
pub fn sys_command(address: u16) -> Vec<u8> {
    petscii(&format!("SYS {}\n", address))
}

/// The LOAD template with its device digit set to `bus_id`.
///
/// The id must be a single digit inside the machine's bus range.
pub fn load_command(bus_id: i64, machine: &MachineMap) -> BootResult<Vec<u8>> {
    let in_range = bus_id >= machine.min_bus_id as i64 && bus_id <= machine.max_bus_id as i64;
    if !in_range || !(0..=9).contains(&bus_id) {
        return Err(BootError::InvalidBusId(bus_id));
    }
    let mut command = LOAD_TEMPLATE.to_vec();
    command[BUS_DIGIT] = b'0' + bus_id as u8;
    Ok(command)
}

/// Type `command` into the keyboard queue.
///
/// Polls the queue count until it reads zero (at most `timing.keyboard_poll_limit`
/// polls), then writes the bytes and sets the count to their length.
pub fn inject<D: Device + ?Sized>(
    device: &mut D,
    command: &[u8],
    machine: &MachineMap,
    timing: &Timing,
) -> BootResult<()> {
    let capacity = machine.keyboard_capacity as usize;
    if command.len() > capacity {
        return Err(BootError::CommandTooLong {
            len: command.len(),
            max: capacity,
        });
    }

    wait_for_empty_queue(device, machine, timing)?;

    log::debug!("typing {:02X?}", command);
    device.write_block(machine.keyboard_buffer, command)?;
    device.write_byte(machine.keyboard_count, command.len() as u8)
}

fn wait_for_empty_queue<D: Device + ?Sized>(
    device: &mut D,
    machine: &MachineMap,
    timing: &Timing,
) -> BootResult<()> {
    for poll in 0..timing.keyboard_poll_limit {
        if device.read_byte(machine.keyboard_count)? == 0 {
            return Ok(());
        }
        log::trace!("keyboard queue busy (poll {})", poll + 1);
        thread::sleep(timing.keyboard_poll());
    }
    Err(BootError::KeyboardBusy {
        polls: timing.keyboard_poll_limit,
    })
}
