//! Load orchestrator - drives the device from power-on to a running program.
//!
//! One cycle walks these states in order:
//!
//! ```text
//! Idle -> Rebooted -> DriveConfigured -> Mounted -> MemoryLoaded -> [PointersFixed] -> Started
//! ```
//!
//! Each state has its own transition method so callers (and tests) can
//! drive and inspect the sequence one step at a time. Nothing is rolled
//! back on failure: the device stays in whatever state the last
//! successful step left it.

use std::path::Path;
use std::thread;

use crate::basic::{is_basic_program, PointerFixup};
use crate::config::BootConfig;
use crate::device::{Device, DriveMode, MountRequest, PRIMARY_DRIVE};
use crate::disk::{first_program, DiskFormat, ExtractedProgram, ImageKind, RawTrackFormat};
use crate::error::{BootError, BootResult};
use crate::keyboard::{inject, load_command, run_command, sys_command};

/// Size of the target's address space.
const ADDRESS_SPACE: u32 = 0x10000;

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Rebooted,
    DriveConfigured,
    Mounted,
    MemoryLoaded,
    PointersFixed,
    Started,
}

/// What gets started once the image is mounted.
#[derive(Debug, Clone)]
pub enum BootPayload {
    /// A program to DMA into memory.
    Program {
        name: String,
        program: ExtractedProgram,
        /// Tokenized BASIC at the text origin; gets a pointer fixup and `RUN`.
        basic: bool,
    },
    /// Raw-track image: nothing to extract, the drive loads it.
    RawTrack,
}

/// Everything needed to boot one image, decoded up front.
#[derive(Debug, Clone)]
pub struct BootPlan {
    pub kind: ImageKind,
    pub filename: String,
    pub image: Vec<u8>,
    pub payload: BootPayload,
}

impl BootPlan {
    /// Decode `image` and locate what to run.
    pub fn prepare(kind: ImageKind, filename: &str, image: Vec<u8>, config: &BootConfig) -> BootResult<Self> {
        let payload = match kind {
            ImageKind::Sector(format) => {
                let found = first_program(format, image.clone())?;
                let program = found.program;
                if program.end_address() > ADDRESS_SPACE {
                    return Err(BootError::ProgramTooLarge {
                        load: program.load_address(),
                        len: program.payload().len(),
                    });
                }
                let basic = is_basic_program(&program, &config.machine);
                BootPayload::Program {
                    name: found.entry.name(),
                    program,
                    basic,
                }
            }
            ImageKind::RawTrack(_) => BootPayload::RawTrack,
        };
        Ok(Self {
            kind,
            filename: filename.to_string(),
            image,
            payload,
        })
    }

    /// Read and decode an image file; its extension selects the format.
    pub fn from_path(path: &Path, config: &BootConfig) -> BootResult<Self> {
        let kind = ImageKind::from_path(path)?;
        let image = std::fs::read(path)?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image")
            .to_string();
        Self::prepare(kind, &filename, image, config)
    }

    /// Drive hardware to emulate for this image.
    pub fn drive_mode(&self) -> BootResult<DriveMode> {
        match self.kind {
            ImageKind::Sector(DiskFormat::D64) | ImageKind::RawTrack(RawTrackFormat::G64) => {
                Ok(DriveMode::Cbm1541)
            }
            ImageKind::Sector(DiskFormat::D71) | ImageKind::RawTrack(RawTrackFormat::G71) => {
                Ok(DriveMode::Cbm1571)
            }
            ImageKind::Sector(DiskFormat::D81) => Ok(DriveMode::Cbm1581),
            ImageKind::Sector(format @ DiskFormat::D80) => {
                Err(BootError::UnsupportedDriveFormat { format })
            }
        }
    }
}

/// Sequences one or more load/run cycles against a device.
pub struct LoadOrchestrator<D: Device> {
    device: D,
    plan: BootPlan,
    config: BootConfig,
    state: LoadState,
    bus_id: Option<i64>,
}

impl<D: Device> LoadOrchestrator<D> {
    pub fn new(device: D, plan: BootPlan, config: BootConfig) -> Self {
        Self {
            device,
            plan,
            config,
            state: LoadState::Idle,
            bus_id: None,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn plan(&self) -> &BootPlan {
        &self.plan
    }

    /// Bus id of the primary drive, once discovered.
    pub fn bus_id(&self) -> Option<i64> {
        self.bus_id
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    /// Take the single transition out of the current state.
    pub fn step(&mut self) -> BootResult<LoadState> {
        match self.state {
            LoadState::Idle => self.reboot(),
            LoadState::Rebooted => self.configure_drive(),
            LoadState::DriveConfigured => self.mount(),
            LoadState::Mounted => self.load_memory(),
            LoadState::MemoryLoaded if self.needs_fixup() => self.fix_pointers(),
            LoadState::MemoryLoaded | LoadState::PointersFixed => self.start(),
            LoadState::Started => Err(BootError::InvalidTransition(self.state)),
        }?;
        Ok(self.state)
    }

    /// Step until the program is started.
    pub fn run_cycle(&mut self) -> BootResult<()> {
        while self.state != LoadState::Started {
            self.step()?;
        }
        Ok(())
    }

    /// Run all configured cycles.
    pub fn run(&mut self) -> BootResult<()> {
        let cycles = self.config.cycles.max(1);
        for cycle in 1..=cycles {
            if cycle > 1 {
                self.restart()?;
            }
            log::info!("cycle {}/{}", cycle, cycles);
            self.run_cycle()?;
        }
        Ok(())
    }

    /// Prepare for another cycle: optional reset, then the inter-cycle delay.
    pub fn restart(&mut self) -> BootResult<()> {
        if self.config.reset_between_cycles {
            log::info!("resetting machine between cycles");
            self.device.reset()?;
        }
        thread::sleep(self.config.timing.cycle_delay());
        self.state = LoadState::Idle;
        Ok(())
    }

    fn enter(&mut self, state: LoadState) {
        log::info!("{:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn needs_fixup(&self) -> bool {
        matches!(self.plan.payload, BootPayload::Program { basic: true, .. })
    }

    /// Idle -> Rebooted.
    pub fn reboot(&mut self) -> BootResult<()> {
        self.device.reboot()?;
        thread::sleep(self.config.timing.reboot_settle());
        self.enter(LoadState::Rebooted);
        Ok(())
    }

    /// Rebooted -> DriveConfigured.
    pub fn configure_drive(&mut self) -> BootResult<()> {
        let mode = self.plan.drive_mode()?;
        self.device.set_drive_mode(PRIMARY_DRIVE, mode)?;
        self.enter(LoadState::DriveConfigured);
        Ok(())
    }

    /// DriveConfigured -> Mounted. Discovers the drive's bus id on the first cycle.
    pub fn mount(&mut self) -> BootResult<()> {
        let request = MountRequest {
            image: &self.plan.image,
            filename: &self.plan.filename,
            image_type: self.plan.kind.type_name(),
            mode: self.config.mount_mode,
        };
        self.device.mount(PRIMARY_DRIVE, request)?;
        thread::sleep(self.config.timing.mount_settle());

        if self.bus_id.is_none() {
            let id = self.device.bus_id(PRIMARY_DRIVE)?;
            let machine = &self.config.machine;
            if id < machine.min_bus_id as i64 || id > machine.max_bus_id as i64 {
                return Err(BootError::InvalidBusId(id));
            }
            log::info!("drive {} is on bus {}", PRIMARY_DRIVE, id);
            self.bus_id = Some(id);
        }
        self.enter(LoadState::Mounted);
        Ok(())
    }

    /// Mounted -> MemoryLoaded. Raw-track images have nothing to load.
    pub fn load_memory(&mut self) -> BootResult<()> {
        match &self.plan.payload {
            BootPayload::Program { program, .. } => {
                dma_write(&mut self.device, program, &self.config)?;
            }
            BootPayload::RawTrack => log::info!("raw-track image: skipping DMA load"),
        }
        self.enter(LoadState::MemoryLoaded);
        Ok(())
    }

    /// MemoryLoaded -> PointersFixed (BASIC programs only).
    pub fn fix_pointers(&mut self) -> BootResult<()> {
        let BootPayload::Program { program, .. } = &self.plan.payload else {
            return Err(BootError::InvalidTransition(self.state));
        };
        let fixup = PointerFixup::for_program(program, &self.config.machine)?;
        log::debug!("BASIC end at ${:04X}", fixup.end_address);
        self.device.write_block(fixup.address, &fixup.pointers)?;
        self.device.write_block(fixup.end_address, &fixup.marker)?;
        self.enter(LoadState::PointersFixed);
        Ok(())
    }

    /// MemoryLoaded/PointersFixed -> Started.
    pub fn start(&mut self) -> BootResult<()> {
        let machine = &self.config.machine;
        let timing = &self.config.timing;
        match &self.plan.payload {
            BootPayload::Program { basic: true, .. } => {
                inject(&mut self.device, &run_command(), machine, timing)?;
            }
            BootPayload::Program { program, .. } => {
                inject(&mut self.device, &sys_command(program.load_address()), machine, timing)?;
            }
            BootPayload::RawTrack => {
                let bus_id = self
                    .bus_id
                    .ok_or_else(|| BootError::BusIdUnavailable(PRIMARY_DRIVE.to_string()))?;
                inject(&mut self.device, &load_command(bus_id, machine)?, machine, timing)?;
                inject(&mut self.device, &run_command(), machine, timing)?;
            }
        }
        self.enter(LoadState::Started);
        Ok(())
    }
}

/// Write the payload at its load address in one request, retrying with a fixed backoff.
fn dma_write<D: Device>(device: &mut D, program: &ExtractedProgram, config: &BootConfig) -> BootResult<()> {
    let attempts = config.dma_retries + 1;
    let address = program.load_address();
    let payload = program.payload();

    let mut attempt = 1;
    loop {
        match device.write_block(address, payload) {
            Ok(()) => {
                log::info!("loaded {} bytes at ${:04X}", payload.len(), address);
                return Ok(());
            }
            Err(e) if attempt < attempts => {
                log::warn!("DMA attempt {}/{} failed: {}", attempt, attempts, e);
                thread::sleep(config.timing.dma_backoff());
                attempt += 1;
            }
            Err(e) => {
                return Err(BootError::DmaLoadFailed {
                    attempts,
                    source: Box::new(e),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timing;
    use crate::device::{DeviceCall, DriveStatus, MemoryDevice};

    fn config() -> BootConfig {
        BootConfig {
            timing: Timing::immediate(),
            ..BootConfig::default()
        }
    }

    fn program_plan(raw: &[u8], basic: bool) -> BootPlan {
        BootPlan {
            kind: ImageKind::Sector(DiskFormat::D64),
            filename: "test.d64".to_string(),
            image: vec![0; 64],
            payload: BootPayload::Program {
                name: "TEST".to_string(),
                program: ExtractedProgram::from_raw(raw).unwrap(),
                basic,
            },
        }
    }

    fn raw_plan() -> BootPlan {
        BootPlan {
            kind: ImageKind::RawTrack(RawTrackFormat::G64),
            filename: "test.g64".to_string(),
            image: vec![0; 64],
            payload: BootPayload::RawTrack,
        }
    }

    // 10 SYS2061 + RTS
    const BASIC_RAW: [u8; 16] = [
        0x01, 0x08, 0x0B, 0x08, 0x0A, 0x00, 0x9E, 0x32, 0x30, 0x36, 0x31, 0x00, 0x00, 0x00, 0x60,
        0x60,
    ];

    #[test]
    fn test_step_by_step_basic() {
        let mut loader = LoadOrchestrator::new(MemoryDevice::new(), program_plan(&BASIC_RAW, true), config());
        assert_eq!(loader.state(), LoadState::Idle);
        assert_eq!(loader.step().unwrap(), LoadState::Rebooted);
        assert_eq!(loader.device().calls(), &[DeviceCall::Reboot]);

        assert_eq!(loader.step().unwrap(), LoadState::DriveConfigured);
        assert_eq!(loader.step().unwrap(), LoadState::Mounted);
        assert_eq!(loader.bus_id(), Some(8));
        assert_eq!(loader.device().mounted(), Some("test.d64"));

        assert_eq!(loader.step().unwrap(), LoadState::MemoryLoaded);
        assert_eq!(loader.device().peek(0x0801, 14), &BASIC_RAW[2..]);

        assert_eq!(loader.step().unwrap(), LoadState::PointersFixed);
        let end = 0x0801 + 14;
        assert_eq!(
            loader.device().peek(0x002B, 8),
            &[0x01, 0x08, 0x0F, 0x08, 0x0F, 0x08, 0x0F, 0x08]
        );
        assert_eq!(loader.device().peek(end, 2), &[0, 0]);

        assert_eq!(loader.step().unwrap(), LoadState::Started);
        assert_eq!(loader.device().pending_keys(), b"RUN\r");

        assert!(matches!(
            loader.step(),
            Err(BootError::InvalidTransition(LoadState::Started))
        ));
    }

    #[test]
    fn test_machine_code_skips_fixup() {
        let raw = [0x00, 0xC0, 0xEE, 0x20, 0xD0, 0x60];
        let mut loader = LoadOrchestrator::new(MemoryDevice::new(), program_plan(&raw, false), config());
        for _ in 0..4 {
            loader.step().unwrap();
        }
        assert_eq!(loader.state(), LoadState::MemoryLoaded);
        assert_eq!(loader.step().unwrap(), LoadState::Started);
        assert_eq!(loader.device().pending_keys(), b"SYS 49152\r");
        assert_eq!(loader.device().peek(0x002B, 8), &[0; 8]);
    }

    #[test]
    fn test_drive_configured_for_format() {
        let mut plan = program_plan(&BASIC_RAW, true);
        plan.kind = ImageKind::Sector(DiskFormat::D81);
        let mut loader = LoadOrchestrator::new(MemoryDevice::new(), plan, config());
        loader.run_cycle().unwrap();
        assert!(loader.device().calls().contains(&DeviceCall::SetDriveMode {
            drive: "a".to_string(),
            mode: DriveMode::Cbm1581,
        }));
        assert!(loader.device().calls().iter().any(|c| matches!(
            c,
            DeviceCall::Upload { image_type, .. } if image_type == "d81"
        )));
    }

    #[test]
    fn test_d80_cannot_be_mounted() {
        let mut plan = program_plan(&BASIC_RAW, true);
        plan.kind = ImageKind::Sector(DiskFormat::D80);
        let mut loader = LoadOrchestrator::new(MemoryDevice::new(), plan, config());
        loader.step().unwrap();
        assert!(matches!(
            loader.step(),
            Err(BootError::UnsupportedDriveFormat { .. })
        ));
        assert_eq!(loader.state(), LoadState::Rebooted);
    }

    #[test]
    fn test_dma_retries_then_succeeds() {
        let mut device = MemoryDevice::new();
        device.fail_block_writes(2);
        let mut loader = LoadOrchestrator::new(device, program_plan(&BASIC_RAW, false), config());
        loader.run_cycle().unwrap();
        let writes = loader
            .device()
            .calls()
            .iter()
            .filter(|c| matches!(c, DeviceCall::WriteBlock { address: 0x0801, .. }))
            .count();
        assert_eq!(writes, 3);
    }

    #[test]
    fn test_dma_gives_up() {
        let mut device = MemoryDevice::new();
        device.fail_block_writes(10);
        let mut cfg = config();
        cfg.dma_retries = 2;
        let mut loader = LoadOrchestrator::new(device, program_plan(&BASIC_RAW, true), cfg);
        let err = loader.run_cycle().unwrap_err();
        assert!(matches!(err, BootError::DmaLoadFailed { attempts: 3, .. }));
        assert_eq!(loader.state(), LoadState::Mounted);
    }

    #[test]
    fn test_raw_track_boot() {
        let mut loader = LoadOrchestrator::new(drive_on_bus(9), raw_plan(), config());
        loader.run_cycle().unwrap();

        let device = loader.into_device();
        assert!(!device
            .calls()
            .iter()
            .any(|c| matches!(c, DeviceCall::WriteBlock { address: 0x002B, .. })));
        assert_eq!(device.typed(), b"L\xCF\"*\",9,1\r");
        assert_eq!(device.pending_keys(), b"RUN\r");
    }

    fn drive_on_bus(bus_id: i64) -> MemoryDevice {
        let mut device = MemoryDevice::new();
        device.set_drives(vec![DriveStatus {
            name: "a".to_string(),
            enabled: true,
            bus_id: Some(bus_id),
            drive_type: Some("1541".to_string()),
        }]);
        device
    }

    #[test]
    fn test_bus_id_out_of_range() {
        let mut loader = LoadOrchestrator::new(drive_on_bus(31), raw_plan(), config());
        assert!(matches!(
            loader.run_cycle(),
            Err(BootError::InvalidBusId(31))
        ));
        assert_eq!(loader.state(), LoadState::DriveConfigured);
    }

    #[test]
    fn test_two_digit_bus_id_only_blocks_raw_track_boot() {
        let raw = [0x00, 0xC0, 0x60];
        let mut loader = LoadOrchestrator::new(drive_on_bus(10), program_plan(&raw, false), config());
        loader.run_cycle().unwrap();
        assert_eq!(loader.bus_id(), Some(10));
        assert_eq!(loader.device().pending_keys(), b"SYS 49152\r");

        let mut loader = LoadOrchestrator::new(drive_on_bus(10), raw_plan(), config());
        assert!(matches!(
            loader.run_cycle(),
            Err(BootError::InvalidBusId(10))
        ));
        assert_eq!(loader.state(), LoadState::MemoryLoaded);
        assert!(loader.device().pending_keys().is_empty());
    }

    #[test]
    fn test_missing_drive() {
        let mut device = MemoryDevice::new();
        device.set_drives(Vec::new());
        let mut loader = LoadOrchestrator::new(device, raw_plan(), config());
        assert!(matches!(
            loader.run_cycle(),
            Err(BootError::BusIdUnavailable(_))
        ));
    }

    #[test]
    fn test_cycles_with_reset() {
        let mut cfg = config();
        cfg.cycles = 3;
        cfg.reset_between_cycles = true;
        let mut loader = LoadOrchestrator::new(MemoryDevice::new(), program_plan(&BASIC_RAW, true), cfg);
        loader.run().unwrap();

        let calls = loader.device().calls();
        let reboots = calls.iter().filter(|c| **c == DeviceCall::Reboot).count();
        let resets = calls.iter().filter(|c| **c == DeviceCall::Reset).count();
        let status = calls.iter().filter(|c| **c == DeviceCall::DriveStatus).count();
        assert_eq!(reboots, 3);
        assert_eq!(resets, 2);
        assert_eq!(status, 1, "bus id is discovered once per run");
        assert_eq!(loader.state(), LoadState::Started);
    }

    #[test]
    fn test_cycles_without_reset() {
        let mut cfg = config();
        cfg.cycles = 2;
        let mut loader = LoadOrchestrator::new(MemoryDevice::new(), program_plan(&BASIC_RAW, true), cfg);
        loader.run().unwrap();
        assert!(!loader.device().calls().contains(&DeviceCall::Reset));
    }

    #[test]
    fn test_suspicious_end_aborts_before_start() {
        let raw = [0x01, 0x08, 0x00];
        let mut loader = LoadOrchestrator::new(MemoryDevice::new(), program_plan(&raw, true), config());
        assert!(matches!(
            loader.run_cycle(),
            Err(BootError::SuspiciousEndAddress(0x0802))
        ));
        assert_eq!(loader.state(), LoadState::MemoryLoaded);
        assert!(loader.device().pending_keys().is_empty());
    }
}
