//! diskboot - Boot the first program of a disk image on a networked C64.
//!
//! Usage:
//!   diskboot <image> --base-url <url> [options]
//!
//! Examples:
//!   diskboot game.d64 --base-url http://192.168.1.64     # Mount, load and run once
//!   diskboot game.d64 --dry-run                          # Show what would be started
//!   diskboot demo.g64 --base-url http://u64 --cycles 5   # Raw-track boot, five times
//!   diskboot game.d81 --base-url http://u64 --config boot.json -v

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use diskboot_core::{BootConfig, BootPayload, BootPlan, HttpDevice, LoadOrchestrator, MountMode};

/// Disk image boot CLI
#[derive(Parser, Debug)]
#[command(name = "diskboot")]
#[command(about = "Mount a disk image on the device and start its first program")]
struct Args {
    /// Disk image (.d64 .d71 .d80 .d81 .d82 .g64 .g71)
    image: PathBuf,

    /// Device REST API base URL, e.g. http://192.168.1.64
    #[arg(long, required_unless_present = "dry_run")]
    base_url: Option<String>,

    /// Device password, sent as X-Password
    #[arg(long, env = "DISKBOOT_PASSWORD")]
    password: Option<String>,

    /// JSON config file (camelCase keys); flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of load/run cycles
    #[arg(long)]
    cycles: Option<u32>,

    /// Delay between cycles in milliseconds
    #[arg(long)]
    cycle_delay_ms: Option<u64>,

    /// Reset the machine between cycles
    #[arg(long, overrides_with = "no_reset_between_cycles")]
    reset_between_cycles: bool,

    /// Do not reset between cycles, even if the config file asks to
    #[arg(long, overrides_with = "reset_between_cycles")]
    no_reset_between_cycles: bool,

    /// Retries after a failed DMA load
    #[arg(long)]
    dma_retries: Option<u32>,

    /// Delay between DMA attempts in milliseconds
    #[arg(long)]
    dma_backoff_ms: Option<u64>,

    /// Mount mode: readonly, readwrite or unlinked
    #[arg(long)]
    mount_mode: Option<MountMode>,

    /// Decode the image and print the plan without touching the device
    #[arg(long)]
    dry_run: bool,

    /// Debug logging (RUST_LOG still wins when set)
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Defaults, then the config file, then flags.
    fn boot_config(&self) -> Result<BootConfig> {
        let mut config = match &self.config {
            Some(path) => BootConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => BootConfig::default(),
        };
        if let Some(cycles) = self.cycles {
            config.cycles = cycles;
        }
        if let Some(ms) = self.cycle_delay_ms {
            config.timing.cycle_delay_ms = ms;
        }
        if self.reset_between_cycles {
            config.reset_between_cycles = true;
        } else if self.no_reset_between_cycles {
            config.reset_between_cycles = false;
        }
        if let Some(retries) = self.dma_retries {
            config.dma_retries = retries;
        }
        if let Some(ms) = self.dma_backoff_ms {
            config.timing.dma_backoff_ms = ms;
        }
        if let Some(mode) = self.mount_mode {
            config.mount_mode = mode;
        }
        if config.cycles == 0 {
            bail!("cycles must be at least 1");
        }
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn print_plan(plan: &BootPlan, config: &BootConfig) {
    println!("image:  {} ({})", plan.filename, plan.kind);
    match plan.drive_mode() {
        Ok(mode) => println!("drive:  {}", mode),
        Err(e) => println!("drive:  {}", e),
    }
    match &plan.payload {
        BootPayload::Program {
            name,
            program,
            basic,
        } => {
            println!("file:   \"{}\"", name);
            println!(
                "load:   ${:04X}-${:04X} ({} bytes)",
                program.load_address(),
                program.end_address() - 1,
                program.payload().len()
            );
            println!("start:  {}", if *basic { "RUN (BASIC)" } else { "SYS" });
        }
        BootPayload::RawTrack => println!("start:  LOAD\"*\",<bus>,1 then RUN"),
    }
    println!(
        "cycles: {}{}",
        config.cycles,
        if config.reset_between_cycles {
            " (reset between)"
        } else {
            ""
        }
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.boot_config()?;
    let plan = BootPlan::from_path(&args.image, &config)
        .with_context(|| format!("failed to decode {}", args.image.display()))?;

    if args.dry_run {
        print_plan(&plan, &config);
        return Ok(());
    }

    let Some(base_url) = args.base_url.clone() else {
        bail!("--base-url is required");
    };
    let password = args.password.clone();

    // The blocking HTTP client must be created, used and dropped off the async runtime.
    let boot = tokio::task::spawn_blocking(move || -> Result<()> {
        let device = HttpDevice::new(&base_url, password)?;
        log::info!("booting {} on {}", plan.filename, device.base_url());
        let mut loader = LoadOrchestrator::new(device, plan, config);
        let result = loader.run();
        result.with_context(|| format!("boot failed in state {:?}", loader.state()))
    });

    tokio::select! {
        joined = boot => {
            joined.context("boot task panicked")??;
            log::info!("program started");
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            log::warn!("interrupted; the device is left as-is");
            std::process::exit(130);
        }
    }
}
