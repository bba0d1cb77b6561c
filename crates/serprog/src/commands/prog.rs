use std::path::PathBuf;

use anyhow::{anyhow, Result};
use serprog_core::{ProgramRequest, SerialTransport, SessionOrchestrator, SystemClock};

use crate::progress_bar::ProgressBarReporter;

pub struct ProgArgs {
    pub device: String,
    pub port: String,
    pub flash: Option<PathBuf>,
    pub ext_flash: Option<PathBuf>,
    pub ext_flash_boot: bool,
    pub eeprom: Option<PathBuf>,
}

pub fn run(args: ProgArgs) -> Result<()> {
    if args.flash.is_none() && args.ext_flash.is_none() && args.eeprom.is_none() && !args.ext_flash_boot
    {
        return Err(anyhow!(
            "nothing to program: pass --flash, --extflash, --eeprom, or --extflash-boot"
        ));
    }

    for (label, path) in [("flash", &args.flash), ("ext_flash", &args.ext_flash), ("eeprom", &args.eeprom)] {
        if let Some(path) = path {
            if !path.exists() {
                return Err(anyhow!("{label} image {path:?} does not exist"));
            }
        }
    }

    log::info!("Opening serial port {}", args.port);
    let transport = SerialTransport::open(&args.port)
        .map_err(|e| anyhow!("failed to open serial port {:?}: {e}", args.port))?;

    let request = ProgramRequest {
        device: args.device,
        flash: args.flash,
        ext_flash: args.ext_flash,
        eeprom: args.eeprom,
        ext_flash_boot: args.ext_flash_boot,
    };

    log::info!("Identifying device and preparing images");
    let mut session = SessionOrchestrator::prepare(transport, SystemClock, &request)?;

    let device = session.device();
    log::info!("Target device: {} (protocol v{})", device.name, device.protocol_version);
    log::info!("Flash: {} bytes", session.flash_bytes());
    log::info!("External flash: {} bytes", session.ext_flash_bytes());
    log::info!("EEPROM: {} bytes", session.eeprom_bytes());
    log::info!("Estimated time: {:.1}s", session.estimated_seconds());

    let mut reporter = ProgressBarReporter::new();
    session.run(&mut reporter)?;

    log::info!("Programming complete");
    Ok(())
}
