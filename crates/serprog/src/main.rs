use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::Level;

mod commands;
mod progress_bar;

use commands::prog::ProgArgs;

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None, author = "Bjorn Beishline")]
struct Cli {
    /// Verbose
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Program a device over a serial bootloader link
    Prog(ProgOpts),
    /// List known devices
    #[clap(alias = "pd")]
    PrintDevices,
    /// List available serial ports
    #[clap(alias = "pp")]
    PrintPorts,
}

#[derive(Parser, Debug)]
struct ProgOpts {
    /// Device identifier (name or numeric id); "auto" identifies from the target's handshake
    #[clap(short, long, default_value = "auto")]
    device: String,

    /// Serial port to connect to
    #[clap(short, long)]
    port: String,

    /// Intel HEX file to write to internal flash
    #[clap(short = 'f', long = "flash")]
    flash: Option<PathBuf>,

    /// Intel HEX file to write to external flash
    #[clap(long = "extflash")]
    ext_flash: Option<PathBuf>,

    /// Boot from the freshly written external flash image
    #[clap(long = "extflash-boot")]
    ext_flash_boot: bool,

    /// Intel HEX file to write to EEPROM
    #[clap(short = 'e', long = "eeprom")]
    eeprom: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_env(Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(Env::default().default_filter_or("info"))
            .format(|buf, record| {
                let level = record.level();
                if level == Level::Info {
                    writeln!(buf, "{}", record.args())
                } else {
                    writeln!(buf, "{}: {}", record.level(), record.args())
                }
            })
            .init();
    }

    let result = match cli.command {
        Commands::Prog(opts) => commands::prog::run(ProgArgs {
            device: opts.device,
            port: opts.port,
            flash: opts.flash,
            ext_flash: opts.ext_flash,
            ext_flash_boot: opts.ext_flash_boot,
            eeprom: opts.eeprom,
        }),
        Commands::PrintDevices => commands::print_devices::run(),
        Commands::PrintPorts => commands::print_ports::run(),
    };

    if let Err(err) = result {
        log::error!("{err}");
        std::process::exit(1);
    }
}
