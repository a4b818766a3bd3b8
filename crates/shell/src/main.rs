//! usb-shell
//!
//! Interactive shell for issuing raw USB transfers to a single device and
//! inspecting the results.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::setup_logging;
use shell::payload::expand_path;
use shell::usb::UsbDevice;
use shell::{Flow, Interpreter, Session, ShellConfig};
use std::io;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "usb-shell")]
#[command(author, version, about = "USB Packet Shell - issue and log raw USB transfers")]
#[command(long_about = "
Opens the USB device with the given vendor and product ID and reads commands
from an interactive prompt (or a script). Every transfer is logged and can be
listed or saved afterwards. Type \"help\" at the prompt for the command list.

EXAMPLES:
    # Open a device interactively
    usb-shell 1d50 6089

    # Run a script against the device and exit
    usb-shell 1d50 6089 --script ~/probe.txt

    # Run with debug logging
    usb-shell 1d50 6089 --log-level debug

CONFIGURATION:
    The shell looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-shell/shell.toml
    3. /etc/usb-shell/shell.toml
    4. Built-in defaults
")]
struct Args {
    /// Vendor ID (hexadecimal)
    #[arg(value_parser = parse_hex_id, required_unless_present = "save_config")]
    vendor_id: Option<u16>,

    /// Product ID (hexadecimal)
    #[arg(value_parser = parse_hex_id, required_unless_present = "save_config")]
    product_id: Option<u16>,

    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Run the commands in this file instead of prompting
    #[arg(short, long, value_name = "PATH")]
    script: Option<String>,
}

fn parse_hex_id(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|_| format!("'{}' is not a 16-bit hex ID", s))
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ShellConfig::default();
        let path = ShellConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        ShellConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ShellConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.shell.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-shell v{}", env!("CARGO_PKG_VERSION"));

    let (Some(vendor_id), Some(product_id)) = (args.vendor_id, args.product_id) else {
        return Err(anyhow!("Vendor and product ID are required"));
    };

    println!("USB Packet Shell\n");
    let device = UsbDevice::open(vendor_id, product_id).with_context(|| {
        format!("Could not open USB device {:04x}:{:04x}", vendor_id, product_id)
    })?;
    println!(
        "Opened device {:04x}:{:04x}\nType \"help\" for a list of recognised commands\n",
        vendor_id, product_id
    );

    let session = Session::new(device, &config.session_settings());
    let mut interpreter = Interpreter::new(session, io::stdout(), config.interpreter_settings());

    let result = match args.script {
        Some(ref script) => run_script(&mut interpreter, script),
        None => interpreter
            .run_interactive(io::stdin().lock())
            .context("Failed to read commands"),
    };

    let (mut session, _) = interpreter.into_parts();
    session.shutdown();

    if let Err(ref e) = result {
        error!("{:#}", e);
    }
    result
}

fn run_script<W: io::Write>(
    interpreter: &mut Interpreter<UsbDevice, W>,
    script: &str,
) -> Result<()> {
    match interpreter.run_script(&expand_path(script)) {
        Ok(Flow::Exit) => info!("Script requested exit"),
        Ok(Flow::Continue) => info!("Script finished"),
        Err(e) => return Err(anyhow::Error::new(e).context("Script failed")),
    }
    Ok(())
}
