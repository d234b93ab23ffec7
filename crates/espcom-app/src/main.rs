//! Resets a microcontroller over DTR/RTS and prints whatever it sends.
//!
//! ```bash
//! espcom -d /dev/ttyACM0
//! espcom --device COM3 --baudrate 921600
//! RUST_LOG=debug espcom -d /dev/ttyUSB0
//! ```

use anyhow::{Context, Result};
use clap::builder::NonEmptyStringValueParser;
use clap::Parser;
use crossbeam_channel::bounded;
use espcom_core::{
    list_ports, Exit, LineReader, ReaderError, SerialConfig, SerialError, SerialPortLink, DEFAULT_BAUD_RATE,
};
use log::warn;
use std::io;

/// Connect to a microcontroller via serial and print its output.
#[derive(Parser, Debug)]
#[command(name = "espcom", version, about)]
struct Cli {
    /// Serial port (e.g., /dev/ttyACM0 or COMx)
    #[arg(short, long, value_parser = NonEmptyStringValueParser::new())]
    device: String,

    /// Baud rate for the connection
    #[arg(
        short,
        long,
        default_value_t = DEFAULT_BAUD_RATE,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    baudrate: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let (tx_int, rx_int) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx_int.try_send(());
    })
    .context("failed to install Ctrl+C handler")?;

    let cfg = SerialConfig::new(cli.device).with_baud_rate(cli.baudrate);
    let mut reader = LineReader::new(SerialPortLink::new(cfg), io::stdout(), rx_int);
    // Failures were already reported on stdout; like an interrupt they end
    // the process normally.
    if let Exit::Failed(ReaderError::Serial(SerialError::Open { .. })) = reader.run() {
        log_available_ports();
    }
    Ok(())
}

fn log_available_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        warn!("no serial ports detected");
    }
    for port in ports {
        warn!("available: {port}");
    }
}
