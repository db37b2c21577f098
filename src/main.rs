// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// DISKDUMP serial receiver
mod crc;
mod hash;
mod image;
mod protocol;
mod receiver;
mod reporter;
mod serial;

use clap::{Parser, ValueEnum};
use serialport::{DataBits, Parity, StopBits};
use std::path::PathBuf;
use std::time::Duration;
use receiver::{ReceiverError, ReceiverFsm, SessionConfig};
use reporter::ConsoleReporter;
use serial::{LineSettings, RealSerialPort};

#[derive(Parser)]
#[command(name = "diskrecv")]
#[command(about = "Receive a disk image sent by DISKDUMP over RS-232", long_about = None)]
struct Cli {
    /// Serial port to listen on (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// File the disk image is written to
    #[arg(short, long, default_value = "disk.img")]
    output: PathBuf,

    /// Seconds to wait for each field of a frame
    #[arg(long, default_value = "10", value_name = "SECS")]
    timeout: u64,

    /// Milliseconds the port stays closed while the peer changes speed
    #[arg(long, default_value = "3000", value_name = "MS")]
    switch_delay: u64,

    /// Data bits
    #[arg(long, value_enum, default_value = "8", value_name = "BITS")]
    data_bits: DataBitsArg,

    /// Parity
    #[arg(long, value_enum, default_value = "none")]
    parity: ParityArg,

    /// Stop bits
    #[arg(long, value_enum, default_value = "1", value_name = "BITS")]
    stop_bits: StopBitsArg,

    /// Enable debug output
    #[arg(long)]
    debug: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum DataBitsArg {
    #[value(name = "5")]
    Five,
    #[value(name = "6")]
    Six,
    #[value(name = "7")]
    Seven,
    #[value(name = "8")]
    Eight,
}

impl From<DataBitsArg> for DataBits {
    fn from(arg: DataBitsArg) -> Self {
        match arg {
            DataBitsArg::Five => DataBits::Five,
            DataBitsArg::Six => DataBits::Six,
            DataBitsArg::Seven => DataBits::Seven,
            DataBitsArg::Eight => DataBits::Eight,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ParityArg {
    None,
    Odd,
    Even,
}

impl From<ParityArg> for Parity {
    fn from(arg: ParityArg) -> Self {
        match arg {
            ParityArg::None => Parity::None,
            ParityArg::Odd => Parity::Odd,
            ParityArg::Even => Parity::Even,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StopBitsArg {
    #[value(name = "1")]
    One,
    #[value(name = "2")]
    Two,
}

impl From<StopBitsArg> for StopBits {
    fn from(arg: StopBitsArg) -> Self {
        match arg {
            StopBitsArg::One => StopBits::One,
            StopBitsArg::Two => StopBits::Two,
        }
    }
}

fn init_logging(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let settings = LineSettings {
        data_bits: cli.data_bits.into(),
        parity: cli.parity.into(),
        stop_bits: cli.stop_bits.into(),
    };
    let config = SessionConfig {
        read_timeout: Duration::from_secs(cli.timeout),
        switch_delay: Duration::from_millis(cli.switch_delay),
    };

    match receive_image(&cli.port, cli.output, settings, config) {
        Ok(()) => {
            tracing::info!("Successfully received image!");
        }
        Err(e) if e.is_verification_failure() => {
            tracing::error!("Error verifying the saved image: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("Error receiving disk image: {}", e);
            std::process::exit(1);
        }
    }
}

fn receive_image(
    port: &str,
    output: PathBuf,
    settings: LineSettings,
    config: SessionConfig,
) -> Result<(), ReceiverError> {
    tracing::info!(
        "Listening to {} ({:?}, {:?}, {:?})",
        port, settings.data_bits, settings.parity, settings.stop_bits
    );
    let serial_port = RealSerialPort::open(port, protocol::DEFAULT_BAUD_RATE, settings)?;

    let fsm = ReceiverFsm::new(
        Box::new(serial_port),
        Box::new(ConsoleReporter::new()),
        output,
        config,
    );

    receiver::run(fsm)
}
