use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use pomas_lib::protocol as proto;
use std::{path::PathBuf, time::Duration};

fn parse_address(s: &str) -> Result<proto::Address, String> {
    let address_val =
        clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid address format: {e}"))?;
    Ok(proto::Address::from(address_val))
}

fn parse_baud_rate(s: &str) -> Result<proto::BaudRate, String> {
    let rate_val = s
        .parse::<u32>()
        .map_err(|e| format!("Invalid baud rate number format: {e}"))?;
    proto::BaudRate::try_from(rate_val).map_err(|e| e.to_string())
}

fn parse_sensor_kind(s: &str) -> Result<proto::SensorKind, String> {
    s.parse::<proto::SensorKind>().map_err(|e| e.to_string())
}

/// Serial connection to the RS-485 bus.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct CliConnection {
    /// Serial port device name.
    /// Examples: "/dev/ttyUSB0" (Linux), "COM3" (Windows).
    #[arg(short, long, verbatim_doc_comment)]
    pub port: String,

    /// Baud rate for serial communication.
    /// Supported values: 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200.
    #[arg(short, long, default_value_t = proto::BaudRate::default(), value_parser = parse_baud_rate, verbatim_doc_comment)]
    pub baud_rate: proto::BaudRate,

    /// How long to wait for response bytes before giving up on a sensor.
    /// Examples: "2s", "500ms".
    #[arg(long, default_value = "2s", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Duration,

    /// Quiet time after each request and between two sensors.
    /// Defaults to the value of the configuration file, otherwise "500ms".
    #[arg(long, value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub delay: Option<Duration>,

    /// Reject responses sent from another address than the polled sensor.
    #[arg(long)]
    pub verify_address: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Show all registered sensors.
    List,

    /// Poll a single sensor and print the exchange in detail.
    Sensor {
        #[command(flatten)]
        connection: CliConnection,

        /// The Modbus address of the sensor (0 to 255, usually 1 to 247).
        /// Can be specified in decimal or hexadecimal (e.g., "0x07").
        #[arg(short, long, default_value_t = proto::Address::default(), value_parser = parse_address, verbatim_doc_comment)]
        id: proto::Address,

        /// The sensor type: PH, LEAF or SOIL.
        #[arg(short = 't', long = "type", default_value_t = proto::SensorKind::Ph, value_parser = parse_sensor_kind)]
        kind: proto::SensorKind,
    },

    /// Poll all registered sensors, one after another.
    Poll {
        #[command(flatten)]
        connection: CliConnection,

        /// Repeat the measurements until interrupted with Ctrl-C.
        #[arg(short, long)]
        repeat: bool,

        /// Print one table row per sensor instead of the detailed exchange.
        #[arg(short, long)]
        table: bool,
    },
}

const fn about_text() -> &'static str {
    "POMAS sensor poller - Read soil, pH and leaf sensors via Modbus RTU."
}

#[derive(Parser, Debug)]
#[command(name="pomas", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warnings.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// YAML file listing the sensors on the bus.
    /// Without it the built-in sensor registry is used.
    #[arg(global = true, short, long, verbatim_doc_comment)]
    pub config: Option<PathBuf>,

    /// Disable colored output.
    #[arg(global = true, long)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: CliCommands,
}
