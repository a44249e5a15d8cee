//! POMAS sensor poller CLI
//!
//! A command-line interface (CLI) application for reading the soil, pH and
//! leaf sensors of a POMAS installation over a Modbus RTU (RS-485) bus.
//!
//! This tool allows users to:
//! - List the sensors registered on the bus.
//! - Poll a single sensor and inspect the raw request and response frames.
//! - Poll all registered sensors once or repeatedly, with detailed or
//!   tabular output.
//!
//! The CLI leverages the `pomas_lib` crate for the protocol and the poller.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use pomas_lib::{
    poller::{PollerConfig, SensorPoller, DEFAULT_INTER_FRAME_DELAY},
    protocol::Sensor,
    serial,
};
use std::{
    io::{Read, Write},
    panic,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

mod commandline;
mod config;
mod output;

fn logging_init(loglevel: LevelFilter) -> Result<LoggerHandle> {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .context("Cannot init logging")?
        .start()
        .context("Cannot start logging")?;

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    Ok(log_handle)
}

/// Builds the poller settings from the command line and the registry.
fn poller_config(
    connection: &commandline::CliConnection,
    registry: &config::Registry,
) -> PollerConfig {
    let delay = connection
        .delay
        .or(registry.delay)
        .unwrap_or(DEFAULT_INTER_FRAME_DELAY);
    PollerConfig {
        inter_frame_delay: serial::check_rtu_delay(delay, connection.baud_rate),
        verify_address: connection.verify_address,
    }
}

/// Opens the serial port. Failing to do so ends the process.
fn open_port(
    connection: &commandline::CliConnection,
) -> Result<Box<dyn tokio_serial::SerialPort>> {
    println!(" Opening serial port...");
    serial::open(&connection.port, connection.baud_rate, connection.timeout).with_context(|| {
        format!(
            "Cannot open serial port {} at baud {}",
            connection.port, connection.baud_rate
        )
    })
}

fn handle_poll<T>(
    port: &mut T,
    poller: &SensorPoller,
    sensors: &[Sensor],
    repeat: bool,
    table: bool,
) -> Result<()>
where
    T: Read + Write + ?Sized,
{
    let print_round = |round: usize, exchanges: &[pomas_lib::poller::Exchange]| {
        if table {
            println!("{}", output::table_header());
        }
        for exchange in exchanges {
            if table {
                println!("{}", output::table_row(exchange));
            } else {
                println!("{}", output::ExchangeDetails(exchange));
            }
        }
        if repeat {
            println!(
                "{}",
                output::round_summary(round, exchanges, sensors.len())
            );
        }
    };

    if !repeat {
        print_round(1, &poller.poll_all(port, sensors));
        return Ok(());
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
        trace!("Received Ctrl-C")
    })
    .context("Error setting Ctrl-C handler")?;

    info!("Polling {} sensors until interrupted", sensors.len());
    let rounds = poller.poll_repeat(port, sensors, &running, print_round);
    info!("Polling stopped after {rounds} rounds");
    Ok(())
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter())?;
    info!(
        "POMAS CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );
    if args.no_color {
        colored::control::set_override(false);
    }

    let registry = config::load_registry(args.config.as_deref())?;

    match &args.command {
        commandline::CliCommands::List => {
            println!("{}", output::SensorList(&registry.sensors));
        }
        commandline::CliCommands::Sensor {
            connection,
            id,
            kind,
        } => {
            let sensor = Sensor::new(*id, *kind);
            info!("Executing: Poll sensor {sensor}");
            println!(
                "{}",
                output::banner("TEST MODBUS", &connection.port, connection.baud_rate)
            );
            println!("    SENSOR ID:   {}", id.to_string().green());
            println!("    SENSOR TYPE: {}", kind.as_str().green());
            let mut port = open_port(connection)?;
            let poller = SensorPoller::new(poller_config(connection, &registry));
            let exchange = poller.poll(&mut port, &sensor);
            println!("{}", output::ExchangeDetails(&exchange));
        }
        commandline::CliCommands::Poll {
            connection,
            repeat,
            table,
        } => {
            info!(
                "Executing: Poll {} registered sensors (repeat={repeat}, table={table})",
                registry.sensors.len()
            );
            println!(
                "{}",
                output::banner("POMAS MODBUS", &connection.port, connection.baud_rate)
            );
            let mut port = open_port(connection)?;
            let poller = SensorPoller::new(poller_config(connection, &registry));
            handle_poll(&mut port, &poller, &registry.sensors, *repeat, *table)?;
        }
    }

    Ok(())
}
