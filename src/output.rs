use colored::Colorize;
use pomas_lib::{
    poller::Exchange,
    protocol::{self as proto, HexBytes, Sensor},
    Error,
};
use std::fmt;

pub fn banner(title: &str, port: &str, baud_rate: proto::BaudRate) -> String {
    format!(
        "{}\n    COM:         {}\n    BAUDRATE:    {}",
        format!("======================= {title} =======================").yellow(),
        port.green(),
        baud_rate.to_string().green()
    )
}

/// The registered sensors as a two column table.
pub struct SensorList<'a>(pub &'a [Sensor]);

impl fmt::Display for SensorList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\t|{:>4}|{:>10}|", "ID", "TYPE")?;
        writeln!(f, "\t|---------------|")?;
        for sensor in self.0 {
            writeln!(f, "\t|{:>4}|{:>10}|", *sensor.address, sensor.kind.as_str())?;
        }
        write!(f, "\t-----------------")
    }
}

/// Detailed rendering of one exchange, frame by frame.
pub struct ExchangeDetails<'a>(pub &'a Exchange);

impl fmt::Display for ExchangeDetails<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exchange = self.0;
        writeln!(f, " Sending command ... {}", exchange.request)?;
        if !exchange.response.is_empty() {
            writeln!(f, " Response ... {}", HexBytes(&exchange.response))?;
        }

        match &exchange.result {
            Ok(measurement) => {
                metadata(f, &exchange.response)?;
                writeln!(f, "   SENSOR MEASURE:")?;
                writeln!(f, "        {measurement}")?;
                write!(f, "   CRC:            {}", "OK".green())
            }
            Err(error @ Error::Checksum { .. }) => {
                metadata(f, &exchange.response)?;
                write!(f, "   CRC:            {}", error.to_string().red())
            }
            Err(Error::Io(error)) => write!(
                f,
                "{}",
                format!("Error reading data from serial port: {error}").red()
            ),
            Err(error) => write!(f, "{}", error.to_string().red()),
        }
    }
}

fn metadata(f: &mut fmt::Formatter<'_>, rx_buffer: &[u8]) -> fmt::Result {
    if let Some(address) = proto::responding_address(rx_buffer) {
        writeln!(f, "   SENSOR ID:      {}", address.to_string().green())?;
    }
    let kind = match proto::reported_kind(rx_buffer) {
        Some(kind) => kind.as_str().green(),
        None => "Unknown".red(),
    };
    writeln!(f, "   SENSOR TYPE:    {kind}")
}

pub fn table_header() -> String {
    format!(
        "\t|{:>4}|{:>6}|{:>8}| {}\n\t|{}|",
        "ID",
        "TYPE",
        "STATUS",
        "MEASURE",
        "-".repeat(40)
    )
}

/// One table row: address, kind, status and either the readings or the fault.
pub fn table_row(exchange: &Exchange) -> String {
    let prefix = format!(
        "\t|{:>4}|{:>6}|",
        *exchange.sensor.address,
        exchange.sensor.kind.as_str()
    );
    match &exchange.result {
        Ok(measurement) => {
            let readings = measurement
                .readings()
                .iter()
                .map(|reading| format!("{}={:.2}{}", reading.name, reading.value, reading.unit))
                .collect::<Vec<_>>()
                .join(" ");
            format!("{prefix}{:>8}| {readings}", "OK".green())
        }
        Err(error) => format!("{prefix}{:>8}| {}", "FAULT".red(), error.to_string().red()),
    }
}

/// Summary line of a polling round over `registered` sensors.
///
/// A round cut short by Ctrl-C names the sensors that were not polled.
pub fn round_summary(round: usize, exchanges: &[Exchange], registered: usize) -> String {
    let ok = exchanges.iter().filter(|exchange| exchange.is_ok()).count();
    let summary = format!("Round {round}: {ok}/{} sensors OK", exchanges.len());
    if exchanges.len() < registered {
        format!(
            "{summary}, round interrupted, {} of {registered} sensors not polled",
            registered - exchanges.len()
        )
        .red()
        .to_string()
    } else if ok == exchanges.len() {
        summary.green().to_string()
    } else {
        summary.yellow().to_string()
    }
}
