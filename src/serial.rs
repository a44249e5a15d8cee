//! Serial line settings for the RS-485 sensor bus.
//!
//! The sensors talk 8N1 without flow control. The read timeout bounds how
//! long the poller waits for a response before reporting it as short.
use crate::protocol as proto;
use std::time::Duration;

/// The parity used for serial communication.
pub const PARITY: &tokio_serial::Parity = &tokio_serial::Parity::None;
/// The number of stop bits used for serial communication.
pub const STOP_BITS: &tokio_serial::StopBits = &tokio_serial::StopBits::One;
/// The number of data bits used for serial communication.
pub const DATA_BITS: &tokio_serial::DataBits = &tokio_serial::DataBits::Eight;

/// Creates a `tokio_serial::SerialPortBuilder` with the bus settings.
///
/// # Arguments
///
/// * `device` - The path to the serial port device (e.g., `/dev/ttyUSB0`).
/// * `baud_rate` - The baud rate for the serial communication.
/// * `timeout` - How long a read waits for the next byte.
pub fn serial_port_builder(
    device: &str,
    baud_rate: proto::BaudRate,
    timeout: Duration,
) -> tokio_serial::SerialPortBuilder {
    tokio_serial::new(device, u32::from(baud_rate))
        .parity(*PARITY)
        .stop_bits(*STOP_BITS)
        .data_bits(*DATA_BITS)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(timeout)
}

/// Opens a blocking serial port usable as channel for the
/// [`SensorPoller`](crate::poller::SensorPoller).
pub fn open(
    device: &str,
    baud_rate: proto::BaudRate,
    timeout: Duration,
) -> Result<Box<dyn tokio_serial::SerialPort>, tokio_serial::Error> {
    log::debug!("Opening serial port {device} at {baud_rate} baud, timeout {timeout:?}");
    serial_port_builder(device, baud_rate, timeout).open()
}

/// Calculates the Modbus RTU silent interval (3.5 character times) for a baud rate.
pub fn minimum_rtu_delay(baud_rate: proto::BaudRate) -> Duration {
    // 1 start bit + 8 data bits + 1 parity/stop bit + 1 stop bit, the usual
    // Modbus assumption for character time.
    let bits_per_char = 11.0;
    let rate = u32::from(baud_rate) as f64;

    let char_time_secs = bits_per_char / rate;
    let inter_frame_delay_secs = 3.5 * char_time_secs;
    let delay_micros = (inter_frame_delay_secs * 1_000_000.0) as u64;

    // Above 19200 baud Modbus fixes the silent interval at 1.75 ms.
    const PRACTICAL_MIN_INTER_FRAME_DELAY_MICROS: u64 = 1_750;
    Duration::from_micros(delay_micros.max(PRACTICAL_MIN_INTER_FRAME_DELAY_MICROS))
}

/// Returns `delay`, raised to the silent interval of `baud_rate` if it is shorter.
pub fn check_rtu_delay(delay: Duration, baud_rate: proto::BaudRate) -> Duration {
    let min_rtu_delay = minimum_rtu_delay(baud_rate);
    if delay < min_rtu_delay {
        log::warn!(
            "Inter-frame delay of {delay:?} is below the minimum of {min_rtu_delay:?} for {baud_rate} baud. Using minimum."
        );
        min_rtu_delay
    } else {
        delay
    }
}
