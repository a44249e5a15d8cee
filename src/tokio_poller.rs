//! Asynchronous poller for sensors sharing one RS-485 line.
//!
//! Performs the same exchange sequence as [`crate::poller::SensorPoller`]
//! over any `tokio::io::AsyncRead + AsyncWrite` stream. Because async reads
//! have no port-level timeout, every read is bounded by `read_timeout`.
//!
//! # Example
//!
//! ```no_run
//! use pomas_lib::poller::PollerConfig;
//! use pomas_lib::protocol::{Address, BaudRate, Sensor, SensorKind};
//! use pomas_lib::tokio_poller::SensorPoller;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut port = pomas_lib::tokio_poller::open("/dev/ttyUSB0", BaudRate::B9600)?;
//!     let poller = SensorPoller::new(PollerConfig::default(), Duration::from_secs(2));
//!     let sensor = Sensor::new(Address::from(0x07), SensorKind::Ph);
//!     let exchange = poller.poll(&mut port, &sensor).await;
//!     println!("{:?}", exchange.result);
//!     Ok(())
//! }
//! ```

use crate::{
    poller::{Exchange, PollerConfig},
    protocol::{self as proto, Measurement, RequestFrame, Sensor},
    Error, Result,
};
use std::{io, time::Duration};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Opens the serial port as an async stream with the bus settings.
pub fn open(
    device: &str,
    baud_rate: proto::BaudRate,
) -> std::result::Result<tokio_serial::SerialStream, tokio_serial::Error> {
    // The timeout of the builder does not apply to async reads.
    let builder = crate::serial::serial_port_builder(device, baud_rate, Duration::ZERO);
    tokio_serial::SerialStream::open(&builder)
}

/// Polls sensors over an async byte stream.
#[derive(Debug, Clone)]
pub struct SensorPoller {
    config: PollerConfig,
    read_timeout: Duration,
}

impl SensorPoller {
    pub fn new(config: PollerConfig, read_timeout: Duration) -> Self {
        Self {
            config,
            read_timeout,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Performs one exchange with `sensor`.
    pub async fn poll<T>(&self, channel: &mut T, sensor: &Sensor) -> Exchange
    where
        T: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        let request = sensor.request();
        if !sensor.address.is_unicast() {
            log::warn!("Polling {sensor} on a reserved Modbus address");
        }
        log::debug!("Sending command to {sensor}: {request}");

        let (response, result) = match self
            .transfer(channel, &request, sensor.response_len())
            .await
        {
            Ok(response) => {
                log::debug!("Response from {sensor}: {}", proto::HexBytes(&response));
                let result = self.decode(&response, sensor);
                (response, result)
            }
            Err(error) => {
                log::warn!("Exchange with {sensor} failed: {error}");
                (Vec::new(), Err(Error::Io(error)))
            }
        };
        Exchange {
            sensor: *sensor,
            request,
            response,
            result,
        }
    }

    /// Polls every sensor once, in order, one exchange per sensor.
    pub async fn poll_all<T>(&self, channel: &mut T, sensors: &[Sensor]) -> Vec<Exchange>
    where
        T: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        let mut exchanges = Vec::with_capacity(sensors.len());
        for sensor in sensors {
            exchanges.push(self.poll(channel, sensor).await);
        }
        exchanges
    }

    async fn transfer<T>(
        &self,
        channel: &mut T,
        request: &RequestFrame,
        response_len: usize,
    ) -> io::Result<Vec<u8>>
    where
        T: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        channel.write_all(request.as_ref()).await?;
        channel.flush().await?;
        self.quiet_time().await;

        let mut rx_buffer = vec![0u8; response_len];
        let mut received = 0;
        while received < response_len {
            match tokio::time::timeout(self.read_timeout, channel.read(&mut rx_buffer[received..]))
                .await
            {
                Ok(Ok(0)) if received == 0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "channel closed before any response byte",
                    ));
                }
                Ok(Ok(0)) => break,
                Ok(Ok(count)) => received += count,
                Ok(Err(error)) => return Err(error),
                Err(_) => {
                    log::trace!("Read timed out after {received} of {response_len} bytes");
                    break;
                }
            }
        }
        rx_buffer.truncate(received);
        Ok(rx_buffer)
    }

    fn decode(&self, rx_buffer: &[u8], sensor: &Sensor) -> Result<Measurement> {
        if self.config.verify_address {
            proto::decode_from(rx_buffer, sensor)
        } else {
            proto::decode(rx_buffer, sensor.kind)
        }
    }

    async fn quiet_time(&self) {
        if !self.config.inter_frame_delay.is_zero() {
            tokio::time::sleep(self.config.inter_frame_delay).await;
        }
    }
}
