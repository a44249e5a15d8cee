//! A library for polling POMAS agricultural sensors over a shared RS-485 bus.
//!
//! Soil, pH and leaf sensors answer a Modbus RTU "read holding registers"
//! request with a fixed block of registers. This crate builds those
//! requests, validates the responses (length and CRC16) and decodes the
//! register words into calibrated measurements.
//!
//! ## Features
//!
//! - **Protocol Implementation**: Request frames, response layouts and decoding rules in [`protocol`], the Modbus CRC16 in [`crc`].
//! - **Blocking Poller**: [`poller::SensorPoller`] polls a list of sensors in order over any `Read + Write` channel.
//! - **Asynchronous Poller**: `tokio_poller::SensorPoller` does the same over `tokio` streams (feature `tokio-rtu`).
//! - **Strongly-Typed API**: `SensorKind` and `Measurement` tie every request to its response layout.
//!
//! ## Quick Start
//!
//! ```
//! use pomas_lib::protocol::{self, Address, Measurement, Sensor, SensorKind};
//!
//! let sensor = Sensor::new(Address::from(0x01), SensorKind::Ph);
//! assert_eq!(
//!     sensor.request().as_bytes(),
//!     &[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]
//! );
//!
//! let response = [0x01, 0x03, 0x02, 0x00, 0x41, 0x78, 0x74];
//! assert_eq!(protocol::decode(&response, sensor.kind)?, Measurement::Ph { ph: 6.5 });
//! # Ok::<(), pomas_lib::Error>(())
//! ```

pub mod crc;
mod error;
pub mod poller;
pub mod protocol;

pub use error::{Error, Result};

#[cfg_attr(docsrs, doc(cfg(feature = "serial")))]
#[cfg(feature = "serial")]
pub mod serial;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-rtu")))]
#[cfg(feature = "tokio-rtu")]
pub mod tokio_poller;
