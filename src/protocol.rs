//! Modbus RTU framing for the POMAS soil, pH and leaf sensors.
//!
//! All three sensor families answer a single "read holding registers"
//! (`0x03`) request starting at register `0x0000`. They differ only in the
//! number of registers they expose and in how the raw register words are
//! scaled into physical units.
//!
//! ```text
//! request  : [address, 0x03, 0x00, 0x00, 0x00, count, crc_lo, crc_hi]
//! response : [address, 0x03, byte_count, data.., crc_lo, crc_hi]
//! ```
//!
//! The register words in the data region are big-endian, the CRC is
//! little-endian.

use crate::{crc, Error};
use std::{fmt, ops::Deref, str::FromStr};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Modbus function code "read holding registers".
pub const FUNCTION_READ_HOLDING_REGISTERS: u8 = 0x03;
/// First register of every sensor's measurement block.
pub const REGISTER_START: u16 = 0x0000;
/// Length of every request frame.
pub const REQUEST_LENGTH: usize = 8;
/// Address, function code and byte count in front of the data region.
pub const RESPONSE_METADATA_LENGTH: usize = 3;
/// Trailing CRC length.
pub const CRC_LENGTH: usize = 2;
/// Absolute offset of the first register word in a response.
pub const DATA_OFFSET: usize = RESPONSE_METADATA_LENGTH;

/// A Modbus slave address on the RS-485 bus.
///
/// Any byte is accepted. Modbus reserves `0` for broadcast and everything
/// above [`Address::MAX`], such addresses are polled nonetheless but a
/// sensor is unlikely to answer them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "u8", into = "u8"))]
pub struct Address(u8);

impl Address {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 247;

    /// Returns `true` for the unicast range [`Address::MIN`]..=[`Address::MAX`].
    pub fn is_unicast(&self) -> bool {
        (Self::MIN..=Self::MAX).contains(&self.0)
    }
}

impl Deref for Address {
    type Target = u8;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Default for Address {
    fn default() -> Self {
        Self(0x01)
    }
}

impl From<u8> for Address {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<Address> for u8 {
    fn from(address: Address) -> u8 {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04X}", self.0)
    }
}

/// Serial line speeds supported by the sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u32", into = "u32"))]
pub enum BaudRate {
    B1200,
    B2400,
    B4800,
    #[default]
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
}

impl BaudRate {
    pub const ALL: [BaudRate; 8] = [
        BaudRate::B1200,
        BaudRate::B2400,
        BaudRate::B4800,
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B115200,
    ];
}

impl TryFrom<u32> for BaudRate {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        BaudRate::ALL
            .into_iter()
            .find(|rate| u32::from(*rate) == value)
            .ok_or(Error::UnsupportedBaudRate(value))
    }
}

impl From<BaudRate> for u32 {
    fn from(baud_rate: BaudRate) -> u32 {
        match baud_rate {
            BaudRate::B1200 => 1200,
            BaudRate::B2400 => 2400,
            BaudRate::B4800 => 4800,
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
        }
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}

/// The sensor families found on the bus.
///
/// The kind fixes the number of registers requested and the decoding rules
/// of the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum SensorKind {
    #[cfg_attr(feature = "serde", serde(alias = "ph", alias = "pH"))]
    Ph,
    #[cfg_attr(feature = "serde", serde(alias = "leaf", alias = "Leaf"))]
    Leaf,
    #[cfg_attr(feature = "serde", serde(alias = "soil", alias = "Soil"))]
    Soil,
}

impl SensorKind {
    pub const ALL: [SensorKind; 3] = [SensorKind::Ph, SensorKind::Leaf, SensorKind::Soil];

    /// Number of 16-bit holding registers holding the measurement.
    pub const fn register_count(&self) -> u16 {
        match self {
            SensorKind::Ph => 0x01,
            SensorKind::Leaf => 0x02,
            SensorKind::Soil => 0x04,
        }
    }

    /// Number of data bytes in the response.
    pub const fn data_len(&self) -> usize {
        self.register_count() as usize * 2
    }

    /// Maps the byte-count field of a response back to a sensor kind.
    pub fn from_byte_count(byte_count: u8) -> Option<SensorKind> {
        SensorKind::ALL
            .into_iter()
            .find(|kind| kind.data_len() == byte_count as usize)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Ph => "PH",
            SensorKind::Leaf => "LEAF",
            SensorKind::Soil => "SOIL",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SensorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownSensorKind(s.to_string()))
    }
}

/// A physical sensor registered on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sensor {
    pub address: Address,
    pub kind: SensorKind,
}

impl Sensor {
    pub fn new(address: Address, kind: SensorKind) -> Self {
        Self { address, kind }
    }

    /// Builds the request frame polling this sensor.
    pub fn request(&self) -> RequestFrame {
        RequestFrame::build(self.address, self.kind)
    }

    /// Length of the response this sensor is expected to send.
    pub fn response_len(&self) -> usize {
        expected_length(self.kind)
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.address)
    }
}

/// An 8 byte "read holding registers" request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFrame([u8; REQUEST_LENGTH]);

impl RequestFrame {
    /// Builds the request reading the measurement block of a sensor.
    ///
    /// # Examples
    ///
    /// ```
    /// use pomas_lib::protocol::{Address, RequestFrame, SensorKind};
    ///
    /// let frame = RequestFrame::build(Address::from(0x01), SensorKind::Ph);
    /// assert_eq!(frame.as_bytes(), &[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
    /// ```
    pub fn build(address: Address, kind: SensorKind) -> Self {
        let mut tx_buffer = [0u8; REQUEST_LENGTH];
        tx_buffer[0] = *address;
        tx_buffer[1] = FUNCTION_READ_HOLDING_REGISTERS;
        tx_buffer[2..4].copy_from_slice(&REGISTER_START.to_be_bytes());
        tx_buffer[4..6].copy_from_slice(&kind.register_count().to_be_bytes());
        let crc = crc::crc16(&tx_buffer[..REQUEST_LENGTH - CRC_LENGTH]);
        tx_buffer[REQUEST_LENGTH - CRC_LENGTH..].copy_from_slice(&crc.to_le_bytes());
        Self(tx_buffer)
    }

    pub fn as_bytes(&self) -> &[u8; REQUEST_LENGTH] {
        &self.0
    }
}

impl AsRef<[u8]> for RequestFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for RequestFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&HexBytes(&self.0), f)
    }
}

/// Formats a byte slice as space separated `0xNN` values.
pub struct HexBytes<'a>(pub &'a [u8]);

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, byte) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            write!(f, "0x{byte:02X}")?;
        }
        Ok(())
    }
}

/// Total response length for a sensor kind: metadata, data and CRC.
pub const fn expected_length(kind: SensorKind) -> usize {
    RESPONSE_METADATA_LENGTH + kind.data_len() + CRC_LENGTH
}

/// How one register word of a response turns into a physical value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Field {
    pub name: &'static str,
    /// Byte offset inside the data region.
    pub offset: usize,
    pub divisor: f32,
    pub bias: f32,
    pub unit: &'static str,
}

impl Field {
    const fn new(
        name: &'static str,
        offset: usize,
        divisor: f32,
        bias: f32,
        unit: &'static str,
    ) -> Self {
        Self {
            name,
            offset,
            divisor,
            bias,
            unit,
        }
    }

    /// Reads the raw big-endian register word of this field from a complete response.
    fn raw(&self, rx_buffer: &[u8]) -> u16 {
        let at = DATA_OFFSET + self.offset;
        u16::from_be_bytes([rx_buffer[at], rx_buffer[at + 1]])
    }

    /// Applies the scaling to a raw register word.
    pub fn scale(&self, raw: u16) -> f32 {
        raw as f32 / self.divisor + self.bias
    }

    fn read(&self, rx_buffer: &[u8]) -> f32 {
        self.scale(self.raw(rx_buffer))
    }
}

static PH_FIELDS: [Field; 1] = [Field::new("ph", 0, 10.0, 0.0, "pH")];

static LEAF_FIELDS: [Field; 2] = [
    Field::new("humidity", 0, 10.0, 0.0, "%"),
    Field::new("temperature", 2, 100.0, -20.0, "°C"),
];

// EC and salinity are reported unscaled by the sensor.
static SOIL_FIELDS: [Field; 4] = [
    Field::new("humidity", 0, 10.0, 0.0, "%"),
    Field::new("temperature", 2, 10.0, 0.0, "°C"),
    Field::new("ec", 4, 1.0, 0.0, "µS/cm"),
    Field::new("salinity", 6, 1.0, 0.0, "ppm"),
];

/// Register layout of the response of a sensor kind, in register order.
pub fn fields(kind: SensorKind) -> &'static [Field] {
    match kind {
        SensorKind::Ph => &PH_FIELDS,
        SensorKind::Leaf => &LEAF_FIELDS,
        SensorKind::Soil => &SOIL_FIELDS,
    }
}

/// A decoded sensor reading.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "UPPERCASE"))]
pub enum Measurement {
    Ph {
        ph: f32,
    },
    Leaf {
        temperature: f32,
        humidity: f32,
    },
    Soil {
        temperature: f32,
        humidity: f32,
        /// Electrical conductivity in µS/cm.
        ec: f32,
        /// Salinity in ppm.
        salinity: f32,
    },
}

/// One named value of a [`Measurement`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub name: &'static str,
    pub value: f32,
    pub unit: &'static str,
}

impl Measurement {
    pub fn kind(&self) -> SensorKind {
        match self {
            Measurement::Ph { .. } => SensorKind::Ph,
            Measurement::Leaf { .. } => SensorKind::Leaf,
            Measurement::Soil { .. } => SensorKind::Soil,
        }
    }

    /// The values of this measurement in the order of the register layout.
    pub fn readings(&self) -> Vec<Reading> {
        let values: Vec<f32> = match *self {
            Measurement::Ph { ph } => vec![ph],
            Measurement::Leaf {
                temperature,
                humidity,
            } => vec![humidity, temperature],
            Measurement::Soil {
                temperature,
                humidity,
                ec,
                salinity,
            } => vec![humidity, temperature, ec, salinity],
        };
        fields(self.kind())
            .iter()
            .zip(values)
            .map(|(field, value)| Reading {
                name: field.name,
                value,
                unit: field.unit,
            })
            .collect()
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Measurement::Ph { ph } => write!(f, "PH: {ph:.1}"),
            Measurement::Leaf {
                temperature,
                humidity,
            } => write!(f, "LEAF: {temperature:.2}°C {humidity:.1}%"),
            Measurement::Soil {
                temperature,
                humidity,
                ec,
                salinity,
            } => write!(
                f,
                "SOIL: {temperature:.1}°C {humidity:.1}% {ec:.0}uS/cm {salinity:.0}ppm"
            ),
        }
    }
}

fn validate_len(rx_buffer: &[u8], expected: usize) -> Result<(), Error> {
    if rx_buffer.len() != expected {
        log::warn!(
            "Invalid response size - required={} received={}",
            expected,
            rx_buffer.len()
        );
        return Err(Error::Length {
            expected,
            received: rx_buffer.len(),
        });
    }
    Ok(())
}

fn validate_checksum(rx_buffer: &[u8]) -> Result<(), Error> {
    let payload = &rx_buffer[..rx_buffer.len() - CRC_LENGTH];
    let calculated = crc::crc16(payload);
    // Length was validated beforehand, the frame always holds a CRC.
    let received = crc::trailing_crc(rx_buffer).unwrap_or_default();
    if calculated != received {
        log::warn!(
            "Invalid checksum - calculated={calculated:04X} received={received:04X} buffer={rx_buffer:02X?}"
        );
        return Err(Error::Checksum {
            calculated,
            received,
        });
    }
    Ok(())
}

/// Validates a response frame and decodes it into a [`Measurement`].
///
/// The length is checked first, then the CRC. The address and byte-count
/// fields are not compared against the request, see [`decode_from`] for an
/// address check.
///
/// # Errors
///
/// * [`Error::Length`] if `rx_buffer` does not have [`expected_length`] bytes.
/// * [`Error::Checksum`] if the trailing CRC does not match.
///
/// # Examples
///
/// ```
/// use pomas_lib::protocol::{decode, Measurement, SensorKind};
///
/// let rx_buffer = [0x01, 0x03, 0x02, 0x00, 0x41, 0x78, 0x74];
/// assert_eq!(decode(&rx_buffer, SensorKind::Ph)?, Measurement::Ph { ph: 6.5 });
/// # Ok::<(), pomas_lib::Error>(())
/// ```
pub fn decode(rx_buffer: &[u8], kind: SensorKind) -> Result<Measurement, Error> {
    validate_len(rx_buffer, expected_length(kind))?;
    validate_checksum(rx_buffer)?;

    let schema = fields(kind);
    let value = |index: usize| schema[index].read(rx_buffer);
    Ok(match kind {
        SensorKind::Ph => Measurement::Ph { ph: value(0) },
        SensorKind::Leaf => Measurement::Leaf {
            humidity: value(0),
            temperature: value(1),
        },
        SensorKind::Soil => Measurement::Soil {
            humidity: value(0),
            temperature: value(1),
            ec: value(2),
            salinity: value(3),
        },
    })
}

/// Like [`decode`], additionally requiring the response to come from `sensor`.
///
/// The address is compared only after length and CRC passed, a corrupted
/// address byte is reported as a checksum fault.
pub fn decode_from(rx_buffer: &[u8], sensor: &Sensor) -> Result<Measurement, Error> {
    let measurement = decode(rx_buffer, sensor.kind)?;
    let received = responding_address(rx_buffer).unwrap_or_default();
    if received != *sensor.address {
        log::warn!(
            "Response address mismatch - expected={} received={}",
            *sensor.address,
            received
        );
        return Err(Error::AddressMismatch {
            expected: *sensor.address,
            received,
        });
    }
    Ok(measurement)
}

/// Address echoed in the first byte of a response.
pub fn responding_address(rx_buffer: &[u8]) -> Option<u8> {
    rx_buffer.first().copied()
}

/// Sensor kind implied by the byte-count field of a response.
pub fn reported_kind(rx_buffer: &[u8]) -> Option<SensorKind> {
    rx_buffer
        .get(RESPONSE_METADATA_LENGTH - 1)
        .copied()
        .and_then(SensorKind::from_byte_count)
}
