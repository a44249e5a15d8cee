/// Faults raised while building, exchanging or decoding sensor frames.
///
/// `Length`, `Checksum`, `AddressMismatch` and `Io` are per-sensor faults:
/// the poller records them against the sensor and carries on with the next
/// one. The remaining variants come from parsing user supplied values.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The response did not have the length implied by the sensor kind.
    #[error("Unexpected response length, expected {expected} bytes, got {received}")]
    Length { expected: usize, received: usize },

    /// The CRC over the response does not match its trailing two bytes.
    #[error("CRC error, expected 0x{calculated:04X} was 0x{received:04X}")]
    Checksum { calculated: u16, received: u16 },

    /// The response was sent by a different slave than the one polled.
    #[error("Response from address {received}, expected {expected}")]
    AddressMismatch { expected: u8, received: u8 },

    /// The byte channel failed while writing the request or reading the response.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown sensor kind '{0}', expected one of PH, LEAF, SOIL")]
    UnknownSensorKind(String),

    #[error("Unsupported baud rate {0}")]
    UnsupportedBaudRate(u32),
}

impl Error {
    /// Returns `true` for faults detected while validating a received frame.
    pub fn is_frame_fault(&self) -> bool {
        matches!(
            self,
            Error::Length { .. } | Error::Checksum { .. } | Error::AddressMismatch { .. }
        )
    }
}

/// The result type used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;
