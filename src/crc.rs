//! Modbus CRC16 checksum.
//!
//! Every RTU frame ends with a 16-bit CRC computed with the reflected
//! polynomial `0xA001` and initial value `0xFFFF`. The checksum is written
//! low byte first.

/// Initial value of the CRC accumulator.
pub const CRC16_INIT: u16 = 0xFFFF;
/// Reflected Modbus polynomial.
pub const CRC16_POLY: u16 = 0xA001;

/// Calculates the Modbus CRC16 of `data`.
///
/// # Examples
///
/// ```
/// use pomas_lib::crc::crc16;
///
/// assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x0A84);
/// ```
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC16_POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Reads the trailing CRC of a frame (little-endian).
///
/// Returns `None` if the frame is shorter than two bytes.
pub fn trailing_crc(frame: &[u8]) -> Option<u16> {
    match frame {
        [.., lo, hi] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_request_vectors() {
        // Read holding registers 0x0000, quantity 1 / 2 / 4 from slave 1.
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x0A84);
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]), 0x0BC4);
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x04]), 0x0944);
    }

    #[test]
    fn empty_input_is_initial_value() {
        assert_eq!(crc16(&[]), CRC16_INIT);
    }

    #[test]
    fn deterministic() {
        let data = [0x07, 0x03, 0x02, 0x00, 0x41, 0xFF, 0x00];
        assert_eq!(crc16(&data), crc16(&data));
    }

    #[test]
    fn frame_with_crc_appended_checks_to_zero() {
        let mut frame = vec![0x11, 0x03, 0x00, 0x00, 0x00, 0x04];
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        assert_eq!(crc16(&frame), 0x0000);
        assert_eq!(trailing_crc(&frame), Some(crc));
    }

    #[test]
    fn trailing_crc_short_frame() {
        assert_eq!(trailing_crc(&[]), None);
        assert_eq!(trailing_crc(&[0x01]), None);
        assert_eq!(trailing_crc(&[0x84, 0x0A]), Some(0x0A84));
    }
}
