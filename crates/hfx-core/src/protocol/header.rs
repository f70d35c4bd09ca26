//! Frame header encode/decode.
//!
//! Every exchange on the bulk pipe starts with the same 8-byte header:
//!
//! ```text
//! ┌──────────┬────────┬──────┬──────┬───────────┬─────────────┬──────┐
//! │ preamble │ opcode │ chip │ core │   hdata   │ data_length │ crc8 │
//! │   0xAA   │ 1 byte │ 1 b  │ 1 b  │ 2 b (LE)  │   1 byte    │ 1 b  │
//! └──────────┴────────┴──────┴──────┴───────────┴─────────────┴──────┘
//! ```
//!
//! `data_length` counts 4-byte payload words; the CRC-8 covers bytes
//! 1..=6 and is seeded with 0xFF.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::crc::{CRC8_INITIAL, crc8_accumulate};
use crate::protocol::constants::{HEADER_SIZE, PREAMBLE};
use crate::protocol::opcode::Opcode;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("buffer too small for a header: expected {HEADER_SIZE}, got {0}")]
    BufferTooSmall(usize),
    #[error("bad preamble: expected 0x{PREAMBLE:02X}, got 0x{0:02X}")]
    BadPreamble(u8),
    #[error("header CRC mismatch: computed 0x{computed:02X}, got 0x{found:02X}")]
    BadCrc { computed: u8, found: u8 },
}

/// Decoded frame header.
///
/// `chip_address`, `core_address` and `hdata` are routing/parameter
/// fields whose meaning depends on the operation; the framing layer
/// carries them through untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    pub operation_code: u8,
    pub chip_address: u8,
    pub core_address: u8,
    pub hdata: u16,
    pub data_length: u8,
}

impl Header {
    pub fn new(op: Opcode, chip_address: u8, core_address: u8, hdata: u16, words: u8) -> Self {
        Self {
            operation_code: op.into(),
            chip_address,
            core_address,
            hdata,
            data_length: words,
        }
    }

    /// The operation code, when it is in the known table.
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.operation_code)
    }

    /// Payload length in bytes (excluding any trailing CRC-32).
    pub fn payload_len(&self) -> usize {
        4 * self.data_length as usize
    }

    /// Serialize, computing the CRC-8.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = PREAMBLE;
        buf[1] = self.operation_code;
        buf[2] = self.chip_address;
        buf[3] = self.core_address;
        LittleEndian::write_u16(&mut buf[4..6], self.hdata);
        buf[6] = self.data_length;
        buf[7] = crc8_accumulate(CRC8_INITIAL, &buf[1..7]);
        buf
    }

    /// Parse and validate one header from the front of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, HeaderError> {
        if buf.len() < HEADER_SIZE {
            return Err(HeaderError::BufferTooSmall(buf.len()));
        }
        if buf[0] != PREAMBLE {
            return Err(HeaderError::BadPreamble(buf[0]));
        }
        let computed = crc8_accumulate(CRC8_INITIAL, &buf[1..7]);
        if computed != buf[7] {
            return Err(HeaderError::BadCrc {
                computed,
                found: buf[7],
            });
        }
        Ok(Self::from_wire(buf))
    }

    /// Extract fields from an already-validated 8-byte window.
    pub(crate) fn from_wire(buf: &[u8]) -> Self {
        Self {
            operation_code: buf[1],
            chip_address: buf[2],
            core_address: buf[3],
            hdata: LittleEndian::read_u16(&buf[4..6]),
            data_length: buf[6],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let header = Header::new(Opcode::FanSettings, 0x00, 0x01, 0x42AA, 3);
        let bytes = header.encode();
        assert_eq!(bytes[0], PREAMBLE);
        assert_eq!(bytes[6], 3);
        let parsed = Header::decode(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.opcode(), Some(Opcode::FanSettings));
        assert_eq!(parsed.payload_len(), 12);
    }

    #[test]
    fn decode_rejects_bad_preamble() {
        let mut bytes = Header::new(Opcode::Ping, 0, 0, 0, 0).encode();
        bytes[0] = 0x55;
        assert!(matches!(
            Header::decode(&bytes),
            Err(HeaderError::BadPreamble(0x55))
        ));
    }

    #[test]
    fn decode_rejects_bad_crc() {
        let mut bytes = Header::new(Opcode::Ping, 0, 0, 0, 0).encode();
        bytes[7] ^= 0x01;
        assert!(matches!(Header::decode(&bytes), Err(HeaderError::BadCrc { .. })));
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert!(matches!(
            Header::decode(&[PREAMBLE, 1, 2]),
            Err(HeaderError::BufferTooSmall(3))
        ));
    }

    #[test]
    fn hdata_is_little_endian() {
        let bytes = Header::new(Opcode::UsbInit, 0, 0, 0x0226, 0).encode();
        assert_eq!(bytes[4], 0x26);
        assert_eq!(bytes[5], 0x02);
    }
}
