//! Typed payload decoding.
//!
//! The framer treats payloads as opaque bytes; what those bytes mean is
//! decided here, on demand, keyed by the operation code. Every decoder
//! extracts fields explicitly (little-endian) instead of reinterpreting
//! raw buffers.

pub mod config;
pub mod init;
pub mod nonce;
pub mod notice;
pub mod status;

pub use config::ConfigData;
pub use init::{UsbInitBase, UsbInitReply};
pub use nonce::CandidateNonce;
pub use notice::Notice;
pub use status::{DieMonitor, Status};

use thiserror::Error;

use crate::protocol::header::Header;
use crate::protocol::opcode::Opcode;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload too short for {what}: expected at least {expected} bytes, got {got}")]
    TooShort {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("payload length {got} is not a multiple of {unit} ({what})")]
    BadMultiple {
        what: &'static str,
        unit: usize,
        got: usize,
    },
}

/// A decoded payload, one variant per understood operation code.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Status(Status),
    Nonces(Vec<CandidateNonce>),
    UsbInit(UsbInitReply),
    Config(ConfigData),
    Notice(Notice),
    /// Operation codes without a dedicated decoder keep their raw bytes.
    Unknown(Vec<u8>),
}

impl Payload {
    /// Decode the payload of a delivered frame.
    ///
    /// Header fields participate: several replies carry parameters in
    /// `hdata` and the address bytes.
    pub fn decode(header: &Header, data: &[u8]) -> Result<Self, PayloadError> {
        Ok(match header.opcode() {
            Some(Opcode::Status) => Payload::Status(Status::decode(data)?),
            Some(Opcode::Nonce) => Payload::Nonces(nonce::decode_list(data)?),
            Some(Opcode::UsbInit) => Payload::UsbInit(UsbInitReply::decode(header, data)?),
            Some(Opcode::Config) => Payload::Config(ConfigData::decode(data)?),
            Some(Opcode::UsbNotice) => Payload::Notice(Notice::decode(header, data)?),
            _ => Payload::Unknown(data.to_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_opcode_keeps_raw_bytes() {
        let header = Header::new(Opcode::UsbDebug, 0, 0, 0, 1);
        let payload = Payload::decode(&header, &[1, 2, 3, 4]).unwrap();
        assert_eq!(payload, Payload::Unknown(vec![1, 2, 3, 4]));
    }
}
