//! OP_USB_INIT reply: interface details reported after initialization.

use byteorder::{ByteOrder, LittleEndian};

use super::PayloadError;
use super::config::ConfigData;
use crate::protocol::header::Header;

/// The 16-byte base block at the front of the init reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsbInitBase {
    pub firmware_rev: u16,
    pub hardware_rev: u16,
    pub serial_number: u32,
    pub operation_status: u8,
    pub extra_status: [u8; 3],
    /// Effective hash clock rate, MHz.
    pub hash_clock_rate: u16,
    pub inflight_target: u16,
}

impl UsbInitBase {
    pub const SIZE: usize = 16;

    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        if data.len() < Self::SIZE {
            return Err(PayloadError::TooShort {
                what: "usb init base",
                expected: Self::SIZE,
                got: data.len(),
            });
        }
        let mut extra_status = [0u8; 3];
        extra_status.copy_from_slice(&data[9..12]);
        Ok(Self {
            firmware_rev: LittleEndian::read_u16(&data[0..2]),
            hardware_rev: LittleEndian::read_u16(&data[2..4]),
            serial_number: LittleEndian::read_u32(&data[4..8]),
            operation_status: data[8],
            extra_status,
            hash_clock_rate: LittleEndian::read_u16(&data[12..14]),
            inflight_target: LittleEndian::read_u16(&data[14..16]),
        })
    }
}

/// Full decoded init reply. Topology comes from the header fields, the
/// payload carries the base block and the active die configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsbInitReply {
    pub dies_present: u8,
    pub cores_per_die: u8,
    pub device_id: u8,
    /// Reference clock, MHz.
    pub reference_clock: u8,
    pub base: UsbInitBase,
    pub config: ConfigData,
}

impl UsbInitReply {
    pub fn decode(header: &Header, data: &[u8]) -> Result<Self, PayloadError> {
        let needed = UsbInitBase::SIZE + ConfigData::SIZE;
        if data.len() < needed {
            return Err(PayloadError::TooShort {
                what: "usb init reply",
                expected: needed,
                got: data.len(),
            });
        }
        Ok(Self {
            dies_present: header.chip_address,
            cores_per_die: header.core_address,
            device_id: (header.hdata & 0x00FF) as u8,
            reference_clock: (header.hdata >> 8) as u8,
            base: UsbInitBase::decode(&data[..UsbInitBase::SIZE])?,
            config: ConfigData::decode(&data[UsbInitBase::SIZE..needed])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::opcode::Opcode;

    #[test]
    fn decodes_topology_and_base() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x0102u16.to_le_bytes()); // firmware
        data.extend_from_slice(&0x0003u16.to_le_bytes()); // hardware
        data.extend_from_slice(&0xCAFE_F00Du32.to_le_bytes()); // serial
        data.push(1); // operation status
        data.extend_from_slice(&[0, 0, 0]); // extra status
        data.extend_from_slice(&550u16.to_le_bytes()); // clock rate
        data.extend_from_slice(&128u16.to_le_bytes()); // inflight
        data.extend_from_slice(&[0u8; ConfigData::SIZE]);

        // 4 dies, 96 cores, device 0, 25 MHz reference.
        let header = Header::new(Opcode::UsbInit, 4, 96, (25 << 8) | 0, 8);
        let reply = UsbInitReply::decode(&header, &data).unwrap();
        assert_eq!(reply.dies_present, 4);
        assert_eq!(reply.cores_per_die, 96);
        assert_eq!(reply.device_id, 0);
        assert_eq!(reply.reference_clock, 25);
        assert_eq!(reply.base.firmware_rev, 0x0102);
        assert_eq!(reply.base.serial_number, 0xCAFE_F00D);
        assert_eq!(reply.base.hash_clock_rate, 550);
        assert_eq!(reply.base.inflight_target, 128);
    }

    #[test]
    fn short_reply_is_rejected() {
        let header = Header::new(Opcode::UsbInit, 1, 1, 0, 4);
        assert!(matches!(
            UsbInitReply::decode(&header, &[0; 16]),
            Err(PayloadError::TooShort { .. })
        ));
    }
}
