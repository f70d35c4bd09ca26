//! OP_STATUS payload: per-die monitor block plus core status bitmap.

use byteorder::{ByteOrder, LittleEndian};

use super::PayloadError;

/// Raw ADC conversions for the on-die sensors.
///
/// Temperature: `t * 240 / 4096 - 61.5` °C from a 16-bit reading.
/// Voltage: `v / 256 * 1.2` V from an 8-bit reading.
pub fn die_temperature(raw: u16) -> f32 {
    (raw as f32) * 240.0 / 4096.0 - 61.5
}

pub fn core_voltage(raw: u8) -> f32 {
    (raw as f32) / 256.0 * 1.2
}

/// The 8-byte monitor block at the front of a status payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DieMonitor {
    pub raw_temperature: u16,
    /// Main supply plus taps A..E.
    pub raw_voltage: [u8; 6],
}

impl DieMonitor {
    pub const SIZE: usize = 8;

    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        if data.len() < Self::SIZE {
            return Err(PayloadError::TooShort {
                what: "die monitor",
                expected: Self::SIZE,
                got: data.len(),
            });
        }
        let mut raw_voltage = [0u8; 6];
        raw_voltage.copy_from_slice(&data[2..8]);
        Ok(Self {
            raw_temperature: LittleEndian::read_u16(&data[0..2]),
            raw_voltage,
        })
    }

    pub fn temperature(&self) -> f32 {
        die_temperature(self.raw_temperature)
    }

    pub fn voltages(&self) -> [f32; 6] {
        self.raw_voltage.map(core_voltage)
    }
}

/// Decoded OP_STATUS payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub monitor: DieMonitor,
    /// One bit per core, little-endian bit order within each byte.
    pub core_status: Vec<u8>,
}

impl Status {
    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        let monitor = DieMonitor::decode(data)?;
        Ok(Self {
            monitor,
            core_status: data[DieMonitor::SIZE..].to_vec(),
        })
    }

    /// Whether core `index` reported active in the bitmap.
    pub fn core_active(&self, index: usize) -> Option<bool> {
        self.core_status
            .get(index / 8)
            .map(|byte| byte & (1 << (index % 8)) != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_monitor_and_bitmap() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x0800u16.to_le_bytes()); // mid-scale temp
        data.extend_from_slice(&[0x80, 0x81, 0x82, 0x83, 0x84, 0x85]);
        data.extend_from_slice(&[0b0000_0101, 0xFF]);

        let status = Status::decode(&data).unwrap();
        assert_eq!(status.monitor.raw_temperature, 0x0800);
        // 2048 * 240 / 4096 - 61.5 = 58.5
        assert!((status.monitor.temperature() - 58.5).abs() < 1e-4);
        // 0x80 / 256 * 1.2 = 0.6
        assert!((status.monitor.voltages()[0] - 0.6).abs() < 1e-4);
        assert_eq!(status.core_active(0), Some(true));
        assert_eq!(status.core_active(1), Some(false));
        assert_eq!(status.core_active(2), Some(true));
        assert_eq!(status.core_active(8), Some(true));
        assert_eq!(status.core_active(16), None);
    }

    #[test]
    fn short_payload_is_rejected() {
        assert!(matches!(
            Status::decode(&[0; 4]),
            Err(PayloadError::TooShort { .. })
        ));
    }
}
