//! The packed 16-byte die configuration block (OP_CONFIG, and embedded
//! in the OP_USB_INIT reply).

use byteorder::{ByteOrder, LittleEndian};

use super::PayloadError;

/// Die configuration, unpacked from its wire bitfields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigData {
    /// Periodic status interval, milliseconds (11 bits).
    pub status_period: u16,
    pub enable_periodic_status: bool,
    pub send_status_on_core_idle: bool,
    pub send_status_on_pending_empty: bool,
    pub pwm_active_level: bool,
    pub forward_all_privileged_packets: bool,
    /// Batching delay between status frames, milliseconds.
    pub status_batch_delay: u8,
    /// Watchdog timeout, seconds (7 bits).
    pub watchdog: u8,
    pub disable_sensors: bool,
    /// Header receive timeout, character times (7 bits).
    pub rx_header_timeout: u8,
    pub rx_ignore_header_crc: bool,
    /// Data receive timeout, character times / 16 (7 bits).
    pub rx_data_timeout: u8,
    pub rx_ignore_data_crc: bool,
    /// Statistics interval, seconds (7 bits).
    pub statistics_interval: u8,
    pub stats_diagnostic: bool,
    /// Measurement interval, milliseconds.
    pub measure_interval: u8,
    /// Low-frequency clocks per microsecond (12 bits).
    pub one_usec: u16,
    /// Maximum nonces batched per frame (4 bits).
    pub max_nonces_per_frame: u8,
    pub voltage_sample_points: u8,
    /// PWM phase count (2 bits).
    pub pwm_phases: u8,
    /// Temperature trim (4 bits).
    pub trim: u8,
    pub clock_diagnostic: bool,
    pub forward_all_packets: bool,
    pub pwm_period: u16,
    pub pwm_pulse_period: u16,
}

impl ConfigData {
    pub const SIZE: usize = 16;

    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        if data.len() < Self::SIZE {
            return Err(PayloadError::TooShort {
                what: "config data",
                expected: Self::SIZE,
                got: data.len(),
            });
        }
        let first = LittleEndian::read_u16(&data[0..2]);
        let second = LittleEndian::read_u32(&data[8..12]);
        Ok(Self {
            status_period: first & 0x07FF,
            enable_periodic_status: first & 0x0800 != 0,
            send_status_on_core_idle: first & 0x1000 != 0,
            send_status_on_pending_empty: first & 0x2000 != 0,
            pwm_active_level: first & 0x4000 != 0,
            forward_all_privileged_packets: first & 0x8000 != 0,
            status_batch_delay: data[2],
            watchdog: data[3] & 0x7F,
            disable_sensors: data[3] & 0x80 != 0,
            rx_header_timeout: data[4] & 0x7F,
            rx_ignore_header_crc: data[4] & 0x80 != 0,
            rx_data_timeout: data[5] & 0x7F,
            rx_ignore_data_crc: data[5] & 0x80 != 0,
            statistics_interval: data[6] & 0x7F,
            stats_diagnostic: data[6] & 0x80 != 0,
            measure_interval: data[7],
            one_usec: (second & 0x0000_0FFF) as u16,
            max_nonces_per_frame: ((second & 0x0000_F000) >> 12) as u8,
            voltage_sample_points: ((second & 0x00FF_0000) >> 16) as u8,
            pwm_phases: ((second & 0x0300_0000) >> 24) as u8,
            trim: ((second & 0x3C00_0000) >> 26) as u8,
            clock_diagnostic: second & 0x4000_0000 != 0,
            forward_all_packets: second & 0x8000_0000 != 0,
            pwm_period: LittleEndian::read_u16(&data[12..14]),
            pwm_pulse_period: LittleEndian::read_u16(&data[14..16]),
        })
    }

    /// Pack back into the 16-byte wire layout.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let first = (self.status_period & 0x07FF)
            | (u16::from(self.enable_periodic_status) << 11)
            | (u16::from(self.send_status_on_core_idle) << 12)
            | (u16::from(self.send_status_on_pending_empty) << 13)
            | (u16::from(self.pwm_active_level) << 14)
            | (u16::from(self.forward_all_privileged_packets) << 15);
        LittleEndian::write_u16(&mut buf[0..2], first);
        buf[2] = self.status_batch_delay;
        buf[3] = (self.watchdog & 0x7F) | (u8::from(self.disable_sensors) << 7);
        buf[4] = (self.rx_header_timeout & 0x7F) | (u8::from(self.rx_ignore_header_crc) << 7);
        buf[5] = (self.rx_data_timeout & 0x7F) | (u8::from(self.rx_ignore_data_crc) << 7);
        buf[6] = (self.statistics_interval & 0x7F) | (u8::from(self.stats_diagnostic) << 7);
        buf[7] = self.measure_interval;
        let second = u32::from(self.one_usec & 0x0FFF)
            | (u32::from(self.max_nonces_per_frame & 0x0F) << 12)
            | (u32::from(self.voltage_sample_points) << 16)
            | (u32::from(self.pwm_phases & 0x03) << 24)
            | (u32::from(self.trim & 0x0F) << 26)
            | (u32::from(self.clock_diagnostic) << 30)
            | (u32::from(self.forward_all_packets) << 31);
        LittleEndian::write_u32(&mut buf[8..12], second);
        LittleEndian::write_u16(&mut buf[12..14], self.pwm_period);
        LittleEndian::write_u16(&mut buf[14..16], self.pwm_pulse_period);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_all_fields() {
        let config = ConfigData {
            status_period: 500,
            enable_periodic_status: true,
            send_status_on_core_idle: true,
            send_status_on_pending_empty: false,
            pwm_active_level: false,
            forward_all_privileged_packets: true,
            status_batch_delay: 10,
            watchdog: 60,
            disable_sensors: false,
            rx_header_timeout: 20,
            rx_ignore_header_crc: false,
            rx_data_timeout: 5,
            rx_ignore_data_crc: true,
            statistics_interval: 30,
            stats_diagnostic: false,
            measure_interval: 100,
            one_usec: 0x0800,
            max_nonces_per_frame: 8,
            voltage_sample_points: 0x55,
            pwm_phases: 2,
            trim: 9,
            clock_diagnostic: false,
            forward_all_packets: true,
            pwm_period: 12000,
            pwm_pulse_period: 600,
        };
        let decoded = ConfigData::decode(&config.encode()).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn decodes_known_bit_positions() {
        let mut raw = [0u8; 16];
        raw[0] = 0xF4; // status_period low bits
        raw[1] = 0x09; // period bit 8, enable_periodic_status (bit 11)
        raw[3] = 0x80 | 33; // disable_sensors + watchdog
        let config = ConfigData::decode(&raw).unwrap();
        assert_eq!(config.status_period, 0x01F4);
        assert!(config.enable_periodic_status);
        assert!(config.disable_sensors);
        assert_eq!(config.watchdog, 33);
    }
}
