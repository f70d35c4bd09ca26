//! Operation codes carried in the second header byte.

use std::fmt;

/// Known operation codes.
///
/// The framer never interprets these; they select how a payload is
/// decoded once a frame has been delivered. Codes not in this table are
/// carried through as raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // Serial protocol operation codes
    Null = 0,
    Root = 1,
    Reset = 2,
    PllConfig = 3,
    Address = 4,
    Readdress = 5,
    Highest = 6,
    Baud = 7,
    Unroot = 8,
    Hash = 9,
    Nonce = 10,
    Abort = 11,
    Status = 12,
    Gpio = 13,
    Config = 14,
    Statistics = 15,
    Group = 16,
    ClockGate = 17,

    // Factory codes
    Serial = 50,
    Limits = 51,
    History = 52,
    Characterize = 53,
    CharResult = 54,
    Settings = 55,
    FanSettings = 56,
    Power = 57,
    BadCore = 58,

    // USB interface specific operation codes
    UsbInit = 128,
    GetTrace = 129,
    LoopbackUsb = 130,
    LoopbackUart = 131,
    Dfu = 132,
    UsbShutdown = 133,
    DieStatus = 134,
    GwqStatus = 135,
    WorkRestart = 136,
    UsbStats1 = 137,
    UsbGwqStats = 138,
    UsbNotice = 139,
    Ping = 140,
    CoreMap = 141,
    Version = 142,
    Fan = 143,
    Name = 144,
    UsbDebug = 255,
}

impl Opcode {
    /// Look up a wire byte; `None` for codes outside the table.
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0 => Opcode::Null,
            1 => Opcode::Root,
            2 => Opcode::Reset,
            3 => Opcode::PllConfig,
            4 => Opcode::Address,
            5 => Opcode::Readdress,
            6 => Opcode::Highest,
            7 => Opcode::Baud,
            8 => Opcode::Unroot,
            9 => Opcode::Hash,
            10 => Opcode::Nonce,
            11 => Opcode::Abort,
            12 => Opcode::Status,
            13 => Opcode::Gpio,
            14 => Opcode::Config,
            15 => Opcode::Statistics,
            16 => Opcode::Group,
            17 => Opcode::ClockGate,
            50 => Opcode::Serial,
            51 => Opcode::Limits,
            52 => Opcode::History,
            53 => Opcode::Characterize,
            54 => Opcode::CharResult,
            55 => Opcode::Settings,
            56 => Opcode::FanSettings,
            57 => Opcode::Power,
            58 => Opcode::BadCore,
            128 => Opcode::UsbInit,
            129 => Opcode::GetTrace,
            130 => Opcode::LoopbackUsb,
            131 => Opcode::LoopbackUart,
            132 => Opcode::Dfu,
            133 => Opcode::UsbShutdown,
            134 => Opcode::DieStatus,
            135 => Opcode::GwqStatus,
            136 => Opcode::WorkRestart,
            137 => Opcode::UsbStats1,
            138 => Opcode::UsbGwqStats,
            139 => Opcode::UsbNotice,
            140 => Opcode::Ping,
            141 => Opcode::CoreMap,
            142 => Opcode::Version,
            143 => Opcode::Fan,
            144 => Opcode::Name,
            255 => Opcode::UsbDebug,
            _ => return None,
        })
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Null => "OP_NULL",
            Opcode::Root => "OP_ROOT",
            Opcode::Reset => "OP_RESET",
            Opcode::PllConfig => "OP_PLL_CONFIG",
            Opcode::Address => "OP_ADDRESS",
            Opcode::Readdress => "OP_READDRESS",
            Opcode::Highest => "OP_HIGHEST",
            Opcode::Baud => "OP_BAUD",
            Opcode::Unroot => "OP_UNROOT",
            Opcode::Hash => "OP_HASH",
            Opcode::Nonce => "OP_NONCE",
            Opcode::Abort => "OP_ABORT",
            Opcode::Status => "OP_STATUS",
            Opcode::Gpio => "OP_GPIO",
            Opcode::Config => "OP_CONFIG",
            Opcode::Statistics => "OP_STATISTICS",
            Opcode::Group => "OP_GROUP",
            Opcode::ClockGate => "OP_CLOCKGATE",
            Opcode::Serial => "OP_SERIAL",
            Opcode::Limits => "OP_LIMITS",
            Opcode::History => "OP_HISTORY",
            Opcode::Characterize => "OP_CHARACTERIZE",
            Opcode::CharResult => "OP_CHAR_RESULT",
            Opcode::Settings => "OP_SETTINGS",
            Opcode::FanSettings => "OP_FAN_SETTINGS",
            Opcode::Power => "OP_POWER",
            Opcode::BadCore => "OP_BAD_CORE",
            Opcode::UsbInit => "OP_USB_INIT",
            Opcode::GetTrace => "OP_GET_TRACE",
            Opcode::LoopbackUsb => "OP_LOOPBACK_USB",
            Opcode::LoopbackUart => "OP_LOOPBACK_UART",
            Opcode::Dfu => "OP_DFU",
            Opcode::UsbShutdown => "OP_USB_SHUTDOWN",
            Opcode::DieStatus => "OP_DIE_STATUS",
            Opcode::GwqStatus => "OP_GWQ_STATUS",
            Opcode::WorkRestart => "OP_WORK_RESTART",
            Opcode::UsbStats1 => "OP_USB_STATS1",
            Opcode::UsbGwqStats => "OP_USB_GWQSTATS",
            Opcode::UsbNotice => "OP_USB_NOTICE",
            Opcode::Ping => "OP_PING",
            Opcode::CoreMap => "OP_CORE_MAP",
            Opcode::Version => "OP_VERSION",
            Opcode::Fan => "OP_FAN",
            Opcode::Name => "OP_NAME",
            Opcode::UsbDebug => "OP_USB_DEBUG",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_known_codes() {
        for code in [0u8, 10, 12, 58, 128, 140, 144, 255] {
            let op = Opcode::from_u8(code).unwrap();
            assert_eq!(u8::from(op), code);
        }
    }

    #[test]
    fn unknown_codes_are_none() {
        assert!(Opcode::from_u8(18).is_none());
        assert!(Opcode::from_u8(49).is_none());
        assert!(Opcode::from_u8(145).is_none());
    }
}
