//! Protocol constants for the USB-attached hashing boards.

// ============================================================================
// Device Identification
// ============================================================================

/// Vendor ID shared by the application and loader interfaces.
pub const VENDOR_ID: u16 = 0x297C;

/// Product ID presented by the running application firmware.
pub const PRODUCT_ID: u16 = 0x0001;

/// Product ID presented by the boot loader.
pub const LOADER_PRODUCT_ID: u16 = 0x8001;

// ============================================================================
// USB Topology
// ============================================================================

/// Interface carrying the bulk protocol endpoints.
pub const DATA_INTERFACE: u8 = 1;

/// Host-to-device bulk endpoint.
pub const EP_BULK_OUT: u8 = 0x02;

/// Device-to-host bulk endpoint.
pub const EP_BULK_IN: u8 = 0x81;

/// Transfer timeouts, milliseconds. The inbound loop treats a timeout as
/// "no data this interval" and re-arms.
pub const CONTROL_TIMEOUT_MS: u64 = 100;
pub const BULK_OUT_TIMEOUT_MS: u64 = 100;
pub const BULK_IN_TIMEOUT_MS: u64 = 100;

/// Size of one inbound bulk transfer.
pub const BULK_IN_BUFFER: usize = 64;

// ============================================================================
// Framing
// ============================================================================

/// Sentinel byte that opens every frame header.
pub const PREAMBLE: u8 = 0xAA;

/// Frame header size on the wire.
pub const HEADER_SIZE: usize = 8;

/// Payload length is counted in 4-byte words, at most 255 of them.
pub const MAX_PAYLOAD_WORDS: usize = 255;
pub const MAX_PAYLOAD_BYTES: usize = 4 * MAX_PAYLOAD_WORDS;

/// Magic `hdata` value required by the serial-number, settings and fan
/// operations.
pub const U_MAGIC: u16 = 0x42AA;

// ============================================================================
// Vendor Control Requests (bRequest, vendor | interface)
// ============================================================================

pub const USBCTRL_REBOOT: u8 = 0x60;
pub const USBCTRL_VERSION: u8 = 0x61;
pub const USBCTRL_CONFIG: u8 = 0x62;
pub const USBCTRL_STATUS: u8 = 0x63;
pub const USBCTRL_LOADER_RESTART_ADDR: u8 = 0x66;
pub const USBCTRL_SERIAL: u8 = 0x67;
pub const USBCTRL_FLASH_SIZE: u8 = 0x68;
pub const USBCTRL_NAME: u8 = 0x70;
pub const USBCTRL_FAN: u8 = 0x71;
pub const USBCTRL_POWER: u8 = 0x72;
pub const USBCTRL_FAN_PARMS: u8 = 0x73;
pub const USBCTRL_ASIC_PARMS: u8 = 0x74;
pub const USBCTRL_VOLTAGE: u8 = 0x75;
pub const USBCTRL_CORE_OVERVIEW: u8 = 0xA0;
pub const USBCTRL_CORE_ENABLE: u8 = 0xA1;
pub const USBCTRL_CORE_DISABLE: u8 = 0xA2;
pub const USBCTRL_CORE_CLEAR: u8 = 0xA3;
pub const USBCTRL_CORE_STATUS: u8 = 0xA4;
pub const USBCTRL_CORE_DIE_STATUS: u8 = 0xA5;
pub const USBCTRL_CORE_ASIC_STATUS: u8 = 0xA6;
pub const USBCTRL_DEBUG_BUFFER: u8 = 0xD0;
pub const USBCTRL_DEBUG_STREAM: u8 = 0xD1;
pub const USBCTRL_DEBUG_CLI: u8 = 0xD2;

/// Reboot request `wValue` selecting the image to restart into.
pub const REBOOT_MODE_APP: u16 = 0x0000;
pub const REBOOT_MODE_LOADER: u16 = 0x0001;
