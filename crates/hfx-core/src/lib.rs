//! hfx-core: protocol and transport library for the USB-attached
//! multi-chip hashing boards.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **CRC**: the CRC-8 (header) and CRC-32 (payload) engines
//! - **Protocol**: constants, operation codes, frame header
//! - **Parser**: byte-stream to frame state machine with resync
//! - **Payload**: typed decode of frame payloads, keyed by opcode
//! - **Transport**: one claimed device, blocking control/bulk-out
//!   lanes, a background inbound pump, best-effort hotplug
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Mutex;
//! use hfx_core::parser::{Parser, ParserOptions};
//! use hfx_core::transport::{SessionConfig, UsbContext, UsbEvent};
//!
//! let parser = Mutex::new(Parser::new(ParserOptions::default()));
//! let context = UsbContext::new(move |event| {
//!     if let UsbEvent::Data(bytes) = event {
//!         parser.lock().unwrap().feed(bytes, |frame| {
//!             println!("op 0x{:02x}, {} payload bytes",
//!                 frame.header.operation_code, frame.payload.len());
//!         });
//!     }
//! })
//! .expect("usb init");
//! let session = context.open(&SessionConfig::default()).expect("open");
//! # let _ = session;
//! ```

pub mod crc;
pub mod parser;
pub mod payload;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use crc::{CRC8_INITIAL, CRC32_INITIAL, crc8_accumulate, crc32, crc32_accumulate};
pub use parser::{Frame, Parser, ParserOptions, ParserStats};
pub use payload::{Payload, PayloadError};
pub use protocol::{Header, HeaderError, Opcode};
pub use transport::{
    MockDevice, NusbDevice, RawDevice, SessionConfig, TransportError, UsbContext, UsbEvent,
    UsbSession,
};
