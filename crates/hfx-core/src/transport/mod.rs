//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod session;
pub mod traits;

pub use mock::MockDevice;
pub use nusb::{NusbDevice, UsbContext};
pub use session::{EventCallback, SessionConfig, UsbEvent, UsbSession};
pub use traits::{RawDevice, TransportError};
