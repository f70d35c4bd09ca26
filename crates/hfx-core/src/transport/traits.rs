//! Transport abstraction.
//!
//! `RawDevice` is the seam between the lane/pump logic in
//! [`super::session`] and the actual USB stack, allowing a mock
//! implementation for unit testing.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The USB backend could not be initialized at all.
    #[error("USB backend unavailable: {0}")]
    Backend(String),

    /// A background thread could not be spawned.
    #[error("failed to spawn background thread: {0}")]
    Thread(String),

    /// No device matched the vendor/product pair and filter.
    #[error("no matching device: vid={vid:04x} pid={pid:04x}")]
    NoDevice { vid: u16, pid: u16 },

    /// More than one device matched; the filter must be narrowed.
    #[error("{count} devices match; narrow the selection with a bus/address filter")]
    AmbiguousDevice { count: usize },

    #[error("failed to open device: {0}")]
    OpenFailed(String),

    #[error("failed to claim interface {interface}: {message}")]
    ClaimFailed { interface: u8, message: String },

    #[error("bulk endpoint 0x{address:02x} unavailable: {message}")]
    Endpoint { address: u8, message: String },

    /// The transfer did not complete within its fixed timeout. The
    /// inbound loop treats this as "no data"; control/write callers see
    /// it as a failed call.
    #[error("transfer timed out")]
    Timeout,

    #[error("endpoint stalled")]
    Stall,

    /// The device went away. Ends the inbound loop's re-arming.
    #[error("device disconnected")]
    Disconnected,

    #[error("transfer failed: {0}")]
    TransferFailed(String),
}

/// Raw operations against one opened, claimed device.
///
/// Implementations perform a single blocking transfer per call and
/// enforce the protocol's fixed timeouts. Serialization of concurrent
/// callers is NOT their concern; the session's lane locks provide it.
pub trait RawDevice: Send + Sync {
    /// Vendor-interface control read. Returns the number of bytes
    /// placed at the front of `buf`.
    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize, TransportError>;

    /// Vendor-interface control write. Returns the number of bytes
    /// accepted.
    fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<usize, TransportError>;

    /// One blocking bulk-out transfer.
    fn bulk_write(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// One blocking bulk-in transfer, bounded by the short inbound
    /// timeout. `Err(Timeout)` means no data arrived this interval.
    fn bulk_read(&self, buf: &mut [u8]) -> Result<usize, TransportError>;
}
