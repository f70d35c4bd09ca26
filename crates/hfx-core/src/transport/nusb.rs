//! nusb-based transport backend.
//!
//! `NusbDevice` implements [`RawDevice`] over one opened, claimed
//! device. `UsbContext` owns the process-side pieces that outlive any
//! session: the event callback and the best-effort hotplug watcher.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nusb::io::EndpointRead;
use nusb::transfer::{Bulk, ControlIn, ControlOut, ControlType, In, Out, Recipient, TransferError};
use nusb::{DeviceInfo, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, warn};

use super::session::{EventCallback, SessionConfig, UsbEvent, UsbSession};
use super::traits::{RawDevice, TransportError as Error};
use crate::protocol::constants::{
    BULK_IN_TIMEOUT_MS, BULK_OUT_TIMEOUT_MS, CONTROL_TIMEOUT_MS, DATA_INTERFACE, EP_BULK_IN,
    EP_BULK_OUT, LOADER_PRODUCT_ID, PRODUCT_ID, VENDOR_ID,
};

const CONTROL_TIMEOUT: Duration = Duration::from_millis(CONTROL_TIMEOUT_MS);
const BULK_OUT_TIMEOUT: Duration = Duration::from_millis(BULK_OUT_TIMEOUT_MS);
const BULK_IN_TIMEOUT: Duration = Duration::from_millis(BULK_IN_TIMEOUT_MS);

/// Interval between device-list polls for hotplug detection.
const HOTPLUG_POLL: Duration = Duration::from_millis(500);

/// One opened, interface-claimed device.
pub struct NusbDevice {
    interface: Interface,
    in_endpoint: u8,
    out_endpoint: u8,
    /// Persistent inbound reader. Created lazily and kept across reads
    /// so bytes buffered beyond one read call are never dropped.
    reader: Mutex<Option<EndpointRead<Bulk>>>,
    vid: u16,
    pid: u16,
}

fn matches_filter(info: &DeviceInfo, config: &SessionConfig, pid: u16) -> bool {
    info.vendor_id() == VENDOR_ID
        && info.product_id() == pid
        && config.address.is_none_or(|a| a == info.device_address())
        && config
            .bus
            .as_deref()
            .is_none_or(|b| b == info.bus_id())
}

impl NusbDevice {
    /// Locate, open and claim the device selected by `config`.
    ///
    /// Exactly one device must match the vendor/product pair and any
    /// bus/address filter; zero or several matches are distinct errors.
    #[instrument(level = "info", skip(config))]
    pub fn open(config: &SessionConfig) -> Result<Self, Error> {
        let pid = if config.loader { LOADER_PRODUCT_ID } else { PRODUCT_ID };
        let mut matches: Vec<DeviceInfo> = list_devices()
            .wait()
            .map_err(|e| Error::Backend(e.to_string()))?
            .filter(|info| matches_filter(info, config, pid))
            .collect();
        if matches.len() > 1 {
            return Err(Error::AmbiguousDevice {
                count: matches.len(),
            });
        }
        let Some(info) = matches.pop() else {
            return Err(Error::NoDevice {
                vid: VENDOR_ID,
                pid,
            });
        };

        info!(
            bus = %info.bus_id(),
            address = info.device_address(),
            pid = %format!("{pid:04x}"),
            "found device"
        );

        let device = info
            .open()
            .wait()
            .map_err(|e| Error::OpenFailed(e.to_string()))?;

        let interface = device
            .detach_and_claim_interface(DATA_INTERFACE)
            .wait()
            .map_err(|e| Error::ClaimFailed {
                interface: DATA_INTERFACE,
                message: e.to_string(),
            })?;

        // Confirm the expected bulk pair is actually present on the
        // claimed interface.
        let mut in_endpoint: u8 = 0;
        let mut out_endpoint: u8 = 0;
        for config_desc in device.configurations() {
            for iface in config_desc.interfaces() {
                if iface.interface_number() != DATA_INTERFACE {
                    continue;
                }
                for alt in iface.alt_settings() {
                    for ep in alt.endpoints() {
                        if ep.transfer_type() == nusb::descriptors::TransferType::Bulk {
                            if ep.direction() == nusb::transfer::Direction::In {
                                in_endpoint = ep.address();
                            } else {
                                out_endpoint = ep.address();
                            }
                        }
                    }
                }
            }
        }
        if in_endpoint == 0 {
            return Err(Error::Endpoint {
                address: EP_BULK_IN,
                message: "no bulk IN endpoint on the data interface".into(),
            });
        }
        if out_endpoint == 0 {
            return Err(Error::Endpoint {
                address: EP_BULK_OUT,
                message: "no bulk OUT endpoint on the data interface".into(),
            });
        }

        debug!(
            in_ep = %format!("0x{in_endpoint:02x}"),
            out_ep = %format!("0x{out_endpoint:02x}"),
            "device opened"
        );

        Ok(Self {
            interface,
            in_endpoint,
            out_endpoint,
            reader: Mutex::new(None),
            vid: VENDOR_ID,
            pid,
        })
    }

    pub fn vendor_id(&self) -> u16 {
        self.vid
    }

    pub fn product_id(&self) -> u16 {
        self.pid
    }
}

fn map_transfer_err(e: TransferError) -> Error {
    match e {
        TransferError::Disconnected => Error::Disconnected,
        TransferError::Stall => Error::Stall,
        // Timed-out transfers surface as cancellations.
        TransferError::Cancelled => Error::Timeout,
        other => Error::TransferFailed(other.to_string()),
    }
}

fn map_io_err(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::TimedOut {
        return Error::Timeout;
    }
    match e
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<TransferError>())
    {
        Some(TransferError::Disconnected) => Error::Disconnected,
        Some(TransferError::Stall) => Error::Stall,
        _ if e.kind() == std::io::ErrorKind::NotConnected => Error::Disconnected,
        _ => Error::TransferFailed(e.to_string()),
    }
}

impl RawDevice for NusbDevice {
    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let data = self
            .interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index,
                    length: buf.len() as u16,
                },
                CONTROL_TIMEOUT,
            )
            .wait()
            .map_err(map_transfer_err)?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<usize, Error> {
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index,
                    data,
                },
                CONTROL_TIMEOUT,
            )
            .wait()
            .map_err(map_transfer_err)?;
        Ok(data.len())
    }

    fn bulk_write(&self, data: &[u8]) -> Result<usize, Error> {
        let ep = self
            .interface
            .endpoint::<Bulk, Out>(self.out_endpoint)
            .map_err(|e| Error::Endpoint {
                address: self.out_endpoint,
                message: e.to_string(),
            })?;
        let mut writer = ep.writer(4096).with_write_timeout(BULK_OUT_TIMEOUT);
        writer.write_all(data).map_err(map_io_err)?;
        writer.flush().map_err(map_io_err)?;
        Ok(data.len())
    }

    fn bulk_read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut slot = self.reader.lock().unwrap();
        let reader = match slot.as_mut() {
            Some(reader) => reader,
            None => {
                let ep = self
                    .interface
                    .endpoint::<Bulk, In>(self.in_endpoint)
                    .map_err(|e| Error::Endpoint {
                        address: self.in_endpoint,
                        message: e.to_string(),
                    })?;
                slot.insert(ep.reader(4096).with_read_timeout(BULK_IN_TIMEOUT))
            }
        };
        reader.read(buf).map_err(map_io_err)
    }
}

/// Process-side transport context.
///
/// Owns the event callback shared with sessions and a background
/// watcher that polls the device list, reporting arrival and departure
/// of matching devices as [`UsbEvent::Hotplug`]. Platforms where
/// enumeration fails simply never produce hotplug events.
pub struct UsbContext {
    callback: EventCallback,
    shutdown: Arc<AtomicBool>,
    watcher: Option<JoinHandle<()>>,
}

impl UsbContext {
    /// Initialize the context. Fails if the USB backend itself is
    /// unusable or the watcher thread cannot be spawned.
    pub fn new<F>(callback: F) -> Result<Self, Error>
    where
        F: Fn(&UsbEvent<'_>) + Send + Sync + 'static,
    {
        // Probe enumeration once so backend problems surface as an
        // init error rather than silence later.
        list_devices()
            .wait()
            .map_err(|e| Error::Backend(e.to_string()))?;

        let callback: EventCallback = Arc::new(callback);
        let shutdown = Arc::new(AtomicBool::new(false));
        let watcher = thread::Builder::new()
            .name("usb-hotplug".into())
            .spawn({
                let callback = Arc::clone(&callback);
                let shutdown = Arc::clone(&shutdown);
                move || watch_loop(shutdown, callback)
            })
            .map_err(|e| Error::Thread(e.to_string()))?;
        Ok(Self {
            callback,
            shutdown,
            watcher: Some(watcher),
        })
    }

    /// Open a session on the device selected by `config`, wired to this
    /// context's event callback.
    pub fn open(&self, config: &SessionConfig) -> Result<UsbSession<NusbDevice>, Error> {
        let device = NusbDevice::open(config)?;
        UsbSession::start(device, Arc::clone(&self.callback))
    }
}

impl Drop for UsbContext {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(watcher) = self.watcher.take() {
            if watcher.join().is_err() {
                warn!("hotplug watcher thread panicked");
            }
        }
    }
}

fn is_ours(info: &DeviceInfo) -> bool {
    info.vendor_id() == VENDOR_ID
        && (info.product_id() == PRODUCT_ID || info.product_id() == LOADER_PRODUCT_ID)
}

fn watch_loop(shutdown: Arc<AtomicBool>, callback: EventCallback) {
    let mut present: HashSet<(String, u8)> = HashSet::new();
    while !shutdown.load(Ordering::Acquire) {
        if let Ok(devices) = list_devices().wait() {
            let current: HashSet<(String, u8)> = devices
                .filter(is_ours)
                .map(|info| (info.bus_id().to_string(), info.device_address()))
                .collect();
            // Devices already attached at startup are reported as
            // arrivals, matching an enumerate-on-register policy.
            for (bus, address) in current.difference(&present) {
                callback(&UsbEvent::Hotplug {
                    arrived: true,
                    bus: bus.clone(),
                    address: *address,
                });
            }
            for (bus, address) in present.difference(&current) {
                callback(&UsbEvent::Hotplug {
                    arrived: false,
                    bus: bus.clone(),
                    address: *address,
                });
            }
            present = current;
        }
        // Sleep in short steps so shutdown is observed promptly.
        let mut slept = Duration::ZERO;
        while slept < HOTPLUG_POLL && !shutdown.load(Ordering::Acquire) {
            let step = Duration::from_millis(50);
            thread::sleep(step);
            slept += step;
        }
    }
}
