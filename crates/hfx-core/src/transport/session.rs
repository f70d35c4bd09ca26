//! Device session: request lanes plus the inbound pump.
//!
//! A session owns one claimed device and exposes three operation kinds:
//!
//! - blocking control transfers, serialized on the control lane;
//! - blocking bulk writes, serialized on the bulk-out lane;
//! - a perpetual inbound bulk-read loop on a background thread,
//!   delivering received bytes (and removal/error conditions) to the
//!   registered event callback until the session closes.
//!
//! The two request lanes are independent: a slow control transfer never
//! delays a bulk write. Any number of caller threads may use either
//! lane; each call completes fully before the next one on the same lane
//! is submitted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::traits::{RawDevice, TransportError};
use crate::protocol::constants::BULK_IN_BUFFER;

/// Events delivered from the transport's background threads.
#[derive(Debug)]
pub enum UsbEvent<'a> {
    /// Bytes arrived on the inbound bulk endpoint.
    Data(&'a [u8]),
    /// The open device disappeared; the inbound loop has stopped.
    Removed,
    /// An inbound transfer failed; the loop re-arms.
    TransferError(TransportError),
    /// A matching device arrived on or left the bus (best-effort,
    /// independent of any open session).
    Hotplug {
        arrived: bool,
        bus: String,
        address: u8,
    },
}

/// Shared event callback, invoked from background threads.
pub type EventCallback = Arc<dyn Fn(&UsbEvent<'_>) + Send + Sync>;

/// Session options, loadable from a TOML file.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Select the device at this bus address.
    pub address: Option<u8>,
    /// Select the device on this bus.
    pub bus: Option<String>,
    /// Open the boot loader interface instead of the application.
    #[serde(default)]
    pub loader: bool,
    /// Expect a trailing CRC-32 after every payload.
    #[serde(default)]
    pub include_data_crc: bool,
}

impl SessionConfig {
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(std::io::Error::other)
    }

    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, content)
    }
}

/// One open device session.
pub struct UsbSession<D: RawDevice> {
    device: Arc<D>,
    control_lane: Mutex<()>,
    bulk_out_lane: Mutex<()>,
    closing: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl<D: RawDevice + 'static> UsbSession<D> {
    /// Take ownership of an opened device and arm the inbound loop.
    pub fn start(device: D, callback: EventCallback) -> Result<Self, TransportError> {
        let device = Arc::new(device);
        let closing = Arc::new(AtomicBool::new(false));
        let pump = thread::Builder::new()
            .name("usb-bulk-in".into())
            .spawn({
                let device = Arc::clone(&device);
                let closing = Arc::clone(&closing);
                move || pump_loop(device, closing, callback)
            })
            .map_err(|e| TransportError::Thread(e.to_string()))?;
        debug!("session started, inbound loop armed");
        Ok(Self {
            device,
            control_lane: Mutex::new(()),
            bulk_out_lane: Mutex::new(()),
            closing,
            pump: Some(pump),
        })
    }

    /// Blocking control read. Concurrent callers are serialized on the
    /// control lane.
    pub fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize, TransportError> {
        let _lane = self.control_lane.lock().unwrap();
        self.device.control_in(request, value, index, buf)
    }

    /// Blocking control write, serialized on the control lane.
    pub fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<usize, TransportError> {
        let _lane = self.control_lane.lock().unwrap();
        self.device.control_out(request, value, index, data)
    }

    /// Blocking bulk write, serialized on the bulk-out lane. The
    /// caller's buffer is not retained past the call.
    pub fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let _lane = self.bulk_out_lane.lock().unwrap();
        self.device.bulk_write(data)
    }

    /// Stop the inbound loop and release the device. Blocks until the
    /// in-flight inbound transfer has wound down, so no callback can
    /// fire on a closed session.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.closing.store(true, Ordering::Release);
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                warn!("inbound pump thread panicked");
            }
        }
        info!("session closed");
    }
}

impl<D: RawDevice> Drop for UsbSession<D> {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::Release);
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
    }
}

fn pump_loop<D: RawDevice>(device: Arc<D>, closing: Arc<AtomicBool>, callback: EventCallback) {
    let mut buf = [0u8; BULK_IN_BUFFER];
    while !closing.load(Ordering::Acquire) {
        match device.bulk_read(&mut buf) {
            Ok(0) => {}
            Ok(n) => callback(&UsbEvent::Data(&buf[..n])),
            // No data this interval; re-arm.
            Err(TransportError::Timeout) => {}
            Err(TransportError::Disconnected) => {
                warn!("device removed, inbound loop ending");
                callback(&UsbEvent::Removed);
                break;
            }
            Err(e) => {
                debug!(error = %e, "inbound transfer error");
                callback(&UsbEvent::TransferError(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockDevice;
    use std::sync::mpsc;
    use std::time::Duration;

    fn null_callback() -> EventCallback {
        Arc::new(|_| {})
    }

    #[test]
    fn control_transfers_are_serialized() {
        let mock = MockDevice::new().with_transfer_delay(Duration::from_micros(200));
        let session =
            Arc::new(UsbSession::start(mock.clone(), null_callback()).expect("session start"));

        let mut workers = Vec::new();
        for _ in 0..10 {
            let session = Arc::clone(&session);
            workers.push(thread::spawn(move || {
                let mut buf = [0u8; 4];
                for _ in 0..100 {
                    session.control_in(0x61, 0, 0, &mut buf).expect("control");
                }
            }));
        }
        for worker in workers {
            worker.join().expect("worker thread");
        }

        assert_eq!(mock.control_transfer_count(), 1000);
        assert_eq!(
            mock.max_concurrent_controls(),
            1,
            "two control transfers were observed in flight simultaneously"
        );
    }

    #[test]
    fn control_and_bulk_out_lanes_are_independent() {
        let mock = MockDevice::new().with_transfer_delay(Duration::from_millis(20));
        let session =
            Arc::new(UsbSession::start(mock.clone(), null_callback()).expect("session start"));

        let control = {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                let mut buf = [0u8; 4];
                session.control_in(0x61, 0, 0, &mut buf).expect("control");
            })
        };
        // Give the control call a head start, then write while it is
        // still in flight.
        thread::sleep(Duration::from_millis(5));
        session.write(&[0xAA; 8]).expect("write");
        control.join().expect("control thread");

        assert!(
            mock.saw_write_during_control(),
            "bulk write waited for the control lane"
        );
    }

    #[test]
    fn inbound_data_reaches_the_callback() {
        let mock = MockDevice::new();
        mock.queue_bulk_in(&[1, 2, 3]);
        mock.queue_bulk_in(&[4, 5]);

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let callback: EventCallback = Arc::new(move |event| {
            if let UsbEvent::Data(bytes) = event {
                tx.send(bytes.to_vec()).unwrap();
            }
        });
        let session = UsbSession::start(mock, callback).expect("session start");

        let first = rx.recv_timeout(Duration::from_secs(1)).expect("first chunk");
        let second = rx.recv_timeout(Duration::from_secs(1)).expect("second chunk");
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(second, vec![4, 5]);
        session.close();
    }

    #[test]
    fn removal_emits_event_and_stops_loop() {
        let mock = MockDevice::new();
        let (tx, rx) = mpsc::channel::<&'static str>();
        let callback: EventCallback = Arc::new(move |event| match event {
            UsbEvent::Removed => tx.send("removed").unwrap(),
            UsbEvent::Data(_) => tx.send("data").unwrap(),
            _ => {}
        });
        let session = UsbSession::start(mock.clone(), callback).expect("session start");

        mock.disconnect();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).expect("event"),
            "removed"
        );
        // Loop has ended; close() must not hang.
        session.close();
    }

    #[test]
    fn close_joins_pump_before_returning() {
        let mock = MockDevice::new();
        let session = UsbSession::start(mock.clone(), null_callback()).expect("session start");
        session.close();
        // After close the mock sees no further reads.
        let reads = mock.bulk_read_count();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(mock.bulk_read_count(), reads);
    }

    #[test]
    fn transfer_errors_do_not_stop_the_loop() {
        let mock = MockDevice::new();
        mock.queue_bulk_in_error(TransportError::Stall);
        mock.queue_bulk_in(&[7, 8, 9]);

        let (tx, rx) = mpsc::channel::<String>();
        let callback: EventCallback = Arc::new(move |event| match event {
            UsbEvent::TransferError(e) => tx.send(format!("err:{e}")).unwrap(),
            UsbEvent::Data(bytes) => tx.send(format!("data:{}", bytes.len())).unwrap(),
            _ => {}
        });
        let _session = UsbSession::start(mock, callback).expect("session start");

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).expect("error event"),
            "err:endpoint stalled"
        );
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).expect("data event"),
            "data:3"
        );
    }

    #[test]
    fn session_config_roundtrips_through_toml() {
        let config = SessionConfig {
            address: Some(7),
            bus: Some("1".into()),
            loader: false,
            include_data_crc: true,
        };
        let dir = std::env::temp_dir().join("hfx-session-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("session.toml");
        config.save_to_file(&path).unwrap();
        let loaded = SessionConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.address, Some(7));
        assert_eq!(loaded.bus.as_deref(), Some("1"));
        assert!(loaded.include_data_crc);
        std::fs::remove_file(&path).ok();
    }
}
