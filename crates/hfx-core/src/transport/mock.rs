//! Mock device for testing lane and pump behavior without hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::traits::{RawDevice, TransportError};

/// Shared-state mock implementing [`RawDevice`].
///
/// Cloning shares the underlying state, so a test can keep a handle for
/// assertions after moving a clone into a session.
#[derive(Clone)]
pub struct MockDevice {
    inner: Arc<Inner>,
}

struct Inner {
    control_responses: Mutex<VecDeque<Vec<u8>>>,
    bulk_in_queue: Mutex<VecDeque<Result<Vec<u8>, TransportError>>>,
    writes: Mutex<Vec<Vec<u8>>>,
    control_log: Mutex<Vec<(u8, u16, u16)>>,
    connected: AtomicBool,
    transfer_delay: Mutex<Duration>,
    controls_in_flight: AtomicUsize,
    max_concurrent_controls: AtomicUsize,
    write_during_control: AtomicBool,
    bulk_reads: AtomicUsize,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                control_responses: Mutex::new(VecDeque::new()),
                bulk_in_queue: Mutex::new(VecDeque::new()),
                writes: Mutex::new(Vec::new()),
                control_log: Mutex::new(Vec::new()),
                connected: AtomicBool::new(true),
                transfer_delay: Mutex::new(Duration::ZERO),
                controls_in_flight: AtomicUsize::new(0),
                max_concurrent_controls: AtomicUsize::new(0),
                write_during_control: AtomicBool::new(false),
                bulk_reads: AtomicUsize::new(0),
            }),
        }
    }

    /// Hold each control transfer open for `delay`, widening the race
    /// window the serialization tests rely on.
    pub fn with_transfer_delay(self, delay: Duration) -> Self {
        *self.inner.transfer_delay.lock().unwrap() = delay;
        self
    }

    /// Queue a response for the next control read.
    pub fn queue_control_response(&self, bytes: &[u8]) {
        self.inner
            .control_responses
            .lock()
            .unwrap()
            .push_back(bytes.to_vec());
    }

    /// Queue one inbound bulk transfer's worth of data.
    pub fn queue_bulk_in(&self, bytes: &[u8]) {
        self.inner
            .bulk_in_queue
            .lock()
            .unwrap()
            .push_back(Ok(bytes.to_vec()));
    }

    /// Queue an inbound transfer error.
    pub fn queue_bulk_in_error(&self, error: TransportError) {
        self.inner.bulk_in_queue.lock().unwrap().push_back(Err(error));
    }

    /// Simulate the device going away.
    pub fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::Release);
    }

    /// All captured bulk writes, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.inner.writes.lock().unwrap().clone()
    }

    /// All control transfers issued, as (request, value, index).
    pub fn control_transfer_count(&self) -> usize {
        self.inner.control_log.lock().unwrap().len()
    }

    /// Highest number of control transfers ever in flight at once.
    pub fn max_concurrent_controls(&self) -> usize {
        self.inner.max_concurrent_controls.load(Ordering::Acquire)
    }

    /// Whether a bulk write entered while a control transfer was open.
    pub fn saw_write_during_control(&self) -> bool {
        self.inner.write_during_control.load(Ordering::Acquire)
    }

    /// Number of inbound transfers the pump has attempted.
    pub fn bulk_read_count(&self) -> usize {
        self.inner.bulk_reads.load(Ordering::Acquire)
    }

    fn begin_control(&self, request: u8, value: u16, index: u16) -> Result<(), TransportError> {
        if !self.inner.connected.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected);
        }
        let now = self.inner.controls_in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner
            .max_concurrent_controls
            .fetch_max(now, Ordering::AcqRel);
        self.inner.control_log.lock().unwrap().push((request, value, index));
        let delay = *self.inner.transfer_delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        Ok(())
    }

    fn end_control(&self) {
        self.inner.controls_in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RawDevice for MockDevice {
    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize, TransportError> {
        self.begin_control(request, value, index)?;
        let response = self.inner.control_responses.lock().unwrap().pop_front();
        let n = match response {
            Some(bytes) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                n
            }
            None => {
                buf.fill(0);
                buf.len()
            }
        };
        self.end_control();
        Ok(n)
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<usize, TransportError> {
        self.begin_control(request, value, index)?;
        self.end_control();
        Ok(data.len())
    }

    fn bulk_write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.inner.connected.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected);
        }
        if self.inner.controls_in_flight.load(Ordering::Acquire) > 0 {
            self.inner.write_during_control.store(true, Ordering::Release);
        }
        self.inner.writes.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn bulk_read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.inner.bulk_reads.fetch_add(1, Ordering::AcqRel);
        if !self.inner.connected.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected);
        }
        match self.inner.bulk_in_queue.lock().unwrap().pop_front() {
            Some(Ok(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(Err(error)) => Err(error),
            None => {
                // Pace the pump the way a real 100 ms bulk-in timeout
                // would, without slowing the tests down much.
                thread::sleep(Duration::from_millis(1));
                Err(TransportError::Timeout)
            }
        }
    }
}
