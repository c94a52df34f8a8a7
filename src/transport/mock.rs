//! Mock USB driver for testing

use super::usb::{DeviceIdentity, UsbSerialDriver};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Longest a read on an empty mock blocks
const EMPTY_READ_WAIT: Duration = Duration::from_millis(5);

/// Mock vendor interface for unit testing.
///
/// Clones share state, so a test keeps one handle while the channel owns
/// another.
#[derive(Clone)]
pub struct MockUsbDriver {
    inner: Arc<Mutex<MockUsbDriverInner>>,
}

struct MockUsbDriverInner {
    read_chunks: VecDeque<Vec<u8>>,
    write_buffer: Vec<u8>,
    writes: usize,
    write_limit: Option<usize>,
    fail_writes: bool,
    identity: Option<DeviceIdentity>,
    exited: bool,
}

impl MockUsbDriver {
    /// Create a new mock driver
    pub fn new() -> Self {
        MockUsbDriver {
            inner: Arc::new(Mutex::new(MockUsbDriverInner {
                read_chunks: VecDeque::new(),
                write_buffer: Vec::new(),
                writes: 0,
                write_limit: None,
                fail_writes: false,
                identity: None,
                exited: false,
            })),
        }
    }

    /// Inject data to be read. Each call is delivered by a separate read.
    pub fn inject_read(&self, data: &[u8]) {
        self.inner.lock().read_chunks.push_back(data.to_vec());
    }

    /// Get all written data
    pub fn get_written(&self) -> Vec<u8> {
        self.inner.lock().write_buffer.clone()
    }

    /// Number of write calls
    pub fn write_count(&self) -> usize {
        self.inner.lock().writes
    }

    /// Cap the bytes accepted per write
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.inner.lock().write_limit = limit;
    }

    /// Make every following write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    /// Identity passed to `initialize`
    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.inner.lock().identity.clone()
    }

    /// Whether `exit` was called
    pub fn exited(&self) -> bool {
        self.inner.lock().exited
    }
}

impl Default for MockUsbDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbSerialDriver for MockUsbDriver {
    fn initialize(&mut self, identity: &DeviceIdentity) -> Result<()> {
        self.inner.lock().identity = Some(identity.clone());
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let chunk = self.inner.lock().read_chunks.pop_front();
        let Some(mut chunk) = chunk else {
            thread::sleep(timeout.min(EMPTY_READ_WAIT));
            return Ok(0);
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            chunk.drain(..n);
            self.inner.lock().read_chunks.push_front(chunk);
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8], _timeout: Duration) -> Result<usize> {
        let mut inner = self.inner.lock();
        inner.writes += 1;
        if inner.fail_writes {
            return Err(Error::Disconnected);
        }

        let n = inner.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        inner.write_buffer.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn exit(&mut self) {
        self.inner.lock().exited = true;
    }
}
