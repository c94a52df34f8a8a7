//! Mock capture service for testing

use super::service::{CaptureService, Transfer};
use crate::core::types::StreamKind;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

enum Scripted {
    Data { bytes: Vec<u8>, timestamp_usec: u64 },
    Failure,
}

/// Scripted capture service.
///
/// Transfers are served in injection order regardless of stream kind. An
/// exhausted script fails every transfer.
#[derive(Clone)]
pub struct MockCapture {
    inner: Arc<Mutex<MockCaptureInner>>,
}

struct MockCaptureInner {
    script: VecDeque<Scripted>,
    transfers: usize,
    started: bool,
}

impl MockCapture {
    /// Create a mock with an empty script
    pub fn new() -> Self {
        MockCapture {
            inner: Arc::new(Mutex::new(MockCaptureInner {
                script: VecDeque::new(),
                transfers: 0,
                started: false,
            })),
        }
    }

    /// Queue a successful transfer of `bytes`
    pub fn push_data(&self, bytes: &[u8], timestamp_usec: u64) {
        self.inner.lock().script.push_back(Scripted::Data {
            bytes: bytes.to_vec(),
            timestamp_usec,
        });
    }

    /// Queue a failed transfer
    pub fn push_failure(&self) {
        self.inner.lock().script.push_back(Scripted::Failure);
    }

    /// Number of transfers attempted so far
    pub fn transfer_count(&self) -> usize {
        self.inner.lock().transfers
    }

    /// Scripted transfers not yet served
    pub fn pending(&self) -> usize {
        self.inner.lock().script.len()
    }

    /// Whether `begin_stream` has been called
    pub fn started(&self) -> bool {
        self.inner.lock().started
    }
}

impl Default for MockCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureService for MockCapture {
    fn begin_stream(&mut self) -> Result<()> {
        self.inner.lock().started = true;
        Ok(())
    }

    fn transfer(&mut self, kind: StreamKind, buf: &mut [u8]) -> Result<Transfer> {
        let mut inner = self.inner.lock();
        inner.transfers += 1;

        match inner.script.pop_front() {
            Some(Scripted::Data {
                bytes,
                timestamp_usec,
            }) => {
                if bytes.len() > buf.len() {
                    return Err(Error::Capture(format!(
                        "{} unit of {} bytes does not fit {} byte buffer",
                        kind,
                        bytes.len(),
                        buf.len()
                    )));
                }
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(Transfer {
                    size: bytes.len(),
                    timestamp_usec,
                })
            }
            Some(Scripted::Failure) => Err(Error::Capture(format!("scripted {} failure", kind))),
            None => Err(Error::Capture(format!("{} script exhausted", kind))),
        }
    }
}
