//! Capture service abstraction.

use crate::core::types::StreamKind;
use crate::error::Result;

/// Outcome of one successful transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// Bytes written into the output buffer
    pub size: usize,
    /// Capture timestamp in microseconds
    pub timestamp_usec: u64,
}

/// Platform capture service: hands out raw encoded media on request.
///
/// One instance serves one stream; video and audio each open their own
/// session so the two capture threads never contend on it.
pub trait CaptureService: Send {
    /// Start the stream. Called once before the first transfer.
    fn begin_stream(&mut self) -> Result<()> {
        Ok(())
    }

    /// Block until one unit of media is available and copy it into `buf`.
    ///
    /// `buf.len()` is the capacity offered to the service. A unit that does
    /// not fit is a transfer failure.
    fn transfer(&mut self, kind: StreamKind, buf: &mut [u8]) -> Result<Transfer>;
}

impl<T: CaptureService + ?Sized> CaptureService for Box<T> {
    fn begin_stream(&mut self) -> Result<()> {
        (**self).begin_stream()
    }

    fn transfer(&mut self, kind: StreamKind, buf: &mut [u8]) -> Result<Transfer> {
        (**self).transfer(kind, buf)
    }
}
