//! Per-frame video framing policy.
//!
//! The capture service emits SPS/PPS parameter sets only once, when the game
//! starts. A client that attaches later cannot decode anything without them,
//! so they are re-inserted in front of IDR frames:
//!
//! - on the first frame after a client connects (`force_sps_pps`)
//! - on every 5th IDR frame since the last insertion
//!
//! Insertion needs `SPS.len() + PPS.len()` bytes of headroom. When the frame is
//! too large the insertion is skipped and retried on the next IDR; a missing
//! parameter set is a decoding glitch, never fatal.

use crate::core::packet::Packet;
use crate::core::types::StreamKind;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Sequence parameter set emitted by the capture service (Annex-B, with start code)
pub const SPS: [u8; 20] = [
    0x00, 0x00, 0x00, 0x01, 0x67, 0x64, 0x0C, 0x20, 0xAC, 0x2B, 0x40, 0x28, 0x02, 0xDD, 0x35,
    0x01, 0x0D, 0x01, 0xE0, 0x80,
];

/// Picture parameter set emitted by the capture service (Annex-B, with start code)
pub const PPS: [u8; 8] = [0x00, 0x00, 0x00, 0x01, 0x68, 0xEE, 0x3C, 0xB0];

/// Combined size of the inserted parameter sets
pub const PARAMETER_SETS_LEN: usize = SPS.len() + PPS.len();

/// Insert parameter sets every this many IDR frames
pub const IDR_EMIT_INTERVAL: u32 = 5;

/// Transfers of this size or less cannot hold a NAL header
pub const MIN_VIDEO_FRAME: usize = 4;

/// NAL unit type of an IDR slice
const NAL_TYPE_IDR: u8 = 5;

/// Whether the frame's first NAL unit (after a 4-byte start code) is an IDR slice
#[inline]
pub fn is_idr_frame(payload: &[u8]) -> bool {
    payload.len() > 4 && (payload[4] & 0x1F) == NAL_TYPE_IDR
}

/// SPS/PPS insertion state for the video stream
pub struct VideoFraming {
    idr_count: u32,
    force_sps_pps: Arc<AtomicBool>,
}

impl VideoFraming {
    /// Create the policy; `force_sps_pps` is raised by the lifecycle on connect
    pub fn new(force_sps_pps: Arc<AtomicBool>) -> Self {
        Self {
            idr_count: 0,
            force_sps_pps,
        }
    }

    /// IDR frames seen since the last insertion
    pub fn idr_count(&self) -> u32 {
        self.idr_count
    }

    /// Apply the policy to a freshly captured frame. Returns `true` if the
    /// parameter sets were inserted.
    pub fn apply<const N: usize>(&mut self, pkt: &mut Packet<N>) -> bool {
        let forced = self.force_sps_pps.load(Ordering::Acquire);
        let emit = forced || (is_idr_frame(pkt.payload()) && self.bump_idr());

        if !emit {
            return false;
        }

        if !pkt.prepend(&[&SPS, &PPS]) {
            log::debug!(
                "No room for SPS/PPS ({} of {} bytes used), retrying on next IDR",
                pkt.data_size(),
                pkt.capacity()
            );
            return false;
        }

        self.idr_count = 0;
        self.force_sps_pps.store(false, Ordering::Release);
        log::trace!("SPS/PPS inserted (forced: {})", forced);
        true
    }

    fn bump_idr(&mut self) -> bool {
        self.idr_count += 1;
        self.idr_count >= IDR_EMIT_INTERVAL
    }
}

/// What a capture thread does when the capture service fails a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Drop the frame and capture the next one
    Drop,
    /// Abort the process so the failure is noticed
    Abort,
}

impl FailurePolicy {
    /// Handle a failed transfer on `kind`
    pub fn on_transfer_failure(self, kind: StreamKind, err: &Error) {
        match self {
            FailurePolicy::Drop => {
                log::debug!("{} transfer failed, dropping frame: {}", kind, err);
            }
            FailurePolicy::Abort => {
                log::error!("{} transfer failed: {}", kind, err);
                std::process::abort();
            }
        }
    }
}

impl Default for FailurePolicy {
    /// Abort in debug builds, drop in release builds
    fn default() -> Self {
        if cfg!(debug_assertions) {
            FailurePolicy::Abort
        } else {
            FailurePolicy::Drop
        }
    }
}
