//! Capture lifecycle: the shared packet slots and their rendezvous channels.
//!
//! [`CaptureHub`] is created once at startup and shared by the capture
//! threads and the transports. It owns the only video and audio packets in
//! the process. Access to a slot is exclusive by turn:
//!
//! - the capture thread fills it between `wait_consumed` and `signal_produced`
//! - the transport reads it between `select_produced` and `signal_consumed`
//!
//! Each slot sits behind a mutex that is never contended while that
//! turn-taking holds. It only matters after [`CaptureHub::force_unlock_all`],
//! which wakes consumers while a producer may still be writing.

use crate::core::packet::{AudioPacket, VideoPacket};
use crate::core::rendezvous::Rendezvous;
use crate::core::signal::SignalHub;
use crate::core::types::StreamKind;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared capture state: both packet slots and both channels
pub struct CaptureHub {
    video: Rendezvous,
    audio: Rendezvous,
    video_slot: Mutex<Box<VideoPacket>>,
    audio_slot: Mutex<Box<AudioPacket>>,
    /// Raised on video client connect; cleared by the framing policy
    force_sps_pps: Arc<AtomicBool>,
}

impl CaptureHub {
    /// Allocate both packet slots and channels
    pub fn new() -> Arc<Self> {
        let signals = SignalHub::new();
        Arc::new(Self {
            video: Rendezvous::new(&signals, StreamKind::Video),
            audio: Rendezvous::new(&signals, StreamKind::Audio),
            video_slot: Mutex::new(VideoPacket::boxed(StreamKind::Video.magic())),
            audio_slot: Mutex::new(AudioPacket::boxed(StreamKind::Audio.magic())),
            force_sps_pps: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Rendezvous channel of `kind`
    pub fn channel(&self, kind: StreamKind) -> &Rendezvous {
        match kind {
            StreamKind::Video => &self.video,
            StreamKind::Audio => &self.audio,
        }
    }

    /// Video packet slot
    pub fn video_slot(&self) -> &Mutex<Box<VideoPacket>> {
        &self.video_slot
    }

    /// Audio packet slot
    pub fn audio_slot(&self) -> &Mutex<Box<AudioPacket>> {
        &self.audio_slot
    }

    /// Flag shared with the video framing policy
    pub fn force_sps_pps(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.force_sps_pps)
    }

    /// Run `f` over the header and valid payload of the `kind` slot
    pub fn with_wire_bytes<R>(&self, kind: StreamKind, f: impl FnOnce(&[u8]) -> R) -> R {
        match kind {
            StreamKind::Video => f(self.video_slot.lock().wire_bytes()),
            StreamKind::Audio => f(self.audio_slot.lock().wire_bytes()),
        }
    }

    /// A client attached to `kind`: drop stale handshake state and release
    /// the capture thread.
    pub fn on_client_connected(&self, kind: StreamKind) {
        log::info!("Client connected to {} stream", kind);
        if kind == StreamKind::Video {
            self.force_sps_pps.store(true, Ordering::Release);
        }

        let chan = self.channel(kind);
        chan.clear();
        chan.signal_consumed();
    }

    /// A client detached from `kind`.
    ///
    /// Nothing to undo: the capture thread parks on its next `wait_consumed`.
    pub fn on_client_disconnected(&self, kind: StreamKind) {
        log::info!("Client disconnected from {} stream", kind);
    }

    /// Wake every consumer blocked in `select_produced` so it can observe
    /// shutdown or a mode switch.
    pub fn force_unlock_all(&self) {
        log::debug!("Force-unlocking all consumers");
        self.video.clear();
        self.audio.clear();
        self.video.signal_produced();
        self.audio.signal_produced();
    }

    /// Discard packets produced for a previous client. Producer-side waits
    /// are left alone.
    pub fn clear_pending_data(&self) {
        self.video.clear_produced();
        self.audio.clear_produced();
    }
}
