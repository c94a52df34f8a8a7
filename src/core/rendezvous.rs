//! Single-slot handoff between a capture thread and a transport.
//!
//! Each stream owns one [`Rendezvous`]: a `Produced` signal written by the
//! capture thread and a `Consumed` signal written by the transport. Because
//! there is at most one unit of media in flight per stream, this is all the
//! buffering needed. The capture thread can never overwrite data the transport
//! has not finished reading, and capture naturally slows to the transport's
//! drain rate.
//!
//! ```text
//!   capture thread                       transport send loop
//!   ──────────────                       ───────────────────
//!   wait_consumed() ◀──── Consumed ───── signal_consumed()
//!   fill packet
//!   signal_produced() ──── Produced ───▶ select_produced()
//!                                        write packet
//! ```

use crate::core::signal::{Signal, SignalHub};
use crate::core::types::StreamKind;
use std::sync::Arc;
use std::time::Duration;

/// Produced/Consumed signal pair for one stream
pub struct Rendezvous {
    kind: StreamKind,
    produced: Signal,
    consumed: Signal,
}

impl Rendezvous {
    /// Create a channel with both signals non-signaled
    pub fn new(hub: &Arc<SignalHub>, kind: StreamKind) -> Self {
        Self {
            kind,
            produced: hub.signal(),
            consumed: hub.signal(),
        }
    }

    /// Stream this channel carries
    #[inline]
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Consumer side: block until the capture thread produced a packet.
    ///
    /// Unbounded; pair with the running flag and
    /// [`CaptureHub::force_unlock_all`](crate::lifecycle::CaptureHub::force_unlock_all).
    pub fn wait_produced(&self) {
        self.produced.wait();
    }

    /// Producer side: block until the transport released the slot.
    ///
    /// No timeout; only a new client connection releases it.
    pub fn wait_consumed(&self) {
        self.consumed.wait();
    }

    /// Producer side: hand the filled slot to the transport
    pub fn signal_produced(&self) {
        log::trace!("{}: produced", self.kind);
        self.produced.set();
    }

    /// Consumer side: hand the slot back to the capture thread
    pub fn signal_consumed(&self) {
        log::trace!("{}: consumed", self.kind);
        self.consumed.set();
    }

    /// Reset both signals
    pub fn clear(&self) {
        self.produced.clear();
        self.consumed.clear();
    }

    /// Reset only `Produced`
    pub fn clear_produced(&self) {
        self.produced.clear();
    }

    /// Whether a produced packet is pending
    pub fn is_produced(&self) -> bool {
        self.produced.is_set()
    }

    /// Whether a consume is pending for the producer
    pub fn is_consumed(&self) -> bool {
        self.consumed.is_set()
    }
}

/// Block until `first` or `second` has produced and return the one that fired.
///
/// With `second == None` this is [`Rendezvous::wait_produced`] on `first`.
/// If both are pending at the time of the call `first` is returned and
/// `second` stays pending for the next call.
pub fn select_produced<'a>(
    first: &'a Rendezvous,
    second: Option<&'a Rendezvous>,
) -> &'a Rendezvous {
    match second {
        None => {
            first.wait_produced();
            first
        }
        Some(second) => {
            let hub = first.produced.hub();
            match hub.wait_any(&[&first.produced, &second.produced]) {
                0 => first,
                _ => second,
            }
        }
    }
}

/// [`select_produced`] bounded by `timeout`
pub fn select_produced_timeout<'a>(
    first: &'a Rendezvous,
    second: Option<&'a Rendezvous>,
    timeout: Duration,
) -> Option<&'a Rendezvous> {
    let hub = first.produced.hub();
    match second {
        None => hub
            .wait_any_timeout(&[&first.produced], timeout)
            .map(|_| first),
        Some(second) => hub
            .wait_any_timeout(&[&first.produced, &second.produced], timeout)
            .map(|index| if index == 0 { first } else { second }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn pair() -> (Rendezvous, Rendezvous) {
        let hub = SignalHub::new();
        (
            Rendezvous::new(&hub, StreamKind::Video),
            Rendezvous::new(&hub, StreamKind::Audio),
        )
    }

    #[test]
    fn test_starts_unsignaled() {
        let (video, _) = pair();
        assert!(!video.is_produced());
        assert!(!video.is_consumed());
    }

    #[test]
    fn test_edges_delivered_at_most_once() {
        let (video, _) = pair();

        video.signal_produced();
        video.signal_produced();
        video.wait_produced();
        assert!(!video.is_produced());

        video.signal_consumed();
        video.wait_consumed();
        assert!(!video.is_consumed());
        assert!(select_produced_timeout(&video, None, Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_select_returns_the_pending_channel() {
        let (video, audio) = pair();

        audio.signal_produced();
        let fired = select_produced(&video, Some(&audio));
        assert_eq!(fired.kind(), StreamKind::Audio);

        video.signal_produced();
        let fired = select_produced(&video, Some(&audio));
        assert_eq!(fired.kind(), StreamKind::Video);
    }

    #[test]
    fn test_select_prefers_first_on_tie() {
        let (video, audio) = pair();

        audio.signal_produced();
        video.signal_produced();
        assert_eq!(select_produced(&video, Some(&audio)).kind(), StreamKind::Video);
        assert_eq!(select_produced(&video, Some(&audio)).kind(), StreamKind::Audio);
    }

    #[test]
    fn test_select_single_channel_ignores_other() {
        let (video, audio) = pair();

        audio.signal_produced();
        assert!(select_produced_timeout(&video, None, Duration::from_millis(10)).is_none());
        assert!(audio.is_produced());
    }

    #[test]
    fn test_strict_alternation_across_threads() {
        let hub = SignalHub::new();
        let chan = Arc::new(Rendezvous::new(&hub, StreamKind::Video));
        let producer_chan = Arc::clone(&chan);

        let producer = thread::spawn(move || {
            for _ in 0..100 {
                producer_chan.wait_consumed();
                producer_chan.signal_produced();
            }
        });

        let mut received = 0;
        chan.signal_consumed();
        while received < 100 {
            chan.wait_produced();
            received += 1;
            if received < 100 {
                chan.signal_consumed();
            }
        }

        producer.join().unwrap();
        assert!(!chan.is_produced());
    }

    #[test]
    fn test_clear_resets_both() {
        let (video, _) = pair();
        video.signal_produced();
        video.signal_consumed();
        video.clear();
        assert!(!video.is_produced());
        assert!(!video.is_consumed());
    }
}
