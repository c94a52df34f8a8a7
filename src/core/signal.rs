//! Binary signals with a multi-wait.
//!
//! A [`Signal`] is a single bit: set, clear, or waited on. Setting an already
//! set signal is a no-op, so repeated signals never accumulate the way a
//! counting semaphore would. A successful wait consumes the set bit it
//! returns on; nothing else clears a signal except an explicit [`Signal::clear`].
//!
//! Signals are allocated from a [`SignalHub`]. All signals of one hub share a
//! mutex and condition variable, which is what makes [`SignalHub::wait_any`]
//! possible without polling.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Maximum signals per hub (one bit each)
const MAX_SIGNALS: u32 = u64::BITS;

/// Shared state for a group of signals
pub struct SignalHub {
    bits: Mutex<u64>,
    changed: Condvar,
    allocated: AtomicU32,
}

/// One binary signal belonging to a [`SignalHub`]
#[derive(Clone)]
pub struct Signal {
    hub: Arc<SignalHub>,
    mask: u64,
}

impl SignalHub {
    /// Create an empty hub
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            bits: Mutex::new(0),
            changed: Condvar::new(),
            allocated: AtomicU32::new(0),
        })
    }

    /// Allocate a new signal in the non-signaled state
    ///
    /// # Panics
    /// Panics if the hub already holds 64 signals.
    pub fn signal(self: &Arc<Self>) -> Signal {
        let bit = self.allocated.fetch_add(1, Ordering::Relaxed);
        assert!(bit < MAX_SIGNALS, "signal hub exhausted");
        Signal {
            hub: Arc::clone(self),
            mask: 1 << bit,
        }
    }

    /// Block until any of `signals` is set, consume it and return its index.
    ///
    /// When several are set at once the lowest index wins.
    pub fn wait_any(&self, signals: &[&Signal]) -> usize {
        let mut bits = self.bits.lock();
        loop {
            if let Some(index) = self.take_first(&mut bits, signals) {
                return index;
            }
            self.changed.wait(&mut bits);
        }
    }

    /// Like [`wait_any`](Self::wait_any) but gives up after `timeout`.
    pub fn wait_any_timeout(&self, signals: &[&Signal], timeout: Duration) -> Option<usize> {
        let deadline = Instant::now() + timeout;
        let mut bits = self.bits.lock();
        loop {
            if let Some(index) = self.take_first(&mut bits, signals) {
                return Some(index);
            }
            if self.changed.wait_until(&mut bits, deadline).timed_out() {
                return self.take_first(&mut bits, signals);
            }
        }
    }

    fn take_first(&self, bits: &mut u64, signals: &[&Signal]) -> Option<usize> {
        for (index, signal) in signals.iter().enumerate() {
            assert!(
                std::ptr::eq(Arc::as_ptr(&signal.hub), self),
                "signal waited on a foreign hub"
            );
            if *bits & signal.mask != 0 {
                *bits &= !signal.mask;
                return Some(index);
            }
        }
        None
    }
}

impl Signal {
    /// Set the signal and wake every waiter of the hub
    pub fn set(&self) {
        let mut bits = self.hub.bits.lock();
        *bits |= self.mask;
        self.hub.changed.notify_all();
    }

    /// Reset to non-signaled; other signals are unaffected
    pub fn clear(&self) {
        let mut bits = self.hub.bits.lock();
        *bits &= !self.mask;
    }

    /// Whether the signal is currently set
    pub fn is_set(&self) -> bool {
        *self.hub.bits.lock() & self.mask != 0
    }

    /// Block until set, then consume
    pub fn wait(&self) {
        self.hub.wait_any(&[self]);
    }

    /// Block until set or `timeout` elapses. Returns `true` if consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.hub.wait_any_timeout(&[self], timeout).is_some()
    }

    /// Hub this signal belongs to
    pub fn hub(&self) -> &Arc<SignalHub> {
        &self.hub
    }
}
