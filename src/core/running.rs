//! Process-wide cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Running flag shared by every blocking loop.
///
/// Starts in the running state and can only be stopped; there is no way to
/// restart a stopped flag. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct RunFlag {
    running: Arc<AtomicBool>,
}

impl RunFlag {
    /// Create a flag in the running state
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether loops should keep going
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Request shutdown. Idempotent.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            log::info!("Shutdown requested");
        }
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_one_way_and_shared() {
        let flag = RunFlag::new();
        let clone = flag.clone();
        assert!(clone.is_running());

        flag.stop();
        flag.stop();
        assert!(!flag.is_running());
        assert!(!clone.is_running());
    }
}
