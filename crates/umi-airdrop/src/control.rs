//! Caller-side guard that keeps one claim in flight at a time.
//!
//! The coordinator does not serialize claims itself; front ends hold a [`ClaimControl`] the way a
//! UI disables its claim button while a run is active.
#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ClaimControl {
    busy: Arc<AtomicBool>,
}

impl ClaimControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the control, or returns `None` if a claim is already running.
    pub fn try_begin(&self) -> Option<ClaimInFlight> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ClaimInFlight {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_enabled(&self) -> bool {
        !self.busy.load(Ordering::Acquire)
    }
}

/// Held for the duration of one claim; re-enables the control on drop.
#[derive(Debug)]
pub struct ClaimInFlight {
    busy: Arc<AtomicBool>,
}

impl Drop for ClaimInFlight {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
