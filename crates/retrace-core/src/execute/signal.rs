use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::StopReason;

/// Cross-thread request to end a run, with an interruptible sleep.
#[derive(Debug, Default)]
pub struct StopSignal {
    requested: AtomicBool,
    reason: Mutex<Option<StopReason>>,
    wake: Condvar,
}

impl StopSignal {
    /// Creates a cleared signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal. The first reason wins until [`Self::clear`].
    pub fn request(&self, reason: StopReason) {
        let mut slot = self.slot();
        if slot.is_none() {
            *slot = Some(reason);
        }
        self.requested.store(true, Ordering::Release);
        drop(slot);
        self.wake.notify_all();
    }

    /// Returns `true` once raised.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Reason passed to the first [`Self::request`].
    #[must_use]
    pub fn reason(&self) -> Option<StopReason> {
        *self.slot()
    }

    /// Lowers the signal before a new run.
    pub fn clear(&self) {
        let mut slot = self.slot();
        *slot = None;
        self.requested.store(false, Ordering::Release);
    }

    /// Sleeps for `duration` or until the signal is raised. Returns `true`
    /// when woken by the signal.
    pub fn sleep(&self, duration: Duration) -> bool {
        let slot = self.slot();
        let (_slot, timeout) = self
            .wake
            .wait_timeout_while(slot, duration, |_| !self.is_requested())
            .unwrap_or_else(PoisonError::into_inner);
        !timeout.timed_out()
    }

    fn slot(&self) -> MutexGuard<'_, Option<StopReason>> {
        self.reason.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
