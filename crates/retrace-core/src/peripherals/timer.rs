use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::{InterruptController, StopReason, StopSignal};

/// Raises a timer interrupt every `period` from its own thread.
///
/// The interrupt value is the number of ticks raised so far, truncated to
/// 32 bits. Dropping the timer stops and joins its thread.
#[derive(Debug)]
pub struct IntervalTimer {
    signal: Arc<StopSignal>,
    worker: Option<JoinHandle<u64>>,
}

impl IntervalTimer {
    /// Starts ticking into `interrupts`.
    ///
    /// # Errors
    ///
    /// Returns the spawn error if the thread cannot be created.
    pub fn spawn(interrupts: Arc<InterruptController>, period: Duration) -> io::Result<Self> {
        let signal = Arc::new(StopSignal::new());
        let stop = Arc::clone(&signal);
        let worker = thread::Builder::new()
            .name("retrace-timer".into())
            .spawn(move || {
                let mut ticks = 0_u64;
                while !stop.sleep(period) {
                    ticks += 1;
                    #[allow(clippy::cast_possible_truncation)]
                    interrupts.raise_timer(ticks as u32);
                }
                ticks
            })?;
        debug!(?period, "interval timer started");
        Ok(Self {
            signal,
            worker: Some(worker),
        })
    }

    /// Stops the timer and returns how many interrupts it raised.
    #[must_use]
    pub fn stop(mut self) -> u64 {
        self.halt()
    }

    fn halt(&mut self) -> u64 {
        self.signal.request(StopReason::Stop);
        self.worker
            .take()
            .and_then(|worker| worker.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for IntervalTimer {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.halt();
        }
    }
}
