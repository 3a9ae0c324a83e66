//! Host-facing contracts: configuration, run results, lifecycle events and
//! state-access notifications.

use std::fmt;
use std::sync::mpsc::Sender;

use crate::{AccessWidth, FReg, Reg, RunSpeed, SimError, DEFAULT_BACKSTEP_CAPACITY};

/// Engine configuration fixed for the lifetime of a [`crate::Simulation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    /// Number of undo entries retained.
    pub backstep_capacity: usize,
    /// Records undo entries while running.
    pub backstep_enabled: bool,
    /// Instruction throttle.
    pub speed: RunSpeed,
    /// Lets ordinary stores modify the text segment.
    pub allow_text_writes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backstep_capacity: DEFAULT_BACKSTEP_CAPACITY,
            backstep_enabled: true,
            speed: RunSpeed::Unlimited,
            allow_text_writes: false,
        }
    }
}

/// Why a run returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum StopReason {
    /// PC reached a breakpoint, or the program executed `ebreak`.
    Breakpoint,
    /// Fatal error; see [`RunOutcome::error`].
    Exception,
    /// Step budget exhausted.
    MaxSteps,
    /// Program exited.
    NormalTermination,
    /// PC ran past the last statement.
    CliffTermination,
    /// Supervisor paused the run.
    Pause,
    /// Supervisor stopped the run.
    Stop,
}

impl StopReason {
    /// Returns `true` when the program cannot be resumed.
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(
            self,
            Self::NormalTermination | Self::CliffTermination | Self::Exception | Self::Stop
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Breakpoint => "breakpoint",
            Self::Exception => "exception",
            Self::MaxSteps => "max steps",
            Self::NormalTermination => "normal termination",
            Self::CliffTermination => "cliff termination",
            Self::Pause => "pause",
            Self::Stop => "stop",
        })
    }
}

/// Result of one engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RunOutcome {
    /// Why the run returned.
    pub reason: StopReason,
    /// Instructions retired during the run.
    pub steps: u64,
    /// PC when the run returned.
    pub pc: u32,
    /// Fatal error for [`StopReason::Exception`].
    pub error: Option<SimError>,
    /// Program exit code for [`StopReason::NormalTermination`] via exit.
    pub exit_code: Option<i32>,
}

/// Lifecycle event phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum LifecyclePhase {
    /// Run is starting.
    Start,
    /// Run has returned.
    Stop,
}

/// Notification published when a run starts or stops.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LifecycleEvent {
    /// Start or stop.
    pub phase: LifecyclePhase,
    /// Steps retired so far in this run.
    pub steps: u64,
    /// Configured speed.
    pub speed: RunSpeed,
    /// PC at publication time.
    pub pc: u32,
    /// Stop reason, for [`LifecyclePhase::Stop`].
    pub reason: Option<StopReason>,
    /// Fatal error, when the run stopped on one.
    pub error: Option<SimError>,
    /// `true` when the program cannot be resumed.
    pub done: bool,
}

impl LifecycleEvent {
    /// Builds the event published before a run.
    #[must_use]
    pub const fn started(speed: RunSpeed, pc: u32) -> Self {
        Self {
            phase: LifecyclePhase::Start,
            steps: 0,
            speed,
            pc,
            reason: None,
            error: None,
            done: false,
        }
    }

    /// Builds the event published after a run.
    #[must_use]
    pub fn stopped(speed: RunSpeed, outcome: &RunOutcome) -> Self {
        Self {
            phase: LifecyclePhase::Stop,
            steps: outcome.steps,
            speed,
            pc: outcome.pc,
            reason: Some(outcome.reason),
            error: outcome.error.clone(),
            done: outcome.reason.is_done(),
        }
    }
}

/// Receiver of run lifecycle events. Called from the execution thread.
pub trait LifecycleObserver: Send + Sync {
    /// Handles one event.
    fn on_lifecycle(&self, event: &LifecycleEvent);
}

impl LifecycleObserver for Sender<LifecycleEvent> {
    fn on_lifecycle(&self, event: &LifecycleEvent) {
        // Disconnected receivers are not an error.
        let _ = self.send(event.clone());
    }
}

/// Read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessOp {
    /// Value was read.
    Read,
    /// Value was written.
    Write,
}

/// Storage location touched by an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessTarget {
    /// Integer register.
    Register(Reg),
    /// Float register.
    FloatRegister(FReg),
    /// CSR by address.
    Csr(u16),
    /// Memory range.
    Memory {
        /// Start address.
        addr: u32,
        /// Access width.
        width: AccessWidth,
    },
}

/// Observed non-backdoor access to machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AccessEvent {
    /// Read or write.
    pub op: AccessOp,
    /// Location.
    pub target: AccessTarget,
    /// Value read, or value written.
    pub value: u64,
}

/// Receiver of [`AccessEvent`]s. Called with the machine lock held, so
/// implementations must not lock the simulation.
pub trait StateObserver: Send + Sync {
    /// Handles one access.
    fn on_access(&self, event: &AccessEvent);
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::{
        EngineConfig, LifecycleEvent, LifecycleObserver, LifecyclePhase, RunOutcome, StopReason,
    };
    use crate::{RunSpeed, DEFAULT_BACKSTEP_CAPACITY};

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.backstep_capacity, DEFAULT_BACKSTEP_CAPACITY);
        assert!(config.backstep_enabled);
        assert_eq!(config.speed, RunSpeed::Unlimited);
        assert!(!config.allow_text_writes);
    }

    #[test]
    fn done_covers_only_terminal_reasons() {
        let done: Vec<_> = [
            StopReason::Breakpoint,
            StopReason::Exception,
            StopReason::MaxSteps,
            StopReason::NormalTermination,
            StopReason::CliffTermination,
            StopReason::Pause,
            StopReason::Stop,
        ]
        .into_iter()
        .filter(|reason| reason.is_done())
        .collect();
        assert_eq!(
            done,
            [
                StopReason::Exception,
                StopReason::NormalTermination,
                StopReason::CliffTermination,
                StopReason::Stop
            ]
        );
    }

    #[test]
    fn sender_forwards_events_and_ignores_disconnect() {
        let (tx, rx) = mpsc::channel();
        let outcome = RunOutcome {
            reason: StopReason::MaxSteps,
            steps: 3,
            pc: 0x0040_000C,
            error: None,
            exit_code: None,
        };
        tx.on_lifecycle(&LifecycleEvent::started(RunSpeed::Unlimited, 0x0040_0000));
        tx.on_lifecycle(&LifecycleEvent::stopped(RunSpeed::Unlimited, &outcome));

        let start = rx.recv().expect("start event");
        assert_eq!(start.phase, LifecyclePhase::Start);
        let stop = rx.recv().expect("stop event");
        assert_eq!(stop.reason, Some(StopReason::MaxSteps));
        assert_eq!(stop.steps, 3);
        assert!(!stop.done);

        drop(rx);
        tx.on_lifecycle(&LifecycleEvent::started(RunSpeed::Unlimited, 0));
    }
}
