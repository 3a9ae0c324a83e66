use std::sync::atomic::{AtomicU8, Ordering};

/// Execution-thread state as seen by a supervising thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RunState {
    /// No run has started, or the last one was joined.
    #[default]
    Idle,
    /// Stepping instructions.
    Running,
    /// Parked in wait-for-interrupt.
    Waiting,
    /// Last run stopped on pause, breakpoint or step budget and may resume.
    Paused,
    /// Last run ended and the program cannot continue without a reset.
    Terminated,
}

impl RunState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Waiting => 2,
            Self::Paused => 3,
            Self::Terminated => 4,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Running,
            2 => Self::Waiting,
            3 => Self::Paused,
            4 => Self::Terminated,
            _ => Self::Idle,
        }
    }
}

/// Lock-free cell holding a [`RunState`].
#[derive(Debug, Default)]
pub struct RunStateCell(AtomicU8);

impl RunStateCell {
    /// Reads the current state.
    #[must_use]
    pub fn get(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Replaces the current state.
    pub fn set(&self, state: RunState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}
