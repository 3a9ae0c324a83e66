use crate::{RunOutcome, SimError, StopReason};

/// Mutable bookkeeping for one engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSession {
    /// PC to fetch next.
    pub pc: u32,
    /// Instructions retired so far.
    pub steps: u64,
    /// Step budget; zero means unlimited.
    pub max_steps: u64,
    breakpoints: Vec<u32>,
    reason: Option<StopReason>,
    error: Option<SimError>,
    exit_code: Option<i32>,
}

impl EngineSession {
    /// Starts a session at `pc`.
    #[must_use]
    pub fn new(pc: u32, max_steps: u64, breakpoints: &[u32]) -> Self {
        let mut breakpoints = breakpoints.to_vec();
        breakpoints.sort_unstable();
        breakpoints.dedup();
        Self {
            pc,
            steps: 0,
            max_steps,
            breakpoints,
            reason: None,
            error: None,
            exit_code: None,
        }
    }

    /// Returns `true` when `addr` is a breakpoint.
    #[must_use]
    pub fn is_breakpoint(&self, addr: u32) -> bool {
        self.breakpoints.binary_search(&addr).is_ok()
    }

    /// Returns `true` when the step budget is used up.
    #[must_use]
    pub const fn budget_exhausted(&self) -> bool {
        self.max_steps > 0 && self.steps >= self.max_steps
    }

    /// Ends the session for `reason`.
    pub const fn stop(&mut self, reason: StopReason) {
        self.reason = Some(reason);
    }

    /// Ends the session on a fatal error.
    pub fn fail(&mut self, error: SimError) {
        self.reason = Some(StopReason::Exception);
        self.error = Some(error);
    }

    /// Ends the session on a program exit.
    pub const fn exit(&mut self, code: i32) {
        self.reason = Some(StopReason::NormalTermination);
        self.exit_code = Some(code);
    }

    /// Reason the session ended, once it has.
    #[must_use]
    pub const fn reason(&self) -> Option<StopReason> {
        self.reason
    }

    /// Converts the finished session into its outcome.
    #[must_use]
    pub fn into_outcome(self) -> RunOutcome {
        RunOutcome {
            reason: self.reason.unwrap_or(StopReason::Stop),
            steps: self.steps,
            pc: self.pc,
            error: self.error,
            exit_code: self.exit_code,
        }
    }
}
