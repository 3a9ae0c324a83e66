//! The fetch/dispatch/execute loop.
//!
//! Each iteration holds the machine lock for one complete step:
//! 1. Honour a pending stop or pause request
//! 2. Dispatch at most one interrupt or queued trap
//! 3. Enforce the step budget
//! 4. Fetch, advance PC, execute
//! 5. Log a placeholder for side-effect-free instructions
//! 6. Retire: counters, breakpoints, exit
//!
//! Waiting for an interrupt and speed throttling happen with the lock
//! released so supervisors and interrupt producers can make progress.

mod session;
mod signal;

pub use session::EngineSession;
pub use signal::StopSignal;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, trace, warn};

use crate::interrupt::{dispatch_interrupt, dispatch_trap, Claimed, InterruptGates};
use crate::state::csr::UIP_USIP;
use crate::{
    Exception, Execution, ExitReason, InterruptCause, MachineState, Provenance, RunOutcome,
    RunState, SimError, Simulation, StopReason,
};

/// What the loop does after a locked step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// An instruction retired.
    Retired,
    /// A trap or interrupt handler was entered, or a trap was queued.
    Dispatched,
    /// An instruction retired and asked to wait for an interrupt.
    Wait,
    /// The session has a stop reason.
    Done,
}

/// Runs programs loaded into a [`Simulation`].
#[derive(Debug, Clone)]
pub struct Engine {
    sim: Arc<Simulation>,
}

impl Engine {
    /// Creates an engine over `sim`.
    #[must_use]
    pub const fn new(sim: Arc<Simulation>) -> Self {
        Self { sim }
    }

    /// Simulation this engine drives.
    #[must_use]
    pub const fn simulation(&self) -> &Arc<Simulation> {
        &self.sim
    }

    /// Runs from `start_pc` until a stop condition. `max_steps == 0` means
    /// no budget. Breakpoints trigger when the PC after a retired
    /// instruction equals one of them.
    ///
    /// The stop signal is not cleared here, so a stop requested before the
    /// run begins ends it immediately.
    pub fn run(&self, start_pc: u32, max_steps: u64, breakpoints: &[u32]) -> RunOutcome {
        let mut session = EngineSession::new(start_pc, max_steps, breakpoints);
        let throttle = self.sim.config().speed.interval();
        self.sim.lock_machine().set_pc_backdoor(start_pc);
        self.sim.set_run_state(RunState::Running);
        info!(start_pc, max_steps, breakpoints = breakpoints.len(), "run started");

        loop {
            let flow = {
                let mut machine = self.sim.lock_machine();
                let flow = self.step(&mut machine, &mut session);
                session.pc = machine.pc();
                flow
            };
            match flow {
                Flow::Done => break,
                Flow::Dispatched => continue,
                Flow::Wait => self.wait_for_interrupt(),
                Flow::Retired => {}
            }
            if let Some(interval) = throttle {
                self.sim.signal().sleep(interval);
            }
        }

        let reason = session.reason().unwrap_or(StopReason::Stop);
        self.sim.set_run_state(if reason.is_done() {
            RunState::Terminated
        } else {
            RunState::Paused
        });
        let outcome = session.into_outcome();
        info!(
            reason = %outcome.reason,
            steps = outcome.steps,
            pc = outcome.pc,
            "run stopped"
        );
        outcome
    }

    fn step(&self, machine: &mut MachineState, session: &mut EngineSession) -> Flow {
        let signal = self.sim.signal();
        if signal.is_requested() {
            session.stop(signal.reason().unwrap_or(StopReason::Stop));
            return Flow::Done;
        }

        let pc = machine.pc();
        match self.service_interrupts(machine, pc) {
            Ok(true) => return Flow::Dispatched,
            Ok(false) => {}
            Err(error) => {
                warn!(%error, pc, "dispatch failed");
                session.fail(error);
                return Flow::Done;
            }
        }

        if session.budget_exhausted() {
            session.stop(StopReason::MaxSteps);
            return Flow::Done;
        }

        let statement = match machine.memory().statement(pc) {
            Ok(Some(statement)) => statement,
            Ok(None) => {
                session.stop(StopReason::CliffTermination);
                return Flow::Done;
            }
            Err(fault) => return self.queue_trap(session, Exception::from(fault), pc),
        };

        let undo = Arc::clone(machine.undo_log());
        machine.enter(pc, Provenance::Instruction(Arc::clone(&statement)));
        machine.set_pc_backdoor(pc.wrapping_add(statement.length()));
        let pushes = undo.pushes();
        let execution = statement.execute(machine);
        if undo.pushes() == pushes && !matches!(execution, Execution::Trap(_)) {
            undo.push_placeholder(pc, machine.provenance().clone(), machine.group());
        }
        machine.leave();

        match execution {
            Execution::Continue | Execution::Ebreak | Execution::Wait => {
                machine.tick_counters(now_ms());
                session.steps += 1;
                let next = machine.pc();
                trace!(pc, next, steps = session.steps, "retired");
                if execution == Execution::Ebreak || session.is_breakpoint(next) {
                    session.stop(StopReason::Breakpoint);
                    Flow::Done
                } else if execution == Execution::Wait && !software_posted(machine) {
                    // A USIP posted by the program is already pending.
                    Flow::Wait
                } else {
                    Flow::Retired
                }
            }
            Execution::Exit(ExitReason::Code(code)) => {
                session.exit(code);
                Flow::Done
            }
            Execution::Exit(ExitReason::Fault(exception)) => {
                session.fail(SimError::ExitFault(exception));
                Flow::Done
            }
            Execution::Trap(exception) => {
                machine.set_pc_backdoor(pc);
                self.queue_trap(session, exception, pc)
            }
        }
    }

    fn service_interrupts(&self, machine: &mut MachineState, pc: u32) -> Result<bool, SimError> {
        let gates = InterruptGates::from_csrs(machine.csrs());
        let Some(claimed) = self.sim.interrupts().select(gates) else {
            return Ok(false);
        };
        match claimed {
            Claimed::External(value) => {
                dispatch_interrupt(machine, InterruptCause::External, value, pc)?;
            }
            Claimed::Software => dispatch_interrupt(machine, InterruptCause::Software, 0, pc)?,
            Claimed::Timer(value) => dispatch_interrupt(machine, InterruptCause::Timer, value, pc)?,
            Claimed::Trap(trap) => dispatch_trap(machine, &trap)?,
        }
        Ok(true)
    }

    fn queue_trap(&self, session: &mut EngineSession, exception: Exception, pc: u32) -> Flow {
        if self
            .sim
            .interrupts()
            .register_synchronous_trap(exception.clone(), pc)
        {
            debug!(pc, %exception, "trap queued");
            return Flow::Dispatched;
        }
        warn!(pc, %exception, "unhandled trap");
        session.fail(SimError::UnhandledTrap { pc, exception });
        Flow::Done
    }

    fn wait_for_interrupt(&self) {
        let signal = self.sim.signal();
        self.sim.set_run_state(RunState::Waiting);
        debug!("waiting for interrupt");
        self.sim
            .interrupts()
            .wait_for_interrupt(|| signal.is_requested());
        self.sim.set_run_state(RunState::Running);
    }
}

fn software_posted(machine: &MachineState) -> bool {
    machine.csrs().uip() & UIP_USIP != 0
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}
