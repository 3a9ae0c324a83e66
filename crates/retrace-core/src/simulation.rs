//! Shared simulation context.
//!
//! A [`Simulation`] bundles everything one program run needs: the locked
//! machine state, the interrupt controller, the undo log and the stop
//! signal. It is shared between the execution thread and supervisors as an
//! `Arc<Simulation>`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::{
    AddressFault, EngineConfig, InterruptController, MachineState, Memory, RunState, RunStateCell,
    Statement, StopReason, StopSignal, UndoError, UndoLog,
};

/// Machine, interrupt, undo and control state for one hart.
#[derive(Debug)]
pub struct Simulation {
    machine: Mutex<MachineState>,
    interrupts: Arc<InterruptController>,
    undo: Arc<UndoLog>,
    signal: StopSignal,
    config: EngineConfig,
    run_state: RunStateCell,
    entry: Mutex<u32>,
}

impl Simulation {
    /// Creates an empty simulation.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let undo = Arc::new(UndoLog::new(
            config.backstep_capacity,
            config.backstep_enabled,
        ));
        let memory = Memory::new(config.allow_text_writes);
        Self {
            machine: Mutex::new(MachineState::new(memory, Arc::clone(&undo))),
            interrupts: Arc::new(InterruptController::new()),
            undo,
            signal: StopSignal::new(),
            config,
            run_state: RunStateCell::default(),
            entry: Mutex::new(crate::TEXT_START),
        }
    }

    /// Configuration fixed at construction.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Locks the machine. Poisoning is ignored; the state is whatever the
    /// panicking instruction left behind.
    pub fn lock_machine(&self) -> MutexGuard<'_, MachineState> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Interrupt controller shared with producers.
    #[must_use]
    pub const fn interrupts(&self) -> &Arc<InterruptController> {
        &self.interrupts
    }

    /// Undo log.
    #[must_use]
    pub const fn undo_log(&self) -> &Arc<UndoLog> {
        &self.undo
    }

    /// Stop signal observed by the engine.
    #[must_use]
    pub const fn signal(&self) -> &StopSignal {
        &self.signal
    }

    /// Current run state.
    #[must_use]
    pub fn run_state(&self) -> RunState {
        self.run_state.get()
    }

    pub(crate) fn set_run_state(&self, state: RunState) {
        self.run_state.set(state);
    }

    /// Asks the running engine to stop at its next iteration, waking it from
    /// WFI or a throttle sleep.
    pub fn request_stop(&self, reason: StopReason) {
        self.signal.request(reason);
        self.interrupts.wake_all();
    }

    /// Current program counter.
    #[must_use]
    pub fn pc(&self) -> u32 {
        self.lock_machine().pc()
    }

    /// Address the loaded program starts at.
    #[must_use]
    pub fn entry(&self) -> u32 {
        *self.entry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Undoes the most recent instruction or trap entry.
    ///
    /// # Errors
    ///
    /// Returns [`UndoError`] when an entry cannot be replayed.
    pub fn back_step(&self) -> Result<usize, UndoError> {
        let mut machine = self.lock_machine();
        self.undo.back_step(&mut machine)
    }

    /// Replaces memory with `program` placed from `base`, then resets.
    /// Returns the address after the last statement.
    ///
    /// # Errors
    ///
    /// Returns an [`AddressFault`] when a statement lands outside text. The
    /// previous program, registers and history are then left untouched.
    pub fn load_program<I>(&self, base: u32, program: I) -> Result<u32, AddressFault>
    where
        I: IntoIterator<Item = Statement>,
    {
        let mut memory = Memory::new(self.config.allow_text_writes);
        let end = memory.load_program(base, program)?;
        *self.lock_machine().memory_mut() = memory;
        *self.entry.lock().unwrap_or_else(PoisonError::into_inner) = base;
        self.reset();
        debug!(base, end, "program loaded");
        Ok(end)
    }

    /// Resets registers and CSRs, points PC at the entry address and drops
    /// undo history, pending interrupts and any stop request. Memory is kept.
    pub fn reset(&self) {
        let entry = self.entry();
        let mut machine = self.lock_machine();
        machine.reset_registers();
        machine.set_pc_backdoor(entry);
        self.undo.clear();
        self.interrupts.clear();
        self.signal.clear();
        drop(machine);
        self.set_run_state(RunState::Idle);
    }
}
