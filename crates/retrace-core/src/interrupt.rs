//! Pending interrupt/trap bookkeeping and the trap-entry protocol.
//!
//! Producers on any thread raise interrupts into an [`InterruptController`].
//! The engine claims at most one pending item per iteration through
//! [`InterruptController::select`] and enters its handler with
//! [`dispatch_interrupt`] or [`dispatch_trap`].

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::state::csr::{
    UCAUSE, UEPC, UIP, UIP_USIP, USTATUS, USTATUS_UIE, USTATUS_UPIE, UTVAL, UTVEC_MODE_MASK,
    UTVEC_MODE_VECTORED,
};
use crate::{
    CsrError, CsrFile, Exception, InterruptCause, MachineState, Provenance, SimError, TrapCause,
};

/// Synchronous trap waiting to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTrap {
    /// Raised exception.
    pub exception: Exception,
    /// Address of the faulting instruction.
    pub pc: u32,
}

#[derive(Debug, Default)]
struct PendingInterrupts {
    external: Option<u32>,
    timer: Option<u32>,
    software: bool,
    traps: VecDeque<PendingTrap>,
}

impl PendingInterrupts {
    const fn any_interrupt(&self) -> bool {
        self.external.is_some() || self.timer.is_some() || self.software
    }
}

/// CSR state that gates interrupt delivery, sampled under the machine lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptGates {
    /// `ustatus.UIE`.
    pub global: bool,
    /// `uie` bits.
    pub enabled: u32,
    /// `uip.USIP`, a software interrupt posted by the program itself.
    pub software_pending: bool,
}

impl InterruptGates {
    /// Samples the gates from the CSR file.
    #[must_use]
    pub const fn from_csrs(csrs: &CsrFile) -> Self {
        Self {
            global: csrs.interrupts_enabled(),
            enabled: csrs.uie(),
            software_pending: csrs.uip() & UIP_USIP != 0,
        }
    }

    const fn admits(self, cause: InterruptCause) -> bool {
        self.global && self.enabled & cause.mask() != 0
    }
}

/// Item claimed by [`InterruptController::select`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claimed {
    /// External interrupt with its device value.
    External(u32),
    /// Software interrupt.
    Software,
    /// Timer interrupt with its value.
    Timer(u32),
    /// Synchronous trap.
    Trap(PendingTrap),
}

/// Thread-safe pending interrupt and trap state.
#[derive(Debug, Default)]
pub struct InterruptController {
    state: Mutex<PendingInterrupts>,
    wake: Condvar,
}

impl InterruptController {
    /// Creates a controller with nothing pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Posts an external interrupt, replacing any unclaimed one.
    pub fn raise_external(&self, value: u32) {
        self.state().external = Some(value);
        self.wake.notify_all();
    }

    /// Posts a timer interrupt, replacing any unclaimed one.
    pub fn raise_timer(&self, value: u32) {
        self.state().timer = Some(value);
        self.wake.notify_all();
    }

    /// Posts a software interrupt.
    pub fn raise_software(&self) {
        self.state().software = true;
        self.wake.notify_all();
    }

    /// Queues a synchronous trap raised at `pc`. Returns `false` when the
    /// exception has no architectural cause and cannot be handled.
    pub fn register_synchronous_trap(&self, exception: Exception, pc: u32) -> bool {
        if !exception.is_handlable() {
            return false;
        }
        self.state().traps.push_back(PendingTrap { exception, pc });
        true
    }

    /// Unclaimed external interrupt value.
    #[must_use]
    pub fn pending_external(&self) -> Option<u32> {
        self.state().external
    }

    /// Unclaimed timer interrupt value.
    #[must_use]
    pub fn pending_timer(&self) -> Option<u32> {
        self.state().timer
    }

    /// Returns `true` when a software interrupt was raised and not claimed.
    #[must_use]
    pub fn pending_software(&self) -> bool {
        self.state().software
    }

    /// Oldest queued trap.
    #[must_use]
    pub fn pending_trap(&self) -> Option<PendingTrap> {
        self.state().traps.front().cloned()
    }

    /// Takes the pending external interrupt.
    pub fn claim_external(&self) -> Option<u32> {
        self.state().external.take()
    }

    /// Takes the pending timer interrupt.
    pub fn claim_timer(&self) -> Option<u32> {
        self.state().timer.take()
    }

    /// Takes the pending software interrupt flag.
    pub fn claim_software(&self) -> bool {
        std::mem::take(&mut self.state().software)
    }

    /// Takes the oldest queued trap.
    pub fn claim_trap(&self) -> Option<PendingTrap> {
        self.state().traps.pop_front()
    }

    /// Claims the highest-priority deliverable item: external, software,
    /// timer, then queued traps. Interrupts not admitted by `gates` stay
    /// pending.
    pub fn select(&self, gates: InterruptGates) -> Option<Claimed> {
        let mut state = self.state();
        if gates.admits(InterruptCause::External) {
            if let Some(value) = state.external.take() {
                return Some(Claimed::External(value));
            }
        }
        if gates.admits(InterruptCause::Software) && (state.software || gates.software_pending) {
            state.software = false;
            return Some(Claimed::Software);
        }
        if gates.admits(InterruptCause::Timer) {
            if let Some(value) = state.timer.take() {
                return Some(Claimed::Timer(value));
            }
        }
        state.traps.pop_front().map(Claimed::Trap)
    }

    /// Returns `true` when any interrupt is pending, enabled or not.
    #[must_use]
    pub fn any_interrupt_pending(&self) -> bool {
        self.state().any_interrupt()
    }

    /// Blocks until an interrupt is pending or `cancelled` returns `true`.
    ///
    /// `cancelled` is evaluated with the controller lock held; whoever flips
    /// it must call [`Self::wake_all`] afterwards.
    pub fn wait_for_interrupt(&self, cancelled: impl Fn() -> bool) {
        let guard = self.state();
        let _guard = self
            .wake
            .wait_while(guard, |state| !state.any_interrupt() && !cancelled())
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Wakes every waiter so it re-evaluates its condition.
    pub fn wake_all(&self) {
        let _state = self.state();
        self.wake.notify_all();
    }

    /// Drops everything pending.
    pub fn clear(&self) {
        *self.state() = PendingInterrupts::default();
    }

    fn state(&self) -> MutexGuard<'_, PendingInterrupts> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Enters the handler for an asynchronous interrupt taken at `pc`.
///
/// Writes `ucause`, `uepc` and `utval`, resolves the handler from `utvec`
/// (`base + 4 * code` in vectored mode) and, when a statement exists there,
/// sets `UPIE`, clears `UIE` and jumps to it. Every write is logged as one
/// dispatch group.
///
/// # Errors
///
/// Returns [`SimError::UnhandledInterrupt`] when no statement exists at the
/// handler address, and [`SimError::Csr`] if a trap CSR rejects the write.
pub fn dispatch_interrupt(
    machine: &mut MachineState,
    cause: InterruptCause,
    value: u32,
    pc: u32,
) -> Result<(), SimError> {
    machine.enter(pc, Provenance::Dispatch);
    let result = enter_interrupt(machine, cause, value, pc);
    machine.leave();
    result
}

fn enter_interrupt(
    machine: &mut MachineState,
    cause: InterruptCause,
    value: u32,
    pc: u32,
) -> Result<(), SimError> {
    write_trap_csrs(machine, cause.ucause(), pc, value)?;
    if cause == InterruptCause::Software {
        let uip = machine.csrs().uip();
        machine.set_csr_backdoor(UIP, uip & !UIP_USIP)?;
    }
    let utvec = machine.csrs().utvec();
    let mut vector = utvec & !UTVEC_MODE_MASK;
    if utvec & UTVEC_MODE_MASK == UTVEC_MODE_VECTORED {
        vector = vector.wrapping_add(4 * cause.code());
    }
    if !handler_exists(machine, vector) {
        return Err(SimError::UnhandledInterrupt { cause, vector });
    }
    jump_to_handler(machine, vector)?;
    debug!(?cause, value, pc, vector, "interrupt dispatched");
    Ok(())
}

/// Enters the handler for a queued synchronous trap.
///
/// Writes `ucause`, `uepc` and `utval` and jumps to the `utvec` base when
/// `ustatus.UIE` is set and a statement exists there.
///
/// # Errors
///
/// Returns [`SimError::UnhandledTrap`] when interrupts are disabled or no
/// handler statement exists, and [`SimError::Csr`] if a trap CSR rejects
/// the write.
pub fn dispatch_trap(machine: &mut MachineState, trap: &PendingTrap) -> Result<(), SimError> {
    let unhandled = || SimError::UnhandledTrap {
        pc: trap.pc,
        exception: trap.exception.clone(),
    };
    let Some(cause) = trap.exception.cause() else {
        return Err(unhandled());
    };
    machine.enter(trap.pc, Provenance::Dispatch);
    let result = enter_trap(machine, cause, trap);
    machine.leave();
    if result? {
        Ok(())
    } else {
        Err(unhandled())
    }
}

fn enter_trap(
    machine: &mut MachineState,
    cause: TrapCause,
    trap: &PendingTrap,
) -> Result<bool, SimError> {
    write_trap_csrs(machine, cause.code(), trap.pc, trap.exception.value())?;
    let base = machine.csrs().utvec() & !UTVEC_MODE_MASK;
    if !machine.csrs().interrupts_enabled() || !handler_exists(machine, base) {
        return Ok(false);
    }
    jump_to_handler(machine, base)?;
    debug!(?cause, pc = trap.pc, handler = base, "trap dispatched");
    Ok(true)
}

fn write_trap_csrs(
    machine: &mut MachineState,
    ucause: u32,
    pc: u32,
    value: u32,
) -> Result<(), CsrError> {
    machine.set_csr_backdoor(UCAUSE, ucause)?;
    machine.set_csr_backdoor(UEPC, pc)?;
    machine.set_csr_backdoor(UTVAL, value)
}

fn jump_to_handler(machine: &mut MachineState, handler: u32) -> Result<(), CsrError> {
    let ustatus = (machine.csrs().ustatus() | USTATUS_UPIE) & !USTATUS_UIE;
    machine.set_csr_backdoor(USTATUS, ustatus)?;
    machine.set_pc(handler);
    Ok(())
}

fn handler_exists(machine: &MachineState, addr: u32) -> bool {
    matches!(machine.memory().statement(addr), Ok(Some(_)))
}
