//! Reversible RV32 execution core.
//!
//! The crate sequences externally decoded [`Instruction`]s against a
//! simulated hart, dispatches user-level interrupts and traps, and keeps a
//! bounded [`UndoLog`] so execution can be stepped backward as well as
//! forward. [`SimulationController`] runs the [`Engine`] on its own thread.

/// Fault taxonomy: address faults, exceptions and fatal run errors.
pub mod fault;
pub use fault::{
    AccessKind, AddressFault, Exception, InterruptCause, SimError, TrapCause, INTERRUPT_CAUSE_BIT,
};

/// Contract for decoded instructions.
pub mod instruction;
pub use instruction::{
    same_statement, Execution, ExitReason, Instruction, Statement, INSTRUCTION_LENGTH,
};

/// Memory model primitives and fixed region map.
pub mod memory;
pub use memory::{
    decode_memory_region, validate_fetch_access, validate_load_access, validate_store_access,
    AccessWidth, Memory, MemoryRegion, RegionDescriptor, DATA_END, DATA_START,
    FIXED_MEMORY_REGIONS, GLOBAL_POINTER_DEFAULT, KERNEL_END, KERNEL_START, MMIO_END, MMIO_START,
    PAGE_SIZE, RESERVED_END, RESERVED_START, STACK_POINTER_DEFAULT, TEXT_END, TEXT_START,
};

/// Architectural machine state.
pub mod state;
pub use state::{
    csr_address, csr_descriptor, Counter, CsrDescriptor, CsrError, CsrFile, CsrSlot, FReg,
    FloatRegisterFile, MachineState, Reg, RegisterFile, RunState, RunStateCell, CSR_TABLE,
    FLOAT_REGISTER_COUNT, GENERAL_REGISTER_COUNT,
};

/// Backstep history.
pub mod undo;
pub use undo::{Provenance, UndoEntry, UndoError, UndoKind, UndoLog, DEFAULT_BACKSTEP_CAPACITY};

/// Pending interrupts, trap queue and trap entry.
pub mod interrupt;
pub use interrupt::{
    dispatch_interrupt, dispatch_trap, Claimed, InterruptController, InterruptGates, PendingTrap,
};

/// Host-facing configuration, outcomes and observer contracts.
pub mod api;
pub use api::{
    AccessEvent, AccessOp, AccessTarget, EngineConfig, LifecycleEvent, LifecycleObserver,
    LifecyclePhase, RunOutcome, StateObserver, StopReason,
};

/// Run-speed throttling.
pub mod timing;
pub use timing::RunSpeed;

/// Execution loop.
pub mod execute;
pub use execute::{Engine, EngineSession, StopSignal};

/// Shared simulation context.
pub mod simulation;
pub use simulation::Simulation;

/// Threaded run control and lifecycle events.
pub mod controller;
pub use controller::{ControllerError, SimulationController};

/// Interrupt-producing peripherals.
pub mod peripherals;
pub use peripherals::IntervalTimer;

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
