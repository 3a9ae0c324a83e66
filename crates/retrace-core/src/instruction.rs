//! Contract for externally decoded instructions.
//!
//! The core never inspects opcodes. A decoder hands it shared
//! [`Instruction`] objects that know how to apply themselves to the
//! [`MachineState`] and report how control should continue.

use std::fmt;
use std::sync::Arc;

use crate::{Exception, MachineState};

/// Byte length of a standard (uncompressed) encoding.
pub const INSTRUCTION_LENGTH: u32 = 4;

/// Control-flow result of executing one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    /// Instruction retired normally.
    Continue,
    /// Instruction retired and requested a debugger stop (`ebreak`).
    Ebreak,
    /// Instruction retired and requested wait-for-interrupt (`wfi`).
    Wait,
    /// Program requested termination.
    Exit(ExitReason),
    /// Instruction raised a synchronous exception and did not retire.
    Trap(Exception),
}

/// Reason attached to a program termination request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Normal exit with the program's exit code.
    Code(i32),
    /// Exit caused by an error the program could not recover from.
    Fault(Exception),
}

/// A decoded instruction as produced by the external decoder.
///
/// Implementations must perform every architectural write through the
/// non-backdoor [`MachineState`] setters so the undo log observes them.
/// `PC` has already been advanced past the instruction when `execute` runs;
/// [`MachineState::instruction_address`] returns the instruction's own
/// address.
pub trait Instruction: Send + Sync + fmt::Debug {
    /// Applies the instruction to the machine.
    fn execute(&self, machine: &mut MachineState) -> Execution;

    /// Encoded length in bytes.
    fn length(&self) -> u32 {
        INSTRUCTION_LENGTH
    }

    /// Raw encoding word stored in the text segment.
    fn encoding(&self) -> u32 {
        0
    }
}

/// Shared handle to a decoded instruction.
pub type Statement = Arc<dyn Instruction>;

/// Identity comparison of two statements (same decoded object).
#[must_use]
pub fn same_statement(a: &Statement, b: &Statement) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
