//! Architectural machine state and its logged write paths.
//!
//! [`MachineState`] is what instructions mutate. Ordinary setters record the
//! replaced value in the shared [`UndoLog`] and notify registered
//! [`StateObserver`]s; `*_backdoor` setters do neither and are what the
//! engine, the dispatcher's bookkeeping and undo replay use.

/// Control and status register table.
pub mod csr;
/// Integer and float register files.
pub mod registers;
/// Supervisor-visible run state.
pub mod run_state;

use std::fmt;
use std::sync::Arc;

pub use csr::{
    csr_address, csr_descriptor, Counter, CsrDescriptor, CsrError, CsrFile, CsrSlot, CSR_TABLE,
};
pub use registers::{
    FReg, FloatRegisterFile, Reg, RegisterFile, ABI_NAMES, FLOAT_ABI_NAMES, FLOAT_REGISTER_COUNT,
    GENERAL_REGISTER_COUNT,
};
pub use run_state::{RunState, RunStateCell};

use crate::{
    AccessEvent, AccessOp, AccessTarget, AccessWidth, AddressFault, Memory, Provenance,
    StateObserver, UndoEntry, UndoKind, UndoLog, GLOBAL_POINTER_DEFAULT, STACK_POINTER_DEFAULT,
};

/// Registers, CSRs and memory of one simulated hart.
pub struct MachineState {
    registers: RegisterFile,
    floats: FloatRegisterFile,
    csrs: CsrFile,
    memory: Memory,
    undo: Arc<UndoLog>,
    observers: Vec<Arc<dyn StateObserver>>,
    origin: Option<u32>,
    provenance: Provenance,
    group: u64,
}

impl fmt::Debug for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineState")
            .field("pc", &self.registers.pc())
            .field("registers", &self.registers)
            .field("csrs", &self.csrs)
            .field("statements", &self.memory.statement_count())
            .field("observers", &self.observers.len())
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl MachineState {
    /// Creates a machine over `memory` that logs into `undo`. Registers start
    /// zeroed except `sp` and `gp`.
    #[must_use]
    pub fn new(memory: Memory, undo: Arc<UndoLog>) -> Self {
        let mut machine = Self {
            registers: RegisterFile::default(),
            floats: FloatRegisterFile::default(),
            csrs: CsrFile::default(),
            memory,
            undo,
            observers: Vec::new(),
            origin: None,
            provenance: Provenance::Direct,
            group: 0,
        };
        machine.reset_registers();
        machine
    }

    /// Zeroes every register, float register and CSR (including counters)
    /// and reapplies the `sp`/`gp` defaults. Nothing is logged.
    pub fn reset_registers(&mut self) {
        self.registers = RegisterFile::default();
        self.floats = FloatRegisterFile::default();
        self.csrs = CsrFile::default();
        self.registers.set(Reg::SP, STACK_POINTER_DEFAULT);
        self.registers.set(Reg::GP, GLOBAL_POINTER_DEFAULT);
    }

    /// Registers an access observer.
    pub fn add_observer(&mut self, observer: Arc<dyn StateObserver>) {
        self.observers.push(observer);
    }

    /// Drops every access observer.
    pub fn clear_observers(&mut self) {
        self.observers.clear();
    }

    /// Undo log this machine records into.
    #[must_use]
    pub const fn undo_log(&self) -> &Arc<UndoLog> {
        &self.undo
    }

    /// Unobserved view of the integer registers.
    #[must_use]
    pub const fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    /// Unobserved view of the float registers.
    #[must_use]
    pub const fn floats(&self) -> &FloatRegisterFile {
        &self.floats
    }

    /// Unobserved view of the CSRs.
    #[must_use]
    pub const fn csrs(&self) -> &CsrFile {
        &self.csrs
    }

    /// Unobserved view of memory.
    #[must_use]
    pub const fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Unlogged mutable access to memory, for loaders and undo replay.
    pub const fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Current program counter. While an instruction executes this already
    /// points past it.
    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.registers.pc()
    }

    /// Address of the instruction being executed, or the PC outside one.
    #[must_use]
    pub const fn instruction_address(&self) -> u32 {
        match self.origin {
            Some(addr) => addr,
            None => self.registers.pc(),
        }
    }

    /// Reads an integer register.
    #[must_use]
    pub fn register(&self, reg: Reg) -> u32 {
        let value = self.registers.get(reg);
        self.notify(AccessOp::Read, AccessTarget::Register(reg), u64::from(value));
        value
    }

    /// Writes an integer register. Writes to `x0` are discarded.
    pub fn set_register(&mut self, reg: Reg, value: u32) {
        if let Some(old) = self.registers.set(reg, value) {
            self.record(UndoKind::Register, u32::from(reg_number(reg)), u64::from(old));
            self.notify(AccessOp::Write, AccessTarget::Register(reg), u64::from(value));
        }
    }

    /// Writes an integer register without logging or notification.
    pub const fn set_register_backdoor(&mut self, reg: Reg, value: u32) {
        self.registers.set(reg, value);
    }

    /// Reads a float register's raw bits.
    #[must_use]
    pub fn float_register(&self, reg: FReg) -> u64 {
        let bits = self.floats.get(reg);
        self.notify(AccessOp::Read, AccessTarget::FloatRegister(reg), bits);
        bits
    }

    /// Writes a float register's raw bits.
    pub fn set_float_register(&mut self, reg: FReg, bits: u64) {
        let old = self.floats.set(reg, bits);
        self.record(UndoKind::FloatRegister, u32::from(freg_number(reg)), old);
        self.notify(AccessOp::Write, AccessTarget::FloatRegister(reg), bits);
    }

    /// Writes a float register without logging or notification.
    pub const fn set_float_register_backdoor(&mut self, reg: FReg, bits: u64) {
        self.floats.set(reg, bits);
    }

    /// Reads a CSR.
    ///
    /// # Errors
    ///
    /// Returns [`CsrError::Unknown`] for unmodelled addresses.
    pub fn csr(&self, addr: u16) -> Result<u32, CsrError> {
        let value = self.csrs.read(addr)?;
        self.notify(AccessOp::Read, AccessTarget::Csr(addr), u64::from(value));
        Ok(value)
    }

    /// Writes a CSR through the checked path.
    ///
    /// # Errors
    ///
    /// Returns [`CsrError::ReadOnly`] for the counters and
    /// [`CsrError::Unknown`] for unmodelled addresses.
    pub fn set_csr(&mut self, addr: u16, value: u32) -> Result<(), CsrError> {
        if self.csrs.is_read_only(addr)? {
            return Err(CsrError::ReadOnly(addr));
        }
        let old = self.csrs.write(addr, value)?;
        self.record(UndoKind::Csr, u32::from(addr), u64::from(old));
        self.notify(AccessOp::Write, AccessTarget::Csr(addr), u64::from(value));
        Ok(())
    }

    /// Writes a CSR ignoring read-only rules and without notification. The
    /// write is still logged so trap entry can be backstepped.
    ///
    /// # Errors
    ///
    /// Returns [`CsrError::Unknown`] for unmodelled addresses.
    pub fn set_csr_backdoor(&mut self, addr: u16, value: u32) -> Result<(), CsrError> {
        let old = self.csrs.write(addr, value)?;
        self.record(UndoKind::CsrBackdoor, u32::from(addr), u64::from(old));
        Ok(())
    }

    /// Overwrites a performance counter without logging.
    pub const fn set_counter(&mut self, counter: Counter, value: u64) {
        self.csrs.set_counter(counter, value);
    }

    /// Retires one instruction: bumps `cycle` and `instret`, sets `time`.
    pub const fn tick_counters(&mut self, now_ms: u64) {
        let cycle = self.csrs.counter(Counter::Cycle).wrapping_add(1);
        let instret = self.csrs.counter(Counter::Instret).wrapping_add(1);
        self.csrs.set_counter(Counter::Cycle, cycle);
        self.csrs.set_counter(Counter::Instret, instret);
        self.csrs.set_counter(Counter::Time, now_ms);
    }

    /// Writes the program counter (a taken branch or jump).
    pub fn set_pc(&mut self, value: u32) {
        let old = self.registers.set_pc(value);
        self.record(UndoKind::Pc, 0, u64::from(old));
    }

    /// Writes the program counter without logging.
    pub const fn set_pc_backdoor(&mut self, value: u32) {
        self.registers.set_pc(value);
    }

    /// Reads a byte.
    ///
    /// # Errors
    ///
    /// Returns a load [`AddressFault`].
    pub fn byte(&self, addr: u32) -> Result<u8, AddressFault> {
        let value = self.memory.byte(addr)?;
        self.notify_memory(AccessOp::Read, addr, AccessWidth::Byte, u64::from(value));
        Ok(value)
    }

    /// Reads a halfword.
    ///
    /// # Errors
    ///
    /// Returns a load [`AddressFault`].
    pub fn half(&self, addr: u32) -> Result<u16, AddressFault> {
        let value = self.memory.half(addr)?;
        self.notify_memory(AccessOp::Read, addr, AccessWidth::Half, u64::from(value));
        Ok(value)
    }

    /// Reads a word.
    ///
    /// # Errors
    ///
    /// Returns a load [`AddressFault`].
    pub fn word(&self, addr: u32) -> Result<u32, AddressFault> {
        let value = self.memory.word(addr)?;
        self.notify_memory(AccessOp::Read, addr, AccessWidth::Word, u64::from(value));
        Ok(value)
    }

    /// Reads a doubleword.
    ///
    /// # Errors
    ///
    /// Returns a load [`AddressFault`].
    pub fn double_word(&self, addr: u32) -> Result<u64, AddressFault> {
        let value = self.memory.double_word(addr)?;
        self.notify_memory(AccessOp::Read, addr, AccessWidth::Double, value);
        Ok(value)
    }

    /// Writes a byte.
    ///
    /// # Errors
    ///
    /// Returns a store [`AddressFault`]; nothing is logged on failure.
    pub fn set_byte(&mut self, addr: u32, value: u8) -> Result<(), AddressFault> {
        let old = self.memory.set_byte(addr, value)?;
        self.record(UndoKind::MemoryByte, addr, u64::from(old));
        self.notify_memory(AccessOp::Write, addr, AccessWidth::Byte, u64::from(value));
        Ok(())
    }

    /// Writes a halfword.
    ///
    /// # Errors
    ///
    /// Returns a store [`AddressFault`]; nothing is logged on failure.
    pub fn set_half(&mut self, addr: u32, value: u16) -> Result<(), AddressFault> {
        let old = self.memory.set_half(addr, value)?;
        self.record(UndoKind::MemoryHalf, addr, u64::from(old));
        self.notify_memory(AccessOp::Write, addr, AccessWidth::Half, u64::from(value));
        Ok(())
    }

    /// Writes a word.
    ///
    /// # Errors
    ///
    /// Returns a store [`AddressFault`]; nothing is logged on failure.
    pub fn set_word(&mut self, addr: u32, value: u32) -> Result<(), AddressFault> {
        let old = self.memory.set_word(addr, value)?;
        self.record(UndoKind::MemoryWord, addr, u64::from(old));
        self.notify_memory(AccessOp::Write, addr, AccessWidth::Word, u64::from(value));
        Ok(())
    }

    /// Writes a doubleword.
    ///
    /// # Errors
    ///
    /// Returns a store [`AddressFault`]; nothing is logged on failure.
    pub fn set_double_word(&mut self, addr: u32, value: u64) -> Result<(), AddressFault> {
        let old = self.memory.set_double_word(addr, value)?;
        self.record(UndoKind::MemoryDoubleWord, addr, old);
        self.notify_memory(AccessOp::Write, addr, AccessWidth::Double, value);
        Ok(())
    }

    /// Writes a raw word regardless of the text-write policy.
    ///
    /// # Errors
    ///
    /// Returns a store [`AddressFault`]; nothing is logged on failure.
    pub fn set_raw_word(&mut self, addr: u32, value: u32) -> Result<(), AddressFault> {
        let old = self.memory.set_raw_word(addr, value)?;
        self.record(UndoKind::MemoryRawWord, addr, u64::from(old));
        self.notify_memory(AccessOp::Write, addr, AccessWidth::Word, u64::from(value));
        Ok(())
    }

    /// Opens an execution group: subsequent writes are attributed to
    /// `provenance` and originate at `pc`.
    pub(crate) fn enter(&mut self, pc: u32, provenance: Provenance) {
        self.group = self.group.wrapping_add(1);
        self.origin = Some(pc);
        self.provenance = provenance;
    }

    /// Closes the current execution group.
    pub(crate) fn leave(&mut self) {
        self.group = self.group.wrapping_add(1);
        self.origin = None;
        self.provenance = Provenance::Direct;
    }

    /// Current execution group id.
    pub(crate) const fn group(&self) -> u64 {
        self.group
    }

    /// Provenance of the current execution group.
    pub(crate) const fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub(crate) fn restore_csr(&mut self, addr: u16, value: u32) -> Result<(), CsrError> {
        self.csrs.write(addr, value).map(|_| ())
    }

    fn record(&self, kind: UndoKind, target: u32, old: u64) {
        self.undo.push(UndoEntry {
            kind,
            origin: self.origin,
            target,
            old,
            provenance: self.provenance.clone(),
            group: self.group,
        });
    }

    fn notify(&self, op: AccessOp, target: AccessTarget, value: u64) {
        if self.observers.is_empty() {
            return;
        }
        let event = AccessEvent { op, target, value };
        for observer in &self.observers {
            observer.on_access(&event);
        }
    }

    fn notify_memory(&self, op: AccessOp, addr: u32, width: AccessWidth, value: u64) {
        self.notify(op, AccessTarget::Memory { addr, width }, value);
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn reg_number(reg: Reg) -> u8 {
    reg.index() as u8
}

#[allow(clippy::cast_possible_truncation)]
const fn freg_number(reg: FReg) -> u8 {
    reg.index() as u8
}
