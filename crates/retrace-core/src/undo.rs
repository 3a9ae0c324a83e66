//! Bounded log of reversible state mutations ("backstep" history).
//!
//! Every non-backdoor write made through [`MachineState`] appends one
//! [`UndoEntry`] holding the value it replaced. [`UndoLog::back_step`] pops
//! entries until the provenance group changes, restoring each value through
//! the unlogged backdoor and rewinding the program counter to the entry's
//! origin, so a single call undoes one whole instruction or one whole
//! trap entry.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::trace;

use crate::{same_statement, AccessWidth, AddressFault, CsrError, FReg, MachineState, Reg, Statement};

/// Default number of entries retained before the oldest are dropped.
pub const DEFAULT_BACKSTEP_CAPACITY: usize = 2000;

/// What an [`UndoEntry`] restores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum UndoKind {
    /// Byte at `target`.
    MemoryByte,
    /// Halfword at `target`.
    MemoryHalf,
    /// Word at `target`.
    MemoryWord,
    /// Doubleword at `target`.
    MemoryDoubleWord,
    /// Raw (encoding) word at `target`.
    MemoryRawWord,
    /// Integer register number `target`.
    Register,
    /// Float register number `target`.
    FloatRegister,
    /// CSR at address `target`, written through the checked path.
    Csr,
    /// CSR at address `target`, written through the backdoor.
    CsrBackdoor,
    /// Program counter.
    Pc,
    /// Placeholder for an instruction with no logged side effect.
    Nothing,
}

impl UndoKind {
    const fn memory_width(self) -> Option<AccessWidth> {
        match self {
            Self::MemoryByte => Some(AccessWidth::Byte),
            Self::MemoryHalf => Some(AccessWidth::Half),
            Self::MemoryWord | Self::MemoryRawWord => Some(AccessWidth::Word),
            Self::MemoryDoubleWord => Some(AccessWidth::Double),
            Self::Register
            | Self::FloatRegister
            | Self::Csr
            | Self::CsrBackdoor
            | Self::Pc
            | Self::Nothing => None,
        }
    }
}

/// Source of a logged write.
#[derive(Debug, Clone)]
pub enum Provenance {
    /// Host-side edit with no instruction in flight.
    Direct,
    /// Side effect of executing the given statement.
    Instruction(Statement),
    /// Trap or interrupt entry performed by the dispatcher.
    Dispatch,
}

impl PartialEq for Provenance {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Direct, Self::Direct) | (Self::Dispatch, Self::Dispatch) => true,
            (Self::Instruction(a), Self::Instruction(b)) => same_statement(a, b),
            _ => false,
        }
    }
}

impl Eq for Provenance {}

/// One reversible mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoEntry {
    /// What to restore.
    pub kind: UndoKind,
    /// Address of the instruction (or interrupted PC) that made the write.
    /// `None` for writes made outside any run.
    pub origin: Option<u32>,
    /// Register number, CSR address or memory address.
    pub target: u32,
    /// Value replaced by the write, zero-extended.
    pub old: u64,
    /// Who made the write.
    pub provenance: Provenance,
    /// Execution group; a new group starts every time an instruction or a
    /// dispatch begins or ends.
    pub group: u64,
}

/// Failure to replay an [`UndoEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UndoError {
    /// Backdoor memory restore faulted.
    #[error("restoring {kind:?} at {target:#010x} faulted: {fault}")]
    Memory {
        /// Entry kind.
        kind: UndoKind,
        /// Memory address.
        target: u32,
        /// Underlying fault.
        #[source]
        fault: AddressFault,
    },
    /// Register number or CSR address does not exist.
    #[error("{kind:?} entry has invalid target {target:#x}")]
    InvalidTarget {
        /// Entry kind.
        kind: UndoKind,
        /// Offending target.
        target: u32,
    },
    /// CSR restore failed.
    #[error(transparent)]
    Csr(#[from] CsrError),
}

/// Thread-safe bounded undo log.
#[derive(Debug)]
pub struct UndoLog {
    capacity: usize,
    enabled: AtomicBool,
    pushes: AtomicU64,
    entries: Mutex<VecDeque<UndoEntry>>,
}

impl Default for UndoLog {
    fn default() -> Self {
        Self::new(DEFAULT_BACKSTEP_CAPACITY, true)
    }
}

impl UndoLog {
    /// Creates an empty log retaining at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize, enabled: bool) -> Self {
        Self {
            capacity,
            enabled: AtomicBool::new(enabled),
            pushes: AtomicU64::new(0),
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_BACKSTEP_CAPACITY))),
        }
    }

    /// Maximum number of retained entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Returns `true` when nothing can be undone.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Returns `true` when writes are being recorded.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turns recording on or off. Disabling keeps existing entries but
    /// makes [`Self::back_step`] a no-op.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Monotonic count of accepted pushes, used to spot instructions that
    /// logged nothing.
    #[must_use]
    pub fn pushes(&self) -> u64 {
        self.pushes.load(Ordering::Acquire)
    }

    /// Returns a copy of the most recent entry.
    #[must_use]
    pub fn peek(&self) -> Option<UndoEntry> {
        self.entries().back().cloned()
    }

    /// Appends an entry, dropping the oldest one when full.
    pub fn push(&self, entry: UndoEntry) {
        if !self.is_enabled() {
            return;
        }
        self.pushes.fetch_add(1, Ordering::AcqRel);
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Pushes a no-op entry for an instruction at `pc` that logged nothing,
    /// unless the newest entry already originates at `pc`. Returns whether
    /// an entry was added.
    pub fn push_placeholder(&self, pc: u32, provenance: Provenance, group: u64) -> bool {
        if !self.is_enabled() {
            return false;
        }
        if self.entries().back().is_some_and(|top| top.origin == Some(pc)) {
            return false;
        }
        self.push(UndoEntry {
            kind: UndoKind::Nothing,
            origin: Some(pc),
            target: 0,
            old: 0,
            provenance,
            group,
        });
        true
    }

    /// Undoes the newest group of entries and returns how many were
    /// replayed. Returns `Ok(0)` when the log is empty or disabled.
    ///
    /// The caller must hold the machine exclusively; restores go through
    /// backdoor paths that never push, so the log lock is never re-entered.
    ///
    /// # Errors
    ///
    /// Returns [`UndoError`] if an entry cannot be replayed. Entries popped
    /// before the failure stay applied.
    pub fn back_step(&self, machine: &mut MachineState) -> Result<usize, UndoError> {
        if !self.is_enabled() {
            return Ok(0);
        }
        let Some(first) = self.entries().pop_back() else {
            return Ok(0);
        };
        let mut replayed = 0;
        let mut next = Some(first.clone());
        while let Some(entry) = next {
            replay(&entry, machine)?;
            replayed += 1;
            let mut entries = self.entries();
            next = if entries
                .back()
                .is_some_and(|top| top.group == first.group && top.provenance == first.provenance)
            {
                entries.pop_back()
            } else {
                None
            };
        }
        trace!(replayed, origin = ?first.origin, "back step");
        Ok(replayed)
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<UndoEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn replay(entry: &UndoEntry, machine: &mut MachineState) -> Result<(), UndoError> {
    let invalid = || UndoError::InvalidTarget {
        kind: entry.kind,
        target: entry.target,
    };
    #[allow(clippy::cast_possible_truncation)]
    let narrow = entry.old as u32;
    if let Some(width) = entry.kind.memory_width() {
        machine
            .memory_mut()
            .restore(entry.target, width, entry.old)
            .map_err(|fault| UndoError::Memory {
                kind: entry.kind,
                target: entry.target,
                fault,
            })?;
    } else {
        match entry.kind {
            UndoKind::Register => {
                let reg = Reg::new(entry.target).ok_or_else(invalid)?;
                machine.set_register_backdoor(reg, narrow);
            }
            UndoKind::FloatRegister => {
                let reg = FReg::new(entry.target).ok_or_else(invalid)?;
                machine.set_float_register_backdoor(reg, entry.old);
            }
            UndoKind::Csr | UndoKind::CsrBackdoor => {
                let addr = u16::try_from(entry.target).map_err(|_| invalid())?;
                machine.restore_csr(addr, narrow)?;
            }
            UndoKind::Pc => machine.set_pc_backdoor(narrow),
            _ => {}
        }
    }
    if let Some(origin) = entry.origin {
        machine.set_pc_backdoor(origin);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Provenance, UndoEntry, UndoError, UndoKind, UndoLog};
    use crate::{Execution, Instruction, MachineState, Memory, Reg, Statement, DATA_START};

    #[derive(Debug)]
    struct Nop;

    impl Instruction for Nop {
        fn execute(&self, _machine: &mut MachineState) -> Execution {
            Execution::Continue
        }
    }

    fn entry(target: u32, group: u64, provenance: Provenance) -> UndoEntry {
        UndoEntry {
            kind: UndoKind::Register,
            origin: None,
            target,
            old: u64::from(target),
            provenance,
            group,
        }
    }

    fn machine(log: &Arc<UndoLog>) -> MachineState {
        MachineState::new(Memory::default(), Arc::clone(log))
    }

    #[test]
    fn ring_drops_oldest_entry_at_capacity() {
        let log = UndoLog::new(3, true);
        for target in 1..=5 {
            log.push(entry(target, u64::from(target), Provenance::Direct));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.pushes(), 5);
        assert_eq!(log.peek().map(|top| top.target), Some(5));
    }

    #[test]
    fn zero_capacity_and_disabled_logs_retain_nothing() {
        let zero = UndoLog::new(0, true);
        zero.push(entry(1, 0, Provenance::Direct));
        assert!(zero.is_empty());

        let disabled = UndoLog::new(8, false);
        disabled.push(entry(1, 0, Provenance::Direct));
        assert!(disabled.is_empty());
        assert_eq!(disabled.pushes(), 0);
    }

    #[test]
    fn provenance_compares_statements_by_identity() {
        let a: Statement = Arc::new(Nop);
        let b: Statement = Arc::new(Nop);
        assert_eq!(
            Provenance::Instruction(Arc::clone(&a)),
            Provenance::Instruction(a)
        );
        assert_ne!(Provenance::Instruction(b), Provenance::Dispatch);
        assert_ne!(Provenance::Direct, Provenance::Dispatch);
    }

    #[test]
    fn placeholder_is_skipped_when_top_shares_origin() {
        let log = UndoLog::new(8, true);
        assert!(log.push_placeholder(0x0040_0000, Provenance::Dispatch, 1));
        assert!(!log.push_placeholder(0x0040_0000, Provenance::Dispatch, 2));
        assert!(log.push_placeholder(0x0040_0004, Provenance::Dispatch, 3));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn back_step_replays_one_group_and_rewinds_pc() {
        let log = Arc::new(UndoLog::new(16, true));
        let mut machine = machine(&log);
        let a0 = Reg::A0;
        let a1 = Reg::A1;

        machine.set_register(a0, 1);
        let statement: Statement = Arc::new(Nop);
        machine.enter(0x0040_0000, Provenance::Instruction(statement));
        machine.set_pc_backdoor(0x0040_0004);
        machine.set_register(a0, 2);
        machine.set_register(a1, 3);
        machine.leave();

        assert_eq!(log.back_step(&mut machine), Ok(2));
        assert_eq!(machine.registers().get(a0), 1);
        assert_eq!(machine.registers().get(a1), 0);
        assert_eq!(machine.pc(), 0x0040_0000);

        assert_eq!(log.back_step(&mut machine), Ok(1));
        assert_eq!(machine.registers().get(a0), 0);
        assert_eq!(log.back_step(&mut machine), Ok(0));
    }

    #[test]
    fn back_step_restores_memory_through_backdoor() {
        let log = Arc::new(UndoLog::new(16, true));
        let mut machine = machine(&log);
        machine.set_word(DATA_START, 0xAABB_CCDD).expect("data is writable");
        machine.set_byte(DATA_START, 0x11).expect("data is writable");

        assert_eq!(log.back_step(&mut machine), Ok(2));
        assert_eq!(machine.memory().word(DATA_START), Ok(0));
        assert!(log.is_empty());
    }

    #[test]
    fn disabled_log_does_not_replay() {
        let log = Arc::new(UndoLog::new(16, true));
        let mut machine = machine(&log);
        machine.set_register(Reg::A0, 9);
        log.set_enabled(false);
        assert_eq!(log.back_step(&mut machine), Ok(0));
        assert_eq!(machine.registers().get(Reg::A0), 9);
    }

    #[test]
    fn invalid_targets_are_reported() {
        let log = Arc::new(UndoLog::new(4, true));
        let mut machine = machine(&log);
        log.push(entry(40, 0, Provenance::Direct));
        assert_eq!(
            log.back_step(&mut machine),
            Err(UndoError::InvalidTarget {
                kind: UndoKind::Register,
                target: 40
            })
        );
    }
}
