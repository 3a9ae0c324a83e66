//! User-level control and status register table.
//!
//! CSRs are keyed by their 12-bit address through [`CSR_TABLE`]. Each
//! descriptor names the backing slot, so the float flag views (`fflags`,
//! `frm`) and the 64-bit counter halves share storage with `fcsr` and the
//! counters instead of being kept in sync by hand.

use thiserror::Error;

/// `ustatus` address.
pub const USTATUS: u16 = 0x000;
/// `fflags` address.
pub const FFLAGS: u16 = 0x001;
/// `frm` address.
pub const FRM: u16 = 0x002;
/// `fcsr` address.
pub const FCSR: u16 = 0x003;
/// `uie` address.
pub const UIE: u16 = 0x004;
/// `utvec` address.
pub const UTVEC: u16 = 0x005;
/// `uscratch` address.
pub const USCRATCH: u16 = 0x040;
/// `uepc` address.
pub const UEPC: u16 = 0x041;
/// `ucause` address.
pub const UCAUSE: u16 = 0x042;
/// `utval` address.
pub const UTVAL: u16 = 0x043;
/// `uip` address.
pub const UIP: u16 = 0x044;
/// `cycle` address.
pub const CYCLE: u16 = 0xC00;
/// `time` address.
pub const TIME: u16 = 0xC01;
/// `instret` address.
pub const INSTRET: u16 = 0xC02;
/// `cycleh` address.
pub const CYCLEH: u16 = 0xC80;
/// `timeh` address.
pub const TIMEH: u16 = 0xC81;
/// `instreth` address.
pub const INSTRETH: u16 = 0xC82;

/// `ustatus.UIE`: global user interrupt enable.
pub const USTATUS_UIE: u32 = 1 << 0;
/// `ustatus.UPIE`: interrupt enable prior to the last trap.
pub const USTATUS_UPIE: u32 = 1 << 4;
/// `uip.USIP`: software interrupt pending.
pub const UIP_USIP: u32 = 1 << 0;
/// Mode field of `utvec`.
pub const UTVEC_MODE_MASK: u32 = 0b11;
/// `utvec` mode selecting per-cause interrupt vectors.
pub const UTVEC_MODE_VECTORED: u32 = 1;

const FFLAGS_MASK: u32 = 0x1F;
const FRM_MASK: u32 = 0x7;
const FRM_SHIFT: u32 = 5;
const FCSR_MASK: u32 = 0xFF;
const INTERRUPT_BITS_MASK: u32 = 0x111;

/// Performance counters backing the read-only counter CSRs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Counter {
    /// Cycles elapsed (one per retired instruction).
    Cycle,
    /// Wall-clock milliseconds since the Unix epoch.
    Time,
    /// Instructions retired.
    Instret,
}

impl Counter {
    const fn index(self) -> usize {
        match self {
            Self::Cycle => 0,
            Self::Time => 1,
            Self::Instret => 2,
        }
    }
}

/// Storage backing a CSR address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CsrSlot {
    /// Plain 32-bit register at the given index, masked on write.
    Plain(usize, u32),
    /// Accrued exception flags view of `fcsr`.
    Fflags,
    /// Rounding-mode view of `fcsr`.
    Frm,
    /// Full float control/status register.
    Fcsr,
    /// Low half of a 64-bit counter.
    CounterLow(Counter),
    /// High half of a 64-bit counter.
    CounterHigh(Counter),
}

/// Named CSR table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CsrDescriptor {
    /// 12-bit CSR address.
    pub addr: u16,
    /// Assembly name.
    pub name: &'static str,
    /// `true` when ordinary writes are rejected.
    pub read_only: bool,
    /// Backing storage.
    pub slot: CsrSlot,
}

const PLAIN_CSR_COUNT: usize = 8;

/// Every CSR the core models, in address order.
pub const CSR_TABLE: &[CsrDescriptor] = &[
    plain(USTATUS, "ustatus", 0, USTATUS_UIE | USTATUS_UPIE),
    view(FFLAGS, "fflags", CsrSlot::Fflags, false),
    view(FRM, "frm", CsrSlot::Frm, false),
    view(FCSR, "fcsr", CsrSlot::Fcsr, false),
    plain(UIE, "uie", 1, INTERRUPT_BITS_MASK),
    plain(UTVEC, "utvec", 2, u32::MAX),
    plain(USCRATCH, "uscratch", 3, u32::MAX),
    plain(UEPC, "uepc", 4, u32::MAX),
    plain(UCAUSE, "ucause", 5, u32::MAX),
    plain(UTVAL, "utval", 6, u32::MAX),
    plain(UIP, "uip", 7, INTERRUPT_BITS_MASK),
    view(CYCLE, "cycle", CsrSlot::CounterLow(Counter::Cycle), true),
    view(TIME, "time", CsrSlot::CounterLow(Counter::Time), true),
    view(INSTRET, "instret", CsrSlot::CounterLow(Counter::Instret), true),
    view(CYCLEH, "cycleh", CsrSlot::CounterHigh(Counter::Cycle), true),
    view(TIMEH, "timeh", CsrSlot::CounterHigh(Counter::Time), true),
    view(INSTRETH, "instreth", CsrSlot::CounterHigh(Counter::Instret), true),
];

const fn plain(addr: u16, name: &'static str, index: usize, mask: u32) -> CsrDescriptor {
    CsrDescriptor {
        addr,
        name,
        read_only: false,
        slot: CsrSlot::Plain(index, mask),
    }
}

const fn view(addr: u16, name: &'static str, slot: CsrSlot, read_only: bool) -> CsrDescriptor {
    CsrDescriptor {
        addr,
        name,
        read_only,
        slot,
    }
}

/// Looks up a CSR descriptor by address.
#[must_use]
pub fn csr_descriptor(addr: u16) -> Option<&'static CsrDescriptor> {
    CSR_TABLE.iter().find(|descriptor| descriptor.addr == addr)
}

/// Looks up a CSR address by assembly name.
#[must_use]
pub fn csr_address(name: &str) -> Option<u16> {
    CSR_TABLE
        .iter()
        .find(|descriptor| descriptor.name == name)
        .map(|descriptor| descriptor.addr)
}

/// CSR access failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum CsrError {
    /// No CSR exists at the address.
    #[error("unknown csr {0:#05x}")]
    Unknown(u16),
    /// Ordinary write to a read-only CSR.
    #[error("csr {0:#05x} is read-only")]
    ReadOnly(u16),
}

/// CSR storage. Writes here never check read-only rules.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CsrFile {
    plain: [u32; PLAIN_CSR_COUNT],
    fcsr: u32,
    counters: [u64; 3],
}

impl CsrFile {
    /// Reads a CSR by address.
    ///
    /// # Errors
    ///
    /// Returns [`CsrError::Unknown`] for unmodelled addresses.
    pub fn read(&self, addr: u16) -> Result<u32, CsrError> {
        let descriptor = csr_descriptor(addr).ok_or(CsrError::Unknown(addr))?;
        Ok(self.read_slot(descriptor.slot))
    }

    /// Writes a CSR by address, bypassing read-only rules, and returns the
    /// value the CSR read before the write.
    ///
    /// # Errors
    ///
    /// Returns [`CsrError::Unknown`] for unmodelled addresses.
    pub fn write(&mut self, addr: u16, value: u32) -> Result<u32, CsrError> {
        let descriptor = csr_descriptor(addr).ok_or(CsrError::Unknown(addr))?;
        let old = self.read_slot(descriptor.slot);
        match descriptor.slot {
            CsrSlot::Plain(index, mask) => self.plain[index] = value & mask,
            CsrSlot::Fflags => self.fcsr = (self.fcsr & !FFLAGS_MASK) | (value & FFLAGS_MASK),
            CsrSlot::Frm => {
                self.fcsr = (self.fcsr & !(FRM_MASK << FRM_SHIFT)) | ((value & FRM_MASK) << FRM_SHIFT);
            }
            CsrSlot::Fcsr => self.fcsr = value & FCSR_MASK,
            CsrSlot::CounterLow(counter) => {
                let current = self.counters[counter.index()];
                self.counters[counter.index()] = (current & !0xFFFF_FFFF) | u64::from(value);
            }
            CsrSlot::CounterHigh(counter) => {
                let current = self.counters[counter.index()];
                self.counters[counter.index()] = (current & 0xFFFF_FFFF) | (u64::from(value) << 32);
            }
        }
        Ok(old)
    }

    /// Returns whether ordinary writes to `addr` are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`CsrError::Unknown`] for unmodelled addresses.
    pub fn is_read_only(&self, addr: u16) -> Result<bool, CsrError> {
        csr_descriptor(addr)
            .map(|descriptor| descriptor.read_only)
            .ok_or(CsrError::Unknown(addr))
    }

    /// Reads a full 64-bit counter.
    #[must_use]
    pub const fn counter(&self, counter: Counter) -> u64 {
        self.counters[counter.index()]
    }

    /// Overwrites a full 64-bit counter.
    pub const fn set_counter(&mut self, counter: Counter, value: u64) {
        self.counters[counter.index()] = value;
    }

    /// `ustatus` value.
    #[must_use]
    pub const fn ustatus(&self) -> u32 {
        self.plain[0]
    }

    /// `uie` value.
    #[must_use]
    pub const fn uie(&self) -> u32 {
        self.plain[1]
    }

    /// `utvec` value.
    #[must_use]
    pub const fn utvec(&self) -> u32 {
        self.plain[2]
    }

    /// `uepc` value.
    #[must_use]
    pub const fn uepc(&self) -> u32 {
        self.plain[4]
    }

    /// `ucause` value.
    #[must_use]
    pub const fn ucause(&self) -> u32 {
        self.plain[5]
    }

    /// `utval` value.
    #[must_use]
    pub const fn utval(&self) -> u32 {
        self.plain[6]
    }

    /// `uip` value.
    #[must_use]
    pub const fn uip(&self) -> u32 {
        self.plain[7]
    }

    /// Returns `true` when `ustatus.UIE` is set.
    #[must_use]
    pub const fn interrupts_enabled(&self) -> bool {
        self.ustatus() & USTATUS_UIE != 0
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn read_slot(&self, slot: CsrSlot) -> u32 {
        match slot {
            CsrSlot::Plain(index, _) => self.plain[index],
            CsrSlot::Fflags => self.fcsr & FFLAGS_MASK,
            CsrSlot::Frm => (self.fcsr >> FRM_SHIFT) & FRM_MASK,
            CsrSlot::Fcsr => self.fcsr,
            CsrSlot::CounterLow(counter) => self.counters[counter.index()] as u32,
            CsrSlot::CounterHigh(counter) => (self.counters[counter.index()] >> 32) as u32,
        }
    }
}
