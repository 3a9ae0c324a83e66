use std::fmt;

use thiserror::Error;

use crate::CsrError;

/// Bit 31 of `ucause`, set when the cause is an asynchronous interrupt.
pub const INTERRUPT_CAUSE_BIT: u32 = 0x8000_0000;

/// Kind of memory access that produced an [`AddressFault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessKind {
    /// Instruction fetch.
    Fetch,
    /// Data read.
    Load,
    /// Data write.
    Store,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetch => "fetch",
            Self::Load => "load",
            Self::Store => "store",
        })
    }
}

/// Memory access failure raised by the address-space model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AddressFault {
    /// Access width does not divide the address.
    #[error("misaligned {kind} at {addr:#010x}")]
    Misaligned {
        /// Access kind.
        kind: AccessKind,
        /// Faulting address.
        addr: u32,
    },
    /// Address is outside every region the access kind may touch.
    #[error("{kind} access fault at {addr:#010x}")]
    OutOfRange {
        /// Access kind.
        kind: AccessKind,
        /// Faulting address.
        addr: u32,
    },
}

impl AddressFault {
    /// Returns the faulting address (stored into `utval` on dispatch).
    #[must_use]
    pub const fn addr(self) -> u32 {
        match self {
            Self::Misaligned { addr, .. } | Self::OutOfRange { addr, .. } => addr,
        }
    }

    /// Maps the fault to its architectural trap cause.
    #[must_use]
    pub const fn cause(self) -> TrapCause {
        match self {
            Self::Misaligned { kind, .. } => match kind {
                AccessKind::Fetch => TrapCause::InstructionAddressMisaligned,
                AccessKind::Load => TrapCause::LoadAddressMisaligned,
                AccessKind::Store => TrapCause::StoreAddressMisaligned,
            },
            Self::OutOfRange { kind, .. } => match kind {
                AccessKind::Fetch => TrapCause::InstructionAccessFault,
                AccessKind::Load => TrapCause::LoadAccessFault,
                AccessKind::Store => TrapCause::StoreAccessFault,
            },
        }
    }
}

/// Synchronous exception causes written to `ucause`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u32)]
pub enum TrapCause {
    /// Fetch from an address that is not 4-byte aligned.
    InstructionAddressMisaligned = 0,
    /// Fetch from outside the text segment.
    InstructionAccessFault = 1,
    /// Undefined or malformed instruction.
    IllegalInstruction = 2,
    /// `ebreak` routed through the trap handler.
    Breakpoint = 3,
    /// Misaligned data read.
    LoadAddressMisaligned = 4,
    /// Data read outside readable memory.
    LoadAccessFault = 5,
    /// Misaligned data write.
    StoreAddressMisaligned = 6,
    /// Data write outside writable memory.
    StoreAccessFault = 7,
    /// `ecall` raised from user mode.
    EnvironmentCall = 8,
}

impl TrapCause {
    /// Returns the `ucause` exception code.
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Decodes an exception code back into a cause.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::InstructionAddressMisaligned),
            1 => Some(Self::InstructionAccessFault),
            2 => Some(Self::IllegalInstruction),
            3 => Some(Self::Breakpoint),
            4 => Some(Self::LoadAddressMisaligned),
            5 => Some(Self::LoadAccessFault),
            6 => Some(Self::StoreAddressMisaligned),
            7 => Some(Self::StoreAccessFault),
            8 => Some(Self::EnvironmentCall),
            _ => None,
        }
    }
}

/// Asynchronous interrupt sources, in their `uie`/`uip` bit positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u32)]
pub enum InterruptCause {
    /// User software interrupt (`USIP`/`USIE`, bit 0).
    Software = 0,
    /// User timer interrupt (`UTIP`/`UTIE`, bit 4).
    Timer = 4,
    /// User external interrupt (`UEIP`/`UEIE`, bit 8).
    External = 8,
}

impl InterruptCause {
    /// Returns the interrupt code (also the vector slot index).
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Returns the enable/pending mask bit for this source.
    #[must_use]
    pub const fn mask(self) -> u32 {
        1 << self.code()
    }

    /// Returns the full `ucause` value with the interrupt bit set.
    #[must_use]
    pub const fn ucause(self) -> u32 {
        INTERRUPT_CAUSE_BIT | self.code()
    }
}

/// Synchronous exception raised by an executing instruction or a fetch.
///
/// An exception without a cause is unhandlable: it cannot be routed to a
/// trap handler and always terminates the run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[error("{message}")]
pub struct Exception {
    cause: Option<TrapCause>,
    value: u32,
    message: String,
}

impl Exception {
    /// Creates a handlable exception with a `utval` payload.
    #[must_use]
    pub fn new(cause: TrapCause, value: u32, message: impl Into<String>) -> Self {
        Self {
            cause: Some(cause),
            value,
            message: message.into(),
        }
    }

    /// Creates an exception that no trap handler may service.
    #[must_use]
    pub fn unhandlable(message: impl Into<String>) -> Self {
        Self {
            cause: None,
            value: 0,
            message: message.into(),
        }
    }

    /// Illegal instruction carrying the offending encoding in `utval`.
    #[must_use]
    pub fn illegal_instruction(encoding: u32) -> Self {
        Self::new(
            TrapCause::IllegalInstruction,
            encoding,
            format!("illegal instruction {encoding:#010x}"),
        )
    }

    /// Returns the architectural cause, if any.
    #[must_use]
    pub const fn cause(&self) -> Option<TrapCause> {
        self.cause
    }

    /// Returns the `utval` payload.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.value
    }

    /// Returns the human-readable description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` when the exception can be routed to a trap handler.
    #[must_use]
    pub const fn is_handlable(&self) -> bool {
        self.cause.is_some()
    }
}

impl From<AddressFault> for Exception {
    fn from(fault: AddressFault) -> Self {
        Self::new(fault.cause(), fault.addr(), fault.to_string())
    }
}

/// Fatal conditions that end a run with [`crate::StopReason::Exception`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SimError {
    /// Trap could not be queued or no handler resolved for it.
    #[error("unhandled trap at {pc:#010x}: {exception}")]
    UnhandledTrap {
        /// Address of the faulting instruction.
        pc: u32,
        /// Trap payload.
        exception: Exception,
    },
    /// Interrupt was enabled and pending but no handler resolved at its vector.
    #[error("no handler for {cause:?} interrupt at {vector:#010x}")]
    UnhandledInterrupt {
        /// Interrupt source.
        cause: InterruptCause,
        /// Resolved handler address.
        vector: u32,
    },
    /// Program requested termination with an error.
    #[error("program exited with error: {0}")]
    ExitFault(Exception),
    /// Trap entry could not update a CSR.
    #[error("trap entry failed: {0}")]
    Csr(#[from] CsrError),
}

impl SimError {
    /// Returns the exception attached to this error, when there is one.
    #[must_use]
    pub const fn exception(&self) -> Option<&Exception> {
        match self {
            Self::UnhandledTrap { exception, .. } | Self::ExitFault(exception) => Some(exception),
            Self::UnhandledInterrupt { .. } | Self::Csr(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AccessKind, AddressFault, Exception, InterruptCause, SimError, TrapCause,
        INTERRUPT_CAUSE_BIT,
    };
    use crate::CsrError;

    #[test]
    fn trap_cause_codes_roundtrip() {
        for code in 0_u32..=8 {
            let cause = TrapCause::from_code(code).expect("defined exception code");
            assert_eq!(cause.code(), code);
        }
        assert!(TrapCause::from_code(9).is_none());
    }

    #[test]
    fn address_faults_map_to_access_specific_causes() {
        let cases = [
            (AccessKind::Fetch, TrapCause::InstructionAddressMisaligned, TrapCause::InstructionAccessFault),
            (AccessKind::Load, TrapCause::LoadAddressMisaligned, TrapCause::LoadAccessFault),
            (AccessKind::Store, TrapCause::StoreAddressMisaligned, TrapCause::StoreAccessFault),
        ];
        for (kind, misaligned, out_of_range) in cases {
            let fault = AddressFault::Misaligned { kind, addr: 3 };
            assert_eq!(fault.cause(), misaligned);
            assert_eq!(fault.addr(), 3);
            assert_eq!(AddressFault::OutOfRange { kind, addr: 0 }.cause(), out_of_range);
        }
    }

    #[test]
    fn exception_from_address_fault_carries_address_as_value() {
        let exception = Exception::from(AddressFault::OutOfRange {
            kind: AccessKind::Store,
            addr: 0x8000_0000,
        });
        assert_eq!(exception.cause(), Some(TrapCause::StoreAccessFault));
        assert_eq!(exception.value(), 0x8000_0000);
        assert!(exception.is_handlable());
        assert!(exception.message().contains("store"));
    }

    #[test]
    fn unhandlable_exceptions_have_no_cause() {
        let exception = Exception::unhandlable("simulator bug");
        assert!(!exception.is_handlable());
        assert_eq!(exception.cause(), None);
    }

    #[test]
    fn interrupt_cause_values_set_the_interrupt_bit() {
        assert_eq!(InterruptCause::Software.ucause(), INTERRUPT_CAUSE_BIT);
        assert_eq!(InterruptCause::Timer.ucause(), INTERRUPT_CAUSE_BIT | 4);
        assert_eq!(InterruptCause::External.mask(), 0x100);
    }

    #[test]
    fn sim_error_exposes_attached_exception() {
        let error = SimError::ExitFault(Exception::illegal_instruction(0xFFFF_FFFF));
        assert_eq!(
            error.exception().and_then(Exception::cause),
            Some(TrapCause::IllegalInstruction)
        );
        let interrupt = SimError::UnhandledInterrupt {
            cause: InterruptCause::Timer,
            vector: 0x0040_0010,
        };
        assert!(interrupt.exception().is_none());
    }

    #[test]
    fn csr_failures_surface_as_run_errors() {
        let error = SimError::from(CsrError::Unknown(0x7FF));
        assert_eq!(error, SimError::Csr(CsrError::Unknown(0x7FF)));
        assert_eq!(error.exception(), None);
        assert!(error.to_string().starts_with("trap entry failed"));
    }
}
