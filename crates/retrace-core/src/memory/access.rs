//! Access legality policy by fixed architectural region.

use crate::{decode_memory_region, AccessKind, AddressFault, MemoryRegion};

/// Width of a data access in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessWidth {
    /// 8-bit access.
    Byte,
    /// 16-bit access.
    Half,
    /// 32-bit access.
    Word,
    /// 64-bit access (floating-point doubles).
    Double,
}

impl AccessWidth {
    /// Number of bytes moved by the access.
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Half => 2,
            Self::Word => 4,
            Self::Double => 8,
        }
    }

    /// Required address alignment. Doubles only need word alignment.
    #[must_use]
    pub const fn alignment(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Half => 2,
            Self::Word | Self::Double => 4,
        }
    }
}

/// Validates an instruction fetch address.
///
/// # Errors
///
/// Returns [`AddressFault::Misaligned`] when `addr` is not word aligned and
/// [`AddressFault::OutOfRange`] when it lies outside the text segment.
pub const fn validate_fetch_access(addr: u32) -> Result<(), AddressFault> {
    if addr % 4 != 0 {
        return Err(AddressFault::Misaligned {
            kind: AccessKind::Fetch,
            addr,
        });
    }
    match decode_memory_region(addr) {
        MemoryRegion::Text => Ok(()),
        MemoryRegion::Reserved | MemoryRegion::Data | MemoryRegion::Kernel | MemoryRegion::Mmio => {
            Err(AddressFault::OutOfRange {
                kind: AccessKind::Fetch,
                addr,
            })
        }
    }
}

/// Validates a data read of `width` at `addr`.
///
/// Reads are legal from text, data and MMIO.
///
/// # Errors
///
/// Returns [`AddressFault::Misaligned`] or [`AddressFault::OutOfRange`].
pub const fn validate_load_access(addr: u32, width: AccessWidth) -> Result<(), AddressFault> {
    if addr % width.alignment() != 0 {
        return Err(AddressFault::Misaligned {
            kind: AccessKind::Load,
            addr,
        });
    }
    let legal = match last_byte(addr, width) {
        Some(last) => loadable(decode_memory_region(addr)) && loadable(decode_memory_region(last)),
        None => false,
    };
    if legal {
        Ok(())
    } else {
        Err(AddressFault::OutOfRange {
            kind: AccessKind::Load,
            addr,
        })
    }
}

/// Validates a data write of `width` at `addr`.
///
/// Writes are legal to data and MMIO, and to text only when
/// `allow_text_writes` is set (self-modifying code).
///
/// # Errors
///
/// Returns [`AddressFault::Misaligned`] or [`AddressFault::OutOfRange`].
pub const fn validate_store_access(
    addr: u32,
    width: AccessWidth,
    allow_text_writes: bool,
) -> Result<(), AddressFault> {
    if addr % width.alignment() != 0 {
        return Err(AddressFault::Misaligned {
            kind: AccessKind::Store,
            addr,
        });
    }
    let legal = match last_byte(addr, width) {
        Some(last) => {
            storable(decode_memory_region(addr), allow_text_writes)
                && storable(decode_memory_region(last), allow_text_writes)
        }
        None => false,
    };
    if legal {
        Ok(())
    } else {
        Err(AddressFault::OutOfRange {
            kind: AccessKind::Store,
            addr,
        })
    }
}

/// Address of the final byte touched, or `None` when the access wraps past
/// the top of the address space.
const fn last_byte(addr: u32, width: AccessWidth) -> Option<u32> {
    addr.checked_add(width.bytes() - 1)
}

const fn loadable(region: MemoryRegion) -> bool {
    matches!(
        region,
        MemoryRegion::Text | MemoryRegion::Data | MemoryRegion::Mmio
    )
}

const fn storable(region: MemoryRegion, allow_text_writes: bool) -> bool {
    match region {
        MemoryRegion::Data | MemoryRegion::Mmio => true,
        MemoryRegion::Text => allow_text_writes,
        MemoryRegion::Reserved | MemoryRegion::Kernel => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{validate_fetch_access, validate_load_access, validate_store_access, AccessWidth};
    use crate::{
        AccessKind, AddressFault, DATA_END, DATA_START, KERNEL_START, MMIO_END, MMIO_START,
        RESERVED_END, TEXT_END, TEXT_START,
    };

    #[test]
    fn fetch_is_legal_only_from_aligned_text() {
        assert_eq!(validate_fetch_access(TEXT_START), Ok(()));
        assert_eq!(
            validate_fetch_access(TEXT_START + 2),
            Err(AddressFault::Misaligned {
                kind: AccessKind::Fetch,
                addr: TEXT_START + 2
            })
        );
        assert_eq!(
            validate_fetch_access(DATA_START),
            Err(AddressFault::OutOfRange {
                kind: AccessKind::Fetch,
                addr: DATA_START
            })
        );
    }

    #[test]
    fn loads_respect_width_alignment() {
        assert_eq!(validate_load_access(DATA_START + 1, AccessWidth::Byte), Ok(()));
        assert_eq!(validate_load_access(DATA_START + 2, AccessWidth::Half), Ok(()));
        assert!(validate_load_access(DATA_START + 2, AccessWidth::Word).is_err());
        assert_eq!(validate_load_access(DATA_START + 4, AccessWidth::Double), Ok(()));
        assert_eq!(validate_load_access(MMIO_START, AccessWidth::Word), Ok(()));
        assert_eq!(
            validate_load_access(RESERVED_END - 3, AccessWidth::Word),
            Err(AddressFault::OutOfRange {
                kind: AccessKind::Load,
                addr: RESERVED_END - 3
            })
        );
    }

    #[test]
    fn text_writes_require_opt_in() {
        assert!(validate_store_access(TEXT_START, AccessWidth::Word, false).is_err());
        assert_eq!(validate_store_access(TEXT_START, AccessWidth::Word, true), Ok(()));
        assert!(validate_store_access(KERNEL_START, AccessWidth::Word, true).is_err());
    }

    #[test]
    fn multi_byte_accesses_must_end_inside_a_legal_region() {
        assert_eq!(
            validate_store_access(DATA_END - 3, AccessWidth::Double, false),
            Err(AddressFault::OutOfRange {
                kind: AccessKind::Store,
                addr: DATA_END - 3
            })
        );
        assert_eq!(
            validate_store_access(MMIO_END - 3, AccessWidth::Double, false),
            Err(AddressFault::OutOfRange {
                kind: AccessKind::Store,
                addr: MMIO_END - 3
            })
        );
        assert!(validate_load_access(DATA_END - 3, AccessWidth::Double).is_err());
        assert!(validate_load_access(MMIO_END - 3, AccessWidth::Double).is_err());
        assert_eq!(validate_store_access(DATA_END - 3, AccessWidth::Word, false), Ok(()));
        assert_eq!(validate_store_access(MMIO_END - 7, AccessWidth::Double, false), Ok(()));
        assert_eq!(validate_load_access(TEXT_END - 3, AccessWidth::Double), Ok(()));
        assert!(validate_store_access(TEXT_END - 3, AccessWidth::Double, false).is_err());
    }
}
