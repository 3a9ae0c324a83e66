//! Fixed 32-bit address-space map and region decoding helpers.

/// Inclusive start of the low reserved region.
pub const RESERVED_START: u32 = 0x0000_0000;
/// Inclusive end of the low reserved region.
pub const RESERVED_END: u32 = 0x003F_FFFF;
/// Inclusive start of the text (instruction) segment.
pub const TEXT_START: u32 = 0x0040_0000;
/// Inclusive end of the text segment.
pub const TEXT_END: u32 = 0x0FFF_FFFF;
/// Inclusive start of the data segment (static data, heap and stack).
pub const DATA_START: u32 = 0x1000_0000;
/// Inclusive end of the data segment.
pub const DATA_END: u32 = 0x7FFF_FFFF;
/// Inclusive start of the kernel region (inaccessible in user mode).
pub const KERNEL_START: u32 = 0x8000_0000;
/// Inclusive end of the kernel region.
pub const KERNEL_END: u32 = 0xFFFE_FFFF;
/// Inclusive start of the memory-mapped I/O region.
pub const MMIO_START: u32 = 0xFFFF_0000;
/// Inclusive end of the memory-mapped I/O region.
pub const MMIO_END: u32 = 0xFFFF_FFFF;

/// Initial stack pointer handed to programs by convention.
pub const STACK_POINTER_DEFAULT: u32 = 0x7FFF_EFFC;
/// Initial global pointer handed to programs by convention.
pub const GLOBAL_POINTER_DEFAULT: u32 = 0x1000_8000;

/// Fixed-region descriptor for the architectural memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionDescriptor {
    /// Region classification.
    pub region: MemoryRegion,
    /// Inclusive start address.
    pub start: u32,
    /// Inclusive end address.
    pub end: u32,
}

/// Region classification for architectural addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryRegion {
    /// Low reserved region, never mapped.
    Reserved,
    /// Text segment holding decoded statements.
    Text,
    /// Data segment.
    Data,
    /// Kernel region, not accessible to user code.
    Kernel,
    /// Memory-mapped device registers.
    Mmio,
}

impl MemoryRegion {
    /// Returns the inclusive bounds for this region.
    #[must_use]
    pub const fn bounds(self) -> (u32, u32) {
        match self {
            Self::Reserved => (RESERVED_START, RESERVED_END),
            Self::Text => (TEXT_START, TEXT_END),
            Self::Data => (DATA_START, DATA_END),
            Self::Kernel => (KERNEL_START, KERNEL_END),
            Self::Mmio => (MMIO_START, MMIO_END),
        }
    }

    /// Returns `true` when `addr` belongs to this region.
    #[must_use]
    pub const fn contains(self, addr: u32) -> bool {
        let (start, end) = self.bounds();
        addr >= start && addr <= end
    }

    /// Returns the canonical descriptor for this region.
    #[must_use]
    pub const fn descriptor(self) -> RegionDescriptor {
        let (start, end) = self.bounds();
        RegionDescriptor {
            region: self,
            start,
            end,
        }
    }
}

/// Fixed region layout in ascending address order.
pub const FIXED_MEMORY_REGIONS: [RegionDescriptor; 5] = [
    MemoryRegion::Reserved.descriptor(),
    MemoryRegion::Text.descriptor(),
    MemoryRegion::Data.descriptor(),
    MemoryRegion::Kernel.descriptor(),
    MemoryRegion::Mmio.descriptor(),
];

const _: () = assert_fixed_region_layout();

const fn assert_fixed_region_layout() {
    let mut index = 0;
    while index < FIXED_MEMORY_REGIONS.len() {
        let descriptor = FIXED_MEMORY_REGIONS[index];
        assert!(
            descriptor.start <= descriptor.end,
            "region start cannot be greater than end"
        );

        if index > 0 {
            let previous = FIXED_MEMORY_REGIONS[index - 1];
            assert!(
                previous.end.wrapping_add(1) == descriptor.start,
                "fixed regions must be contiguous"
            );
        }

        index += 1;
    }

    assert!(
        FIXED_MEMORY_REGIONS[0].start == 0 && FIXED_MEMORY_REGIONS[4].end == u32::MAX,
        "fixed regions must cover full address space"
    );
}

/// Decodes a 32-bit address into its fixed memory region.
#[must_use]
pub const fn decode_memory_region(addr: u32) -> MemoryRegion {
    match addr {
        RESERVED_START..=RESERVED_END => MemoryRegion::Reserved,
        TEXT_START..=TEXT_END => MemoryRegion::Text,
        DATA_START..=DATA_END => MemoryRegion::Data,
        KERNEL_START..=KERNEL_END => MemoryRegion::Kernel,
        MMIO_START..=MMIO_END => MemoryRegion::Mmio,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        decode_memory_region, MemoryRegion, DATA_END, DATA_START, FIXED_MEMORY_REGIONS,
        KERNEL_END, KERNEL_START, MMIO_END, MMIO_START, RESERVED_END, RESERVED_START, TEXT_END,
        TEXT_START,
    };

    #[test]
    fn region_decode_is_correct_at_boundaries() {
        assert_eq!(decode_memory_region(RESERVED_START), MemoryRegion::Reserved);
        assert_eq!(decode_memory_region(RESERVED_END), MemoryRegion::Reserved);
        assert_eq!(decode_memory_region(TEXT_START), MemoryRegion::Text);
        assert_eq!(decode_memory_region(TEXT_END), MemoryRegion::Text);
        assert_eq!(decode_memory_region(DATA_START), MemoryRegion::Data);
        assert_eq!(decode_memory_region(DATA_END), MemoryRegion::Data);
        assert_eq!(decode_memory_region(KERNEL_START), MemoryRegion::Kernel);
        assert_eq!(decode_memory_region(KERNEL_END), MemoryRegion::Kernel);
        assert_eq!(decode_memory_region(MMIO_START), MemoryRegion::Mmio);
        assert_eq!(decode_memory_region(MMIO_END), MemoryRegion::Mmio);
    }

    #[test]
    fn descriptors_agree_with_decoder() {
        for descriptor in FIXED_MEMORY_REGIONS {
            assert_eq!(decode_memory_region(descriptor.start), descriptor.region);
            assert_eq!(decode_memory_region(descriptor.end), descriptor.region);
            assert!(descriptor.region.contains(descriptor.start));
            assert!(!descriptor.region.contains(descriptor.end.wrapping_add(1)));
        }
    }
}
