//! Memory model primitives and fixed address-space policies.
//!
//! [`Memory`] is plain storage: it validates accesses and reports the value a
//! write replaced, but never records undo entries or notifies observers.
//! Those concerns live one level up in [`crate::MachineState`].

/// Access legality policy helpers.
pub mod access;
/// Fixed memory-region map and address decoder.
pub mod map;

use std::collections::{BTreeMap, HashMap};

pub use access::{validate_fetch_access, validate_load_access, validate_store_access, AccessWidth};
pub use map::{
    decode_memory_region, MemoryRegion, RegionDescriptor, DATA_END, DATA_START,
    FIXED_MEMORY_REGIONS, GLOBAL_POINTER_DEFAULT, KERNEL_END, KERNEL_START, MMIO_END, MMIO_START,
    RESERVED_END, RESERVED_START, STACK_POINTER_DEFAULT, TEXT_END, TEXT_START,
};

use crate::{AddressFault, Statement};

/// Size in bytes of one lazily allocated backing page.
pub const PAGE_SIZE: usize = 4096;

#[allow(clippy::cast_possible_truncation)]
const PAGE_SHIFT: u32 = PAGE_SIZE.trailing_zeros();
const PAGE_MASK: u32 = (1 << PAGE_SHIFT) - 1;

/// Sparse little-endian 32-bit address space plus the decoded text segment.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    pages: HashMap<u32, Box<[u8; PAGE_SIZE]>>,
    statements: BTreeMap<u32, Statement>,
    allow_text_writes: bool,
}

impl Memory {
    /// Creates an empty address space.
    #[must_use]
    pub fn new(allow_text_writes: bool) -> Self {
        Self {
            allow_text_writes,
            ..Self::default()
        }
    }

    /// Returns `true` when ordinary stores may target the text segment.
    #[must_use]
    pub const fn allows_text_writes(&self) -> bool {
        self.allow_text_writes
    }

    /// Drops all data and statements.
    pub fn clear(&mut self) {
        self.pages.clear();
        self.statements.clear();
    }

    /// Returns the decoded statement at `addr`, or `None` past the program.
    ///
    /// # Errors
    ///
    /// Returns a fetch [`AddressFault`] when `addr` is misaligned or outside
    /// the text segment.
    pub fn statement(&self, addr: u32) -> Result<Option<Statement>, AddressFault> {
        validate_fetch_access(addr)?;
        Ok(self.statements.get(&addr).cloned())
    }

    /// Places statements contiguously from `base`, storing each encoding in
    /// the text segment. Returns the address following the last statement.
    ///
    /// # Errors
    ///
    /// Returns a fetch [`AddressFault`] if any statement lands outside text.
    pub fn load_program<I>(&mut self, base: u32, program: I) -> Result<u32, AddressFault>
    where
        I: IntoIterator<Item = Statement>,
    {
        let mut addr = base;
        for statement in program {
            validate_fetch_access(addr)?;
            self.write_bytes(addr, AccessWidth::Word, u64::from(statement.encoding()));
            let length = statement.length();
            self.statements.insert(addr, statement);
            addr = addr.wrapping_add(length);
        }
        Ok(addr)
    }

    /// Number of statements in the text segment.
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    /// Reads a byte.
    ///
    /// # Errors
    ///
    /// Returns a load [`AddressFault`] for illegal addresses.
    pub fn byte(&self, addr: u32) -> Result<u8, AddressFault> {
        validate_load_access(addr, AccessWidth::Byte)?;
        #[allow(clippy::cast_possible_truncation)]
        Ok(self.read_bytes(addr, AccessWidth::Byte) as u8)
    }

    /// Reads a halfword.
    ///
    /// # Errors
    ///
    /// Returns a load [`AddressFault`] for illegal or misaligned addresses.
    pub fn half(&self, addr: u32) -> Result<u16, AddressFault> {
        validate_load_access(addr, AccessWidth::Half)?;
        #[allow(clippy::cast_possible_truncation)]
        Ok(self.read_bytes(addr, AccessWidth::Half) as u16)
    }

    /// Reads a word.
    ///
    /// # Errors
    ///
    /// Returns a load [`AddressFault`] for illegal or misaligned addresses.
    pub fn word(&self, addr: u32) -> Result<u32, AddressFault> {
        validate_load_access(addr, AccessWidth::Word)?;
        #[allow(clippy::cast_possible_truncation)]
        Ok(self.read_bytes(addr, AccessWidth::Word) as u32)
    }

    /// Reads a doubleword.
    ///
    /// # Errors
    ///
    /// Returns a load [`AddressFault`] for illegal or misaligned addresses.
    pub fn double_word(&self, addr: u32) -> Result<u64, AddressFault> {
        validate_load_access(addr, AccessWidth::Double)?;
        Ok(self.read_bytes(addr, AccessWidth::Double))
    }

    /// Reads the raw word at `addr`, typically an encoding in the text segment.
    ///
    /// # Errors
    ///
    /// Returns a load [`AddressFault`] for illegal or misaligned addresses.
    pub fn raw_word(&self, addr: u32) -> Result<u32, AddressFault> {
        self.word(addr)
    }

    /// Writes a byte and returns the value it replaced.
    ///
    /// # Errors
    ///
    /// Returns a store [`AddressFault`] for illegal addresses.
    pub fn set_byte(&mut self, addr: u32, value: u8) -> Result<u8, AddressFault> {
        validate_store_access(addr, AccessWidth::Byte, self.allow_text_writes)?;
        #[allow(clippy::cast_possible_truncation)]
        Ok(self.write_bytes(addr, AccessWidth::Byte, u64::from(value)) as u8)
    }

    /// Writes a halfword and returns the value it replaced.
    ///
    /// # Errors
    ///
    /// Returns a store [`AddressFault`] for illegal or misaligned addresses.
    pub fn set_half(&mut self, addr: u32, value: u16) -> Result<u16, AddressFault> {
        validate_store_access(addr, AccessWidth::Half, self.allow_text_writes)?;
        #[allow(clippy::cast_possible_truncation)]
        Ok(self.write_bytes(addr, AccessWidth::Half, u64::from(value)) as u16)
    }

    /// Writes a word and returns the value it replaced.
    ///
    /// # Errors
    ///
    /// Returns a store [`AddressFault`] for illegal or misaligned addresses.
    pub fn set_word(&mut self, addr: u32, value: u32) -> Result<u32, AddressFault> {
        validate_store_access(addr, AccessWidth::Word, self.allow_text_writes)?;
        #[allow(clippy::cast_possible_truncation)]
        Ok(self.write_bytes(addr, AccessWidth::Word, u64::from(value)) as u32)
    }

    /// Writes a doubleword and returns the value it replaced.
    ///
    /// # Errors
    ///
    /// Returns a store [`AddressFault`] for illegal or misaligned addresses.
    pub fn set_double_word(&mut self, addr: u32, value: u64) -> Result<u64, AddressFault> {
        validate_store_access(addr, AccessWidth::Double, self.allow_text_writes)?;
        Ok(self.write_bytes(addr, AccessWidth::Double, value))
    }

    /// Writes a word into text or data regardless of the text-write policy.
    /// Loaders use this to patch encodings. Returns the replaced word.
    ///
    /// # Errors
    ///
    /// Returns a store [`AddressFault`] for illegal or misaligned addresses.
    pub fn set_raw_word(&mut self, addr: u32, value: u32) -> Result<u32, AddressFault> {
        validate_store_access(addr, AccessWidth::Word, true)?;
        #[allow(clippy::cast_possible_truncation)]
        Ok(self.write_bytes(addr, AccessWidth::Word, u64::from(value)) as u32)
    }

    /// Backdoor write used by undo replay: ignores the text-write policy and
    /// returns nothing.
    ///
    /// # Errors
    ///
    /// Returns a store [`AddressFault`] when the address could never have
    /// been written.
    pub fn restore(&mut self, addr: u32, width: AccessWidth, value: u64) -> Result<(), AddressFault> {
        validate_store_access(addr, width, true)?;
        self.write_bytes(addr, width, value);
        Ok(())
    }

    fn read_bytes(&self, addr: u32, width: AccessWidth) -> u64 {
        let mut value = 0_u64;
        for offset in (0..width.bytes()).rev() {
            value = (value << 8) | u64::from(self.load_byte(addr.wrapping_add(offset)));
        }
        value
    }

    fn write_bytes(&mut self, addr: u32, width: AccessWidth, value: u64) -> u64 {
        let old = self.read_bytes(addr, width);
        for offset in 0..width.bytes() {
            #[allow(clippy::cast_possible_truncation)]
            let byte = (value >> (8 * offset)) as u8;
            self.store_byte(addr.wrapping_add(offset), byte);
        }
        old
    }

    fn load_byte(&self, addr: u32) -> u8 {
        self.pages
            .get(&(addr >> PAGE_SHIFT))
            .map_or(0, |page| page[(addr & PAGE_MASK) as usize])
    }

    fn store_byte(&mut self, addr: u32, byte: u8) {
        let page = self
            .pages
            .entry(addr >> PAGE_SHIFT)
            .or_insert_with(|| Box::new([0; PAGE_SIZE]));
        page[(addr & PAGE_MASK) as usize] = byte;
    }
}
