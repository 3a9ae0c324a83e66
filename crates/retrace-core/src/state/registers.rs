/// Number of integer registers (`x0..x31`).
pub const GENERAL_REGISTER_COUNT: usize = 32;
/// Number of floating-point registers (`f0..f31`).
pub const FLOAT_REGISTER_COUNT: usize = 32;

/// ABI names of the integer registers, indexed by register number.
pub const ABI_NAMES: [&str; GENERAL_REGISTER_COUNT] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

/// ABI names of the floating-point registers, indexed by register number.
pub const FLOAT_ABI_NAMES: [&str; FLOAT_REGISTER_COUNT] = [
    "ft0", "ft1", "ft2", "ft3", "ft4", "ft5", "ft6", "ft7", "fs0", "fs1", "fa0", "fa1", "fa2",
    "fa3", "fa4", "fa5", "fa6", "fa7", "fs2", "fs3", "fs4", "fs5", "fs6", "fs7", "fs8", "fs9",
    "fs10", "fs11", "ft8", "ft9", "ft10", "ft11",
];

/// Integer register number, guaranteed to be in `0..32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Reg(u8);

impl Reg {
    /// Hard-wired zero register.
    pub const ZERO: Self = Self(0);
    /// Return address.
    pub const RA: Self = Self(1);
    /// Stack pointer.
    pub const SP: Self = Self(2);
    /// Global pointer.
    pub const GP: Self = Self(3);
    /// First argument / return value.
    pub const A0: Self = Self(10);
    /// Second argument / return value.
    pub const A1: Self = Self(11);
    /// Syscall number register.
    pub const A7: Self = Self(17);

    /// Validates a register number.
    #[must_use]
    pub const fn new(index: u32) -> Option<Self> {
        if index < GENERAL_REGISTER_COUNT as u32 {
            #[allow(clippy::cast_possible_truncation)]
            Some(Self(index as u8))
        } else {
            None
        }
    }

    /// Resolves `xN` or an ABI name (`fp` aliases `s0`).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if name == "fp" {
            return Some(Self(8));
        }
        if let Some(number) = name.strip_prefix('x') {
            return number.parse().ok().and_then(Self::new);
        }
        ABI_NAMES
            .iter()
            .position(|abi| *abi == name)
            .and_then(|index| u32::try_from(index).ok())
            .and_then(Self::new)
    }

    /// Array index of this register.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// ABI name of this register.
    #[must_use]
    pub const fn name(self) -> &'static str {
        ABI_NAMES[self.0 as usize]
    }
}

/// Floating-point register number, guaranteed to be in `0..32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct FReg(u8);

impl FReg {
    /// Validates a floating-point register number.
    #[must_use]
    pub const fn new(index: u32) -> Option<Self> {
        if index < FLOAT_REGISTER_COUNT as u32 {
            #[allow(clippy::cast_possible_truncation)]
            Some(Self(index as u8))
        } else {
            None
        }
    }

    /// Resolves `fN` or an ABI name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if let Some(index) = FLOAT_ABI_NAMES.iter().position(|abi| *abi == name) {
            return u32::try_from(index).ok().and_then(Self::new);
        }
        name.strip_prefix('f')
            .and_then(|number| number.parse().ok())
            .and_then(Self::new)
    }

    /// Array index of this register.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Integer register file plus the program counter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegisterFile {
    gpr: [u32; GENERAL_REGISTER_COUNT],
    pc: u32,
}

impl RegisterFile {
    /// Reads an integer register. `x0` always reads zero.
    #[must_use]
    pub const fn get(&self, reg: Reg) -> u32 {
        self.gpr[reg.index()]
    }

    /// Writes an integer register and returns the replaced value. Writes to
    /// `x0` are discarded and return `None`.
    pub const fn set(&mut self, reg: Reg, value: u32) -> Option<u32> {
        if reg.index() == 0 {
            return None;
        }
        let old = self.gpr[reg.index()];
        self.gpr[reg.index()] = value;
        Some(old)
    }

    /// Reads the program counter.
    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.pc
    }

    /// Writes the program counter and returns the replaced value.
    pub const fn set_pc(&mut self, value: u32) -> u32 {
        let old = self.pc;
        self.pc = value;
        old
    }
}

/// Floating-point register file holding raw 64-bit patterns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct FloatRegisterFile {
    regs: [u64; FLOAT_REGISTER_COUNT],
}

impl FloatRegisterFile {
    /// Reads a register's raw bits.
    #[must_use]
    pub const fn get(&self, reg: FReg) -> u64 {
        self.regs[reg.index()]
    }

    /// Writes a register's raw bits and returns the replaced value.
    pub const fn set(&mut self, reg: FReg, bits: u64) -> u64 {
        let old = self.regs[reg.index()];
        self.regs[reg.index()] = bits;
        old
    }
}
