//! Architecture-specific constants and the `SupportedArch` tag.
//!
//! Patterned on the teacher's `kernel_abi::SupportedArch` split: one enum
//! tag, with everything arch-dependent (trap bytes, word size, ELF
//! machine id) hanging off methods on it instead of scattered `#[cfg]`s.

use std::fmt;

pub const PAGE_SIZE: usize = 4096;

/// Single-byte `int3` trap, x86 and x86-64 share this encoding.
pub const TRAP_BYTE: u8 = 0xcc;
pub const TRAP_LEN: usize = 1;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SupportedArch {
    X86,
    X64,
}

impl SupportedArch {
    /// The architecture rappel runs as when not overridden; there is no
    /// cross-arch tracing support (the tracee always matches the host).
    pub const NATIVE: SupportedArch = {
        #[cfg(target_arch = "x86_64")]
        {
            SupportedArch::X64
        }
        #[cfg(target_arch = "x86")]
        {
            SupportedArch::X86
        }
    };

    pub fn word_size(self) -> usize {
        match self {
            SupportedArch::X86 => 4,
            SupportedArch::X64 => 8,
        }
    }

    /// ELF `e_machine` value for this architecture.
    pub fn elf_machine(self) -> u16 {
        match self {
            SupportedArch::X86 => 3,  // EM_386
            SupportedArch::X64 => 62, // EM_X86_64
        }
    }

    pub fn elf_class_is_64(self) -> bool {
        matches!(self, SupportedArch::X64)
    }

    /// Keystone mode for this architecture (see `crate::assemble`).
    pub fn keystone_mode(self) -> keystone_engine::Mode {
        match self {
            SupportedArch::X86 => keystone_engine::Mode::MODE_32,
            SupportedArch::X64 => keystone_engine::Mode::MODE_64,
        }
    }
}

impl fmt::Display for SupportedArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupportedArch::X86 => write!(f, "x86"),
            SupportedArch::X64 => write!(f, "x86-64"),
        }
    }
}

/// Round `n` up to the next multiple of `word_size`, matching the
/// original's `ROUNDUP(x, y)` macro.
pub fn roundup(n: usize, word_size: usize) -> usize {
    (n + word_size - 1) / word_size * word_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundup_exact_multiple_is_unchanged() {
        assert_eq!(roundup(8, 8), 8);
    }

    #[test]
    fn roundup_rounds_up_to_next_word() {
        assert_eq!(roundup(1, 8), 8);
        assert_eq!(roundup(9, 8), 16);
        assert_eq!(roundup(0, 8), 0);
    }

    #[test]
    fn native_arch_is_64_bit_on_this_target() {
        assert_eq!(SupportedArch::NATIVE.word_size(), 8);
    }
}
