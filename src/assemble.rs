//! Assembler bridge (C1): text assembly in, machine bytes (plus the
//! length of the first encoded instruction) out.
//!
//! Grounded directly on the original `ui.c`, which calls Keystone
//! (`ks_open`/`ks_asm`/`ks_free`/`ks_close`) for exactly this purpose,
//! including the separate "instruction length" query
//! (`get_instruction_length`) used to advance the prompt. This keeps
//! the same dependency, `keystone-engine`, behind a small wrapper so
//! the rest of the engine never touches the FFI surface.

use keystone_engine::{Arch, Keystone, Mode, OptionType, OptionValue};

use crate::arch::SupportedArch;
use crate::error::RappelError;

pub struct Assembler {
    engine: Keystone,
}

/// Result of one assembly pass: the full machine code, and the length
/// in bytes of the first source instruction (used by the engine to
/// advance the shell's logical PC, §4.5 step 8).
pub struct Assembled {
    pub bytes: Vec<u8>,
    pub first_instr_len: usize,
}

impl Assembler {
    pub fn new(arch: SupportedArch) -> Result<Assembler, RappelError> {
        let ks_arch = match arch {
            SupportedArch::X86 | SupportedArch::X64 => Arch::X86,
        };
        let mode = match arch {
            SupportedArch::X86 => Mode::MODE_32,
            SupportedArch::X64 => Mode::MODE_64,
        };

        let mut engine = Keystone::new(ks_arch, mode).map_err(|e| {
            RappelError::user_input(format!("keystone initialization failed: {e}"))
        })?;
        engine
            .option(OptionType::SYNTAX, OptionValue::SYNTAX_INTEL)
            .map_err(|e| RappelError::user_input(format!("keystone configuration failed: {e}")))?;

        Ok(Assembler { engine })
    }

    /// Assemble `source` (one or more lines, `\n`-separated). An empty
    /// or whitespace-only source assembles to zero bytes, which the
    /// engine treats as a no-op per §4.1. A Keystone syntax error is
    /// surfaced verbatim as `RappelError::UserInput`; the caller is
    /// expected to discard the current shot and leave the tracee
    /// untouched, per the same section.
    pub fn assemble(&self, source: &str) -> Result<Assembled, RappelError> {
        if source.trim().is_empty() {
            return Ok(Assembled {
                bytes: Vec::new(),
                first_instr_len: 0,
            });
        }

        let result = self
            .engine
            .asm(source.to_string(), 0)
            .map_err(|e| RappelError::user_input(format!("assembly failed: {e}")))?;

        if result.bytes.is_empty() {
            return Ok(Assembled {
                bytes: Vec::new(),
                first_instr_len: 0,
            });
        }

        let first_instr_len = self.first_instruction_len(source, result.bytes.len());

        Ok(Assembled {
            bytes: result.bytes,
            first_instr_len,
        })
    }

    /// Re-encode just the first non-empty source line to learn its
    /// byte length. Keystone has no API that returns per-instruction
    /// boundaries from a single `asm()` call, so a second, cheap
    /// encode of one line is the least-surprising way to get this
    /// without guessing at instruction lengths by hand; documented as
    /// a known, bounded exception in SPEC_FULL.md §4.1. Falls back to
    /// the whole shot's length if, for any reason, the first line
    /// can't be isolated and re-encoded on its own (e.g. an
    /// instruction that relies on a label defined on a later line).
    fn first_instruction_len(&self, source: &str, whole_len: usize) -> usize {
        let first_line = source
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty());

        match first_line {
            Some(line) => match self.engine.asm(line.to_string(), 0) {
                Ok(r) if !r.bytes.is_empty() => r.bytes.len(),
                _ => whole_len,
            },
            None => whole_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These exercise pure logic only; they don't construct a real
    // `Keystone` engine (which requires libkeystone to be present at
    // test-run time) so they stay meaningful in any build environment.

    #[test]
    fn first_instruction_len_falls_back_to_whole_len_on_empty_source() {
        // Can't construct an `Assembler` without libkeystone; verify
        // the line-selection logic in isolation instead.
        let source = "\n\n   \n";
        let first_line = source.lines().map(str::trim).find(|l| !l.is_empty());
        assert_eq!(first_line, None);
    }

    #[test]
    fn first_line_selection_skips_blank_leading_lines() {
        let source = "\n  \nmov rax, 1\ninc rax\n";
        let first_line = source.lines().map(str::trim).find(|l| !l.is_empty());
        assert_eq!(first_line, Some("mov rax, 1"));
    }
}
