//! Process-wide, read-only-after-startup configuration.
//!
//! Per REDESIGN FLAGS (the original keeps `struct options_t` as a
//! single mutable global), this is an immutable record built once in
//! `main` and handed to the engine by value/reference. The one piece of
//! runtime-mutable UI state (`.allregs on|off`) deliberately lives
//! outside of this struct, on the shell/display side.

use std::path::PathBuf;
use structopt::StructOpt;

use crate::arch::PAGE_SIZE;
use crate::error::RappelError;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "rappel",
    about = "An interactive assembly REPL: type assembly, watch it run."
)]
struct RawArgs {
    /// Start address for the synthesized code page (hex, e.g. 400000)
    #[structopt(short = "s", long = "start", parse(try_from_str = parse_hex))]
    start: Option<u64>,

    /// Treat stdin as raw machine code, skipping the assembler
    #[structopt(short = "r", long = "raw")]
    raw: bool,

    /// Forward non-trap signals to the tracee instead of swallowing them
    #[structopt(short = "p", long = "pass-signals")]
    pass_signals: bool,

    /// Save the synthesized ELF image to this path
    #[structopt(short = "o", long = "save")]
    save: Option<PathBuf>,

    /// Display all registers, including FP/SIMD state
    #[structopt(short = "x", long = "allregs")]
    allregs: bool,

    /// Increase verbosity (repeatable)
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: u64,
}

fn parse_hex(src: &str) -> Result<u64, std::num::ParseIntError> {
    u64::from_str_radix(src.trim_start_matches("0x"), 16)
}

pub const DEFAULT_START: u64 = 0x0040_0000;

#[derive(Clone, Debug)]
pub struct Options {
    pub start: u64,
    pub verbose: u64,
    pub raw: bool,
    pub pass_signals: bool,
    pub allregs: bool,
    pub savefile: Option<PathBuf>,
    pub workspace_dir: PathBuf,
}

impl Options {
    /// Parse argv, validate, and resolve the workspace directory.
    /// Errors here are startup-fatal per §6 of the spec.
    pub fn from_args() -> Result<Options, RappelError> {
        let raw = RawArgs::from_args();
        Self::build(raw, default_workspace_dir()?)
    }

    fn build(raw: RawArgs, workspace_dir: PathBuf) -> Result<Options, RappelError> {
        let start = raw.start.unwrap_or(DEFAULT_START);

        if start % PAGE_SIZE as u64 != 0 {
            return Err(RappelError::user_input(format!(
                "start address 0x{start:x} is not page-aligned (page size {PAGE_SIZE:#x})"
            )));
        }

        Ok(Options {
            start,
            verbose: raw.verbose,
            raw: raw.raw,
            pass_signals: raw.pass_signals,
            allregs: raw.allregs,
            savefile: raw.save,
            workspace_dir,
        })
    }
}

fn default_workspace_dir() -> Result<PathBuf, RappelError> {
    let home = std::env::var_os("HOME").ok_or_else(|| {
        RappelError::user_input("HOME is not set; cannot locate the rappel workspace directory")
    })?;
    Ok(PathBuf::from(home).join(".rappel"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(start: Option<u64>) -> RawArgs {
        RawArgs {
            start,
            raw: false,
            pass_signals: false,
            save: None,
            allregs: false,
            verbose: 0,
        }
    }

    #[test]
    fn default_start_is_used_when_unset() {
        let opts = Options::build(raw(None), PathBuf::from("/tmp/ws")).unwrap();
        assert_eq!(opts.start, DEFAULT_START);
    }

    #[test]
    fn misaligned_start_is_rejected() {
        let err = Options::build(raw(Some(0x400001)), PathBuf::from("/tmp/ws")).unwrap_err();
        assert!(matches!(err, RappelError::UserInput(_)));
    }

    #[test]
    fn page_aligned_custom_start_is_accepted() {
        let opts = Options::build(raw(Some(0x500000)), PathBuf::from("/tmp/ws")).unwrap();
        assert_eq!(opts.start, 0x500000);
    }

    #[test]
    fn hex_parser_accepts_0x_prefix() {
        assert_eq!(parse_hex("0x400000").unwrap(), 0x400000);
        assert_eq!(parse_hex("400000").unwrap(), 0x400000);
    }
}
