//! Session shell (C7): `rustyline`-backed REPL with persistent
//! history and dot-command dispatch. Thin collaborator over `Engine`;
//! holds no tracee-facing state of its own beyond the all-regs toggle
//! (per §3, deliberately kept out of the immutable `Options`).
//!
//! Per REDESIGN FLAGS, dot-commands dispatch on strict, case-
//! insensitive equality of the first whitespace-delimited word, not
//! the original's substring search.

use std::cell::Cell;
use std::io::{self, Read, Write};

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::display::render_snapshot;
use crate::dump::{hex_decode, hex_encode, hexdump};
use crate::engine::{Engine, ShotResult};
use crate::error::RappelError;
use crate::log::fatal_log;

const HELP_TEXT: &str = "\
.quit / .exit      clean shutdown
.help              this message
.info              re-display the last snapshot
.showmap           dump /proc/<pid>/maps
.allregs on|off    toggle FP/SIMD display
.read <addr> [len] hex-dump tracee memory (default len 16)
.write <addr> <hex> poke tracee memory
.begin             enter block mode
.end               submit the accumulated block
.reset             destroy and respawn the tracee";

/// Outcome of processing one line: keep looping, or stop with an exit
/// code.
enum LineOutcome {
    Continue,
    Stop(i32),
}

pub struct Shell {
    engine: Engine,
    allregs: Cell<bool>,
    history_path: std::path::PathBuf,
}

impl Shell {
    pub fn new(engine: Engine, allregs_default: bool, history_path: std::path::PathBuf) -> Shell {
        Shell {
            engine,
            allregs: Cell::new(allregs_default),
            history_path,
        }
    }

    /// Interactive path: stdin is a terminal. Runs until `.quit`,
    /// `.exit`, or EOF, then saves history and returns the process
    /// exit code.
    pub fn run_interactive(&mut self) -> i32 {
        let mut editor = match DefaultEditor::new() {
            Ok(e) => e,
            Err(e) => {
                eprintln!("failed to start line editor: {e}");
                return 1;
            }
        };
        let _ = editor.load_history(&self.history_path);

        let exit_code = loop {
            let prompt = format!("rappel:{:08x}> ", self.engine.logical_pc());
            match editor.readline(&prompt) {
                Ok(line) => {
                    let _ = editor.add_history_entry(line.as_str());
                    match self.process_line(&line) {
                        LineOutcome::Continue => {}
                        LineOutcome::Stop(code) => break code,
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break 0,
                Err(e) => {
                    eprintln!("line editor error: {e}");
                    break 1;
                }
            }
        };

        let _ = editor.save_history(&self.history_path);
        self.engine.shutdown();
        exit_code
    }

    /// Pipe-mode path (§6): stdin is not a terminal. Read it to EOF as
    /// one shot (raw bytes or assembly source per `Options::raw`) and
    /// print the resulting snapshot to stdout.
    pub fn run_piped(&mut self) -> i32 {
        let shot_result = if self.engine.is_raw() {
            // Literal machine code (e.g. `0xcc`, `0x90` sequences) is
            // not generally valid UTF-8; read it as raw bytes and hand
            // it straight to the engine rather than through a `String`.
            let mut bytes = Vec::new();
            if io::stdin().read_to_end(&mut bytes).is_err() {
                eprintln!("failed to read stdin");
                return 1;
            }
            self.engine.shot_bytes(bytes)
        } else {
            let mut source = String::new();
            if io::stdin().read_to_string(&mut source).is_err() {
                eprintln!("failed to read stdin");
                return 1;
            }
            self.engine.shot(&source)
        };

        let code = match shot_result {
            Ok(ShotResult::NoOp) => 0,
            Ok(ShotResult::Stopped(snapshot)) => {
                print!(
                    "{}",
                    render_snapshot(&snapshot, None, self.allregs.get())
                );
                0
            }
            Ok(ShotResult::Exited(code)) => code,
            Err(e) => {
                eprintln!("{e}");
                1
            }
        };
        self.engine.shutdown();
        code
    }

    fn process_line(&mut self, line: &str) -> LineOutcome {
        let trimmed = line.trim();

        // Recognized dot-commands always dispatch, block mode or not
        // (§4.7: "Non-dot input is buffered ... respecting block
        // mode"); only non-dot lines are subject to block buffering.
        if let Some(rest) = dot_command(trimmed) {
            return self.dispatch_dot_command(trimmed, rest);
        }

        if self.engine.in_block_mode() {
            if let Err(e) = self.engine.push_block_line(line) {
                eprintln!("{e}");
            }
            return LineOutcome::Continue;
        }

        self.submit_shot(trimmed);
        LineOutcome::Continue
    }

    fn dispatch_dot_command(&mut self, whole: &str, rest: &str) -> LineOutcome {
        let command = whole.split_whitespace().next().unwrap_or("").to_ascii_lowercase();
        match command.as_str() {
            ".quit" | ".exit" => return LineOutcome::Stop(0),
            ".help" => println!("{HELP_TEXT}"),
            ".info" => self.show_last_snapshot(),
            ".showmap" => self.show_map(),
            ".allregs" => self.set_allregs(rest),
            ".read" => self.do_read(rest),
            ".write" => self.do_write(rest),
            ".begin" => self.engine.begin_block(),
            ".end" => self.do_end_block(),
            ".reset" => self.do_reset(),
            other => eprintln!("unknown command: {other} (try .help)"),
        }
        LineOutcome::Continue
    }

    fn submit_shot(&mut self, source: &str) {
        let previous = self.engine.last_snapshot().cloned();
        match self.engine.shot(source) {
            Ok(ShotResult::NoOp) => {}
            Ok(ShotResult::Stopped(snapshot)) => {
                print!("{}", render_snapshot(&snapshot, previous.as_ref(), self.allregs.get()));
            }
            Ok(ShotResult::Exited(code)) => {
                println!("tracee exited with code {code}; use .reset to start a new one");
            }
            Err(e) => self.handle_shot_error(e),
        }
    }

    fn do_end_block(&mut self) {
        match self.engine.end_block() {
            Ok(ShotResult::NoOp) => {}
            Ok(ShotResult::Stopped(snapshot)) => {
                print!("{}", render_snapshot(&snapshot, None, self.allregs.get()));
            }
            Ok(ShotResult::Exited(code)) => {
                println!("tracee exited with code {code}; use .reset to start a new one");
            }
            Err(e) => self.handle_shot_error(e),
        }
    }

    /// Report a shot-protocol error per §7's policy: everything but an
    /// invariant violation is recoverable, so it's printed and the REPL
    /// keeps looping. An invariant violation is always fatal — it means
    /// the engine's continue/reap bookkeeping (or similar internal
    /// guarantee) has already been broken, so there's no well-defined
    /// state left to hand back to the prompt. Matches the teacher's
    /// `fatal!`/`notifying_abort` pattern (khuey-rd's log.rs): log with
    /// a backtrace, then abort rather than continue.
    fn handle_shot_error(&self, e: RappelError) {
        if e.is_fatal() {
            fatal_log!("{e}");
            std::process::abort();
        }
        eprintln!("{e}");
    }

    fn show_last_snapshot(&self) {
        match self.engine.last_snapshot() {
            Some(snapshot) => print!("{}", render_snapshot(snapshot, None, self.allregs.get())),
            None => println!("no snapshot yet"),
        }
    }

    fn show_map(&self) {
        match self.engine.address_map() {
            Ok(map) => print!("{map}"),
            Err(e) => eprintln!("{e}"),
        }
    }

    fn set_allregs(&self, arg: &str) {
        match arg.trim().to_ascii_lowercase().as_str() {
            "on" => self.allregs.set(true),
            "off" => self.allregs.set(false),
            other => eprintln!("usage: .allregs on|off (got {other:?})"),
        }
    }

    fn do_read(&self, arg: &str) {
        let mut parts = arg.split_whitespace();
        let addr_str = match parts.next() {
            Some(a) => a,
            None => {
                eprintln!("usage: .read <hex-addr> [len]");
                return;
            }
        };
        let len: usize = match parts.next() {
            Some(l) => match l.parse() {
                Ok(n) => n,
                Err(_) => {
                    eprintln!("invalid length: {l}");
                    return;
                }
            },
            None => 16,
        };
        let addr = match parse_hex_addr(addr_str) {
            Some(a) => a,
            None => {
                eprintln!("invalid hex address: {addr_str}");
                return;
            }
        };

        match self.engine.read_memory(addr, len) {
            Ok(bytes) => print!("{}", hexdump(&bytes, addr)),
            Err(e) => eprintln!("{e}"),
        }
    }

    fn do_write(&mut self, arg: &str) {
        let mut parts = arg.split_whitespace();
        let (addr_str, hex_str) = match (parts.next(), parts.next()) {
            (Some(a), Some(h)) => (a, h),
            _ => {
                eprintln!("usage: .write <hex-addr> <hex-bytes>");
                return;
            }
        };
        let addr = match parse_hex_addr(addr_str) {
            Some(a) => a,
            None => {
                eprintln!("invalid hex address: {addr_str}");
                return;
            }
        };
        let bytes = match hex_decode(hex_str) {
            Some(b) => b,
            None => {
                eprintln!("hex string must have even length and only hex digits");
                return;
            }
        };

        if let Err(e) = self.engine.write_memory(addr, &bytes) {
            eprintln!("{e}");
        } else {
            println!("wrote {} bytes ({}) at {addr:#x}", bytes.len(), hex_encode(&bytes));
        }
    }

    fn do_reset(&mut self) {
        if let Err(e) = self.engine.reset() {
            eprintln!("reset failed: {e}");
        }
    }
}

/// Returns the command's argument portion (everything after the first
/// whitespace-delimited word) if `line` starts with a recognized dot
/// command, keyed by strict case-insensitive equality of that first
/// word — never a substring match.
fn dot_command(line: &str) -> Option<&str> {
    if !line.starts_with('.') {
        return None;
    }
    let first = line.split_whitespace().next()?;
    let known = [
        ".quit", ".exit", ".help", ".info", ".showmap", ".allregs", ".read", ".write", ".begin",
        ".end", ".reset",
    ];
    if known.iter().any(|c| c.eq_ignore_ascii_case(first)) {
        Some(line[first.len()..].trim_start())
    } else {
        None
    }
}

fn parse_hex_addr(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

/// Whether stdin looks like an interactive terminal, per §6's mode
/// selection. A thin wrapper so `main` doesn't depend on a libc call
/// directly.
pub fn stdin_is_tty() -> bool {
    unsafe { libc::isatty(libc::STDIN_FILENO) != 0 }
}

pub fn flush_stdout() {
    let _ = io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_command_matches_known_commands_case_insensitively() {
        assert_eq!(dot_command(".READ 0x400000 16"), Some("0x400000 16"));
        assert_eq!(dot_command(".read"), Some(""));
    }

    #[test]
    fn dot_command_does_not_match_substrings() {
        // ".allregs" must not be mistaken for ".read" via substring
        // search, the bug the redesign explicitly fixes (§9).
        assert_eq!(dot_command(".allregs on"), Some("on"));
        assert_eq!(dot_command("mov rax, 1 ; readable"), None);
    }

    #[test]
    fn dot_command_rejects_unknown_dot_prefixed_input() {
        assert_eq!(dot_command(".bogus"), None);
    }

    #[test]
    fn dot_command_ignores_non_dot_lines() {
        assert_eq!(dot_command("mov rax, 1"), None);
    }

    #[test]
    fn parse_hex_addr_accepts_with_and_without_prefix() {
        assert_eq!(parse_hex_addr("0x400000"), Some(0x400000));
        assert_eq!(parse_hex_addr("400000"), Some(0x400000));
        assert_eq!(parse_hex_addr("zzzz"), None);
    }
}
