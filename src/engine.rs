//! Execution engine (C5): orchestrates the assembler, ELF synthesizer,
//! tracee factory and tracer into the shot protocol described in
//! §4.5. Everything else in this crate is a collaborator called
//! through here; the shell never touches `Tracer`/`Tracee` directly.

use crate::arch::{roundup, SupportedArch, PAGE_SIZE, TRAP_BYTE, TRAP_LEN};
use crate::assemble::Assembler;
use crate::elf::Image;
use crate::error::RappelError;
use crate::log::{rd_log, verbose_log, LogLevel};
use crate::options::Options;
use crate::registers::Snapshot;
use crate::tracee::{self, Spawned};
use crate::tracer::{ReapOutcome, Tracer};

/// Per-session lifecycle. `.reset` drives `Dead`/`Ready` back through
/// `Init` to a fresh `Ready`; a normal shot cycles `Ready -> Running ->
/// Ready`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum State {
    Init,
    Ready,
    Running,
    Dead,
}

/// Outcome of a single call to `Engine::shot`: either a fresh snapshot
/// (the tracee stopped, normally on the trap sentinel) or notice that
/// the tracee has exited and the session is now `Dead`.
pub enum ShotResult {
    NoOp,
    Stopped(Snapshot),
    Exited(i32),
}

/// Orchestrates one tracee's entire lifetime. Owns the immutable
/// `Options`, the architecture-specific `Assembler`/`Tracer`, and the
/// mutable bits of state the shot protocol advances: the tracee pid,
/// the last snapshot (for delta display), the logical PC, and the
/// block-mode accumulation buffer.
pub struct Engine {
    options: Options,
    arch: SupportedArch,
    assembler: Assembler,
    tracer: Tracer,
    state: State,
    pid: Option<nix::unistd::Pid>,
    last_snapshot: Option<Snapshot>,
    /// Running sum of first-instruction lengths across all shots this
    /// session, per the "logical PC" in the glossary. Distinct from the
    /// tracee's physical IP, which is always `start` or a trap offset
    /// from it — see the note on `logical_pc`.
    logical_pc: u64,
    block_mode: bool,
    block_buffer: String,
}

impl Engine {
    /// Build the engine and spawn the first tracee. Corresponds to
    /// `Init -> Ready`.
    pub fn new(options: Options) -> Result<Engine, RappelError> {
        let arch = SupportedArch::NATIVE;
        let assembler = Assembler::new(arch)?;
        let tracer = Tracer::new(arch);

        let mut engine = Engine {
            options,
            arch,
            assembler,
            tracer,
            state: State::Init,
            pid: None,
            last_snapshot: None,
            logical_pc: 0,
            block_mode: false,
            block_buffer: String::new(),
        };
        engine.spawn_tracee()?;
        Ok(engine)
    }

    fn spawn_tracee(&mut self) -> Result<(), RappelError> {
        let image = Image::build(self.arch, self.options.start);
        let spawned: Spawned = tracee::spawn(&image, self.options.savefile.as_deref())?;
        let pid = spawned.pid;
        // Wait for the initial exec-stop before closing the image
        // handle, per §4.3 step 3: only once the child has observably
        // exec'd it is it safe to drop our reference.
        let snapshot = self.tracer.attach(pid)?;
        spawned.close_image()?;

        self.pid = Some(pid);
        self.last_snapshot = Some(snapshot);
        self.logical_pc = self.options.start;
        self.block_mode = false;
        self.block_buffer.clear();
        self.state = State::Ready;
        rd_log!(LogLevel::Info, "tracee {pid} spawned at {:#x}", self.options.start);
        Ok(())
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn logical_pc(&self) -> u64 {
        self.logical_pc
    }

    pub fn last_snapshot(&self) -> Option<&Snapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn in_block_mode(&self) -> bool {
        self.block_mode
    }

    /// `.begin`: suppress the shot protocol and start accumulating
    /// lines verbatim.
    pub fn begin_block(&mut self) {
        self.block_mode = true;
        self.block_buffer.clear();
    }

    /// Append one line to the block buffer. Rejects (without mutating
    /// the buffer) if the addition would exceed one code page's worth
    /// of source, per §4.7's overflow handling.
    pub fn push_block_line(&mut self, line: &str) -> Result<(), RappelError> {
        if self.block_buffer.len() + line.len() + 1 > PAGE_SIZE {
            return Err(RappelError::user_input(
                "block buffer would exceed one page; .end or shorten the block",
            ));
        }
        self.block_buffer.push_str(line);
        self.block_buffer.push('\n');
        Ok(())
    }

    /// `.end`: clear block mode and submit the accumulated buffer as a
    /// single shot.
    pub fn end_block(&mut self) -> Result<ShotResult, RappelError> {
        self.block_mode = false;
        let source = std::mem::take(&mut self.block_buffer);
        self.shot(&source)
    }

    /// Whether this session is bypassing the assembler (`-r`/`--raw`).
    /// Exposed so the shell knows whether to read stdin as text or as
    /// literal binary (§6).
    pub fn is_raw(&self) -> bool {
        self.options.raw
    }

    /// Run the shot protocol (§4.5) against `source`: assemble (or, in
    /// raw mode, copy the shell buffer's bytes verbatim into the code
    /// shot per §4.1 — no hex decoding, no assembler), write into the
    /// code page, reset IP, continue, reap, and advance the logical PC
    /// by the first instruction's length.
    pub fn shot(&mut self, source: &str) -> Result<ShotResult, RappelError> {
        if self.state == State::Dead {
            return Err(RappelError::TraceeDead);
        }

        let (bytes, first_instr_len) = if self.options.raw {
            let bytes = source.as_bytes().to_vec();
            let len = bytes.len();
            (bytes, len)
        } else {
            let assembled = self.assembler.assemble(source)?;
            (assembled.bytes, assembled.first_instr_len)
        };

        self.execute(bytes, first_instr_len)
    }

    /// Submit raw machine-code bytes directly, bypassing both the
    /// assembler and the `&str` shot path entirely. Used by the
    /// pipe-mode raw path (§6): stdin there is read as literal binary
    /// and may contain byte sequences that aren't valid UTF-8 at all,
    /// so it can never be routed through `shot`'s `&str` parameter.
    pub fn shot_bytes(&mut self, bytes: Vec<u8>) -> Result<ShotResult, RappelError> {
        if self.state == State::Dead {
            return Err(RappelError::TraceeDead);
        }
        let len = bytes.len();
        self.execute(bytes, len)
    }

    fn execute(&mut self, bytes: Vec<u8>, first_instr_len: usize) -> Result<ShotResult, RappelError> {
        if bytes.is_empty() {
            rd_log!(LogLevel::Info, "empty shot, no-op");
            return Ok(ShotResult::NoOp);
        }

        self.run_shot(&bytes, first_instr_len)
    }

    fn run_shot(&mut self, bytecode: &[u8], first_instr_len: usize) -> Result<ShotResult, RappelError> {
        let pid = self.pid.ok_or(RappelError::TraceeDead)?;
        let word_size = self.arch.word_size();

        let shot_len = roundup(bytecode.len() + TRAP_LEN, word_size);
        let mut code_shot = vec![TRAP_BYTE; shot_len];
        code_shot[..bytecode.len()].copy_from_slice(bytecode);

        self.state = State::Running;

        self.tracer.write(pid, self.options.start, &code_shot)?;
        self.tracer.reset_ip(pid, self.options.start)?;

        let prev = self
            .last_snapshot
            .clone()
            .ok_or_else(|| RappelError::invariant("no prior snapshot to resume from"))?;
        self.tracer.continue_(pid, &prev, self.options.pass_signals)?;

        match self.tracer.reap(pid, self.options.allregs)? {
            (ReapOutcome::Exited(code), _) => {
                self.state = State::Dead;
                rd_log!(LogLevel::Warn, "tracee {pid} exited with code {code}");
                Ok(ShotResult::Exited(code))
            }
            (ReapOutcome::Stopped, Some(snapshot)) => {
                self.state = State::Ready;
                self.last_snapshot = Some(snapshot.clone());
                self.advance_logical_pc(first_instr_len, bytecode.len());
                Ok(ShotResult::Stopped(snapshot))
            }
            (ReapOutcome::Stopped, None) => Err(RappelError::invariant(
                "reap reported Stopped without a snapshot",
            )),
        }
    }

    /// Advance the prompt's logical PC by the first instruction's
    /// length, per §4.5 step 8. When a shot assembles more than one
    /// instruction, every byte still executes in the tracee, but only
    /// the first instruction's length is added here — this mirrors the
    /// original tool's literal (and, per the Open Question in §9,
    /// possibly surprising) behavior rather than guessing a "fixed"
    /// semantics for it.
    fn advance_logical_pc(&mut self, first_instr_len: usize, whole_len: usize) {
        self.logical_pc += first_instr_len as u64;
        if first_instr_len != whole_len {
            verbose_log!(
                "shot assembled {whole_len} bytes but the prompt only advanced by the first instruction's {first_instr_len}"
            );
        }
    }

    /// `.read <addr> <len>`.
    pub fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>, RappelError> {
        let pid = self.pid.ok_or(RappelError::TraceeDead)?;
        self.tracer.read(pid, addr, len)
    }

    /// `.write <addr> <bytes>`.
    pub fn write_memory(&self, addr: u64, data: &[u8]) -> Result<(), RappelError> {
        let pid = self.pid.ok_or(RappelError::TraceeDead)?;
        self.tracer.write(pid, addr, data)
    }

    /// `.showmap`: read `/proc/<pid>/maps` for the live tracee.
    pub fn address_map(&self) -> Result<String, RappelError> {
        let pid = self.pid.ok_or(RappelError::TraceeDead)?;
        std::fs::read_to_string(format!("/proc/{}/maps", pid.as_raw()))
            .map_err(|e| RappelError::system("reading /proc/<pid>/maps", e))
    }

    /// `.reset`: tear down the current tracee (if any) and spawn a
    /// fresh one, restoring `Init -> Ready` per §4.5's state machine
    /// and I3.
    pub fn reset(&mut self) -> Result<(), RappelError> {
        if let Some(pid) = self.pid.take() {
            let _ = self.tracer.detach(pid);
        }
        self.state = State::Init;
        self.spawn_tracee()
    }

    /// `.quit`/`.exit`/EOF: clean detach, no respawn.
    pub fn shutdown(&mut self) {
        if let Some(pid) = self.pid.take() {
            let _ = self.tracer.detach(pid);
        }
        self.state = State::Dead;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_shot_padding_places_trap_immediately_after_bytecode() {
        let bytecode = [0x90u8, 0x90, 0x90];
        let word_size = 8usize;
        let shot_len = roundup(bytecode.len() + TRAP_LEN, word_size);
        let mut code_shot = vec![TRAP_BYTE; shot_len];
        code_shot[..bytecode.len()].copy_from_slice(&bytecode);

        assert_eq!(shot_len, 8);
        assert_eq!(&code_shot[..3], &bytecode);
        assert!(code_shot[3..].iter().all(|&b| b == TRAP_BYTE));
    }

    #[test]
    fn code_shot_with_no_slack_still_has_a_trailing_trap_word() {
        // bytecode exactly a multiple of word_size still needs padding
        // for the trap, per I1 ("always terminated by at least one
        // trap at a word-aligned offset").
        let bytecode = [0x90u8; 8];
        let word_size = 8usize;
        let shot_len = roundup(bytecode.len() + TRAP_LEN, word_size);
        assert_eq!(shot_len, 16);
    }

    #[test]
    fn push_block_line_rejects_when_it_would_overflow_a_page() {
        let mut engine_buffer = String::new();
        let long_line = "a".repeat(PAGE_SIZE);
        // Mirror the bound check in `push_block_line` directly, since
        // constructing a live `Engine` requires a real tracee.
        let would_overflow = engine_buffer.len() + long_line.len() + 1 > PAGE_SIZE;
        assert!(would_overflow);
        engine_buffer.push_str("short\n");
        assert!(engine_buffer.len() + 3 + 1 <= PAGE_SIZE);
    }

    #[test]
    fn advance_logical_pc_math_adds_only_first_instruction_length() {
        let mut pc = 0x400000u64;
        let first_instr_len = 3u64;
        pc += first_instr_len;
        assert_eq!(pc, 0x400003);
    }
}
