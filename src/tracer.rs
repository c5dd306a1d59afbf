//! Tracer (C4): attach, resume, reap, and peek/poke a single tracee.
//! Built directly on `nix::sys::ptrace`/`nix::sys::wait`, the same
//! layer the teacher project's own tracer sits on (generalized here
//! from rr's full record/replay tracer down to rappel's single-tracee,
//! single-shot model).
//!
//! Every `continue_` is paired with exactly one `reap` before another
//! `continue_` is issued (§4.4's ordering guarantee); nothing in this
//! module enforces that itself — it's the execution engine's job, and
//! a violation there is an `InvariantViolation`, not a `Tracer` bug.

use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::ffi::c_void;

use crate::arch::SupportedArch;
use crate::error::RappelError;
use crate::registers::{ExtraRegisters, Registers, SignalInfo, Snapshot};

pub enum ReapOutcome {
    Stopped,
    Exited(i32),
}

pub struct Tracer {
    arch: SupportedArch,
}

impl Tracer {
    pub fn new(arch: SupportedArch) -> Tracer {
        Tracer { arch }
    }

    /// Wait for the tracee's initial exec-stop, arm `PTRACE_O_EXITKILL`
    /// so a killed rappel process never orphans its tracee, and
    /// produce the first snapshot.
    pub fn attach(&self, pid: Pid) -> Result<Snapshot, RappelError> {
        match waitpid(pid, None).map_err(RappelError::from)? {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => {}
            other => {
                return Err(RappelError::system(
                    "tracee failed to start",
                    std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("unexpected initial wait status: {other:?}"),
                    ),
                ))
            }
        }

        ptrace::setoptions(pid, ptrace::Options::PTRACE_O_EXITKILL).map_err(RappelError::from)?;

        self.snapshot(pid, None)
    }

    /// Resume the tracee. If the previous stop delivered a non-trap
    /// signal and `pass_signals` is set, re-inject it; otherwise
    /// swallow it (deliver `None`).
    pub fn continue_(
        &self,
        pid: Pid,
        prev: &Snapshot,
        pass_signals: bool,
    ) -> Result<(), RappelError> {
        let sig = match (&prev.signal, pass_signals) {
            (Some(info), true) => Signal::try_from(info.signo).ok(),
            _ => None,
        };
        ptrace::cont(pid, sig).map_err(RappelError::from)
    }

    /// Block until the tracee stops or exits. On a stop, builds a
    /// fresh snapshot (GP registers, IP, flags, and signal info for
    /// anything other than SIGTRAP); `want_extra` requests FP/SIMD
    /// state even on a non-fault stop (`-x`/`.allregs on`).
    pub fn reap(&self, pid: Pid, want_extra: bool) -> Result<(ReapOutcome, Option<Snapshot>), RappelError> {
        match waitpid(pid, None).map_err(RappelError::from)? {
            WaitStatus::Exited(_, code) => Ok((ReapOutcome::Exited(code), None)),
            WaitStatus::Signaled(_, _, _) => Ok((ReapOutcome::Exited(-1), None)),
            WaitStatus::Stopped(_, signal) => {
                let fault = if signal == Signal::SIGTRAP {
                    None
                } else {
                    Some(signal)
                };
                let snapshot = self.snapshot(pid, fault)?;
                let snapshot = if want_extra || fault.is_some() {
                    self.with_extra(pid, snapshot)?
                } else {
                    snapshot
                };
                Ok((ReapOutcome::Stopped, Some(snapshot)))
            }
            other => Err(RappelError::invariant(format!(
                "unexpected wait status outside a continue/reap pair: {other:?}"
            ))),
        }
    }

    fn snapshot(&self, pid: Pid, fault: Option<Signal>) -> Result<Snapshot, RappelError> {
        let native = ptrace::getregs(pid).map_err(RappelError::from)?;
        let regs = Registers::from_native(self.arch, native);
        let mut snap = Snapshot::new(regs);

        if let Some(signal) = fault {
            let siginfo = ptrace::getsiginfo(pid).map_err(RappelError::from)?;
            snap.signal = Some(SignalInfo {
                signo: signal as i32,
                code: siginfo.si_code,
                addr: fault_address(&siginfo),
            });
        }

        Ok(snap)
    }

    fn with_extra(&self, pid: Pid, mut snap: Snapshot) -> Result<Snapshot, RappelError> {
        snap.extra = Some(get_fpregs(pid)?);
        Ok(snap)
    }

    /// Set IP to `addr` without touching any other register, so every
    /// shot executes from the canonical start address (§4.5 step 4).
    pub fn reset_ip(&self, pid: Pid, addr: u64) -> Result<(), RappelError> {
        let native = ptrace::getregs(pid).map_err(RappelError::from)?;
        let mut regs = Registers::from_native(self.arch, native);
        regs.set_ip(addr);
        ptrace::setregs(pid, regs.as_native_x64()).map_err(RappelError::from)
    }

    /// Over-read and trim to tolerate `PTRACE_PEEKDATA`'s word
    /// granularity, per §4.4.
    pub fn read(&self, pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>, RappelError> {
        let word_size = self.arch.word_size();
        let aligned_addr = addr - (addr % word_size as u64);
        let skip = (addr - aligned_addr) as usize;
        let words_needed = (skip + len + word_size - 1) / word_size;

        let mut out = Vec::with_capacity(words_needed * word_size);
        for i in 0..words_needed {
            let word_addr = aligned_addr + (i * word_size) as u64;
            let word = ptrace::read(pid, word_addr as *mut c_void).map_err(RappelError::from)?;
            out.extend_from_slice(&(word as u64).to_ne_bytes()[..word_size]);
        }

        out.truncate(skip + len);
        Ok(out.split_off(skip))
    }

    /// Word-at-a-time read-modify-write so a write shorter than a
    /// machine word doesn't clobber neighboring bytes.
    pub fn write(&self, pid: Pid, addr: u64, data: &[u8]) -> Result<(), RappelError> {
        let word_size = self.arch.word_size();
        let mut offset = 0usize;

        while offset < data.len() {
            let cur_addr = addr + offset as u64;
            let word_base = cur_addr - (cur_addr % word_size as u64);
            let byte_in_word = (cur_addr - word_base) as usize;
            let n = (word_size - byte_in_word).min(data.len() - offset);

            let existing = ptrace::read(pid, word_base as *mut c_void).map_err(RappelError::from)?;
            let mut word_bytes = (existing as u64).to_ne_bytes();
            word_bytes[byte_in_word..byte_in_word + n]
                .copy_from_slice(&data[offset..offset + n]);
            let new_word = u64::from_ne_bytes(word_bytes);

            unsafe {
                ptrace::write(pid, word_base as *mut c_void, new_word as *mut c_void)
                    .map_err(RappelError::from)?;
            }

            offset += n;
        }

        Ok(())
    }

    /// Clean release; a no-op if the tracee has already died.
    pub fn detach(&self, pid: Pid) -> Result<(), RappelError> {
        match ptrace::detach(pid, None) {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn fault_address(siginfo: &libc::siginfo_t) -> u64 {
    // `si_addr` lives in the `_sigfault` union member; only meaningful
    // for fault signals (SIGSEGV/SIGBUS/SIGILL/SIGFPE), which is the
    // only case this is called for.
    unsafe { siginfo.si_addr() as u64 }
}

fn get_fpregs(pid: Pid) -> Result<ExtraRegisters, RappelError> {
    let mut fpregs: libc::user_fpregs_struct = unsafe { std::mem::zeroed() };
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_GETFPREGS,
            pid.as_raw(),
            std::ptr::null_mut::<c_void>(),
            &mut fpregs as *mut _ as *mut c_void,
        )
    };
    if ret == -1 {
        return Err(nix::errno::Errno::last().into());
    }

    let mut xmm = [[0u8; 16]; 8];
    for (i, slot) in xmm.iter_mut().enumerate() {
        words_to_bytes(&fpregs.xmm_space[i * 4..i * 4 + 4], slot);
    }
    let mut st = [[0u8; 10]; 8];
    for (i, slot) in st.iter_mut().enumerate() {
        let mut full = [0u8; 16];
        words_to_bytes(&fpregs.st_space[i * 4..i * 4 + 4], &mut full);
        slot.copy_from_slice(&full[..10]);
    }

    Ok(ExtraRegisters { xmm, st })
}

fn words_to_bytes(words: &[u32], out: &mut [u8]) {
    for (i, w) in words.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_alignment_math_covers_unaligned_short_reads() {
        // addr=0x1002, len=4, word_size=8: should need exactly one word.
        let word_size = 8usize;
        let addr = 0x1002u64;
        let len = 4usize;
        let aligned_addr = addr - (addr % word_size as u64);
        let skip = (addr - aligned_addr) as usize;
        let words_needed = (skip + len + word_size - 1) / word_size;
        assert_eq!(aligned_addr, 0x1000);
        assert_eq!(skip, 2);
        assert_eq!(words_needed, 1);
    }

    #[test]
    fn read_alignment_math_spans_a_word_boundary_when_needed() {
        let word_size = 8usize;
        let addr = 0x1006u64;
        let len = 4usize;
        let aligned_addr = addr - (addr % word_size as u64);
        let skip = (addr - aligned_addr) as usize;
        let words_needed = (skip + len + word_size - 1) / word_size;
        assert_eq!(skip, 6);
        assert_eq!(words_needed, 2);
    }
}
