//! Architecture-tagged register snapshot.
//!
//! Mirrors the teacher's `Registers`/`RegistersUnion` split: one tagged
//! union over the x86 and x86-64 `user_regs_struct` layouts, with
//! typed, arch-dispatching accessors so callers never touch the raw
//! per-arch fields. `libc::user_regs_struct` already matches the
//! kernel's x86-64 layout (what `nix::sys::ptrace::getregs` hands
//! back), so the 64-bit case is the libc type directly; the 32-bit
//! case is hand-declared to the well-known `struct user_regs_struct`
//! layout from `<sys/user.h>` on i386, since libc only defines the
//! layout for the host's own word size.
use crate::arch::SupportedArch;

/// Layout of `i386`'s `struct user_regs_struct` (`<sys/user.h>`).
/// Declared by hand because the host's `libc` crate only carries the
/// definition for the architecture Rust itself is compiled for.
#[repr(C)]
#[derive(Copy, Clone, Default, Debug)]
pub struct X86UserRegs {
    pub ebx: i32,
    pub ecx: i32,
    pub edx: i32,
    pub esi: i32,
    pub edi: i32,
    pub ebp: i32,
    pub eax: i32,
    pub xds: i32,
    pub xes: i32,
    pub xfs: i32,
    pub xgs: i32,
    pub orig_eax: i32,
    pub eip: i32,
    pub xcs: i32,
    pub eflags: i32,
    pub esp: i32,
    pub xss: i32,
}

#[derive(Copy, Clone)]
union RegistersUnion {
    x86: X86UserRegs,
    x64: libc::user_regs_struct,
}

/// `(signo, code, faulting address)`, present whenever the tracee
/// stopped on something other than the trap sentinel.
#[derive(Copy, Clone, Debug)]
pub struct SignalInfo {
    pub signo: i32,
    pub code: i32,
    pub addr: u64,
}

#[derive(Copy, Clone)]
pub struct Registers {
    arch: SupportedArch,
    u: RegistersUnion,
}

macro_rules! get_reg {
    ($slf:expr, $x86:ident, $x64:ident) => {
        unsafe {
            match $slf.arch {
                SupportedArch::X86 => $slf.u.x86.$x86 as u64,
                SupportedArch::X64 => $slf.u.x64.$x64,
            }
        }
    };
}

macro_rules! set_reg {
    ($slf:expr, $x86:ident, $x64:ident, $val:expr) => {
        match $slf.arch {
            SupportedArch::X86 => $slf.u.x86.$x86 = $val as i32,
            SupportedArch::X64 => $slf.u.x64.$x64 = $val,
        }
    };
}

impl Registers {
    pub fn from_native(arch: SupportedArch, native: libc::user_regs_struct) -> Registers {
        Registers {
            arch,
            u: RegistersUnion { x64: native },
        }
    }

    pub fn arch(&self) -> SupportedArch {
        self.arch
    }

    pub fn ip(&self) -> u64 {
        get_reg!(self, eip, rip)
    }

    pub fn set_ip(&mut self, addr: u64) {
        set_reg!(self, eip, rip, addr)
    }

    /// The native (x86-64 host) `user_regs_struct` this snapshot wraps.
    /// Only meaningful when `arch() == SupportedArch::X64`; rappel has
    /// no 32-bit tracee support yet (§9's "extensible to other
    /// architectures" is aspirational), so every live `Tracer` is
    /// constructed for the native arch and this is always valid there.
    pub fn as_native_x64(&self) -> libc::user_regs_struct {
        assert_eq!(self.arch, SupportedArch::X64, "no 32-bit tracee support");
        unsafe { self.u.x64 }
    }

    pub fn flags(&self) -> u64 {
        get_reg!(self, eflags, eflags)
    }

    pub fn sp(&self) -> u64 {
        get_reg!(self, esp, rsp)
    }

    /// General-purpose registers in the canonical display order for
    /// this architecture: `(name, value)`.
    pub fn gp_registers(&self) -> Vec<(&'static str, u64)> {
        match self.arch {
            SupportedArch::X86 => vec![
                ("eax", get_reg!(self, eax, rax)),
                ("ebx", get_reg!(self, ebx, rbx)),
                ("ecx", get_reg!(self, ecx, rcx)),
                ("edx", get_reg!(self, edx, rdx)),
                ("esi", get_reg!(self, esi, rsi)),
                ("edi", get_reg!(self, edi, rdi)),
                ("ebp", get_reg!(self, ebp, rbp)),
                ("esp", get_reg!(self, esp, rsp)),
                ("eip", get_reg!(self, eip, rip)),
                ("eflags", get_reg!(self, eflags, eflags)),
                ("cs", get_reg!(self, xcs, cs)),
                ("ss", get_reg!(self, xss, ss)),
                ("ds", get_reg!(self, xds, ds)),
                ("es", get_reg!(self, xes, es)),
                ("fs", get_reg!(self, xfs, fs)),
                ("gs", get_reg!(self, xgs, gs)),
            ],
            SupportedArch::X64 => unsafe {
                let r = self.u.x64;
                vec![
                    ("rax", r.rax),
                    ("rbx", r.rbx),
                    ("rcx", r.rcx),
                    ("rdx", r.rdx),
                    ("rsi", r.rsi),
                    ("rdi", r.rdi),
                    ("rbp", r.rbp),
                    ("rsp", r.rsp),
                    ("r8", r.r8),
                    ("r9", r.r9),
                    ("r10", r.r10),
                    ("r11", r.r11),
                    ("r12", r.r12),
                    ("r13", r.r13),
                    ("r14", r.r14),
                    ("r15", r.r15),
                    ("rip", r.rip),
                    ("eflags", r.eflags),
                    ("cs", r.cs),
                    ("ss", r.ss),
                    ("ds", r.ds),
                    ("es", r.es),
                    ("fs", r.fs),
                    ("gs", r.gs),
                ]
            },
        }
    }
}

/// A full stop-point capture: registers plus, if the tracee stopped on
/// something other than the trap sentinel, signal info. FP/SIMD state
/// is tracked separately (`ExtraRegisters`) and only populated when
/// `Options::allregs` is set or the stop was a fault, per §3/§4.4.
#[derive(Clone)]
pub struct Snapshot {
    pub regs: Registers,
    pub signal: Option<SignalInfo>,
    pub extra: Option<ExtraRegisters>,
}

/// FP/SIMD state, rendered only when `-x`/`.allregs on` is active.
/// Captured via `PTRACE_GETFPREGS`.
#[derive(Copy, Clone)]
pub struct ExtraRegisters {
    pub xmm: [[u8; 16]; 8],
    pub st: [[u8; 10]; 8],
}

impl Snapshot {
    pub fn new(regs: Registers) -> Snapshot {
        Snapshot {
            regs,
            signal: None,
            extra: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeroed_x64() -> libc::user_regs_struct {
        unsafe { std::mem::zeroed() }
    }

    #[test]
    fn ip_accessor_round_trips_on_x64() {
        let mut regs = Registers::from_native(SupportedArch::X64, zeroed_x64());
        regs.set_ip(0x400000);
        assert_eq!(regs.ip(), 0x400000);
    }

    #[test]
    fn gp_registers_lists_rax_first_on_x64() {
        let mut native = zeroed_x64();
        native.rax = 0x1234;
        let regs = Registers::from_native(SupportedArch::X64, native);
        let gp = regs.gp_registers();
        assert_eq!(gp[0], ("rax", 0x1234));
    }

    #[test]
    fn flags_and_sp_read_through_the_union() {
        let mut native = zeroed_x64();
        native.eflags = 0x202;
        native.rsp = 0x7ffdeadbeef0;
        let regs = Registers::from_native(SupportedArch::X64, native);
        assert_eq!(regs.flags(), 0x202);
        assert_eq!(regs.sp(), 0x7ffdeadbeef0);
    }
}
