//! Register/memory display (C6): pure formatting of a `Snapshot`,
//! optionally diffed against the previous one. Uses `colored` for
//! delta highlighting rather than hand-rolled ANSI escapes.

use colored::Colorize;

use crate::registers::Snapshot;

/// Render `current`'s general-purpose registers in canonical order,
/// one per line, highlighting any register whose value differs from
/// `previous` (when given). FP/SIMD rows are appended only when
/// `allregs` is set, matching §4.6.
pub fn render_snapshot(current: &Snapshot, previous: Option<&Snapshot>, allregs: bool) -> String {
    let mut out = String::new();

    let prev_values: Vec<(&'static str, u64)> =
        previous.map(|p| p.regs.gp_registers()).unwrap_or_default();

    for (name, value) in current.regs.gp_registers() {
        let changed = prev_values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v != value)
            .unwrap_or(false);

        let line = format!("{name:>7} = {value:#018x}");
        out.push_str(&if changed { line.yellow().to_string() } else { line });
        out.push('\n');
    }

    if let Some(signal) = current.signal {
        out.push_str(&render_signal(signal.signo, signal.code, signal.addr));
        out.push('\n');
    }

    if allregs {
        if let Some(extra) = current.extra {
            out.push_str(&render_extra(&extra));
        }
    }

    out
}

fn render_signal(signo: i32, code: i32, addr: u64) -> String {
    let name = nix::sys::signal::Signal::try_from(signo)
        .map(|s| s.to_string())
        .unwrap_or_else(|_| format!("signal {signo}"));
    format!("stopped on {name} (code {code}, faulting address {addr:#018x})")
        .red()
        .bold()
        .to_string()
}

fn render_extra(extra: &crate::registers::ExtraRegisters) -> String {
    let mut out = String::new();
    for (i, xmm) in extra.xmm.iter().enumerate() {
        out.push_str(&format!("   xmm{i} = {}\n", crate::dump::hex_encode(xmm)));
    }
    for (i, st) in extra.st.iter().enumerate() {
        out.push_str(&format!("    st{i} = {}\n", crate::dump::hex_encode(st)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::SupportedArch;
    use crate::registers::Registers;

    fn zeroed_snapshot(rax: u64) -> Snapshot {
        let mut native: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        native.rax = rax;
        Snapshot::new(Registers::from_native(SupportedArch::X64, native))
    }

    #[test]
    fn render_lists_every_gp_register_once() {
        let snap = zeroed_snapshot(0x42);
        let out = render_snapshot(&snap, None, false);
        assert_eq!(out.lines().count(), snap.regs.gp_registers().len());
    }

    #[test]
    fn render_shows_the_current_value_even_unchanged() {
        let snap = zeroed_snapshot(0x42);
        let out = render_snapshot(&snap, Some(&snap), false);
        assert!(out.contains("42"));
    }

    #[test]
    fn render_appends_signal_line_when_present() {
        let mut snap = zeroed_snapshot(0);
        snap.signal = Some(crate::registers::SignalInfo {
            signo: nix::sys::signal::Signal::SIGILL as i32,
            code: 1,
            addr: 0x400000,
        });
        let out = render_snapshot(&snap, None, false);
        assert!(out.contains("SIGILL") || out.contains("signal"));
        assert!(out.contains("400000"));
    }

    #[test]
    fn render_omits_extra_registers_unless_allregs_is_set() {
        let mut snap = zeroed_snapshot(0);
        snap.extra = Some(crate::registers::ExtraRegisters {
            xmm: [[0u8; 16]; 8],
            st: [[0u8; 10]; 8],
        });
        let without = render_snapshot(&snap, None, false);
        let with = render_snapshot(&snap, None, true);
        assert!(!without.contains("xmm0"));
        assert!(with.contains("xmm0"));
    }
}
