//! A small module-scoped logger, patterned on the teacher's own
//! homegrown logger (`rd::log`, inherited from `rr`): a `lazy_static`
//! global sink gated by a level, rather than pulling in the `log`
//! crate's facade for a single binary with one verbosity dial.
//!
//! Where the teacher keys level by source module via an env var
//! (`RR_LOG`), rappel has exactly one dial: the `-v` repeat count from
//! `Options`. `set_verbosity` is called once at startup from `main`.

use backtrace::Backtrace;
use std::io::{self, Write};
use std::sync::Mutex;

#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Debug)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

struct LogGlobals {
    level: LogLevel,
}

lazy_static::lazy_static! {
    static ref LOG_GLOBALS: Mutex<LogGlobals> = Mutex::new(LogGlobals {
        level: LogLevel::Error,
    });
}

/// Map a `-v` repeat count to a level. `0` -> errors/warnings only,
/// matching the original's default (no `options.verbose`) behavior.
pub fn verbosity_to_level(count: u64) -> LogLevel {
    match count {
        0 => LogLevel::Warn,
        1 => LogLevel::Info,
        _ => LogLevel::Debug,
    }
}

pub fn set_level(level: LogLevel) {
    LOG_GLOBALS.lock().unwrap().level = level;
}

pub fn enabled(level: LogLevel) -> bool {
    let g = LOG_GLOBALS.lock().unwrap();
    level <= g.level
}

fn level_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "ERROR",
        LogLevel::Warn => "WARN",
        LogLevel::Info => "INFO",
        LogLevel::Debug => "DEBUG",
    }
}

/// Write a single gated, newline-terminated line to stderr. Not public
/// API; call through the `rd_log!`/`verbose_log!` macros below.
#[doc(hidden)]
pub fn write_line(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    let mut stderr = io::stderr();
    let _ = writeln!(stderr, "[{}] {}", level_name(level), args);
}

/// A fatal, invariant-violation-class message: always printed,
/// regardless of verbosity, with a backtrace attached, then the caller
/// is expected to abort the process. Mirrors the teacher's `LogFatal`
/// path, which attaches a backtrace via the same `backtrace` crate.
pub fn fatal(args: std::fmt::Arguments<'_>) {
    let mut stderr = io::stderr();
    let _ = writeln!(stderr, "[FATAL] {args}");
    let bt = Backtrace::new();
    let _ = writeln!(stderr, "{bt:?}");
}

macro_rules! rd_log {
    ($level:expr, $($args:tt)*) => {
        $crate::log::write_line($level, format_args!($($args)*))
    };
}

macro_rules! verbose_log {
    ($($args:tt)*) => {
        $crate::log::write_line($crate::log::LogLevel::Info, format_args!($($args)*))
    };
}

macro_rules! fatal_log {
    ($($args:tt)*) => {
        $crate::log::fatal(format_args!($($args)*))
    };
}

pub(crate) use fatal_log;
pub(crate) use rd_log;
pub(crate) use verbose_log;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_count_maps_monotonically() {
        assert_eq!(verbosity_to_level(0), LogLevel::Warn);
        assert_eq!(verbosity_to_level(1), LogLevel::Info);
        assert_eq!(verbosity_to_level(5), LogLevel::Debug);
    }

    #[test]
    fn higher_level_enables_lower_priority_messages() {
        set_level(LogLevel::Info);
        assert!(enabled(LogLevel::Error));
        assert!(enabled(LogLevel::Info));
        assert!(!enabled(LogLevel::Debug));
        set_level(LogLevel::Error);
    }
}
