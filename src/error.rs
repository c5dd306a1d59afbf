//! The Rust-level encoding of the error taxonomy: user input errors,
//! tracee faults/death, system call failures, and invariant violations.
//!
//! Kept as a hand-written enum rather than pulling in a derive-macro
//! error crate: the teacher project does the same (`io::Result`/plain
//! enums throughout, no `thiserror`/`failure`), and the variant set here
//! is small and stable enough that a derive buys little.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum RappelError {
    /// Bad assembly, malformed dot-command arguments, buffer overflow,
    /// odd-length hex. Always recoverable: the REPL rewinds state and
    /// continues.
    UserInput(String),

    /// The tracee is gone; further shots are refused until `.reset`.
    TraceeDead,

    /// A syscall (fork, exec, ptrace transport, ...) failed.
    System { context: &'static str, source: io::Error },

    /// An invariant the engine relies on was violated (e.g. an
    /// unpaired continue/reap). Always fatal.
    InvariantViolation(String),
}

impl fmt::Display for RappelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RappelError::UserInput(msg) => write!(f, "{msg}"),
            RappelError::TraceeDead => {
                write!(f, "tracee has exited; use .reset to start a new one")
            }
            RappelError::System { context, source } => {
                write!(f, "{context}: {source}")
            }
            RappelError::InvariantViolation(msg) => {
                write!(f, "internal invariant violated: {msg}")
            }
        }
    }
}

impl std::error::Error for RappelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RappelError::System { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<nix::errno::Errno> for RappelError {
    fn from(e: nix::errno::Errno) -> Self {
        RappelError::System {
            context: "ptrace transport",
            source: io::Error::from(e),
        }
    }
}

impl From<io::Error> for RappelError {
    fn from(e: io::Error) -> Self {
        RappelError::System {
            context: "system call",
            source: e,
        }
    }
}

impl RappelError {
    /// Whether this error should terminate the whole session (vs. just
    /// being reported and the prompt continuing).
    pub fn is_fatal(&self) -> bool {
        matches!(self, RappelError::InvariantViolation(_))
    }

    pub fn user_input(msg: impl Into<String>) -> Self {
        RappelError::UserInput(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        RappelError::InvariantViolation(msg.into())
    }

    pub fn system(context: &'static str, source: io::Error) -> Self {
        RappelError::System { context, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_invariant_violation_is_fatal() {
        assert!(RappelError::invariant("x").is_fatal());
        assert!(!RappelError::TraceeDead.is_fatal());
        assert!(!RappelError::user_input("bad").is_fatal());
    }

    #[test]
    fn display_carries_user_message_verbatim() {
        let e = RappelError::user_input("syntax error near 'foo'");
        assert_eq!(e.to_string(), "syntax error near 'foo'");
    }
}
