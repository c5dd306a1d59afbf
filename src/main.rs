//! `rappel`: an interactive assembly REPL. Assembles user-typed
//! instructions, runs them inside a sacrificial traced child process,
//! and reports register state after each shot.
//!
//! Wires together the options/CLI layer (C8), the execution engine
//! (C5, itself built on C1-C4), and the session shell (C7), per §6's
//! external interface and exit-code policy.

mod arch;
mod assemble;
mod display;
mod dump;
mod elf;
mod engine;
mod error;
mod log;
mod options;
mod registers;
mod shell;
mod tracee;
mod tracer;
mod workspace;

use engine::Engine;
use error::RappelError;
use log::{set_level, verbosity_to_level};
use options::Options;
use shell::Shell;

fn main() {
    // Any error reaching here is a startup failure (§6): argument
    // parsing, workspace creation, or the initial fork/exec/attach.
    // All are fatal to the process by the time `run` can return one.
    let code = run().unwrap_or_else(|e| {
        eprintln!("rappel: {e}");
        1
    });
    std::process::exit(code);
}

fn run() -> Result<i32, RappelError> {
    let options = Options::from_args()?;
    set_level(verbosity_to_level(options.verbose));

    let history_path = workspace::ensure(&options.workspace_dir)?;
    let allregs_default = options.allregs;

    let engine = Engine::new(options)?;
    let mut shell = Shell::new(engine, allregs_default, history_path);

    let code = if shell::stdin_is_tty() {
        shell.run_interactive()
    } else {
        shell.run_piped()
    };

    shell::flush_stdout();
    Ok(code)
}
