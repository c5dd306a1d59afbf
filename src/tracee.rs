//! Tracee factory (C3): materialize the synthesized image as an
//! executable file handle, fork, and exec it under tracing.
//!
//! Grounded on the original `_gen_child` (`ui.c`): write the ELF image
//! to a file-like handle, fork, `PTRACE_TRACEME` + exec in the child,
//! close the handle in the parent. Generalized from a named temp file
//! plus `execve` by path to `memfd_create` + `fexecve`: there's never a
//! window where a partially-written, world-readable file on disk is
//! executable, and no cleanup-on-crash path to get wrong.

use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use nix::sys::ptrace;
use nix::unistd::{fexecve, fork, write, ForkResult, Pid};
use std::ffi::CString;
use std::fs;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::elf::Image;
use crate::error::RappelError;

/// A freshly-forked, `PTRACE_TRACEME`'d, but not-yet-`waitpid`'d
/// tracee, plus the still-open image handle. The caller (the
/// execution engine) completes the initial `attach()` wait and only
/// then closes the handle, per §4.3 step 3.
pub struct Spawned {
    pub pid: Pid,
    image_fd: OwnedFd,
}

impl Spawned {
    /// Close the image handle in the parent. Safe to call exactly
    /// once, after the initial exec-stop has been observed. `OwnedFd`'s
    /// `Drop` performs the actual `close(2)`.
    pub fn close_image(self) -> Result<(), RappelError> {
        drop(self.image_fd);
        Ok(())
    }
}

/// Write `image` to an executable file-like handle (anonymous via
/// `memfd_create`, or `savefile` if set), fork, and exec it under
/// tracing in the child.
pub fn spawn(image: &Image, savefile: Option<&Path>) -> Result<Spawned, RappelError> {
    let image_fd = materialize(image, savefile)?;

    // Safety: the child between `fork()` and `fexecve()` only calls
    // two syscalls (`PTRACE_TRACEME`, then the exec itself); no heap
    // allocation, locking, or anything else unsafe to do between a
    // fork and an exec.
    match unsafe { fork() }.map_err(RappelError::from)? {
        ForkResult::Child => {
            if ptrace::traceme().is_err() {
                std::process::abort();
            }
            let _ = exec_image(&image_fd);
            // `exec_image` only returns on failure.
            std::process::abort();
        }
        ForkResult::Parent { child } => Ok(Spawned {
            pid: child,
            image_fd,
        }),
    }
}

fn materialize(image: &Image, savefile: Option<&Path>) -> Result<OwnedFd, RappelError> {
    match savefile {
        Some(path) => materialize_named(image, path),
        None => materialize_anonymous(image),
    }
}

fn materialize_anonymous(image: &Image) -> Result<OwnedFd, RappelError> {
    let name = CString::new("rappel-image").unwrap();
    let fd = memfd_create(&name, MemFdCreateFlag::empty()).map_err(RappelError::from)?;
    write_all(fd.as_raw_fd(), image.as_bytes())?;
    Ok(fd)
}

fn materialize_named(image: &Image, path: &Path) -> Result<OwnedFd, RappelError> {
    fs::write(path, image.as_bytes()).map_err(|e| RappelError::system("writing saved image", e))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|e| RappelError::system("setting saved image permissions", e))?;

    let fd = nix::fcntl::open(path, nix::fcntl::OFlag::O_RDONLY, nix::sys::stat::Mode::empty())
        .map_err(RappelError::from)?;
    // SAFETY: `open` just returned this fd; we own it exclusively.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn write_all(fd: RawFd, mut buf: &[u8]) -> Result<(), RappelError> {
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    while !buf.is_empty() {
        let n = write(borrowed, buf).map_err(RappelError::from)?;
        buf = &buf[n..];
    }
    Ok(())
}

/// `fexecve`s the image handle directly; never consults `PATH` or any
/// filesystem name, so it can't race a concurrent write to the same
/// path. Only returns on failure (the error is discarded by the
/// caller, which aborts either way).
fn exec_image(fd: &OwnedFd) -> Result<std::convert::Infallible, nix::Error> {
    let argv = [CString::new("rappel-tracee").unwrap()];
    let envp: [CString; 0] = [];
    fexecve(fd.as_raw_fd(), &argv, &envp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::SupportedArch;

    #[test]
    fn materialize_named_writes_executable_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("saved.img");
        let image = Image::build(SupportedArch::X64, 0x400000);

        let fd = materialize_named(&image, &path).unwrap();
        drop(fd);

        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o755);
        assert_eq!(fs::read(&path).unwrap(), image.as_bytes());
    }
}
