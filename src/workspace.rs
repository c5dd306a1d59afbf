//! Workspace directory: a per-user directory holding the history file,
//! created on first run with owner-only permissions. Grounded on the
//! original's `exedir.c`/`init_rappel_dir`, generalized to Rust's
//! `std::fs` + `std::os::unix::fs::PermissionsExt`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::RappelError;

const OWNER_ONLY: u32 = 0o700;

/// Create `dir` if it doesn't exist yet, restricted to owner
/// read/write/execute, and return the path to its `history` file.
pub fn ensure(dir: &Path) -> Result<PathBuf, RappelError> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .map_err(|e| RappelError::system("creating workspace directory", e))?;
        fs::set_permissions(dir, fs::Permissions::from_mode(OWNER_ONLY))
            .map_err(|e| RappelError::system("setting workspace directory permissions", e))?;
    }
    Ok(dir.join("history"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt as _;

    #[test]
    fn creates_directory_with_owner_only_permissions() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("rappel-ws");
        let history = ensure(&dir).unwrap();

        assert!(dir.is_dir());
        assert_eq!(history, dir.join("history"));
        let mode = fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, OWNER_ONLY);
    }

    #[test]
    fn is_idempotent_on_an_existing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("rappel-ws");
        ensure(&dir).unwrap();
        let history = ensure(&dir).unwrap();
        assert_eq!(history, dir.join("history"));
    }
}
