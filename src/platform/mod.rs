//! Platform shim: program-path normalization, cwd canonicalization,
//! environment-variable case-folding, pipe creation and `SIGPIPE` handling.
//!
//! Everything that differs between Unix and Windows is concentrated here so
//! that [`crate::exec`] and [`crate::shared_child`] can stay platform-free.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::expression::ProgramName;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::*;

/// Resolves what should actually be handed to `exec`/`CreateProcess`:
///
/// - A [`ProgramName::Path`] is canonicalized against the *current
///   process's* working directory (not the child's, if `dir()` also
///   applies) so that `.dir()` changing the child's cwd never changes
///   which binary a relative `cmd_path` refers to.
/// - A [`ProgramName::Name`] containing a path separator is passed
///   through unchanged (the OS treats it as a path, not a `PATH` lookup,
///   and resolves it relative to the child's own eventual cwd);
///   otherwise it is searched for over `path_var` (falling back to the
///   calling process's own `PATH` if the overlay never touched it).
pub fn resolve_program(p: &ProgramName, path_var: Option<&OsStr>) -> Result<OsString> {
    match p {
        ProgramName::Name(name) => {
            if contains_path_separator(name) {
                Ok(name.clone())
            } else {
                search_path(name, path_var)
            }
        }
        ProgramName::Path(path) => {
            let absolute = canonicalize_for_dir(path)?;
            Ok(absolute.into_os_string())
        }
    }
}

/// Joins a relative path against the current process's cwd (not the
/// child's eventual `dir()`), leaving an already-absolute path alone.
pub fn canonicalize_for_dir(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() || is_almost_absolute_windows_root(path) {
        return Ok(path.to_owned());
    }
    let cwd = std::env::current_dir().map_err(Error::Platform)?;
    Ok(cwd.join(path))
}

fn contains_path_separator(name: &OsStr) -> bool {
    let s = name.to_string_lossy();
    s.contains(std::path::MAIN_SEPARATOR) || (cfg!(windows) && s.contains('/'))
}

#[cfg(windows)]
fn is_almost_absolute_windows_root(path: &Path) -> bool {
    let s = path.as_os_str().to_string_lossy();
    s.starts_with('\\') || s.starts_with('/')
}

#[cfg(not(windows))]
fn is_almost_absolute_windows_root(_path: &Path) -> bool {
    false
}

/// Folds an environment variable name the way the target OS's environment
/// does: case-insensitively on Windows, verbatim on Unix.
pub fn env_fold(name: &OsStr) -> OsString {
    fold_env_name(name)
}

/// Opens `path` as a redirection target, mapping the syscall failure to a
/// [`Error::Platform`].
pub fn open_for_read(path: &Path) -> Result<File> {
    File::open(path).map_err(Error::Platform)
}

/// Opens (truncating) `path` as a redirection target for writing.
pub fn create_for_write(path: &Path) -> Result<File> {
    File::create(path).map_err(Error::Platform)
}
