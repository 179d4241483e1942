//! Error taxonomy for spawning, redirecting and waiting on expressions.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use crate::status::Status;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while building, starting or waiting on an
/// [`Expression`](crate::Expression).
#[derive(Debug)]
pub enum Error {
    /// The OS refused to start a leaf command (not found, permission
    /// denied, resource exhaustion, ...).
    Spawn {
        /// The program that failed to start.
        program: String,
        /// Underlying OS error.
        source: io::Error,
    },
    /// A background [`IoPump`](crate::io_pump) thread failed while copying
    /// bytes, other than a broken pipe on stdin (which is swallowed).
    Io(io::Error),
    /// The reduced status of the expression was checked and non-zero.
    NonZeroExit(Status),
    /// A syscall failed while setting up redirection (opening a path,
    /// creating a pipe, installing a signal handler, ...).
    Platform(io::Error),
}

impl Error {
    pub(crate) fn spawn(program: impl Into<String>, source: io::Error) -> Error {
        Error::Spawn {
            program: program.into(),
            source,
        }
    }

    /// The OS error kind of this error, if it carries one.
    pub fn kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Spawn { source, .. } => Some(source.kind()),
            Error::Io(e) | Error::Platform(e) => Some(e.kind()),
            Error::NonZeroExit(_) => None,
        }
    }

    /// The reduced [`Status`] if this is a [`Error::NonZeroExit`].
    pub fn status(&self) -> Option<&Status> {
        match self {
            Error::NonZeroExit(status) => Some(status),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spawn { program, source } => {
                write!(f, "failed to start {program:?}: {source}")
            }
            Error::Io(err) => write!(f, "i/o error while running expression: {err}"),
            Error::NonZeroExit(status) => {
                write!(f, "command exited with non-zero status: {status:?}")
            }
            Error::Platform(err) => write!(f, "platform error: {err}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Spawn { source, .. } => Some(source),
            Error::Io(err) | Error::Platform(err) => Some(err),
            Error::NonZeroExit(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}
