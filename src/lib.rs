//! Build and run trees of OS child processes with shell-like
//! expressiveness, without shelling out to an actual shell.
//!
//! The entry point is [`Expression`]: an immutable, cheaply-cloneable
//! description of a command, a pipeline of commands, or either one
//! wrapped in a redirection, working-directory override, environment
//! overlay or `unchecked()` marker. Build one with [`Expression::cmd`]
//! or [`Expression::cmd_path`], compose it with `.pipe(...)` and the
//! other builder methods, then run it with one of four terminators:
//!
//! * [`Expression::run`] — start it, wait for it, get back the reduced
//!   [`Status`] plus any captured output.
//! * [`Expression::read`] — like `run`, but returns captured stdout as a
//!   trimmed `String`.
//! * [`Expression::start`] — start it and return a live [`Handle`]
//!   without waiting.
//! * [`Expression::reader`] — start it and return a [`Reader`] streaming
//!   its stdout.
//!
//! # Examples
//!
//! ```no_run
//! use proctree::Expression;
//!
//! let checksum = (Expression::cmd("find").args([".", "-type", "f"])
//!     | Expression::cmd("sort")
//!     | Expression::cmd("sha1sum"))
//!     .read()?;
//! # Ok::<(), proctree::Error>(())
//! ```
//!
//! A non-zero exit turns into an error by default; `unchecked()` on
//! any subtree suppresses that without masking an unrelated sibling's
//! failure in a pipeline — see [`Status`] and [`crate::status::reduce_pipe`].

#![warn(missing_docs)]

extern crate libc;

#[cfg(windows)]
extern crate winapi;

use std::ops::BitOr;

mod error;
mod exec;
mod expression;
mod handle;
mod io_pump;
mod platform;
mod shared_child;
mod status;

pub use crate::error::{Error, Result};
pub use crate::exec::RawCommand;
pub use crate::expression::{BeforeSpawnHook, Expression};
pub use crate::handle::{Handle, Output, Reader};
pub use crate::status::{ExitStatus, Status};

impl BitOr for Expression {
    type Output = Expression;

    /// `l | r` is shorthand for `l.pipe(r)`, matching shell syntax.
    fn bitor(self, rhs: Expression) -> Expression {
        self.pipe(rhs)
    }
}

#[cfg(test)]
mod tests {
    mod error;
    mod exec;
    mod expression;
    mod handle;

    #[test]
    fn public_types_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<crate::Expression>();
        assert_send_sync::<crate::Handle>();
        assert_send_sync::<crate::Error>();
        assert_send_sync::<crate::Status>();
    }
}
