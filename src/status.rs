//! Exit statuses and the pipefail/`unchecked` reduction rule.

use std::fmt;

/// The raw outcome of one OS child process.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ExitStatus {
    /// The process called `exit` (or returned from `main`) with this code.
    Exited(u32),
    /// The process was killed by this signal (Unix only).
    Signaled(u8),
    /// Some other `waitpid`-reported status that doesn't fit the two
    /// cases above.
    Other(i32),
    /// The process is known to have completed, but its status could not
    /// be determined (Windows, after a handle error).
    Undetermined,
}

impl ExitStatus {
    /// True if the process exited with code 0.
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }

    /// A shell-like encoding of the status: the exit code on normal exit,
    /// or `128 + signal` on death by signal. Returns `None` when the
    /// status is [`ExitStatus::Undetermined`].
    pub fn code(&self) -> Option<i32> {
        match *self {
            ExitStatus::Exited(code) => Some(code as i32),
            ExitStatus::Signaled(sig) => Some(128 + sig as i32),
            ExitStatus::Other(raw) => Some(raw),
            ExitStatus::Undetermined => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exited with code {code}"),
            ExitStatus::Signaled(sig) => write!(f, "killed by signal {sig}"),
            ExitStatus::Other(raw) => write!(f, "terminated (raw status {raw})"),
            ExitStatus::Undetermined => write!(f, "status undetermined"),
        }
    }
}

/// The reduced outcome of a leaf or a composed subtree: a raw status paired
/// with whether an ancestor `unchecked()` has suppressed its error-ness.
///
/// `checked=false` means "this leaf's non-zero exit must not turn into a
/// [`crate::Error::NonZeroExit`]", without affecting unrelated siblings. See
/// [`reduce_pipe`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Status {
    /// The raw process outcome.
    pub exit: ExitStatus,
    /// Whether a non-zero `exit` should be treated as an error.
    pub checked: bool,
}

impl Status {
    /// Constructs a checked status wrapping `exit`.
    pub fn new(exit: ExitStatus) -> Status {
        Status {
            exit,
            checked: true,
        }
    }

    /// True if the exit code is zero (irrespective of checkedness).
    pub fn success(&self) -> bool {
        self.exit.success()
    }

    /// Applies an `unchecked()` marker: the result no longer errors even if
    /// the exit code is non-zero.
    pub fn mark_unchecked(mut self) -> Status {
        self.checked = false;
        self
    }

    /// Turns this status into an error if it is checked and non-zero.
    pub fn into_result(self) -> crate::error::Result<Status> {
        if self.checked && !self.exit.success() {
            Err(crate::error::Error::NonZeroExit(self))
        } else {
            Ok(self)
        }
    }
}

/// Combines the statuses of the two sides of a `Pipe(L, R)` per the
/// pipefail rule: the rightmost *checked, non-zero* status wins; failing
/// that, the leftmost *checked, non-zero* status wins; failing that, `R`'s
/// status is returned (code possibly zero), with checkedness conjoined so
/// that an `unchecked()` applied to the whole pipeline still suppresses it,
/// but an `unchecked()` applied to only one side never masks the other.
pub fn reduce_pipe(left: Status, right: Status) -> Status {
    if !right.exit.success() && right.checked {
        return right;
    }
    if !left.exit.success() && left.checked {
        return left;
    }
    Status {
        exit: right.exit,
        checked: right.checked && left.checked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok() -> Status {
        Status::new(ExitStatus::Exited(0))
    }
    fn failed(code: u32) -> Status {
        Status::new(ExitStatus::Exited(code))
    }

    #[test]
    fn pipefail_prefers_rightmost_checked_failure() {
        let s = reduce_pipe(failed(1), failed(2));
        assert_eq!(s.exit, ExitStatus::Exited(2));
        assert!(s.checked);
    }

    #[test]
    fn pipefail_falls_back_to_left_failure() {
        let s = reduce_pipe(failed(1), ok());
        assert_eq!(s.exit, ExitStatus::Exited(1));
        assert!(s.checked);
    }

    #[test]
    fn unchecked_left_does_not_mask_but_right_wins_when_ok() {
        let s = reduce_pipe(failed(1).mark_unchecked(), ok());
        // left is unchecked, so it cannot win; right is success, so result
        // is a success that is still checked (right was checked).
        assert!(s.success());
        assert!(s.checked);
    }

    #[test]
    fn unchecked_does_not_infect_sibling() {
        // unchecked(false_cmd) | true_cmd => success, and the failure on
        // the left must not leak into the composed checkedness in a way
        // that turns a genuine right-side failure into a non-error.
        let left = failed(1).mark_unchecked();
        let right = failed(3);
        let s = reduce_pipe(left, right);
        assert_eq!(s.exit, ExitStatus::Exited(3));
        assert!(s.checked);
    }

    #[test]
    fn both_success_is_checked_success() {
        let s = reduce_pipe(ok(), ok());
        assert!(s.success());
        assert!(s.checked);
    }
}
