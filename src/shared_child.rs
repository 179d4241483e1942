//! A thread-safe wrapper over one OS child process providing race-free
//! `wait`/`try_wait`/`kill` from multiple threads concurrently.
//!
//! On Unix this is built on `waitid(..., WNOWAIT)`: a thread that wants to
//! observe "has this child exited" without reaping it can do so, which is
//! what lets [`SharedChild::kill`] check "is this still the same, live
//! process" without racing a PID the kernel has already recycled for an
//! unrelated process.

use std::io;
use std::sync::{Condvar, Mutex};

use crate::status::ExitStatus;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum State {
    NotWaited,
    Exiting,
    Reaped(ExitStatus),
}

#[cfg(unix)]
struct Inner {
    pid: u32,
}

#[cfg(windows)]
struct Inner {
    handle: crate::platform::Handle,
    pid: u32,
}

/// A race-free, shareable handle to one running (or exited) child
/// process. Exactly one `wait` call across all clones performs the
/// actual reap; every other concurrent `wait` observes the same
/// [`ExitStatus`] via a condition variable.
pub struct SharedChild {
    state: Mutex<State>,
    waited: Condvar,
    inner: Inner,
}

impl SharedChild {
    #[cfg(unix)]
    pub(crate) fn from_pid(pid: u32) -> SharedChild {
        SharedChild {
            state: Mutex::new(State::NotWaited),
            waited: Condvar::new(),
            inner: Inner { pid },
        }
    }

    #[cfg(windows)]
    pub(crate) fn from_handle(handle: crate::platform::Handle, pid: u32) -> SharedChild {
        SharedChild {
            state: Mutex::new(State::NotWaited),
            waited: Condvar::new(),
            inner: Inner { handle, pid },
        }
    }

    /// The OS process id, for display/diagnostics.
    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    /// True once this child is exiting or has been reaped, without
    /// performing any wait/peek syscall itself. Used by [`crate::handle`]
    /// to report only still-live pids.
    pub(crate) fn is_finished(&self) -> bool {
        !matches!(*self.state.lock().unwrap(), State::NotWaited)
    }

    /// Blocks until the child has been reaped, returning its exit status.
    /// Every thread calling this concurrently observes the same status.
    pub fn wait(&self) -> io::Result<ExitStatus> {
        let mut state = self.state.lock().unwrap();
        loop {
            match *state {
                State::Reaped(status) => return Ok(status),
                State::Exiting => {
                    state = self.waited.wait(state).unwrap();
                }
                State::NotWaited => {
                    *state = State::Exiting;
                    drop(state);
                    let status = self.wait_uninterrupted()?;
                    state = self.state.lock().unwrap();
                    *state = State::Reaped(status);
                    self.waited.notify_all();
                    return Ok(status);
                }
            }
        }
    }

    #[cfg(unix)]
    fn wait_uninterrupted(&self) -> io::Result<ExitStatus> {
        crate::platform::waitid_nowait(self.inner.pid)?;
        crate::platform::reap(self.inner.pid)
    }

    #[cfg(windows)]
    fn wait_uninterrupted(&self) -> io::Result<ExitStatus> {
        crate::platform::wait(&self.inner.handle)
    }

    /// Non-blocking: returns `Ok(None)` if the child is still running,
    /// without transitioning out of `NotWaited` in that case.
    pub fn try_wait(&self) -> io::Result<Option<ExitStatus>> {
        let mut state = self.state.lock().unwrap();
        match *state {
            State::Reaped(status) => return Ok(Some(status)),
            State::Exiting => return Ok(None),
            State::NotWaited => {}
        }
        match self.try_wait_uninterrupted()? {
            None => Ok(None),
            Some(status) => {
                *state = State::Reaped(status);
                self.waited.notify_all();
                Ok(Some(status))
            }
        }
    }

    #[cfg(unix)]
    fn try_wait_uninterrupted(&self) -> io::Result<Option<ExitStatus>> {
        match crate::platform::reap_nonblocking(self.inner.pid)? {
            Some(status) => Ok(Some(status)),
            None => Ok(None),
        }
    }

    #[cfg(windows)]
    fn try_wait_uninterrupted(&self) -> io::Result<Option<ExitStatus>> {
        crate::platform::try_wait(&self.inner.handle)
    }

    /// Sends a kill signal if the child is still `NotWaited`; a no-op
    /// (returning success) once it has started exiting or has been
    /// reaped. Safe to call concurrently with `wait`/`try_wait` from
    /// other threads: the state lock plus `WNOWAIT`'s "peek without
    /// consuming" semantics guarantee we never signal a PID the kernel
    /// has already reused for something else.
    pub fn kill(&self) -> io::Result<()> {
        let state = self.state.lock().unwrap();
        match *state {
            State::NotWaited => self.kill_uninterrupted(),
            State::Exiting | State::Reaped(_) => Ok(()),
        }
    }

    #[cfg(unix)]
    fn kill_uninterrupted(&self) -> io::Result<()> {
        crate::platform::kill(self.inner.pid)
    }

    #[cfg(windows)]
    fn kill_uninterrupted(&self) -> io::Result<()> {
        crate::platform::terminate(&self.inner.handle)
    }
}

unsafe impl Send for SharedChild {}
unsafe impl Sync for SharedChild {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spawn_sleep(secs: &str) -> SharedChild {
        let pid = crate::platform::spawn(
            std::ffi::OsStr::new("sleep"),
            &[std::ffi::OsString::from(secs)],
            None,
            &current_env(),
            crate::platform::ChildStdio {
                stdin: None,
                stdout: None,
                stderr: None,
            },
        )
        .unwrap();
        SharedChild::from_pid(pid)
    }

    fn current_env() -> Vec<std::ffi::OsString> {
        std::env::vars_os()
            .map(|(k, v)| {
                let mut s = k;
                s.push("=");
                s.push(v);
                s
            })
            .collect()
    }

    #[test]
    fn kill_then_wait_reaps_cleanly() {
        let child = spawn_sleep("5");
        child.kill().unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn kill_after_wait_is_a_no_op() {
        let child = spawn_sleep("0");
        let status = child.wait().unwrap();
        assert!(status.success());
        // must not error and must not touch a recycled pid
        child.kill().unwrap();
    }

    #[test]
    fn concurrent_wait_calls_observe_same_status() {
        use std::sync::Arc;
        use std::thread;

        let child = Arc::new(spawn_sleep("0"));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let child = Arc::clone(&child);
                thread::spawn(move || child.wait().unwrap())
            })
            .collect();
        let statuses: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        assert!(statuses.iter().all(|s| *s == statuses[0]));
    }
}
