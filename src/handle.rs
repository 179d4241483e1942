//! The live process tree returned by [`crate::Expression::start`]:
//! [`Handle`] mirrors the shape of the `Expression` it came from (one
//! [`SharedChild`] per `Cmd` leaf, composed the same way `Pipe` composed
//! the expressions), so `wait`/`kill` can recurse the same way the
//! executor built it.

use std::io::{self, Read};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::io_pump::{CaptureBuf, Pump};
use crate::shared_child::SharedChild;
use crate::status::{reduce_pipe, Status};

/// One already-spawned `Cmd` leaf, plus the background I/O pumps feeding
/// or draining its pipes.
pub(crate) struct LeafHandle {
    pub(crate) child: Arc<SharedChild>,
    pub(crate) pumps: Vec<Arc<Pump>>,
    pub(crate) unchecked: bool,
}

/// Mirrors [`crate::expression::ExpressionInner::Pipe`]: waiting recurses
/// into both sides and reduces their statuses per the pipefail rule.
pub(crate) struct PipeHandleNode {
    pub(crate) left: HandleNode,
    pub(crate) right: HandleNode,
}

pub(crate) enum HandleNode {
    Leaf(LeafHandle),
    Pipe(Box<PipeHandleNode>),
}

impl HandleNode {
    /// Waits for every leaf under this node, returning the reduced status
    /// alongside any I/O pump error observed along the way. The pump error
    /// is *deferred*, never propagated through the outer `io::Result` (that
    /// one is reserved for a hard failure of the wait/reap syscall itself):
    /// [`Handle::wait`] decides whether the pump error or the status wins,
    /// per spec.md §7 ("merged with status if status is zero, otherwise
    /// status wins").
    pub(crate) fn wait(&self) -> io::Result<(Status, Option<io::Error>)> {
        match self {
            HandleNode::Leaf(leaf) => {
                let exit = leaf.child.wait()?;
                let mut pump_err = None;
                for pump in &leaf.pumps {
                    if let Err(e) = pump.join() {
                        pump_err.get_or_insert(e);
                    }
                }
                let status = Status::new(exit);
                let status = if leaf.unchecked {
                    status.mark_unchecked()
                } else {
                    status
                };
                Ok((status, pump_err))
            }
            HandleNode::Pipe(p) => {
                // Wait on both sides concurrently: one side blocking in
                // `waitpid` must not delay joining the other side's I/O
                // pumps, which could otherwise deadlock against a child
                // still writing to a pipe this side is draining.
                let (left, right) = std::thread::scope(|scope| {
                    let right_thread = scope.spawn(|| p.right.wait());
                    let left = p.left.wait();
                    (left, right_thread.join().unwrap())
                });
                let (left, left_err) = left?;
                let (right, right_err) = right?;
                Ok((reduce_pipe(left, right), left_err.or(right_err)))
            }
        }
    }

    pub(crate) fn try_wait(&self) -> io::Result<Option<(Status, Option<io::Error>)>> {
        match self {
            HandleNode::Leaf(leaf) => match leaf.child.try_wait()? {
                Some(exit) => {
                    let mut pump_err = None;
                    for pump in &leaf.pumps {
                        if let Err(e) = pump.join() {
                            pump_err.get_or_insert(e);
                        }
                    }
                    let status = Status::new(exit);
                    let status = if leaf.unchecked {
                        status.mark_unchecked()
                    } else {
                        status
                    };
                    Ok(Some((status, pump_err)))
                }
                None => Ok(None),
            },
            HandleNode::Pipe(p) => match (p.left.try_wait()?, p.right.try_wait()?) {
                (Some((left, left_err)), Some((right, right_err))) => {
                    Ok(Some((reduce_pipe(left, right), left_err.or(right_err))))
                }
                _ => Ok(None),
            },
        }
    }

    pub(crate) fn kill(&self) -> io::Result<()> {
        match self {
            HandleNode::Leaf(leaf) => leaf.child.kill(),
            HandleNode::Pipe(p) => {
                p.left.kill()?;
                p.right.kill()?;
                Ok(())
            }
        }
    }

    fn pids(&self, out: &mut Vec<u32>) {
        match self {
            HandleNode::Leaf(leaf) => {
                if !leaf.child.is_finished() {
                    out.push(leaf.child.pid());
                }
            }
            HandleNode::Pipe(p) => {
                p.left.pids(out);
                p.right.pids(out);
            }
        }
    }
}

/// The captured output and reduced exit status of a finished expression.
/// `stdout`/`stderr` are empty unless the expression used
/// [`crate::Expression::stdout_capture`]/[`stderr_capture`](crate::Expression::stderr_capture).
#[derive(Debug, Clone)]
pub struct Output {
    pub status: crate::status::ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

pub(crate) struct CaptureSlots {
    pub(crate) stdout: Option<CaptureBuf>,
    pub(crate) stderr: Option<CaptureBuf>,
}

/// A live, possibly still-running process tree. Dropping a `Handle`
/// leaves the process(es) running and unwaited, exactly like
/// `std::process::Child` — call [`Handle::wait`] or [`Handle::kill`]
/// explicitly.
pub struct Handle {
    pub(crate) root: HandleNode,
    pub(crate) captures: CaptureSlots,
}

impl Handle {
    pub(crate) fn new(root: HandleNode, captures: CaptureSlots) -> Handle {
        Handle { root, captures }
    }

    /// Blocks until every leaf has exited and joins all I/O pumps,
    /// returning the reduced status merged with any deferred pump
    /// [`Error::Io`]: the error is only raised when the reduced status is a
    /// success, otherwise a non-zero status wins and the I/O error is
    /// dropped, per spec.md §7.
    fn reduced_wait(&self) -> Result<Status> {
        let (status, pump_err) = self.root.wait().map_err(Error::Io)?;
        if status.success() {
            if let Some(err) = pump_err {
                return Err(Error::Io(err));
            }
        }
        Ok(status)
    }

    fn output_for(&self, exit: crate::status::ExitStatus) -> Output {
        Output {
            status: exit,
            stdout: self
                .captures
                .stdout
                .as_ref()
                .map(|b| b.lock().unwrap().clone())
                .unwrap_or_default(),
            stderr: self
                .captures
                .stderr
                .as_ref()
                .map(|b| b.lock().unwrap().clone())
                .unwrap_or_default(),
        }
    }

    /// Blocks until every leaf has exited, joins all I/O pumps, and
    /// returns the captured output plus reduced status. Never raises
    /// [`Error::NonZeroExit`] — `wait` always returns a status, checked or
    /// not; only [`crate::Expression::run`]/[`crate::Expression::read`]
    /// turn a checked non-zero status into that error (see
    /// [`Handle::wait_checked`]).
    pub fn wait(&self) -> Result<Output> {
        let status = self.reduced_wait()?;
        Ok(self.output_for(status.exit))
    }

    /// Like [`Handle::wait`], but additionally raises
    /// [`Error::NonZeroExit`] if the reduced status is checked and
    /// non-zero. Used by [`crate::Expression::run`]/[`crate::Expression::read`]
    /// only — `start`/`wait` must always return a status, per spec.md §7.
    pub(crate) fn wait_checked(&self) -> Result<Output> {
        let status = self.reduced_wait()?.into_result()?;
        Ok(self.output_for(status.exit))
    }

    /// Non-blocking: returns `Ok(None)` unless every leaf has exited,
    /// without transitioning a still-running leaf out of its "not yet
    /// waited" state. Does not join I/O pumps or fetch captured output
    /// until all leaves have actually finished. Like [`Handle::wait`],
    /// never raises [`Error::NonZeroExit`].
    pub fn try_wait(&self) -> Result<Option<Output>> {
        let (status, pump_err) = match self.root.try_wait().map_err(Error::Io)? {
            Some(pair) => pair,
            None => return Ok(None),
        };
        if status.success() {
            if let Some(err) = pump_err {
                return Err(Error::Io(err));
            }
        }
        Ok(Some(self.output_for(status.exit)))
    }

    /// Kills every leaf in the tree. Safe to call multiple times, and
    /// safe to call concurrently with [`Handle::wait`] on another
    /// thread — see [`crate::shared_child::SharedChild::kill`].
    pub fn kill(&self) -> Result<()> {
        self.root.kill().map_err(Error::Io)
    }

    /// The OS process ids of every `Cmd` leaf, in left-to-right order.
    pub fn pids(&self) -> Vec<u32> {
        let mut out = Vec::new();
        self.root.pids(&mut out);
        out
    }
}

/// A readable byte stream over a started expression's captured stdout.
/// Dropping (or explicitly [`Reader::close`]ing) it kills and reaps the
/// underlying process tree, so a caller that stops reading early never
/// leaks a lingering child.
pub struct Reader {
    handle: Handle,
    stdout_src: std::fs::File,
}

impl Reader {
    pub(crate) fn new(handle: Handle, stdout_src: std::fs::File) -> Reader {
        Reader { handle, stdout_src }
    }

    /// Kills the underlying process tree and waits for it to finish,
    /// discarding its status. Equivalent to dropping the `Reader`, but
    /// lets the caller observe I/O errors from the final wait. `Handle::wait`
    /// never raises `Error::NonZeroExit`, so the only error this can
    /// surface is a genuine I/O failure.
    pub fn close(self) -> Result<()> {
        self.handle.kill()?;
        self.handle.wait().map(|_| ())
    }
}

impl Read for Reader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdout_src.read(buf)
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        let _ = self.handle.kill();
        let _ = self.handle.root.wait();
    }
}
