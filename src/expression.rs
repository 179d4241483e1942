//! The immutable expression tree: [`Expression`] and its builder methods.
//!
//! Every modifier here returns a *new* `Expression` that shares its inner
//! subtree with the original via `Arc`; nothing is ever mutated in place,
//! so the same sub-expression can be reused from several composition
//! sites without surprise.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::exec;
use crate::handle::{Handle, Output, Reader};

/// A command's program, distinguishing a plain name looked up on `PATH`
/// from a typed filesystem path subject to [`crate::platform::resolve_program`].
#[derive(Debug, Clone)]
pub enum ProgramName {
    /// A bare program name, e.g. `"cat"`, resolved by the OS loader.
    Name(OsString),
    /// A filesystem path, e.g. `./scripts/build.sh`.
    Path(PathBuf),
}

impl ProgramName {
    pub(crate) fn display(&self) -> String {
        match self {
            ProgramName::Name(n) => n.to_string_lossy().into_owned(),
            ProgramName::Path(p) => p.to_string_lossy().into_owned(),
        }
    }
}

/// Which standard stream an [`IoRedir`] applies to.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StdioStream {
    Stdin,
    Stdout,
    Stderr,
}

/// The target of a redirection, covering every kind in the redirection
/// table (`stdin_bytes`, `stdout_path`, `stdout_capture`, ...).
#[derive(Clone)]
pub enum IoValue {
    /// Redirect to the platform's null device.
    Null,
    /// Feed these bytes in on a background writer thread (stdin only).
    Bytes(Arc<Vec<u8>>),
    /// Open this path (read for stdin, truncating write otherwise).
    Path(PathBuf),
    /// Use this already-open file/descriptor directly.
    File(Arc<File>),
    /// Read this stream on a background thread and return it in [`Output`].
    Capture,
    /// Duplicate the effective stdout endpoint onto this stream (used for
    /// `stderr_to_stdout`/`stdout_to_stderr` style redirection).
    DuplicateStdout,
    /// Duplicate the effective stderr endpoint onto this stream.
    DuplicateStderr,
}

impl fmt::Debug for IoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoValue::Null => write!(f, "Null"),
            IoValue::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            IoValue::Path(p) => write!(f, "Path({p:?})"),
            IoValue::File(_) => write!(f, "File(..)"),
            IoValue::Capture => write!(f, "Capture"),
            IoValue::DuplicateStdout => write!(f, "DuplicateStdout"),
            IoValue::DuplicateStderr => write!(f, "DuplicateStderr"),
        }
    }
}

/// Opaque per-leaf spawn-time hook. Implementations receive a mutable
/// reference to a platform command builder immediately before spawn,
/// letting callers apply OS-specific tweaks the builder API doesn't
/// otherwise expose (e.g. process creation flags).
pub trait BeforeSpawnHook: Send + Sync {
    fn call(&self, cmd: &mut exec::RawCommand) -> Result<()>;
}

impl<F> BeforeSpawnHook for F
where
    F: Fn(&mut exec::RawCommand) -> Result<()> + Send + Sync,
{
    fn call(&self, cmd: &mut exec::RawCommand) -> Result<()> {
        self(cmd)
    }
}

/// The immutable expression tree node. See the module docs for the tree
/// shapes this can take.
pub(crate) enum ExpressionInner {
    Cmd {
        program: ProgramName,
        args: Vec<OsString>,
    },
    Pipe(Expression, Expression),
    IoRedir {
        inner: Expression,
        stream: StdioStream,
        value: IoValue,
    },
    StreamSwap(Expression),
    Dir(Expression, PathBuf),
    Env(Expression, OsString, OsString),
    EnvRemove(Expression, OsString),
    FullEnv(Expression, HashMap<OsString, OsString>),
    Unchecked(Expression),
    BeforeSpawn(Expression, Arc<dyn BeforeSpawnHook>),
}

impl fmt::Debug for ExpressionInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionInner::Cmd { program, args } => {
                f.debug_struct("Cmd").field("program", &program.display()).field("args", args).finish()
            }
            ExpressionInner::Pipe(l, r) => f.debug_tuple("Pipe").field(l).field(r).finish(),
            ExpressionInner::IoRedir { inner, stream, value } => f
                .debug_struct("IoRedir")
                .field("inner", inner)
                .field("stream", stream)
                .field("value", value)
                .finish(),
            ExpressionInner::StreamSwap(e) => f.debug_tuple("StreamSwap").field(e).finish(),
            ExpressionInner::Dir(e, p) => f.debug_tuple("Dir").field(e).field(p).finish(),
            ExpressionInner::Env(e, k, v) => f.debug_tuple("Env").field(e).field(k).field(v).finish(),
            ExpressionInner::EnvRemove(e, k) => f.debug_tuple("EnvRemove").field(e).field(k).finish(),
            ExpressionInner::FullEnv(e, _) => f.debug_tuple("FullEnv").field(e).finish(),
            ExpressionInner::Unchecked(e) => f.debug_tuple("Unchecked").field(e).finish(),
            ExpressionInner::BeforeSpawn(e, _) => f.debug_tuple("BeforeSpawn").field(e).finish(),
        }
    }
}

/// An immutable, cheaply-cloneable description of a process or process
/// tree to execute. Build one with [`Expression::cmd`] or
/// [`Expression::shell`], apply modifiers, then call [`Expression::run`],
/// [`Expression::read`] or [`Expression::start`].
#[derive(Clone, Debug)]
pub struct Expression(pub(crate) Arc<ExpressionInner>);

impl Expression {
    fn new(inner: ExpressionInner) -> Expression {
        Expression(Arc::new(inner))
    }

    /// Builds a `Cmd` node running `program` directly (no shell), with no
    /// arguments. Use [`Expression::arg`]/[`Expression::args`] to add some.
    pub fn cmd<S: AsRef<OsStr>>(program: S) -> Expression {
        Expression::new(ExpressionInner::Cmd {
            program: ProgramName::Name(program.as_ref().to_owned()),
            args: Vec::new(),
        })
    }

    /// Like [`Expression::cmd`], but `program` is a typed filesystem path
    /// rather than a name looked up on `PATH`; resolved against the
    /// current process's working directory (not an ambient `.dir()`) by
    /// [`crate::platform::resolve_program`].
    pub fn cmd_path<P: AsRef<Path>>(program: P) -> Expression {
        Expression::new(ExpressionInner::Cmd {
            program: ProgramName::Path(program.as_ref().to_owned()),
            args: Vec::new(),
        })
    }

    /// Runs `cmdstr` through the platform shell (`sh -c` on Unix,
    /// `cmd.exe /C` on Windows). `proctree` never spawns a shell
    /// implicitly; this is the explicit opt-in, and callers are
    /// responsible for not interpolating untrusted input into `cmdstr`.
    pub fn shell<S: AsRef<OsStr>>(cmdstr: S) -> Expression {
        let shell = crate::platform::SHELL;
        Expression::cmd(shell[0]).arg(shell[1]).arg(cmdstr)
    }

    /// Appends a positional argument. Only valid on a `Cmd` leaf (or a
    /// tree whose outermost node wraps one); panics otherwise, the same
    /// way the underlying child builders reject a malformed expression
    /// tree at construction time rather than at spawn time.
    pub fn arg<S: AsRef<OsStr>>(self, arg: S) -> Expression {
        self.map_cmd(|args| args.push(arg.as_ref().to_owned()))
    }

    /// Appends several positional arguments.
    pub fn args<I, S>(self, args: I) -> Expression
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.map_cmd(|dst| dst.extend(args.into_iter().map(|a| a.as_ref().to_owned())))
    }

    fn map_cmd(self, f: impl FnOnce(&mut Vec<OsString>)) -> Expression {
        match &*self.0 {
            ExpressionInner::Cmd { program, args } => {
                let mut args = args.clone();
                f(&mut args);
                Expression::new(ExpressionInner::Cmd {
                    program: program.clone(),
                    args,
                })
            }
            _ => panic!("arg()/args() can only be applied directly to a Cmd expression"),
        }
    }

    /// Composes `self | other`: `self`'s stdout feeds `other`'s stdin.
    pub fn pipe(self, other: Expression) -> Expression {
        Expression::new(ExpressionInner::Pipe(self, other))
    }

    /// Sets the working directory for every `Cmd` descendant that does
    /// not have a more deeply nested `dir()` of its own.
    pub fn dir<P: AsRef<Path>>(self, path: P) -> Expression {
        Expression::new(ExpressionInner::Dir(self, path.as_ref().to_owned()))
    }

    /// Overlays a single environment variable; innermost overlay wins.
    pub fn env<K: AsRef<OsStr>, V: AsRef<OsStr>>(self, name: K, value: V) -> Expression {
        Expression::new(ExpressionInner::Env(
            self,
            name.as_ref().to_owned(),
            value.as_ref().to_owned(),
        ))
    }

    /// Unsets a variable for this subtree only; does not affect overlays
    /// applied further out.
    pub fn env_remove<K: AsRef<OsStr>>(self, name: K) -> Expression {
        Expression::new(ExpressionInner::EnvRemove(self, name.as_ref().to_owned()))
    }

    /// Replaces the entire environment for this subtree, erasing any
    /// outer `env`/`full_env` overlay (but not outer `env_remove`
    /// scoping above this node, which simply has nothing left to act on).
    pub fn full_env<I, K, V>(self, vars: I) -> Expression
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        let map = vars
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_owned(), v.as_ref().to_owned()))
            .collect();
        Expression::new(ExpressionInner::FullEnv(self, map))
    }

    /// Marks this subtree's leaves so a non-zero exit does not turn into
    /// a [`crate::Error::NonZeroExit`] — "uncheckedness sticks" to the
    /// leaves it applies to without masking an unrelated sibling (see
    /// [`crate::status::reduce_pipe`]).
    pub fn unchecked(self) -> Expression {
        Expression::new(ExpressionInner::Unchecked(self))
    }

    /// Attaches a hook invoked immediately before each leaf under this
    /// subtree is spawned, with access to the platform command builder.
    pub fn before_spawn<H: BeforeSpawnHook + 'static>(self, hook: H) -> Expression {
        Expression::new(ExpressionInner::BeforeSpawn(self, Arc::new(hook)))
    }

    fn redir(self, stream: StdioStream, value: IoValue) -> Expression {
        Expression::new(ExpressionInner::IoRedir {
            inner: self,
            stream,
            value,
        })
    }

    /// Stdin reads from an in-memory byte buffer on a background writer
    /// thread.
    pub fn stdin_bytes(self, bytes: impl Into<Vec<u8>>) -> Expression {
        self.redir(StdioStream::Stdin, IoValue::Bytes(Arc::new(bytes.into())))
    }

    /// Opens `path` for reading and uses it as stdin.
    pub fn stdin_path<P: AsRef<Path>>(self, path: P) -> Expression {
        self.redir(StdioStream::Stdin, IoValue::Path(path.as_ref().to_owned()))
    }

    /// Uses an already-open file as stdin.
    pub fn stdin_file(self, file: File) -> Expression {
        self.redir(StdioStream::Stdin, IoValue::File(Arc::new(file)))
    }

    /// Stdin is the platform's null device.
    pub fn stdin_null(self) -> Expression {
        self.redir(StdioStream::Stdin, IoValue::Null)
    }

    /// Opens `path` for writing (truncating) and uses it as stdout.
    pub fn stdout_path<P: AsRef<Path>>(self, path: P) -> Expression {
        self.redir(StdioStream::Stdout, IoValue::Path(path.as_ref().to_owned()))
    }

    /// Uses an already-open file as stdout.
    pub fn stdout_file(self, file: File) -> Expression {
        self.redir(StdioStream::Stdout, IoValue::File(Arc::new(file)))
    }

    /// Stdout goes to the platform's null device.
    pub fn stdout_null(self) -> Expression {
        self.redir(StdioStream::Stdout, IoValue::Null)
    }

    /// Stdout is read by a background thread and returned as
    /// [`Output::stdout`].
    pub fn stdout_capture(self) -> Expression {
        self.redir(StdioStream::Stdout, IoValue::Capture)
    }

    /// Stdout becomes a duplicate of the effective stderr endpoint.
    pub fn stdout_to_stderr(self) -> Expression {
        self.redir(StdioStream::Stdout, IoValue::DuplicateStderr)
    }

    /// Opens `path` for reading and uses it as stderr.
    pub fn stderr_path<P: AsRef<Path>>(self, path: P) -> Expression {
        self.redir(StdioStream::Stderr, IoValue::Path(path.as_ref().to_owned()))
    }

    /// Uses an already-open file as stderr.
    pub fn stderr_file(self, file: File) -> Expression {
        self.redir(StdioStream::Stderr, IoValue::File(Arc::new(file)))
    }

    /// Stderr goes to the platform's null device.
    pub fn stderr_null(self) -> Expression {
        self.redir(StdioStream::Stderr, IoValue::Null)
    }

    /// Stderr is read by a background thread and returned as
    /// [`Output::stderr`].
    pub fn stderr_capture(self) -> Expression {
        self.redir(StdioStream::Stderr, IoValue::Capture)
    }

    /// Stderr becomes a duplicate of the effective stdout endpoint.
    pub fn stderr_to_stdout(self) -> Expression {
        self.redir(StdioStream::Stderr, IoValue::DuplicateStdout)
    }

    /// Atomically swaps the effective stdout and stderr endpoints.
    pub fn stdout_stderr_swap(self) -> Expression {
        Expression::new(ExpressionInner::StreamSwap(self))
    }

    // --- Terminators -----------------------------------------------------

    /// Starts the expression, waits for it to finish, and returns its
    /// captured output (if any) and reduced status. Raises
    /// [`crate::Error::NonZeroExit`] if the reduced status is checked and
    /// non-zero.
    pub fn run(&self) -> Result<Output> {
        exec::run(self)
    }

    /// Like [`Expression::run`], but returns the captured stdout decoded
    /// as UTF-8 with trailing ASCII newline/carriage-return bytes
    /// stripped. Implicitly captures stdout if it wasn't already.
    pub fn read(&self) -> Result<String> {
        exec::read(self)
    }

    /// Starts the expression and returns a live [`Handle`] without
    /// waiting for it to finish.
    pub fn start(&self) -> Result<Handle> {
        exec::start(self)
    }

    /// Starts the expression and returns a readable byte stream over its
    /// stdout. Dropping (or explicitly closing) the reader kills and
    /// reaps the expression.
    pub fn reader(&self) -> Result<Reader> {
        exec::reader(self)
    }
}
