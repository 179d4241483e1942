//! The recursive start protocol: turns an [`Expression`] tree into a
//! running [`Handle`] tree.
//!
//! An [`IoContext`] is threaded top-down through the tree as it is
//! folded. Two different conflict rules coexist here, both grounded in
//! worked examples rather than a single uniform "innermost wins" slogan:
//!
//! - `dir()`/redirections: unconditional overwrite as we descend, so a
//!   `Cmd`'s own, more deeply nested setting always overrides an ambient
//!   one applied further out (e.g. a per-leaf `.dir()` beats a `.dir()`
//!   wrapped around an entire pipeline).
//! - `env()`/`env_remove()`: first writer wins as we descend from the
//!   root, so a *later* call in a single builder chain (which becomes
//!   the *outer*, root-ward node) overrides an *earlier* one (the
//!   *inner* node) — matching the ordinary expectation that
//!   `.env("X", "1")` followed by `.env_remove("X")` removes `X`.
//!   `full_env` resets the overlay so deeper nodes layer on top of the
//!   new base the same way.
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::expression::{Expression, ExpressionInner, IoValue, ProgramName, StdioStream};
use crate::handle::{CaptureSlots, Handle, HandleNode, LeafHandle, Output, PipeHandleNode, Reader};
use crate::io_pump::{CaptureBuf, Pump};
use crate::platform;
use crate::shared_child::SharedChild;

/// The platform-specific command a [`crate::BeforeSpawnHook`] is handed
/// immediately before spawn: the fully-resolved program, its arguments,
/// working directory and environment, open for one last mutation.
pub struct RawCommand {
    /// The resolved program path/name about to be exec'd.
    pub program: OsString,
    /// Positional arguments, not including argv[0].
    pub args: Vec<OsString>,
    /// The working directory that will be set in the child, if any.
    pub cwd: Option<PathBuf>,
    /// The fully-resolved, already-folded environment.
    pub env: Vec<(OsString, OsString)>,
}

#[derive(Clone)]
enum EnvBase {
    Inherit,
    Full(HashMap<OsString, OsString>),
}

#[derive(Clone)]
enum StdioSource {
    Inherit,
    Null,
    Path(PathBuf),
    Fd(Arc<File>),
    Bytes(Arc<Vec<u8>>),
    Capture,
}

#[derive(Clone)]
struct IoContext {
    stdin: StdioSource,
    stdout: StdioSource,
    stderr: StdioSource,
    cwd: Option<PathBuf>,
    env_base: EnvBase,
    env_overlay: HashMap<OsString, Option<OsString>>,
    unchecked: bool,
    hooks: Vec<Arc<dyn crate::expression::BeforeSpawnHook>>,
}

impl IoContext {
    fn root() -> IoContext {
        IoContext {
            stdin: StdioSource::Inherit,
            stdout: StdioSource::Inherit,
            stderr: StdioSource::Inherit,
            cwd: None,
            env_base: EnvBase::Inherit,
            env_overlay: HashMap::new(),
            unchecked: false,
            hooks: Vec::new(),
        }
    }

    fn with_dir(&self, path: PathBuf) -> IoContext {
        let mut ctx = self.clone();
        ctx.cwd = Some(path);
        ctx
    }

    fn with_env_set(&self, name: OsString, value: OsString) -> IoContext {
        let mut ctx = self.clone();
        ctx.env_overlay
            .entry(platform::env_fold(&name))
            .or_insert(Some(value));
        ctx
    }

    fn with_env_remove(&self, name: OsString) -> IoContext {
        let mut ctx = self.clone();
        ctx.env_overlay
            .entry(platform::env_fold(&name))
            .or_insert(None);
        ctx
    }

    fn with_full_env(&self, vars: &HashMap<OsString, OsString>) -> IoContext {
        let mut ctx = self.clone();
        let folded = vars
            .iter()
            .map(|(k, v)| (platform::env_fold(k), v.clone()))
            .collect();
        ctx.env_base = EnvBase::Full(folded);
        ctx.env_overlay = HashMap::new();
        ctx
    }

    fn with_unchecked(&self) -> IoContext {
        let mut ctx = self.clone();
        ctx.unchecked = true;
        ctx
    }

    fn with_hook(&self, hook: Arc<dyn crate::expression::BeforeSpawnHook>) -> IoContext {
        let mut ctx = self.clone();
        ctx.hooks.push(hook);
        ctx
    }

    fn with_redir(&self, stream: StdioStream, value: &IoValue) -> IoContext {
        let mut ctx = self.clone();
        let resolved = match value {
            IoValue::Null => StdioSource::Null,
            IoValue::Bytes(b) => StdioSource::Bytes(b.clone()),
            IoValue::Path(p) => StdioSource::Path(p.clone()),
            IoValue::File(f) => StdioSource::Fd(f.clone()),
            IoValue::Capture => StdioSource::Capture,
            IoValue::DuplicateStdout => ctx.stdout.clone(),
            IoValue::DuplicateStderr => ctx.stderr.clone(),
        };
        match stream {
            StdioStream::Stdin => ctx.stdin = resolved,
            StdioStream::Stdout => ctx.stdout = resolved,
            StdioStream::Stderr => ctx.stderr = resolved,
        }
        ctx
    }

    fn with_swap(&self) -> IoContext {
        let mut ctx = self.clone();
        std::mem::swap(&mut ctx.stdout, &mut ctx.stderr);
        ctx
    }

    /// Resolves the final environment: the base (inherited or
    /// `full_env`), with every overlay entry applied (`Some` sets,
    /// `None` removes). Each overlay key already carries exactly one
    /// decided value (see `with_env_set`/`with_env_remove`'s
    /// `or_insert`), so no further conflict resolution happens here.
    fn resolve_env(&self) -> Vec<(OsString, OsString)> {
        let mut map: HashMap<OsString, OsString> = match &self.env_base {
            EnvBase::Inherit => std::env::vars_os()
                .map(|(k, v)| (platform::env_fold(&k), v))
                .collect(),
            EnvBase::Full(m) => m.clone(),
        };
        for (k, v) in &self.env_overlay {
            match v {
                Some(val) => {
                    map.insert(k.clone(), val.clone());
                }
                None => {
                    map.remove(k);
                }
            }
        }
        map.into_iter().collect()
    }
}

#[cfg(windows)]
fn mark_child_side(f: &File) -> Result<()> {
    platform::set_inheritable(f, true)
}
#[cfg(unix)]
fn mark_child_side(_f: &File) -> Result<()> {
    Ok(())
}

#[cfg(windows)]
fn mark_parent_side(f: &File) -> Result<()> {
    platform::set_inheritable(f, false)
}
#[cfg(unix)]
fn mark_parent_side(_f: &File) -> Result<()> {
    Ok(())
}

/// Turns one resolved stdio endpoint into the `File` handed to the child
/// (if any), a background pump (for `Bytes`/`Capture`), and a capture
/// buffer (for `Capture` on stdout/stderr).
fn materialize(
    source: &StdioSource,
    stream: StdioStream,
) -> Result<(Option<File>, Option<Pump>, Option<CaptureBuf>)> {
    match source {
        StdioSource::Inherit => Ok((None, None, None)),
        StdioSource::Null => {
            let is_read = stream == StdioStream::Stdin;
            let f = std::fs::OpenOptions::new()
                .read(is_read)
                .write(!is_read)
                .open(platform::NULL_DEVICE)
                .map_err(Error::Platform)?;
            mark_child_side(&f)?;
            Ok((Some(f), None, None))
        }
        StdioSource::Path(p) => {
            let f = if stream == StdioStream::Stdin {
                platform::open_for_read(p)?
            } else {
                platform::create_for_write(p)?
            };
            mark_child_side(&f)?;
            Ok((Some(f), None, None))
        }
        StdioSource::Fd(arc) => {
            let f = arc.try_clone().map_err(Error::Platform)?;
            mark_child_side(&f)?;
            Ok((Some(f), None, None))
        }
        StdioSource::Bytes(data) => {
            let (read_end, write_end) = platform::pipe_pair()?;
            mark_child_side(&read_end)?;
            mark_parent_side(&write_end)?;
            let pump = Pump::spawn_writer(data.clone(), write_end);
            Ok((Some(read_end), Some(pump), None))
        }
        StdioSource::Capture => {
            let (read_end, write_end) = platform::pipe_pair()?;
            mark_parent_side(&read_end)?;
            mark_child_side(&write_end)?;
            let (pump, buf) = Pump::spawn_capture(read_end);
            Ok((Some(write_end), Some(pump), Some(buf)))
        }
    }
}

#[cfg(unix)]
fn kv_strings(pairs: &[(OsString, OsString)]) -> Vec<OsString> {
    pairs
        .iter()
        .map(|(k, v)| {
            let mut s = k.clone();
            s.push("=");
            s.push(v);
            s
        })
        .collect()
}

#[cfg(unix)]
fn spawn_native(
    raw: &RawCommand,
    stdin_file: Option<File>,
    stdout_file: Option<File>,
    stderr_file: Option<File>,
    _guard: &platform::PipeSpawnGuard,
) -> Result<SharedChild> {
    use std::os::unix::io::AsRawFd;
    let stdio = platform::ChildStdio {
        stdin: stdin_file.as_ref().map(|f| f.as_raw_fd()),
        stdout: stdout_file.as_ref().map(|f| f.as_raw_fd()),
        stderr: stderr_file.as_ref().map(|f| f.as_raw_fd()),
    };
    let env_strings = kv_strings(&raw.env);
    let pid = platform::spawn(&raw.program, &raw.args, raw.cwd.as_deref(), &env_strings, stdio)?;
    // The child inherited these across fork(); our copies must close now
    // so EOF/back-pressure on a pipe end is observed promptly.
    drop(stdin_file);
    drop(stdout_file);
    drop(stderr_file);
    Ok(SharedChild::from_pid(pid))
}

#[cfg(windows)]
fn spawn_native(
    raw: &RawCommand,
    stdin_file: Option<File>,
    stdout_file: Option<File>,
    stderr_file: Option<File>,
    guard: &platform::PipeSpawnGuard,
) -> Result<SharedChild> {
    use std::os::windows::io::AsRawHandle;
    let cmdline = platform::build_cmdline(&raw.program, &raw.args);
    let env_block = platform::build_env_block(&raw.env);
    let stdio = platform::ChildStdio {
        stdin: stdin_file.as_ref().map(|f| f.as_raw_handle()),
        stdout: stdout_file.as_ref().map(|f| f.as_raw_handle()),
        stderr: stderr_file.as_ref().map(|f| f.as_raw_handle()),
    };
    let (handle, pid) = platform::spawn(
        &raw.program,
        &cmdline,
        raw.cwd.as_deref(),
        &env_block,
        stdio,
        guard,
    )?;
    drop(stdin_file);
    drop(stdout_file);
    drop(stderr_file);
    Ok(SharedChild::from_handle(handle, pid))
}

fn start_leaf(
    program: &ProgramName,
    args: &[OsString],
    ctx: &IoContext,
    spawned: &mut Vec<Arc<SharedChild>>,
    guard: &platform::PipeSpawnGuard,
) -> Result<(HandleNode, CaptureSlots)> {
    let env_pairs = ctx.resolve_env();
    let path_key = platform::env_fold(OsStr::new("PATH"));
    let path_var = env_pairs
        .iter()
        .find(|(k, _)| *k == path_key)
        .map(|(_, v)| v.clone());

    let resolved_program = platform::resolve_program(program, path_var.as_deref())?;

    let mut raw = RawCommand {
        program: resolved_program,
        args: args.to_vec(),
        cwd: ctx.cwd.clone(),
        env: env_pairs,
    };
    for hook in &ctx.hooks {
        hook.call(&mut raw)?;
    }

    let (stdin_file, stdin_pump, _) = materialize(&ctx.stdin, StdioStream::Stdin)?;
    let (stdout_file, stdout_pump, stdout_capture) =
        materialize(&ctx.stdout, StdioStream::Stdout)?;
    let (stderr_file, stderr_pump, stderr_capture) =
        materialize(&ctx.stderr, StdioStream::Stderr)?;

    let child = Arc::new(spawn_native(&raw, stdin_file, stdout_file, stderr_file, guard)?);
    spawned.push(child.clone());

    let mut pumps = Vec::new();
    if let Some(p) = stdin_pump {
        pumps.push(Arc::new(p));
    }
    if let Some(p) = stdout_pump {
        pumps.push(Arc::new(p));
    }
    if let Some(p) = stderr_pump {
        pumps.push(Arc::new(p));
    }

    let leaf = LeafHandle {
        child,
        pumps,
        unchecked: ctx.unchecked,
    };
    Ok((
        HandleNode::Leaf(leaf),
        CaptureSlots {
            stdout: stdout_capture,
            stderr: stderr_capture,
        },
    ))
}

fn start_pipe(
    l: &Expression,
    r: &Expression,
    ctx: &IoContext,
    spawned: &mut Vec<Arc<SharedChild>>,
    guard: &platform::PipeSpawnGuard,
) -> Result<(HandleNode, CaptureSlots)> {
    let (pipe_read, pipe_write) = platform::pipe_pair()?;
    mark_child_side(&pipe_write)?;
    mark_child_side(&pipe_read)?;
    let pipe_read = Arc::new(pipe_read);
    let pipe_write = Arc::new(pipe_write);

    let mut ctx_l = ctx.clone();
    ctx_l.stdout = StdioSource::Fd(pipe_write.clone());
    let (left, left_captures) = start_rec(l, &ctx_l, spawned, guard)?;

    let mut ctx_r = ctx.clone();
    ctx_r.stdin = StdioSource::Fd(pipe_read.clone());
    // If R fails to start, L (already pushed onto `spawned`) is killed
    // and reaped by the top-level cleanup in `build_handle_tree`, which
    // sees our propagated error.
    let (right_node, right_captures) = start_rec(r, &ctx_r, spawned, guard)?;

    // Both children now hold their own dup'd copy of the relevant end;
    // our copies must close so the pipe delivers EOF/back-pressure
    // between the two processes, not to us.
    drop(pipe_write);
    drop(pipe_read);

    let node = HandleNode::Pipe(Box::new(PipeHandleNode {
        left,
        right: right_node,
    }));
    let captures = CaptureSlots {
        stdout: right_captures.stdout.or(left_captures.stdout),
        stderr: right_captures.stderr.or(left_captures.stderr),
    };
    Ok((node, captures))
}

fn start_rec(
    expr: &Expression,
    ctx: &IoContext,
    spawned: &mut Vec<Arc<SharedChild>>,
    guard: &platform::PipeSpawnGuard,
) -> Result<(HandleNode, CaptureSlots)> {
    match &*expr.0 {
        ExpressionInner::Cmd { program, args } => start_leaf(program, args, ctx, spawned, guard),
        ExpressionInner::Pipe(l, r) => start_pipe(l, r, ctx, spawned, guard),
        ExpressionInner::IoRedir {
            inner,
            stream,
            value,
        } => {
            let ctx = ctx.with_redir(*stream, value);
            start_rec(inner, &ctx, spawned, guard)
        }
        ExpressionInner::StreamSwap(inner) => {
            let ctx = ctx.with_swap();
            start_rec(inner, &ctx, spawned, guard)
        }
        ExpressionInner::Dir(inner, path) => {
            let ctx = ctx.with_dir(platform::canonicalize_for_dir(path)?);
            start_rec(inner, &ctx, spawned, guard)
        }
        ExpressionInner::Env(inner, name, value) => {
            let ctx = ctx.with_env_set(name.clone(), value.clone());
            start_rec(inner, &ctx, spawned, guard)
        }
        ExpressionInner::EnvRemove(inner, name) => {
            let ctx = ctx.with_env_remove(name.clone());
            start_rec(inner, &ctx, spawned, guard)
        }
        ExpressionInner::FullEnv(inner, vars) => {
            let ctx = ctx.with_full_env(vars);
            start_rec(inner, &ctx, spawned, guard)
        }
        ExpressionInner::Unchecked(inner) => {
            let ctx = ctx.with_unchecked();
            start_rec(inner, &ctx, spawned, guard)
        }
        ExpressionInner::BeforeSpawn(inner, hook) => {
            let ctx = ctx.with_hook(hook.clone());
            start_rec(inner, &ctx, spawned, guard)
        }
    }
}

/// Kills and reaps every already-spawned leaf, in reverse start order,
/// discarding their statuses: the partial-start cleanup that runs when
/// any leaf fails to spawn.
fn cleanup(spawned: &[Arc<SharedChild>]) {
    for child in spawned.iter().rev() {
        let _ = child.kill();
        let _ = child.wait();
    }
}

fn build_handle_tree(expr: &Expression) -> Result<Handle> {
    platform::suppress_sigpipe_once();
    let guard = platform::pipe_spawn_guard();
    let mut spawned = Vec::new();
    match start_rec(expr, &IoContext::root(), &mut spawned, &guard) {
        Ok((root, captures)) => Ok(Handle::new(root, captures)),
        Err(e) => {
            cleanup(&spawned);
            Err(e)
        }
    }
}

pub(crate) fn start(expr: &Expression) -> Result<Handle> {
    build_handle_tree(expr)
}

pub(crate) fn run(expr: &Expression) -> Result<Output> {
    let handle = build_handle_tree(expr)?;
    handle.wait_checked()
}

pub(crate) fn read(expr: &Expression) -> Result<String> {
    let expr = expr.clone().stdout_capture();
    let output = run(&expr)?;
    let mut text = String::from_utf8(output.stdout).map_err(|e| {
        Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.utf8_error()))
    })?;
    while matches!(text.as_bytes().last(), Some(b'\n') | Some(b'\r')) {
        text.pop();
    }
    Ok(text)
}

pub(crate) fn reader(expr: &Expression) -> Result<Reader> {
    platform::suppress_sigpipe_once();
    let guard = platform::pipe_spawn_guard();
    let (read_end, write_end) = platform::pipe_pair()?;
    mark_parent_side(&read_end)?;
    mark_child_side(&write_end)?;

    let mut ctx = IoContext::root();
    ctx.stdout = StdioSource::Fd(Arc::new(write_end));

    let mut spawned = Vec::new();
    match start_rec(expr, &ctx, &mut spawned, &guard) {
        Ok((root, captures)) => Ok(Reader::new(Handle::new(root, captures), read_end)),
        Err(e) => {
            cleanup(&spawned);
            Err(e)
        }
    }
}
