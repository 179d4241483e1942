//! Unix platform shim: raw `fork`/`execvp`, pipes, `waitid(WNOWAIT)`,
//! signal handling.

use std::ffi::{CString, OsStr, OsString};
use std::fs::File;
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::Path;
use std::ptr;
use std::sync::Once;

use crate::error::{Error, Result};
use crate::status::ExitStatus;

pub const NULL_DEVICE: &str = "/dev/null";
pub const SHELL: [&str; 2] = ["sh", "-c"];

/// No-op on Unix: there is no pipe/spawn inheritance race to guard
/// against, since close-on-exec is set explicitly on every fd we don't
/// want the child to inherit.
pub struct PipeSpawnGuard;

pub fn pipe_spawn_guard() -> PipeSpawnGuard {
    PipeSpawnGuard
}

fn check_err(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

/// Creates a unidirectional pipe with both ends marked close-on-exec; the
/// executor dup2's the end it wants into the child's stdio slot before
/// exec, which clears `FD_CLOEXEC` on that one descriptor.
pub fn pipe_pair() -> Result<(File, File)> {
    let mut fds = [0 as libc::c_int; 2];
    unsafe {
        check_err(libc::pipe(fds.as_mut_ptr())).map_err(Error::Platform)?;
    }
    let (read, write) = unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) };
    set_cloexec(&read)?;
    set_cloexec(&write)?;
    Ok((read, write))
}

fn set_cloexec(f: &File) -> Result<()> {
    let fd = f.as_raw_fd();
    unsafe {
        let old = check_err(libc::fcntl(fd, libc::F_GETFD)).map_err(Error::Platform)?;
        check_err(libc::fcntl(fd, libc::F_SETFD, old | libc::FD_CLOEXEC))
            .map_err(Error::Platform)?;
    }
    Ok(())
}

/// Folding is the identity function on Unix: environment variable names
/// are case-sensitive.
pub fn fold_env_name(name: &OsStr) -> OsString {
    name.to_owned()
}

/// Searches `path_var` (`:`-separated, falling back to the calling
/// process's own `PATH` if the child's overlay never set one) for an
/// executable regular file named `name`, the way `execvp` would.
pub fn search_path(name: &OsStr, path_var: Option<&OsStr>) -> Result<OsString> {
    let owned_fallback;
    let path_var = match path_var {
        Some(p) => p,
        None => {
            owned_fallback = std::env::var_os("PATH").unwrap_or_default();
            &owned_fallback
        }
    };
    for dir in std::env::split_paths(path_var) {
        let candidate = dir.join(name);
        if is_executable_file(&candidate) {
            return Ok(candidate.into_os_string());
        }
    }
    Err(Error::Platform(io::Error::from_raw_os_error(libc::ENOENT)))
}

fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

static SIGPIPE_ONCE: Once = Once::new();

/// Installs a process-wide `SIGPIPE` handler that converts the signal into
/// `EPIPE` write errors, the way every well-behaved Unix command-line tool
/// expects. Idempotent; safe to call from every `start()`.
pub fn suppress_sigpipe_once() {
    SIGPIPE_ONCE.call_once(|| unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    });
}

fn os_to_cstring(s: &OsStr) -> io::Result<CString> {
    let bytes = s.as_bytes();
    if bytes.iter().any(|&b| b == 0) {
        return Err(io::Error::from_raw_os_error(libc::EINVAL));
    }
    CString::new(bytes).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

/// Spawned child's stdio assignment, as raw fds to `dup2` into 0/1/2.
pub struct ChildStdio {
    pub stdin: Option<RawFd>,
    pub stdout: Option<RawFd>,
    pub stderr: Option<RawFd>,
}

/// Forks and execs `program` with `args` (args[0] is conventionally the
/// program's display name, matching `execvp`'s argv[0] convention), in
/// `cwd` (if given) with environment `env` (a fully-resolved, already
/// folded list of `KEY=VALUE` pairs). Returns the child pid on success.
///
/// Runs `before_spawn` hooks are expected to have already been applied to
/// the (program, args, env, cwd) tuple by the caller; this function only
/// performs the fork/dup2/chdir/exec dance.
pub fn spawn(
    program: &OsStr,
    args: &[OsString],
    cwd: Option<&Path>,
    env: &[OsString],
    stdio: ChildStdio,
) -> Result<u32> {
    let program_c = os_to_cstring(program).map_err(Error::Platform)?;
    let mut argv_c = Vec::with_capacity(args.len() + 1);
    argv_c.push(program_c.clone());
    for a in args {
        argv_c.push(os_to_cstring(a).map_err(Error::Platform)?);
    }
    let mut argv_ptrs: Vec<*const libc::c_char> =
        argv_c.iter().map(|c| c.as_ptr()).collect();
    argv_ptrs.push(ptr::null());

    let env_c: Vec<CString> = env
        .iter()
        .map(|e| os_to_cstring(e))
        .collect::<io::Result<_>>()
        .map_err(Error::Platform)?;
    let mut envp_ptrs: Vec<*const libc::c_char> = env_c.iter().map(|c| c.as_ptr()).collect();
    envp_ptrs.push(ptr::null());

    let cwd_c = cwd
        .map(|p| os_to_cstring(p.as_os_str()))
        .transpose()
        .map_err(Error::Platform)?;

    // A pipe used only to propagate a post-fork, pre-exec failure (e.g.
    // chdir or exec itself failing) back to the parent; close-on-exec so
    // a successful exec closes it implicitly.
    let (mut err_read, err_write) = pipe_pair()?;

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(Error::spawn(
            program.to_string_lossy().into_owned(),
            io::Error::last_os_error(),
        ));
    }
    if pid == 0 {
        // Child: any failure here is reported through err_write, then
        // we _exit immediately without running destructors/atexit.
        let code = child_exec(&stdio, cwd_c.as_deref(), &program_c, &argv_ptrs, &envp_ptrs)
            .err()
            .and_then(|e| e.raw_os_error())
            .unwrap_or(libc::EINVAL);
        let bytes = code.to_ne_bytes();
        unsafe {
            libc::write(err_write.as_raw_fd(), bytes.as_ptr() as *const _, bytes.len());
            libc::_exit(127);
        }
    }

    drop(err_write);
    let mut buf = [0u8; 4];
    let mut read_so_far = 0;
    loop {
        let n = unsafe {
            libc::read(
                err_read.as_raw_fd(),
                buf[read_so_far..].as_mut_ptr() as *mut _,
                buf.len() - read_so_far,
            )
        };
        if n <= 0 {
            break;
        }
        read_so_far += n as usize;
        if read_so_far == buf.len() {
            break;
        }
    }
    // avoid a clippy-visible unused-mut without changing observable behavior
    let _ = &mut err_read;
    if read_so_far == buf.len() {
        let code = i32::from_ne_bytes(buf);
        return Err(Error::spawn(
            program.to_string_lossy().into_owned(),
            io::Error::from_raw_os_error(code),
        ));
    }
    Ok(pid as u32)
}

fn child_exec(
    stdio: &ChildStdio,
    cwd: Option<&CString>,
    program: &CString,
    argv: &[*const libc::c_char],
    envp: &[*const libc::c_char],
) -> io::Result<()> {
    unsafe {
        // dup2's destination descriptor is never close-on-exec, regardless
        // of the source's flag, so the source (still cloexec) is closed
        // implicitly by the exec below without us touching it here.
        if let Some(fd) = stdio.stdin {
            check_err(libc::dup2(fd, 0))?;
        }
        if let Some(fd) = stdio.stdout {
            check_err(libc::dup2(fd, 1))?;
        }
        if let Some(fd) = stdio.stderr {
            check_err(libc::dup2(fd, 2))?;
        }
        if let Some(cwd) = cwd {
            check_err(libc::chdir(cwd.as_ptr()))?;
        }
        // Children must not inherit an ignored SIGPIPE: reset to default
        // so that the program we're about to run sees ordinary EPIPE
        // behavior, matching what Unix tools expect of their environment.
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        check_err(libc::execve(
            program.as_ptr(),
            argv.as_ptr(),
            envp.as_ptr(),
        ))?;
    }
    unreachable!("execve only returns on error, which is handled above")
}

/// Waits for `pid` to become reapable without consuming the status
/// (`WNOWAIT`), so that a concurrent `kill()` can observe "still alive"
/// without racing a PID reused by the OS. Blocks until the child has
/// exited.
pub fn waitid_nowait(pid: u32) -> io::Result<()> {
    unsafe {
        let mut info: libc::siginfo_t = mem::zeroed();
        let rc = libc::waitid(
            libc::P_PID,
            pid as libc::id_t,
            &mut info,
            libc::WEXITED | libc::WNOWAIT,
        );
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Reaps `pid`, consuming its status. Must only be called after
/// [`waitid_nowait`] (or equivalent) has confirmed the child is exiting,
/// so this does not block.
pub fn reap(pid: u32) -> io::Result<ExitStatus> {
    let mut status: libc::c_int = 0;
    let rc = unsafe { libc::waitpid(pid as libc::pid_t, &mut status, 0) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(decode_exit_status(status))
}

/// Non-blocking reap: `Ok(None)` if `pid` is still running.
pub fn reap_nonblocking(pid: u32) -> io::Result<Option<ExitStatus>> {
    let mut status: libc::c_int = 0;
    let rc = unsafe { libc::waitpid(pid as libc::pid_t, &mut status, libc::WNOHANG) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    if rc == 0 {
        return Ok(None);
    }
    Ok(Some(decode_exit_status(status)))
}

fn decode_exit_status(status: libc::c_int) -> ExitStatus {
    unsafe {
        if libc::WIFEXITED(status) {
            ExitStatus::Exited(libc::WEXITSTATUS(status) as u32)
        } else if libc::WIFSIGNALED(status) {
            ExitStatus::Signaled(libc::WTERMSIG(status) as u8)
        } else {
            ExitStatus::Other(status)
        }
    }
}

/// Sends `SIGKILL` to `pid`. A signal to a process that has already
/// exited but not yet been reaped is delivered to a zombie and is a
/// harmless no-op from the kernel's point of view; combined with
/// [`waitid_nowait`]'s `WNOWAIT` semantics in [`crate::shared_child`],
/// this never hits a *reused* pid.
pub fn kill(pid: u32) -> io::Result<()> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}
