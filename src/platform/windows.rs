//! Windows platform shim: pipe creation under the inheritance-race mutex,
//! `CreateProcess`, handle-based wait/kill.

#![allow(non_snake_case)]

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io;
use std::mem;
use std::os::windows::ffi::{OsStrExt, OsStringExt};
use std::os::windows::io::{AsRawHandle, FromRawHandle, RawHandle};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Mutex, MutexGuard, OnceLock};

use winapi::shared::minwindef::{BOOL, DWORD, FALSE, TRUE};
use winapi::um::handleapi::{CloseHandle, SetHandleInformation, INVALID_HANDLE_VALUE};
use winapi::um::namedpipeapi::CreatePipe;
use winapi::um::processthreadsapi::{
    CreateProcessW, GetExitCodeProcess, TerminateProcess, PROCESS_INFORMATION, STARTUPINFOW,
};
use winapi::um::synchapi::WaitForSingleObject;
use winapi::um::winbase::{CREATE_UNICODE_ENVIRONMENT, STARTF_USESTDHANDLES, WAIT_OBJECT_0};
use winapi::um::winnt::HANDLE;

use crate::error::{Error, Result};
use crate::status::ExitStatus;

pub const NULL_DEVICE: &str = "NUL";
pub const SHELL: [&str; 2] = ["cmd.exe", "/C"];

const HANDLE_FLAG_INHERIT: DWORD = 1;

fn check(ok: BOOL) -> io::Result<()> {
    if ok != 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// A wrapped, owned `HANDLE`, closed on drop.
pub struct Handle(RawHandle);

unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

impl Drop for Handle {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0 as HANDLE);
        }
    }
}

/// Process-wide mutex serializing pipe creation with the subsequent
/// `CreateProcess` call. Anonymous Windows pipes are inheritable at
/// creation time with no atomic way to scope that inheritance to one
/// target process; without this lock, an unrelated thread's
/// `CreateProcess` running between our pipe creation and our own spawn
/// could inherit our pipe handles into the wrong child.
static SPAWN_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct PipeSpawnGuard(MutexGuard<'static, ()>);

pub fn pipe_spawn_guard() -> PipeSpawnGuard {
    let lock = SPAWN_LOCK.get_or_init(|| Mutex::new(()));
    PipeSpawnGuard(lock.lock().unwrap_or_else(|poison| poison.into_inner()))
}

/// Creates a unidirectional, inheritable pipe. Callers must hold a
/// [`PipeSpawnGuard`] across this call and the matching `CreateProcess`.
pub fn pipe_pair() -> Result<(File, File)> {
    let mut read: HANDLE = ptr::null_mut();
    let mut write: HANDLE = ptr::null_mut();
    let mut sa = winapi::um::minwinbase::SECURITY_ATTRIBUTES {
        nLength: mem::size_of::<winapi::um::minwinbase::SECURITY_ATTRIBUTES>() as DWORD,
        lpSecurityDescriptor: ptr::null_mut(),
        bInheritHandle: TRUE,
    };
    check(unsafe { CreatePipe(&mut read, &mut write, &mut sa, 0) }).map_err(Error::Platform)?;
    unsafe {
        Ok((
            File::from_raw_handle(read as RawHandle),
            File::from_raw_handle(write as RawHandle),
        ))
    }
}

/// Marks a single handle inheritable or not, for the case where a
/// redirection target is a caller-supplied `File` rather than a pipe we
/// just created (those are inheritable by default on this platform and
/// must be pared down to just the one we're handing to the child).
pub fn set_inheritable(file: &File, inheritable: bool) -> Result<()> {
    check(unsafe {
        SetHandleInformation(
            file.as_raw_handle() as HANDLE,
            HANDLE_FLAG_INHERIT,
            if inheritable { 1 } else { 0 },
        )
    })
    .map_err(Error::Platform)
}

/// Searches `path_var` (`;`-separated, falling back to the calling
/// process's own `PATH`) for `name`, probing `PATHEXT` extensions
/// (`.exe`, `.bat`, `.cmd`, ...) when `name` has no extension of its own.
pub fn search_path(name: &OsStr, path_var: Option<&OsStr>) -> Result<OsString> {
    let owned_fallback;
    let path_var = match path_var {
        Some(p) => p,
        None => {
            owned_fallback = std::env::var_os("PATH").unwrap_or_default();
            &owned_fallback
        }
    };
    let has_extension = Path::new(name).extension().is_some();
    let exts: Vec<String> = std::env::var("PATHEXT")
        .unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".to_string())
        .split(';')
        .map(|s| s.to_string())
        .collect();
    for dir in std::env::split_paths(path_var) {
        if has_extension {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok(candidate.into_os_string());
            }
        } else {
            for ext in &exts {
                let mut candidate = dir.join(name);
                let mut combined = candidate.as_os_str().to_owned();
                combined.push(ext);
                candidate = PathBuf::from(combined);
                if candidate.is_file() {
                    return Ok(candidate.into_os_string());
                }
            }
        }
    }
    Err(Error::Platform(io::Error::from_raw_os_error(
        winapi::shared::winerror::ERROR_FILE_NOT_FOUND as i32,
    )))
}

/// Folds an environment variable name the way Windows does: uppercase, so
/// that `Path` and `PATH` collide the same way the real environment block
/// does.
pub fn fold_env_name(name: &OsStr) -> OsString {
    name.to_string_lossy().to_uppercase().into()
}

/// No `SIGPIPE` exists on Windows; broken pipes surface as ordinary
/// `ERROR_BROKEN_PIPE`/`ERROR_NO_DATA` write errors, which
/// [`crate::io_pump`] already treats as a clean EOF. Present for API
/// symmetry with the Unix shim.
pub fn suppress_sigpipe_once() {}

fn to_nullterm(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0u16)).collect()
}

/// Builds a `CreateProcessW` command line from `program` and `args`,
/// quoting each argument per the rules `CommandLineToArgvW` (and every
/// MSVC-derived argv parser) expects: backslashes only escape a following
/// quote, and only when the run of backslashes is itself adjacent to a
/// quote.
pub fn build_cmdline(program: &OsStr, args: &[OsString]) -> OsString {
    let mut out = OsString::new();
    out.push(quote_arg(program));
    for arg in args {
        out.push(" ");
        out.push(quote_arg(arg));
    }
    out
}

fn quote_arg(arg: &OsStr) -> OsString {
    let s = arg.to_string_lossy();
    if !s.is_empty() && !s.chars().any(|c| c == ' ' || c == '\t' || c == '"') {
        return arg.to_owned();
    }
    let mut quoted = String::from("\"");
    let mut backslashes = 0usize;
    for c in s.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat('\\').take(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    quoted.extend(std::iter::repeat('\\').take(backslashes * 2));
    quoted.push('"');
    OsString::from(quoted)
}

/// Builds a Windows `KEY=VALUE\0...\0\0` environment block from already
/// case-folded, deduplicated pairs.
pub fn build_env_block(vars: &[(OsString, OsString)]) -> Vec<u16> {
    let mut block = Vec::new();
    for (k, v) in vars {
        block.extend(k.encode_wide());
        block.push('=' as u16);
        block.extend(v.encode_wide());
        block.push(0);
    }
    block.push(0);
    block
}

pub struct ChildStdio {
    pub stdin: Option<RawHandle>,
    pub stdout: Option<RawHandle>,
    pub stderr: Option<RawHandle>,
}

/// Spawns `program` with a pre-assembled Windows command line (`args`
/// already quoted/escaped by the caller, per `CommandLineToArgvW` rules),
/// in `cwd` if given, with a Windows-style environment block `env`
/// (`KEY=VALUE\0...\0\0`).
pub fn spawn(
    program: &OsStr,
    cmdline: &OsStr,
    cwd: Option<&Path>,
    env_block: &[u16],
    stdio: ChildStdio,
    _guard: &PipeSpawnGuard,
) -> Result<(Handle, u32)> {
    let mut sinfo: STARTUPINFOW = unsafe { mem::zeroed() };
    sinfo.cb = mem::size_of::<STARTUPINFOW>() as DWORD;
    sinfo.dwFlags = STARTF_USESTDHANDLES;
    sinfo.hStdInput = stdio.stdin.unwrap_or(INVALID_HANDLE_VALUE) as HANDLE;
    sinfo.hStdOutput = stdio.stdout.unwrap_or(INVALID_HANDLE_VALUE) as HANDLE;
    sinfo.hStdError = stdio.stderr.unwrap_or(INVALID_HANDLE_VALUE) as HANDLE;

    let mut pinfo: PROCESS_INFORMATION = unsafe { mem::zeroed() };
    let mut cmdline_w = to_nullterm(cmdline);
    let appname_w = to_nullterm(program);
    let cwd_w = cwd.map(|p| to_nullterm(p.as_os_str()));

    let result = check(unsafe {
        CreateProcessW(
            appname_w.as_ptr(),
            cmdline_w.as_mut_ptr(),
            ptr::null_mut(),
            ptr::null_mut(),
            TRUE,
            CREATE_UNICODE_ENVIRONMENT,
            env_block.as_ptr() as _,
            cwd_w.as_ref().map(|w| w.as_ptr()).unwrap_or(ptr::null()),
            &mut sinfo,
            &mut pinfo,
        )
    });
    let program_display = program.to_string_lossy().into_owned();
    result.map_err(|e| Error::spawn(program_display, e))?;

    unsafe {
        CloseHandle(pinfo.hThread);
    }
    Ok((Handle(pinfo.hProcess as RawHandle), pinfo.dwProcessId))
}

/// Blocks until `handle`'s process has exited and returns its exit code.
pub fn wait(handle: &Handle) -> io::Result<ExitStatus> {
    let rc = unsafe { WaitForSingleObject(handle.0 as HANDLE, winapi::um::winbase::INFINITE) };
    if rc != WAIT_OBJECT_0 {
        return Err(io::Error::last_os_error());
    }
    get_exit_code(handle)
}

/// Non-blocking poll: `Ok(None)` if still running.
pub fn try_wait(handle: &Handle) -> io::Result<Option<ExitStatus>> {
    let rc = unsafe { WaitForSingleObject(handle.0 as HANDLE, 0) };
    match rc {
        WAIT_OBJECT_0 => get_exit_code(handle).map(Some),
        winapi::um::winbase::WAIT_TIMEOUT => Ok(None),
        _ => Err(io::Error::last_os_error()),
    }
}

fn get_exit_code(handle: &Handle) -> io::Result<ExitStatus> {
    let mut code: DWORD = 0;
    check(unsafe { GetExitCodeProcess(handle.0 as HANDLE, &mut code) })?;
    Ok(ExitStatus::Exited(code))
}

pub fn terminate(handle: &Handle) -> io::Result<()> {
    let ok = unsafe { TerminateProcess(handle.0 as HANDLE, 1) };
    if ok == FALSE {
        let err = io::Error::last_os_error();
        // Already-exited processes report ERROR_ACCESS_DENIED or similar;
        // treat as success the same way POSIX kill treats ESRCH.
        if try_wait_is_exited(handle) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

fn try_wait_is_exited(handle: &Handle) -> bool {
    matches!(try_wait(handle), Ok(Some(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(arg: &str) -> String {
        // CommandLineToArgvW isn't linked here; this exercises the same
        // backslash-run/quote logic build_cmdline uses, asserting it
        // produces the bytes a correct MSVC argv parser expects rather
        // than re-deriving an independent parser to compare against.
        quote_arg(OsStr::new(arg)).to_string_lossy().into_owned()
    }

    #[test]
    fn plain_words_are_not_quoted() {
        assert_eq!(roundtrip("hello"), "hello");
    }

    #[test]
    fn empty_and_spacey_args_get_quoted() {
        assert_eq!(roundtrip(""), "\"\"");
        assert_eq!(roundtrip("a b"), "\"a b\"");
    }

    #[test]
    fn trailing_backslashes_before_the_closing_quote_are_doubled() {
        assert_eq!(roundtrip(r"a\"), "\"a\\\\\"");
    }

    #[test]
    fn embedded_quotes_are_escaped() {
        assert_eq!(roundtrip(r#"a"b"#), "\"a\\\"b\"");
    }

    #[test]
    fn build_cmdline_joins_program_and_args_with_single_spaces() {
        let cmdline = build_cmdline(
            OsStr::new("prog.exe"),
            &[OsString::from("one"), OsString::from("two three")],
        );
        assert_eq!(cmdline.to_string_lossy(), "prog.exe one \"two three\"");
    }

    #[test]
    fn env_block_is_null_separated_and_double_null_terminated() {
        let block = build_env_block(&[
            (OsString::from("A"), OsString::from("1")),
            (OsString::from("B"), OsString::from("2")),
        ]);
        let s = String::from_utf16(&block).unwrap();
        assert_eq!(s, "A=1\0B=2\0\0");
    }
}
