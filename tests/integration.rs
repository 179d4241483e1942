//! End-to-end scenarios spanning more than one module: pipeline status
//! reduction, concurrent kill/wait race-freedom, and `dir()` vs.
//! `cmd_path` resolution.
#![cfg(unix)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use proctree::Expression;

#[test]
fn three_stage_pipeline_reduces_to_the_rightmost_checked_failure() {
    let output = (Expression::cmd("echo").arg("a b c")
        | Expression::cmd("false")
        | Expression::cmd("tr").args(["a-z", "A-Z"]))
    .run();
    // `false` (checked, non-zero) sits in the middle; the rightmost
    // command (`tr`) succeeds, so the pipefail rule falls back to the
    // middle's checked failure rather than reporting overall success.
    let err = output.unwrap_err();
    assert!(err.status().is_some());
}

#[test]
fn unchecked_middle_stage_does_not_mask_a_real_rightmost_failure() {
    let result = (Expression::cmd("echo").arg("x")
        | Expression::cmd("false").unchecked()
        | Expression::cmd("false"))
    .run();
    let err = result.unwrap_err();
    assert!(err.status().is_some());
}

#[test]
fn concurrent_kill_and_wait_never_race_a_recycled_pid() {
    let handle = Arc::new(Expression::cmd("sleep").arg("2").start().unwrap());
    let waiter = {
        let handle = handle.clone();
        thread::spawn(move || handle.wait())
    };
    thread::sleep(Duration::from_millis(50));
    handle.kill().unwrap();
    let output = waiter.join().unwrap().unwrap();
    assert!(!output.status.success());
    // A second kill after the process has already been reaped must
    // remain a safe no-op, never touching a pid the kernel has reused.
    handle.kill().unwrap();
}

#[test]
fn cmd_path_resolves_against_this_processes_cwd_not_the_childs_dir() {
    // `dir()` changes where the *child* runs, but a relative `cmd_path`
    // must still resolve against our own process's cwd, not the
    // child's new one, so the script is still found.
    let script_name = format!("proctree_test_script_{}.sh", std::process::id());
    let script_path = std::env::current_dir().unwrap().join(&script_name);
    std::fs::write(&script_path, "#!/bin/sh\necho resolved\n").unwrap();
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script_path, perms).unwrap();
    }
    let other_dir = tempfile::tempdir().unwrap();

    let output = Expression::cmd_path(format!("./{script_name}"))
        .dir(other_dir.path())
        .stdout_capture()
        .run();

    std::fs::remove_file(&script_path).unwrap();
    assert_eq!(output.unwrap().stdout, b"resolved\n");
}

#[test]
fn reader_dropped_early_kills_and_reaps_the_child() {
    use std::io::Read;
    let mut reader = Expression::cmd("yes").reader().unwrap();
    let mut buf = [0u8; 16];
    reader.read(&mut buf).unwrap();
    drop(reader);
    // If the process were not reaped, a subsequent full-crate test run
    // would accumulate zombies; nothing to assert directly here beyond
    // drop() not panicking/hanging.
}
