#![cfg(unix)]

use crate::Expression;

#[test]
fn wait_returns_captured_stdout_and_success_status() {
    let output = Expression::cmd("echo").arg("hello").stdout_capture().run().unwrap();
    assert!(output.status.success());
    assert_eq!(output.stdout, b"hello\n");
}

#[test]
fn unchecked_leaf_does_not_error_on_non_zero_exit() {
    let output = Expression::cmd("false").unchecked().run().unwrap();
    assert!(!output.status.success());
}

#[test]
fn checked_leaf_errors_on_non_zero_exit() {
    let err = Expression::cmd("false").run().unwrap_err();
    assert!(err.status().is_some());
}

#[test]
fn start_then_wait_reports_live_pids_only_before_reaping() {
    let handle = Expression::cmd("sleep").arg("1").start().unwrap();
    let pids = handle.pids();
    assert_eq!(pids.len(), 1);
    assert!(pids[0] > 0);
    handle.wait().unwrap();
    assert!(handle.pids().is_empty());
}

#[test]
fn try_wait_is_none_while_running_then_some_after_exit() {
    let handle = Expression::cmd("sleep").arg("1").start().unwrap();
    assert!(handle.try_wait().unwrap().is_none());
    handle.wait().unwrap();
}

#[test]
fn kill_is_idempotent_and_safe_after_wait() {
    let handle = Expression::cmd("sleep").arg("5").start().unwrap();
    handle.kill().unwrap();
    let output = handle.wait().unwrap();
    assert!(!output.status.success());
    // calling again after the process is reaped must not error
    handle.kill().unwrap();
}

#[test]
fn reader_streams_stdout_and_close_reaps_cleanly() {
    use std::io::Read;
    let mut reader = Expression::cmd("printf").arg("line\n").reader().unwrap();
    let mut buf = String::new();
    reader.read_to_string(&mut buf).unwrap();
    assert_eq!(buf, "line\n");
    reader.close().unwrap();
}

#[test]
fn pipeline_wait_reduces_both_sides_concurrently() {
    let output = (Expression::cmd("echo").arg("a\nb\nc")
        | Expression::cmd("sort"))
    .stdout_capture()
    .run()
    .unwrap();
    assert_eq!(output.stdout, b"a\nb\nc\n");
}
