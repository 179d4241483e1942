use crate::error::Error;
use crate::status::{ExitStatus, Status};
use std::io;

#[test]
fn spawn_error_carries_program_and_kind() {
    let err = Error::spawn("nonexistent-binary", io::Error::from(io::ErrorKind::NotFound));
    assert_eq!(err.kind(), Some(io::ErrorKind::NotFound));
    assert!(err.to_string().contains("nonexistent-binary"));
}

#[test]
fn non_zero_exit_exposes_its_status() {
    let status = Status::new(ExitStatus::Exited(7));
    let err = Error::NonZeroExit(status);
    assert_eq!(err.kind(), None);
    assert_eq!(err.status(), Some(&status));
    assert!(err.to_string().contains("non-zero"));
}

#[test]
fn io_error_converts_via_from() {
    let err: Error = io::Error::from(io::ErrorKind::BrokenPipe).into();
    assert_eq!(err.kind(), Some(io::ErrorKind::BrokenPipe));
}
