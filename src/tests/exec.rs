#![cfg(unix)]

use crate::Expression;

#[test]
fn env_set_then_removed_in_the_same_chain_is_absent() {
    let output = Expression::cmd("sh")
        .arg("-c")
        .arg("echo -n \"[$FOO]\"")
        .env("FOO", "bar")
        .env_remove("FOO")
        .stdout_capture()
        .run()
        .unwrap();
    assert_eq!(output.stdout, b"[]");
}

#[test]
fn env_set_without_removal_is_visible_to_the_child() {
    let output = Expression::cmd("sh")
        .arg("-c")
        .arg("echo -n \"[$FOO]\"")
        .env("FOO", "bar")
        .stdout_capture()
        .run()
        .unwrap();
    assert_eq!(output.stdout, b"[bar]");
}

#[test]
fn full_env_replaces_the_inherited_environment() {
    let output = Expression::cmd("sh")
        .arg("-c")
        .arg("echo -n \"$HOME-$ONLY\"")
        .full_env([("ONLY", "var")])
        .stdout_capture()
        .run()
        .unwrap();
    assert_eq!(output.stdout, b"-var");
}

#[test]
fn dir_changes_the_childs_working_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let output = Expression::cmd("pwd")
        .dir(tmp.path())
        .stdout_capture()
        .run()
        .unwrap();
    let reported = String::from_utf8(output.stdout).unwrap();
    assert_eq!(
        reported.trim_end(),
        tmp.path().canonicalize().unwrap().to_str().unwrap()
    );
}

#[test]
fn stdin_bytes_feeds_a_piped_in_buffer() {
    let output = Expression::cmd("cat")
        .stdin_bytes(b"from memory".to_vec())
        .stdout_capture()
        .run()
        .unwrap();
    assert_eq!(output.stdout, b"from memory");
}

#[test]
fn large_stdin_does_not_deadlock_against_piped_stdout() {
    let data = vec![b'x'; 10 * 1024 * 1024];
    let output = Expression::cmd("cat")
        .stdin_bytes(data.clone())
        .stdout_capture()
        .run()
        .unwrap();
    assert_eq!(output.stdout.len(), data.len());
}

#[test]
fn pipe_failure_on_the_right_side_kills_and_reaps_the_left() {
    let result = (Expression::cmd("sleep").arg("5")
        | Expression::cmd("this-program-does-not-exist-anywhere"))
    .run();
    assert!(result.is_err());
}

#[test]
fn before_spawn_hook_can_append_an_argument() {
    let output = Expression::cmd("echo")
        .stdout_capture()
        .before_spawn(|cmd: &mut crate::RawCommand| {
            cmd.args.push("hooked".into());
            Ok(())
        })
        .run()
        .unwrap();
    assert_eq!(output.stdout, b"hooked\n");
}
