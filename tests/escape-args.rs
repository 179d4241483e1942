//! Arguments survive a round trip through `Expression::cmd(...).arg(...)`
//! unmodified, including ones that would be troublesome for a naive
//! command-line assembler (spaces, quotes, backslashes, empty strings).
#![cfg(unix)]

use proctree::Expression;

#[test]
fn escape_args() {
    for &arg in &[
        "x",
        "",
        " ",
        "  ",
        r" \ ",
        r" \\ ",
        r" \\\ ",
        r#"""#,
        r#""""#,
        r#"\"\\""#,
        "æ÷",
        "šđ",
        "本",
        "❤",
        "☃",
    ] {
        let output = Expression::cmd("sh")
            .arg("-c")
            .arg("printf '%s' \"$1\"")
            .arg("sh")
            .arg(arg)
            .stdout_capture()
            .run()
            .unwrap();
        assert_eq!(String::from_utf8(output.stdout).unwrap(), arg);
    }
}
