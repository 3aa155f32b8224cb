//! Helper binary contract tests
//!
//! The helper must refuse to proceed without its mandatory arguments,
//! exiting with the distinguished code 127 and a diagnostic on stderr
//! before any channel connection is attempted.

use std::process::Command;

fn helper() -> Command {
    Command::new(env!("CARGO_BIN_EXE_seatdm-x11-helper"))
}

#[test]
fn test_no_arguments_exits_127() {
    let output = helper().output().unwrap();
    assert_eq!(output.status.code(), Some(127));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--socket"), "stderr: {}", stderr);
}

#[test]
fn test_missing_auth_exits_127() {
    // The socket path does not exist: a connection attempt would fail with
    // exit 1, so code 127 proves validation runs first
    let output = helper()
        .args(["--socket", "/nonexistent/seatdm/channel"])
        .args(["--seat", "seat0"])
        .args(["--vt", "7"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(127));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--auth"), "stderr: {}", stderr);
}

#[test]
fn test_missing_seat_exits_127() {
    let output = helper()
        .args(["--socket", "/nonexistent/seatdm/channel"])
        .args(["--vt", "7"])
        .args(["--auth", "/tmp/seatdm-test-auth"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(127));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--seat"), "stderr: {}", stderr);
}

#[test]
fn test_non_numeric_vt_exits_127() {
    let output = helper()
        .args(["--socket", "/nonexistent/seatdm/channel"])
        .args(["--seat", "seat0"])
        .args(["--vt", "seven"])
        .args(["--auth", "/tmp/seatdm-test-auth"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(127));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("number"), "stderr: {}", stderr);
}

#[test]
fn test_unreachable_socket_fails_without_usage_code() {
    // All mandatory flags present: the failure is the connection, not usage
    let output = helper()
        .args(["--socket", "/nonexistent/seatdm/channel"])
        .args(["--seat", "seat0"])
        .args(["--vt", "7"])
        .args(["--auth", "/tmp/seatdm-test-auth"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
}
