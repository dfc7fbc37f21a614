//! Smoke tests for the `switchboard` binary

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_connection_flags() {
    Command::cargo_bin("switchboard")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--server"))
        .stdout(predicate::str::contains("--pin"))
        .stdout(predicate::str::contains("--token"));
}

#[test]
fn test_unknown_flag_is_rejected() {
    Command::cargo_bin("switchboard")
        .unwrap()
        .arg("--no-such-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--no-such-flag"));
}
