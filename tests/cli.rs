//! Command-line behaviour of dhcpfrontd

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn dhcpfrontd() -> Command {
    Command::cargo_bin("dhcpfrontd").unwrap()
}

#[test]
fn test_help() {
    dhcpfrontd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("DHCP client frontend"))
        .stdout(predicate::str::contains("--ipc-fd"));
}

#[test]
fn test_version() {
    dhcpfrontd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_check_valid_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[capture]\nbuffer_size = 8192\n\n[interfaces]\nautoconf = [\"em0\"]").unwrap();

    dhcpfrontd()
        .arg("-n")
        .arg("-c")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("configuration OK"));
}

#[test]
fn test_check_missing_config_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();

    dhcpfrontd()
        .arg("-n")
        .arg("-c")
        .arg(dir.path().join("absent.toml"))
        .assert()
        .success();
}

#[test]
fn test_invalid_config_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[capture]\nbuffer_size = 4").unwrap();

    dhcpfrontd()
        .arg("-n")
        .arg("-c")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("buffer size"));
}

#[test]
fn test_closed_main_channel_descriptor() {
    let dir = tempfile::tempdir().unwrap();

    dhcpfrontd()
        .arg("-c")
        .arg(dir.path().join("absent.toml"))
        .arg("--ipc-fd")
        .arg("250")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not open"));
}
