//! Behavioural tests for the `osprobe` CLI entrypoint.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command isolated from the developer's configuration files and
/// environment.
fn hermetic(home: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("osprobe");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env(
            "OSPROBE_CONTRACTS_DIR",
            concat!(env!("CARGO_MANIFEST_DIR"), "/contracts"),
        )
        .env_remove("OSPROBE_CONFIG_PATH")
        .env_remove("OSPROBE_DEVICE_TYPE")
        .env_remove("OSPROBE_OS_VERSION")
        .env_remove("OSPROBE_API_KEY");
    cmd
}

fn home() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"))
}

#[test]
fn cli_without_arguments_prints_help() {
    let mut cmd = cargo_bin_cmd!("osprobe");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn plan_lists_interactive_tests_for_the_device() {
    let tmp = home();
    hermetic(&tmp)
        .args([
            "plan",
            "--device-type",
            "raspberrypi3",
            "--os-version",
            "2.0.6+rev3.prod",
            "--interactive",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "(raspberrypi3) on the physical worker: 9 tests",
        ))
        .stdout(predicate::str::contains(
            "  raspberrypi3: Bluetooth should discover nearby devices",
        ))
        .stdout(predicate::str::contains(
            "raspberrypi3: Device should report OS version 2.0.6+rev3.prod",
        ));
}

#[test]
fn plan_without_interactive_lists_automated_tests() {
    let tmp = home();
    hermetic(&tmp)
        .args(["plan", "--device-type", "qemux86-64"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "(qemux86-64) on the emulated worker: 5 tests",
        ))
        .stdout(predicate::str::contains("Bluetooth").not());
}

#[test]
fn plan_rejects_unknown_device_type() {
    let tmp = home();
    hermetic(&tmp)
        .args(["plan", "--device-type", "commodore-64"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("commodore-64"));
}

#[test]
fn plan_requires_a_device_type() {
    let tmp = home();
    hermetic(&tmp)
        .arg("plan")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("OSPROBE_DEVICE_TYPE"));
}

#[test]
fn run_reports_missing_api_key() {
    let tmp = home();
    hermetic(&tmp)
        .args([
            "run",
            "--device-type",
            "qemux86-64",
            "--os-version",
            "2.0.6+rev3.prod",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("OSPROBE_API_KEY"));
}
