//! CLI surface tests that do not require a running log store.

use std::process::Command;

#[test]
fn help_lists_every_subcommand() {
    let output = Command::new(env!("CARGO_BIN_EXE_botbus"))
        .arg("--help")
        .output()
        .expect("run botbus");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for subcommand in ["ping", "publish", "health", "dlq", "lag"] {
        assert!(stdout.contains(subcommand), "missing subcommand {subcommand}");
    }
}

#[test]
fn version_flag_reports_the_binary() {
    let output = Command::new(env!("CARGO_BIN_EXE_botbus"))
        .arg("--version")
        .output()
        .expect("run botbus");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("botbus"));
}

#[test]
fn unknown_subcommand_is_rejected() {
    let output = Command::new(env!("CARGO_BIN_EXE_botbus"))
        .arg("frobnicate")
        .output()
        .expect("run botbus");

    assert!(!output.status.success());
}
