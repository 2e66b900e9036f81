//! CLI integration tests

use std::process::Command;

fn kjctl() -> Command {
    Command::new(env!("CARGO_BIN_EXE_kjctl"))
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = kjctl()
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("kube-janitor"), "Should show app name");
    assert!(stdout.contains("findings"), "Should show findings command");
    assert!(stdout.contains("status"), "Should show status command");
    assert!(stdout.contains("--api-url"), "Should show api-url option");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = kjctl()
        .arg("--version")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("kjctl"), "Should show binary name");
}

/// Test findings subcommand help
#[test]
fn test_findings_help() {
    let output = kjctl()
        .args(["findings", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Findings help should succeed");
    assert!(stdout.contains("--kind"), "Should show kind option");
    assert!(stdout.contains("--aged-only"), "Should show aged-only option");
}

/// Test that an unknown kind is rejected before any request is made
#[test]
fn test_findings_rejects_unknown_kind() {
    let output = kjctl()
        .args(["findings", "--kind", "zombie"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Unknown kind should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("zombie"), "Should mention the bad value");
}

/// Test that an unreachable agent is reported as an error
#[test]
fn test_status_unreachable_agent() {
    let output = kjctl()
        .args(["--api-url", "http://127.0.0.1:1", "status"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Unreachable agent should fail");
}
